//! Client for the HTTP gateway in front of the vote ledger.
//!
//! The gateway exposes two endpoints: an enrollment endpoint that exchanges
//! administrative credentials for a short-lived bearer token, and an
//! invocation endpoint that runs a chaincode method with positional string
//! arguments. See [`Client`].

mod client;
mod result;

pub use client::*;
pub use result::*;
