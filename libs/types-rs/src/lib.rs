//! Types shared between the SentinelVote server and its clients.

pub mod auth;
pub mod election;
pub mod votes;
