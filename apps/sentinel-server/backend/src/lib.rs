//! `sentinel-server` is the election backend for SentinelVote. Voters log in,
//! register a public key, and cast votes signed with a linkable ring
//! signature over the anonymity set of all registered keys. Votes are
//! recorded on an external append-only ledger; the server itself only keeps
//! accounts, keys, and the election's state.
//!
//! Each run provisions a fresh SQLite database sized for the expected number
//! of users (see [`provision`]).

#![warn(
    clippy::all,
    clippy::todo,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::mem_forget,
    clippy::unused_self,
    clippy::filter_map_next,
    clippy::needless_continue,
    clippy::needless_borrow,
    clippy::match_wildcard_for_single_variants,
    clippy::if_let_mutex,
    clippy::await_holding_lock,
    clippy::imprecise_flops,
    clippy::suboptimal_flops,
    clippy::lossy_float_literal,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::fn_params_excessive_bools,
    clippy::exit,
    clippy::inefficient_to_string,
    clippy::linkedlist,
    clippy::macro_use_imports,
    clippy::option_option,
    clippy::verbose_file_reads,
    clippy::unnested_or_patterns,
    clippy::str_to_string,
    rust_2018_idioms,
    future_incompatible,
    nonstandard_style,
    missing_debug_implementations
)]
#![deny(unreachable_pub)]
#![allow(elided_lifetimes_in_paths, clippy::type_complexity)]
#![forbid(unsafe_code)]
#![cfg_attr(not(test), warn(clippy::print_stdout, clippy::dbg_macro))]

pub mod anonymity_set;
pub mod app;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod election;
pub mod ledger;
pub mod log;
pub mod provision;
pub mod state;
pub mod vote;
pub mod voter;
