//! Core primitives shared by every intercept.
//!
//! Command classification, the hook wire format, session naming, the
//! hardened runtime store and configuration live here.

pub mod command;
pub mod config;
pub mod error;
pub mod hook;
pub mod limits;
pub mod output;
pub mod session;
pub mod store;
pub mod time;
