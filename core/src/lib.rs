//! # smbscout engine
//!
//! Probing, aggregation and authentication for `smbscout`.
//!
//! * **[`network`]**: the TCP connect prober.
//! * **[`scanner`]**: the bounded, deadline-guarded scan coordinator and the
//!   result aggregator.
//! * **[`auth`]**: sequential single-attempt authentication.

pub mod auth;
pub mod network;
pub mod scanner;
