//! Shared data model, target enumeration and configuration for `smbscout`.

pub mod config;
pub mod error;
pub mod network;
pub mod scan;
