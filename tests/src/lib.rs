//! End-to-end tests over loopback sockets.

mod auth;
mod scan;
