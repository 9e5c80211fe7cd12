//! Utilities for testing code built on sessions: tracking replacements for the socket and the
//!  application callback that record what passes through them. They are used by this crate's
//!  own tests and exported so applications can use them in theirs.

pub mod addr;
pub mod send_socket;
pub mod dispatcher;
pub mod discovery_server;
