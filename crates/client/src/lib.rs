//! Client code for warmdb.
//!
//! This crate provides the HTTP side of remote builds: posting a build
//! specification to a peer and decoding the settings it answers with.

pub mod remote;

pub use remote::{HttpRemoteBuilder, RemoteConfig, RemoteError};
