//! # Varve - Immutable Fact Database Server
//!
//! Library surface of the Varve binary: the HTTP API and the CLI.
//!
//! The binary in `main.rs` is a thin shell over these modules; exposing
//! them as a library lets the integration tests drive the API router
//! without starting a real server.

pub mod api;
pub mod cli;
