//! `taskdeck` development server library.
//!
//! An in-memory task API speaking GraphQL over HTTP and
//! `graphql-transport-ws` over WebSocket. Exposed for embedding in tests.

pub mod config;
pub mod server;
pub mod store;
