//! Shared protocol definitions for the `taskdeck` GraphQL wire format.

pub mod codec;
pub mod event;
pub mod operation;
pub mod task;
pub mod ws;
