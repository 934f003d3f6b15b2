//! `taskdeck`: terminal task list client for a GraphQL task API.

pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod net;
pub mod reconcile;
pub mod transport;
pub mod ui;
