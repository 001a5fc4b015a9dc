//! deckstore library
//!
//! State store, generation task engine and crash-safe persistence for a
//! slide-deck editor. Exposed as a library for the UI shell and for tests.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod integrity;
pub mod migrations;
pub mod persistence;
pub mod services;
pub mod storage;
pub mod store;

#[cfg(test)]
pub(crate) mod test_server;
