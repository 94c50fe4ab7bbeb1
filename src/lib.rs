//! Concord chat server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod notify;
pub mod presence;
pub mod registry;
pub mod routes;
pub mod state;
pub mod ws;
