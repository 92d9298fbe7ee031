// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared row model, retry policy, configuration, and secret plumbing for the export service.

pub mod auth;
pub mod config;
pub mod retry;
pub mod secrets;
pub mod types;

pub use types::{Row, Schema, Value};
