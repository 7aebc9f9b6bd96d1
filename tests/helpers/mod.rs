//! Shared test helpers for the integration tests.
//!
//! Note: We use `helpers/mod.rs` instead of `helpers.rs` + `helpers/` because
//! Cargo auto-discovers top-level `.rs` files in `tests/` as integration tests.

#![allow(dead_code)]

pub mod fake_agent;
