//! fetch-har library crate.
//!
//! Wraps a fetch-style HTTP client so that every physical request it makes
//! is recorded as a HAR 1.2 entry, redirects and per-phase timings
//! included. The stable, supported API surface is exposed via
//! [`crate::api`] and [`crate::prelude`].
//!
//! Other modules are used by the CLI implementation and may change more
//! frequently.

pub mod api;
pub mod prelude;

pub mod capture;
pub mod cli;
pub mod commands;
pub mod config;
pub mod correlation;
pub mod error;
pub mod fetch;
pub mod har;
pub mod normalize;
pub mod router;
pub mod size;
pub mod timing;
pub mod transport;
