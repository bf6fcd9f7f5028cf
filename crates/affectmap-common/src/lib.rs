//! affectmap-common — Shared error type and HTTP client wrapper used across
//! all Affectmap crates.

pub mod error;
pub mod http;

pub use error::{AffectmapError, Result};
pub use http::ScopedClient;
