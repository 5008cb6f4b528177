//! Common test utilities and helpers
//!
//! This module provides shared test infrastructure including:
//! - Test data factories
//! - Test database setup
//! - API test client

pub mod test_app;

pub use factories::*;
pub use test_app::*;
