//! Integration tests for TiHoMo Identity
//!
//! These tests verify the behavior of the API endpoints with a real
//! (throwaway) database and the auth middleware in place.

mod api_tests;
mod gateway_tests;
mod verification_tests;
