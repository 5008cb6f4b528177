//! Data models

mod api_key;
mod user;

pub use api_key::*;
pub use user::*;
