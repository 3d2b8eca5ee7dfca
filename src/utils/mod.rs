//! Utility modules and shared functionality

pub mod errors;
pub mod http;
pub mod path;
pub mod rate_limit;
