//! The five pipeline stages, run in the fixed order
//! validation → rate limiting → authentication → authorization → tracing,
//! wired together by [`crate::pipeline`].

pub mod auth;
pub mod authz;
pub mod rate_limit;
pub mod tracing_mw;
pub mod validation;
