pub mod auth_context;
pub mod rate_limit;
pub mod request_meta;
