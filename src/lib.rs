/// SAST Link library
///
/// The binary in `main.rs` only bootstraps; everything else lives here so
/// integration tests can drive the router directly.
pub mod account;
pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod credential;
pub mod db;
pub mod error;
pub mod idp;
pub mod jobs;
pub mod mailer;
pub mod oauth;
pub mod rate_limit;
pub mod response;
pub mod server;
pub mod verification;
