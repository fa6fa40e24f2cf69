//! Authenticated API client for the courier storefront, shared by the CLI and other front-ends.
//!
//! Requests flow through [`api::ApiClient`]: the endpoint classifier decides whether a
//! credential is attached, and an expired access credential is refreshed at most once
//! no matter how many requests fail with 401 at the same time.

pub mod api;
pub mod auth;
pub mod config;
pub mod services;
