//! HTTP surface: the transaction command endpoint, thin admin/read routes,
//! and the bearer-token middleware that resolves a [`tally_auth::Principal`].

pub mod app;
pub mod config;
pub mod middleware;
