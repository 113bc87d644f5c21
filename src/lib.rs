//! modelgate - OpenAI-compatible gateway with provider routing and fallback chains.

pub mod app;
mod domain;
mod gateway;
mod infra;
mod shared;

pub(crate) use domain::{api_keys, fallbacks, providers, sessions, users};
pub(crate) use infra::{db, settings, usage_logs};
