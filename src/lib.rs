//! amoCRM API client library.
//!
//! This library centralizes OAuth2 authentication, per-account domain
//! resolution and construction of request handlers for the amoCRM v4 REST API.
//!
//! # Modules
//!
//! - `client`: `ApiClient` facade and entity-service factories.
//! - `config`: Configuration management.
//! - `dispatcher`: Per-service request dispatcher with refresh-and-retry.
//! - `domain`: Account base domain parsing.
//! - `entity_type`: Entity-type scopes for tags and custom fields.
//! - `errors`: Error handling types.
//! - `oauth`: OAuth2 session, token exchanges and rotation callback.
//! - `services`: Entity services (leads, contacts, companies, ...).
//! - `token`: Access token state.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod entity_type;
pub mod errors;
pub mod oauth;
pub mod services;
pub mod token;

pub use client::ApiClient;
pub use errors::ApiError;
pub use token::TokenState;
