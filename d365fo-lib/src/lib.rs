//! D365 Finance & Operations client library
//!
//! An async client for the Microsoft Dynamics 365 Finance & Operations
//! OData and Metadata APIs, with a version-aware metadata cache, a
//! schema-aware OData URL builder, and session-tracked background
//! metadata synchronization.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod profile;
pub mod sync;
pub mod version;

mod client;

pub use client::*;
pub use config::FOClientConfig;
pub use error::Error;
