//! Client for the external social publishing platform.
//!
//! This crate provides:
//!
//! - **PlatformClient**: the operations the scheduler consumes (posts, comments,
//!   stories, credential introspection), as a trait so tests can stub them
//! - **GraphClient**: an HTTP implementation against a Graph-style API
//! - **TokenResolver**: exchange of a session credential for a channel-scoped one
//! - **PlatformError / ErrorKind**: the failure taxonomy with remediation hints

mod client;
mod error;
mod token;
mod types;

pub use client::{GraphClient, PlatformClient};
pub use error::{ErrorKind, PlatformError};
pub use token::TokenResolver;
pub use types::*;
