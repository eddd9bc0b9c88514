//! GCP transport module
//!
//! Auth, HTTP plumbing, and the platform client the resource layer talks
//! through.
//!
//! # Module Structure
//!
//! - [`auth`] - authentication via Application Default Credentials
//! - [`client`] - the regional platform client and operations sub-surface
//! - [`http`] - HTTP utilities for REST API calls

pub mod auth;
pub mod client;
pub mod http;
