//! Security utilities for credential protection.
//!
//! This module provides:
//! - Credential storage with secure memory handling
//! - Redacted formatting so secrets never reach logs or error messages
//!
//! # Security Guarantees
//! - Client secrets are stored in `Zeroizing` containers for automatic memory clearing
//! - Token values are wrapped the same way (see [`crate::auth::AccessToken`])
//! - URLs are passed through [`crate::error::redact_url`] before logging
//!
//! # Module Structure
//! - `credentials`: Secure credential container with automatic memory zeroing

mod credentials;

pub use credentials::Credentials;
