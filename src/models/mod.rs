//! # Data Models
//!
//! Response bodies of the connector's HTTP surface.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "travis-connector".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// Whether GitHub OAuth credentials are configured
    pub oauth_enabled: bool,
}

/// Result of a successful `state` check
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StateValidation {
    pub valid: bool,
}
