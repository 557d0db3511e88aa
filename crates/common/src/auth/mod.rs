//! Authentication and authorization utilities
//!
//! Provides:
//! - API key validation
//! - Tenant context extraction

use crate::errors::{AppError, Result};
use axum::{extract::FromRequestParts, http::request::Parts};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Extracted authentication context available to handlers
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Tenant ID
    pub tenant_id: Uuid,

    /// User ID, when the caller supplies one
    pub user_id: Option<Uuid>,

    /// API key (if authenticated via API key)
    pub api_key: Option<String>,

    /// Request ID for tracing and idempotency
    pub request_id: Option<String>,
}

/// Hash an API key for storage
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Validate an API key against a stored hash
pub fn validate_api_key(api_key: &str, stored_hash: &str) -> bool {
    hash_api_key(api_key) == stored_hash
}

/// Extract API key from Authorization header
pub fn extract_api_key(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Axum extractor for AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        // Client-supplied idempotency key; absent means no deduplication
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // Extract tenant ID
        let tenant_id = parts
            .headers
            .get("x-tenant-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing or invalid X-Tenant-ID header".to_string(),
            })?;

        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok());

        // Extract API key
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let api_key = extract_api_key(auth_header).map(String::from);

        // For now, accept any API key with the expected prefix
        // In production, this would validate against stored hashes
        if let Some(ref key) = api_key {
            if !key.starts_with("dk_") {
                return Err(AppError::InvalidApiKey);
            }
        }

        Ok(AuthContext {
            tenant_id,
            user_id,
            api_key,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_api_key() {
        let key = "dk_test_12345";
        let hash = hash_api_key(key);
        assert!(validate_api_key(key, &hash));
        assert!(!validate_api_key("wrong_key", &hash));
    }

    #[test]
    fn test_extract_api_key() {
        assert_eq!(extract_api_key("Bearer dk_123"), Some("dk_123"));
        assert_eq!(extract_api_key("dk_123"), None);
        assert_eq!(extract_api_key("Basic abc"), None);
    }
}
