//! Authentication for the Langbase client.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;

use crate::errors::{LangbaseError, LangbaseResult};

/// Authentication provider trait.
pub trait AuthProvider: Send + Sync {
    /// Apply authentication to request headers.
    fn apply_auth(&self, headers: &mut HashMap<String, String>);

    /// Get the authentication scheme name.
    fn scheme(&self) -> &str;

    /// Validate the credentials.
    fn validate(&self) -> LangbaseResult<()>;
}

/// API key authentication provider using a Bearer token.
#[derive(Clone)]
pub struct ApiKeyAuth {
    api_key: SecretString,
}

impl ApiKeyAuth {
    /// Creates a new API key authentication provider.
    pub fn new(api_key: SecretString) -> Self {
        Self { api_key }
    }

    /// Creates from a string API key.
    pub fn from_string(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
        }
    }

    /// Gets a hint of the API key for debugging (last 4 characters).
    pub fn key_hint(&self) -> String {
        let key = self.api_key.expose_secret();
        let count = key.chars().count();
        if count > 4 {
            let tail: String = key.chars().skip(count - 4).collect();
            format!("...{}", tail)
        } else {
            "****".to_string()
        }
    }
}

impl AuthProvider for ApiKeyAuth {
    fn apply_auth(&self, headers: &mut HashMap<String, String>) {
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key.expose_secret()),
        );
    }

    fn scheme(&self) -> &str {
        "Bearer"
    }

    fn validate(&self) -> LangbaseResult<()> {
        if self.api_key.expose_secret().trim().is_empty() {
            return Err(LangbaseError::configuration("API key cannot be empty"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuth")
            .field("api_key", &"[REDACTED]")
            .field("key_hint", &self.key_hint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_auth_apply() {
        let auth = ApiKeyAuth::from_string("lb_test_key_12345");
        let mut headers = HashMap::new();

        auth.apply_auth(&mut headers);

        assert_eq!(
            headers.get("Authorization"),
            Some(&"Bearer lb_test_key_12345".to_string())
        );
        assert_eq!(auth.scheme(), "Bearer");
    }

    #[test]
    fn test_key_hint() {
        assert_eq!(ApiKeyAuth::from_string("lb_abcdef1234").key_hint(), "...1234");
        assert_eq!(ApiKeyAuth::from_string("abc").key_hint(), "****");
    }

    #[test]
    fn test_debug_redacts_key() {
        let auth = ApiKeyAuth::from_string("lb_secret_value");
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("lb_secret_value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_validate_rejects_empty_key() {
        assert!(ApiKeyAuth::from_string("   ").validate().is_err());
        assert!(ApiKeyAuth::from_string("lb_key").validate().is_ok());
    }
}
