use axum::http::{header, HeaderMap};

/// Default secret; leaving it in place disables the auth gate entirely.
pub const PLACEHOLDER_KEY: &str = "your-secret-key-123";

/// Process-wide shared-secret gate, read once at startup.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    api_key: String,
}

impl AuthConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::new(std::env::var("API_KEY").unwrap_or_else(|_| PLACEHOLDER_KEY.to_string()))
    }

    /// Enforcement is off while the configured secret is the placeholder.
    pub fn enabled(&self) -> bool {
        !self.api_key.is_empty() && self.api_key != PLACEHOLDER_KEY
    }

    /// Check the request's bearer token against the shared secret.
    /// Always passes when enforcement is disabled.
    pub fn authorize(&self, headers: &HeaderMap) -> bool {
        if !self.enabled() {
            return true;
        }

        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.strip_prefix("Bearer ").unwrap_or(v) == self.api_key)
            .unwrap_or(false)
    }
}
