//! Graph client-credentials authentication
//!
//! Exchanges the application's tenant/client credentials for an access
//! token and caches it in memory until shortly before it expires.
//! Uses synchronous HTTP (ureq) like the rest of the crate.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use log::debug;
use std::sync::Mutex;

use super::api::TokenResponse;
use crate::error::AuthError;

/// Refresh tokens this many seconds before they expire
const EXPIRY_BUFFER_SECS: i64 = 300;

struct CachedToken {
    access_token: String,
    expires_at: i64,
}

/// Token provider for the Graph API
pub struct GraphAuth {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl GraphAuth {
    const AUTHORITY_URL: &'static str = "https://login.microsoftonline.com";
    const GRAPH_SCOPE: &'static str = "https://graph.microsoft.com/.default";

    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cached: Mutex::new(None),
        }
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            Self::AUTHORITY_URL,
            urlencoding::encode(&self.tenant_id)
        )
    }

    /// Get a valid access token, requesting a new one when needed.
    ///
    /// # Errors
    /// Returns [`AuthError`] when the identity provider rejects the
    /// credentials; network failures are returned as plain errors.
    pub fn get_access_token(&self) -> Result<String> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| anyhow!("token cache lock poisoned"))?;

        let now = Utc::now().timestamp();
        if let Some(token) = cached.as_ref()
            && token.expires_at > now + EXPIRY_BUFFER_SECS
        {
            return Ok(token.access_token.clone());
        }

        let token = self.request_token()?;
        debug!("[GRAPH] Acquired access token valid for {}s", token.expires_in);
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: now + token.expires_in as i64,
        });
        Ok(access_token)
    }

    /// Drop the cached token so the next call requests a new one
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    fn request_token(&self) -> Result<TokenResponse> {
        let response = ureq::post(&self.token_url()).send_form([
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", Self::GRAPH_SCOPE),
            ("grant_type", "client_credentials"),
        ]);

        match response {
            Ok(mut resp) => resp
                .body_mut()
                .read_json::<TokenResponse>()
                .context("Failed to parse token response"),
            Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => {
                Err(AuthError::new(format!("token request rejected with status {code}")).into())
            }
            Err(e) => Err(anyhow!("Failed to request access token: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_url_contains_tenant() {
        let auth = GraphAuth::new("contoso.onmicrosoft.com", "id", "secret");
        assert_eq!(
            auth.token_url(),
            "https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_cached_token_is_reused() {
        let auth = GraphAuth::new("tenant", "id", "secret");
        *auth.cached.lock().unwrap() = Some(CachedToken {
            access_token: "cached".to_string(),
            expires_at: Utc::now().timestamp() + 3600,
        });
        assert_eq!(auth.get_access_token().unwrap(), "cached");

        auth.invalidate();
        assert!(auth.cached.lock().unwrap().is_none());
    }
}
