use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, AUTHORIZATION};
use reqwest::Client;

use crate::core::error::{ProvisionError, ProvisionResult};

const APP_USER_AGENT: &str = concat!("tabg-provisioner/", env!("CARGO_PKG_VERSION"));

/// Shared client for release metadata and asset downloads.
///
/// A GitHub token, when given, is sent as a bearer token on every request.
pub fn build_http_client(github_token: Option<&str>) -> ProvisionResult<Client> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    default_headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json, application/octet-stream;q=0.9"),
    );
    if let Some(token) = github_token.filter(|t| !t.trim().is_empty()) {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|e| ProvisionError::Validation(format!("Invalid GitHub token: {e}")))?;
        value.set_sensitive(true);
        default_headers.insert(AUTHORIZATION, value);
    }

    Ok(Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_with_newline_is_rejected() {
        let err = build_http_client(Some("abc\ndef")).unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }

    #[test]
    fn blank_token_is_ignored() {
        assert!(build_http_client(Some("   ")).is_ok());
        assert!(build_http_client(None).is_ok());
    }
}
