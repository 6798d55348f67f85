//! Identity endpoint client (OAuth2 password grant).
//!
//! Uses the curl crate (libcurl) to POST the account credentials as a
//! form-encoded body and extracts `access_token` from the JSON answer.

use serde::Deserialize;
use std::time::Duration;

use super::AuthError;

/// Anything that can exchange account credentials for a bearer token.
///
/// Implementations are blocking; the lease manager calls them from the
/// blocking thread pool.
pub trait Identity: Send + Sync {
    fn request_token(&self, login: &str, secret: &str) -> Result<String, AuthError>;
}

/// Identity client backed by libcurl.
#[derive(Debug, Clone)]
pub struct CurlIdentity {
    url: String,
    client_id: String,
    timeout: Duration,
}

impl CurlIdentity {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn form_body(&self, login: &str, secret: &str) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "password")
            .append_pair("username", login)
            .append_pair("password", secret)
            .append_pair("client_id", &self.client_id)
            .finish()
    }
}

impl Identity for CurlIdentity {
    fn request_token(&self, login: &str, secret: &str) -> Result<String, AuthError> {
        let body = self.form_body(login, secret);
        let mut response = Vec::new();

        let mut easy = curl::easy::Easy::new();
        easy.url(&self.url)?;
        easy.post(true)?;
        easy.post_fields_copy(body.as_bytes())?;
        easy.follow_location(true)?;
        easy.connect_timeout(Duration::from_secs(15))?;
        easy.timeout(self.timeout)?;
        let mut list = curl::easy::List::new();
        list.append("Content-Type: application/x-www-form-urlencoded")?;
        list.append("Accept: application/json")?;
        easy.http_headers(list)?;

        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| {
                response.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.perform()?;
        }

        let code = easy.response_code()?;
        if code != 200 {
            let detail = parse_error_detail(&response).unwrap_or_default();
            return Err(AuthError::Rejected {
                status: code,
                detail,
            });
        }
        parse_token_response(&response)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Extract the bearer value from an identity response body.
pub fn parse_token_response(body: &[u8]) -> Result<String, AuthError> {
    let parsed: TokenResponse =
        serde_json::from_slice(body).map_err(|e| AuthError::Malformed(e.to_string()))?;
    match parsed.access_token {
        Some(token) if !token.trim().is_empty() => Ok(token),
        _ => {
            if let Some(err) = parsed.error {
                tracing::debug!(
                    "identity error {}: {}",
                    err,
                    parsed.error_description.unwrap_or_default()
                );
            }
            Err(AuthError::MissingAccessToken)
        }
    }
}

fn parse_error_detail(body: &[u8]) -> Option<String> {
    let parsed: TokenResponse = serde_json::from_slice(body).ok()?;
    match (parsed.error, parsed.error_description) {
        (Some(e), Some(d)) => Some(format!("{e} ({d})")),
        (Some(e), None) => Some(e),
        (None, d) => d,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_access_token() {
        let body = br#"{"access_token":"abc.def","expires_in":600,"token_type":"Bearer"}"#;
        assert_eq!(parse_token_response(body).unwrap(), "abc.def");
    }

    #[test]
    fn missing_access_token_is_auth_failure_not_panic() {
        let body = br#"{"error":"invalid_grant","error_description":"Invalid user credentials"}"#;
        assert!(matches!(
            parse_token_response(body),
            Err(AuthError::MissingAccessToken)
        ));
        assert!(matches!(
            parse_token_response(br#"{"access_token":"  "}"#),
            Err(AuthError::MissingAccessToken)
        ));
    }

    #[test]
    fn garbage_body_is_malformed() {
        assert!(matches!(
            parse_token_response(b"<html>oops</html>"),
            Err(AuthError::Malformed(_))
        ));
    }

    #[test]
    fn form_body_is_urlencoded() {
        let id = CurlIdentity::new("http://localhost/token", "cdse-public");
        let body = id.form_body("jane+x@example.org", "p&ss=word");
        assert!(body.starts_with("grant_type=password&"));
        assert!(body.contains("username=jane%2Bx%40example.org"));
        assert!(body.contains("password=p%26ss%3Dword"));
        assert!(body.ends_with("client_id=cdse-public"));
    }

    #[test]
    fn error_detail_combines_fields() {
        let body = br#"{"error":"invalid_grant","error_description":"bad"}"#;
        assert_eq!(parse_error_detail(body).unwrap(), "invalid_grant (bad)");
        assert!(parse_error_detail(b"nope").is_none());
    }
}
