//! Classify HTTP status and curl errors into retry policy error kinds.

use crate::retry::policy::ErrorKind;

/// Classify a non-200 HTTP status for retry decisions.
///
/// 202 is what the download service answers while a product is still being
/// brought online; it is worth asking again later.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        202 => ErrorKind::NotReady,
        401 | 403 => ErrorKind::Unauthorized,
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_url_malformed() || e.is_unsupported_protocol() || e.is_too_many_redirects() {
        return ErrorKind::Other;
    }
    // Resets, DNS failures, short bodies (partial file), bad chunk framing.
    ErrorKind::Connection
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_202_not_ready() {
        assert_eq!(classify_http_status(202), ErrorKind::NotReady);
    }

    #[test]
    fn http_429_and_503_throttled() {
        assert_eq!(classify_http_status(429), ErrorKind::Throttled);
        assert_eq!(classify_http_status(503), ErrorKind::Throttled);
    }

    #[test]
    fn http_5xx_retryable() {
        assert!(matches!(classify_http_status(500), ErrorKind::Http5xx(500)));
        assert!(matches!(classify_http_status(502), ErrorKind::Http5xx(502)));
    }

    #[test]
    fn token_rejection_unauthorized() {
        assert_eq!(classify_http_status(401), ErrorKind::Unauthorized);
        assert_eq!(classify_http_status(403), ErrorKind::Unauthorized);
    }

    #[test]
    fn http_4xx_other() {
        assert_eq!(classify_http_status(400), ErrorKind::Other);
        assert_eq!(classify_http_status(404), ErrorKind::Other);
        assert_eq!(classify_http_status(410), ErrorKind::Other);
    }

    #[test]
    fn curl_errors() {
        // CURLE_OPERATION_TIMEDOUT = 28, CURLE_COULDNT_CONNECT = 7,
        // CURLE_PARTIAL_FILE = 18, CURLE_URL_MALFORMAT = 3
        assert_eq!(classify_curl_error(&curl::Error::new(28)), ErrorKind::Timeout);
        assert_eq!(classify_curl_error(&curl::Error::new(7)), ErrorKind::Connection);
        assert_eq!(classify_curl_error(&curl::Error::new(18)), ErrorKind::Connection);
        assert_eq!(classify_curl_error(&curl::Error::new(3)), ErrorKind::Other);
    }
}
