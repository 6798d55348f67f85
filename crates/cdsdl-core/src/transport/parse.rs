//! Parse HTTP response header lines seen during a transfer.

/// Response metadata gathered from header lines. Reset on every status line,
/// so after redirects it describes the final response only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status: u32,
    pub reason: Option<String>,
    pub content_length: Option<u64>,
    pub chunked: bool,
}

impl ResponseHead {
    /// Feed one raw header line.
    pub(crate) fn feed(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if let Some((status, reason)) = parse_status_line(line) {
            *self = ResponseHead {
                status,
                reason,
                ..Default::default()
            };
            return;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                self.content_length = value.parse::<u64>().ok();
            }
            if name.eq_ignore_ascii_case("transfer-encoding") {
                self.chunked = value.to_ascii_lowercase().contains("chunked");
            }
        }
    }

    /// Content length that can be trusted for completeness checks.
    /// A chunked response's Content-Length (if any) is ignored.
    pub(crate) fn reliable_length(&self) -> Option<u64> {
        if self.chunked {
            None
        } else {
            self.content_length
        }
    }
}

/// `HTTP/1.1 202 Accepted` -> (202, Some("Accepted")); `HTTP/2 200` -> (200, None).
pub(crate) fn parse_status_line(line: &str) -> Option<(u32, Option<String>)> {
    if !line.starts_with("HTTP/") {
        return None;
    }
    let mut parts = line.splitn(3, ' ');
    let _version = parts.next()?;
    let code = parts.next()?.trim().parse::<u32>().ok()?;
    let reason = parts
        .next()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    Some((code, reason))
}

/// Standard reason phrase for responses that did not carry one (HTTP/2).
pub fn canonical_reason(code: u32) -> &'static str {
    match code {
        200 => "OK",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        410 => "Gone",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}
