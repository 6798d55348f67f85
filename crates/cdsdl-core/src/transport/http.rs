//! libcurl transport: streaming GET with a bearer token.

use std::cell::{Cell, RefCell};
use std::str;
use std::time::Duration;

use super::parse::{canonical_reason, ResponseHead};
use super::{Sink, TransferInfo, Transport, TransportError};

/// Timeouts and buffer settings for product transfers.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    pub connect_timeout: Duration,
    /// Abort when throughput stays below `low_speed_limit` bytes/s for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Hard wall-clock cap for one product.
    pub timeout: Duration,
    pub buffer_size: Option<usize>,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            timeout: Duration::from_secs(3 * 3600),
            buffer_size: None,
        }
    }
}

impl Transport for CurlTransport {
    fn fetch(
        &self,
        url: &str,
        token: &str,
        sink: &mut Sink<'_>,
    ) -> Result<TransferInfo, TransportError> {
        let head = RefCell::new(ResponseHead::default());
        let received = Cell::new(0u64);
        let sink_error: RefCell<Option<std::io::Error>> = RefCell::new(None);

        let mut easy = curl::easy::Easy::new();
        easy.url(url)?;
        // The Authorization header is not forwarded to other hosts on redirect.
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.connect_timeout(self.connect_timeout)?;
        easy.low_speed_limit(self.low_speed_limit)?;
        easy.low_speed_time(self.low_speed_time)?;
        easy.timeout(self.timeout)?;
        if let Some(sz) = self.buffer_size {
            easy.buffer_size(sz)?;
        }
        let mut list = curl::easy::List::new();
        list.append(&format!("Authorization: Bearer {}", token))?;
        easy.http_headers(list)?;

        let performed = {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(line) = str::from_utf8(data) {
                    head.borrow_mut().feed(line);
                }
                true
            })?;
            transfer.write_function(|data| {
                // Error bodies (and redirect bodies) are drained, never stored.
                if head.borrow().status != 200 {
                    return Ok(data.len());
                }
                match sink(data) {
                    Ok(()) => {
                        received.set(received.get() + data.len() as u64);
                        Ok(data.len())
                    }
                    Err(e) => {
                        sink_error.borrow_mut().replace(e);
                        Ok(0) // abort transfer
                    }
                }
            })?;
            transfer.perform()
        };

        if let Err(e) = performed {
            if let Some(io) = sink_error.into_inner() {
                return Err(TransportError::Sink(io));
            }
            return Err(TransportError::Curl(e));
        }

        let status = easy.response_code()?;
        let head = head.into_inner();
        let reason = head
            .reason
            .clone()
            .filter(|_| head.status == status)
            .unwrap_or_else(|| canonical_reason(status).to_string());
        Ok(TransferInfo {
            status,
            reason,
            content_length: head.reliable_length(),
            received: received.get(),
        })
    }
}
