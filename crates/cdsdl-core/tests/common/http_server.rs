//! Minimal HTTP/1.1 server playing both the identity endpoint and the
//! product download endpoint.
//!
//! `POST /token` accepts a form-encoded password grant and answers with
//! `{"access_token": "tok-<login>"}` for known accounts. `GET /products/<id>`
//! requires `Authorization: Bearer tok-<known login>` and answers from the
//! product's reply script (the last reply repeats).

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with Content-Length.
    Body(Vec<u8>),
    /// 200 with chunked transfer encoding.
    Chunked(Vec<u8>),
    /// 200 declaring `declared` bytes but sending only the body, then closing.
    Truncated { body: Vec<u8>, declared: usize },
    /// Bare status with an empty body.
    Status(u16, &'static str),
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, String>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    token_requests: AtomicUsize,
    product_requests: AtomicUsize,
}

pub struct TestServer {
    base: String,
    state: Arc<State>,
}

impl TestServer {
    /// Start a server in a background thread. It runs until the process exits.
    pub fn start(accounts: &[(&str, &str)]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State {
            accounts: accounts
                .iter()
                .map(|(l, s)| (l.to_string(), s.to_string()))
                .collect(),
            ..State::default()
        });
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&shared);
                thread::spawn(move || handle(stream, &state));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{}/", port),
            state,
        }
    }

    pub fn identity_url(&self) -> String {
        format!("{}token", self.base)
    }

    pub fn product_template(&self) -> String {
        format!("{}products/{{id}}", self.base)
    }

    pub fn product_url(&self, id: &str) -> String {
        format!("{}products/{}", self.base, id)
    }

    pub fn script(&self, id: &str, replies: Vec<Reply>) {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(id.to_string(), replies.into());
    }

    pub fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    pub fn product_requests(&self) -> usize {
        self.state.product_requests.load(Ordering::SeqCst)
    }
}

struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = std::str::from_utf8(&data[..head_end]).ok()?.to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = data[head_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    Some(Request {
        method,
        path,
        headers,
        body,
    })
}

fn handle(mut stream: TcpStream, state: &State) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let Some(req) = read_request(&mut stream) else {
        return;
    };
    if req.method == "POST" && req.path == "/token" {
        state.token_requests.fetch_add(1, Ordering::SeqCst);
        let form: HashMap<String, String> = url::form_urlencoded::parse(&req.body)
            .into_owned()
            .collect();
        let login = form.get("username").cloned().unwrap_or_default();
        let ok = form.get("grant_type").map(String::as_str) == Some("password")
            && state.accounts.get(&login) == form.get("password");
        if ok {
            let body = format!(r#"{{"access_token":"tok-{}","expires_in":600}}"#, login);
            respond(&mut stream, "200 OK", "application/json", body.as_bytes());
        } else {
            let body = br#"{"error":"invalid_grant","error_description":"Invalid user credentials"}"#;
            respond(&mut stream, "401 Unauthorized", "application/json", body);
        }
        return;
    }
    if req.method == "GET" {
        if let Some(id) = req.path.strip_prefix("/products/") {
            state.product_requests.fetch_add(1, Ordering::SeqCst);
            let authorized = req
                .header("authorization")
                .and_then(|v| v.strip_prefix("Bearer tok-"))
                .map_or(false, |login| state.accounts.contains_key(login));
            if !authorized {
                respond(&mut stream, "401 Unauthorized", "text/plain", b"");
                return;
            }
            let reply = {
                let mut scripts = state.scripts.lock().unwrap();
                match scripts.get_mut(id) {
                    Some(q) if q.len() > 1 => q.pop_front(),
                    Some(q) => q.front().cloned(),
                    None => None,
                }
            };
            match reply {
                Some(Reply::Body(body)) => {
                    respond(&mut stream, "200 OK", "application/zip", &body)
                }
                Some(Reply::Chunked(body)) => {
                    let mut out = String::from(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
                    )
                    .into_bytes();
                    for chunk in body.chunks(5) {
                        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                        out.extend_from_slice(chunk);
                        out.extend_from_slice(b"\r\n");
                    }
                    out.extend_from_slice(b"0\r\n\r\n");
                    let _ = stream.write_all(&out);
                }
                Some(Reply::Truncated { body, declared }) => {
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        declared
                    );
                    let _ = stream.write_all(head.as_bytes());
                    let _ = stream.write_all(&body);
                }
                Some(Reply::Status(code, reason)) => {
                    respond(&mut stream, &format!("{} {}", code, reason), "text/plain", b"")
                }
                None => respond(&mut stream, "404 Not Found", "text/plain", b"no such product"),
            }
            return;
        }
    }
    respond(&mut stream, "405 Method Not Allowed", "text/plain", b"");
}

fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}
