//! Response construction and serialization.
//!
//! Responses are built progressively by the handlers and serialized exactly
//! once, always with an explicit `Content-Length` (the server never chunks
//! its output). [`HttpResponse::parse`] is the inverse direction, used to
//! interpret the stdout of a finished CGI child as an HTTP response.

use std::time::SystemTime;

use crate::http::headers::HttpHeaders;
use crate::http::status::HttpStatus;

const SERVER_NAME: &str = concat!("reactornet/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: HttpStatus,
    pub headers: HttpHeaders,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: HttpStatus) -> Self {
        Self {
            status,
            headers: HttpHeaders::new(),
            content_type: "text/html".to_string(),
            body: Vec::new(),
        }
    }

    pub fn with_body(status: HttpStatus, content_type: &str, body: Vec<u8>) -> Self {
        let mut response = Self::new(status);
        response.content_type = content_type.to_string();
        response.body = body;
        response
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.set(name, value);
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.content_type = content_type.to_string();
    }

    /// Serializes the response into wire bytes. `Content-Type`,
    /// `Content-Length`, `Date` and `Server` are filled in unless a handler
    /// already set them explicitly.
    pub fn serialize(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n{}",
            self.status.code(),
            self.status.reason(),
            self.headers.stringify()
        );

        if !self.headers.contains("Content-Type") {
            head.push_str(&format!("Content-Type: {}\r\n", self.content_type));
        }
        if !self.headers.contains("Content-Length") {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        if !self.headers.contains("Date") {
            head.push_str(&format!(
                "Date: {}\r\n",
                httpdate::fmt_http_date(SystemTime::now())
            ));
        }
        if !self.headers.contains("Server") {
            head.push_str(&format!("Server: {}\r\n", SERVER_NAME));
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }

    /// Parses raw CGI output as an HTTP response. A missing status line is
    /// treated as `200 OK` with the whole head parsed as headers. Scripts
    /// tend to emit bare `\n` line endings, so both conventions are
    /// accepted. Returns `None` when the stream cannot be understood as a
    /// response at all.
    pub fn parse(raw: &[u8]) -> Option<HttpResponse> {
        let (head_end, body_start) = match find_blank_line(raw) {
            Some(pos) => pos,
            None => (raw.len(), raw.len()),
        };

        let head = String::from_utf8_lossy(&raw[..head_end]);
        let mut lines = head.split('\n').map(|l| l.trim_end_matches('\r'));

        let mut response = HttpResponse::new(HttpStatus::Ok);

        let first = lines.next()?;
        if first.starts_with("HTTP/") {
            let code: u16 = first.split_whitespace().nth(1)?.parse().ok()?;
            response.status = HttpStatus::from_code(code);
        } else if !first.is_empty() {
            let (name, value) = first.split_once(':')?;
            response.headers.set(name.trim(), value.trim());
        }

        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once(':')?;
            response.headers.set(name.trim(), value.trim());
        }

        if let Some(content_type) = response.headers.get("Content-Type") {
            response.content_type = content_type.to_string();
        }
        response.body = raw[body_start..].to_vec();
        Some(response)
    }
}

/// Locates the first blank line; returns (end of head, start of body).
fn find_blank_line(raw: &[u8]) -> Option<(usize, usize)> {
    let crlf = find_subsequence(raw, b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = find_subsequence(raw, b"\n\n").map(|i| (i, i + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
