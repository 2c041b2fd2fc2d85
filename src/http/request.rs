use crate::http::headers::HttpHeaders;
use crate::http::HttpMethod;
use crate::url::Url;

/// A fully parsed HTTP request. Constructed once per request by the
/// [`RequestBuilder`](crate::http::builder::RequestBuilder) and immutable
/// afterwards.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: Url,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length")?.trim().parse().ok()
    }

    /// The `Host` header value with any `:port` suffix removed.
    pub fn host(&self) -> Option<&str> {
        let host = self.header("Host")?;
        Some(host.split(':').next().unwrap_or(host))
    }

    pub fn is_chunked(&self) -> bool {
        self.header("Transfer-Encoding")
            .map(|v| v.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    pub fn is_form(&self) -> bool {
        self.header("Content-Type")
            .map(|v| v.contains("multipart/form-data"))
            .unwrap_or(false)
    }

    /// Reproduces the request as wire bytes: method line, headers, blank
    /// line, body. This is what gets piped into a CGI child's stdin.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = format!(
            "{} {} HTTP/1.1\r\n{}\r\n",
            self.method.as_str(),
            self.path.render(true),
            self.headers.stringify()
        )
        .into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}
