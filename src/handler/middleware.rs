//! Response post-processing applied after routing.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::http::HttpMethod;

// Tiny bodies grow when compressed.
const GZIP_THRESHOLD: usize = 256;

pub fn apply(request: &HttpRequest, response: &mut HttpResponse) {
    compress(request, response);

    // HEAD answers carry the headers of the matching GET but no body. The
    // length must be pinned before the body is dropped.
    if request.method == HttpMethod::Head {
        response.set_header("Content-Length", &response.body.len().to_string());
        response.body.clear();
    }
}

fn compress(request: &HttpRequest, response: &mut HttpResponse) {
    if response.body.len() < GZIP_THRESHOLD || response.headers.contains("Content-Encoding") {
        return;
    }
    let accepts_gzip = request
        .header("Accept-Encoding")
        .map(|v| v.split(',').any(|enc| enc.trim().starts_with("gzip")))
        .unwrap_or(false);
    if !accepts_gzip {
        return;
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(&response.body).is_err() {
        return;
    }
    match encoder.finish() {
        Ok(compressed) if compressed.len() < response.body.len() => {
            response.body = compressed;
            response.set_header("Content-Encoding", "gzip");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::headers::HttpHeaders;
    use crate::http::status::HttpStatus;
    use crate::url::Url;

    fn request(method: HttpMethod, accept_encoding: Option<&str>) -> HttpRequest {
        let mut headers = HttpHeaders::new();
        if let Some(value) = accept_encoding {
            headers.set("Accept-Encoding", value);
        }
        HttpRequest {
            method,
            path: Url::parse("/x").unwrap(),
            headers,
            body: Vec::new(),
        }
    }

    #[test]
    fn compresses_when_client_accepts() {
        let body = vec![b'a'; 4096];
        let mut response = HttpResponse::with_body(HttpStatus::Ok, "text/plain", body.clone());
        apply(&request(HttpMethod::Get, Some("gzip, deflate")), &mut response);
        assert_eq!(response.headers.get("Content-Encoding"), Some("gzip"));
        assert!(response.body.len() < body.len());
    }

    #[test]
    fn skips_clients_without_gzip() {
        let mut response =
            HttpResponse::with_body(HttpStatus::Ok, "text/plain", vec![b'a'; 4096]);
        apply(&request(HttpMethod::Get, None), &mut response);
        assert!(!response.headers.contains("Content-Encoding"));
        assert_eq!(response.body.len(), 4096);
    }

    #[test]
    fn skips_small_bodies() {
        let mut response = HttpResponse::with_body(HttpStatus::Ok, "text/plain", b"ok".to_vec());
        apply(&request(HttpMethod::Get, Some("gzip")), &mut response);
        assert!(!response.headers.contains("Content-Encoding"));
    }

    #[test]
    fn head_keeps_length_but_drops_body() {
        let mut response =
            HttpResponse::with_body(HttpStatus::Ok, "text/plain", b"hello".to_vec());
        apply(&request(HttpMethod::Head, None), &mut response);
        assert_eq!(response.headers.get("Content-Length"), Some("5"));
        assert!(response.body.is_empty());
    }
}
