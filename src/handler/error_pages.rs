//! Error page generation.
//!
//! Custom pages configured per location or per server are served from disk;
//! everything else gets a page rendered from the built-in template via a
//! small `$KEY` substitution engine.

use std::path::Path;

use crate::config::LocationConfig;
use crate::error::ServerError;
use crate::http::content_type_for;
use crate::http::response::HttpResponse;
use crate::server::ServerData;

const ERROR_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
	<meta charset="UTF-8">
	<meta name="viewport" content="width=device-width, initial-scale=1.0">
	<title>$ERR_CODE</title>
	<style>
		body {
			font-family: Arial, sans-serif;
			background-color: #f8f9fa;
			color: #333;
			display: flex;
			justify-content: center;
			align-items: center;
			height: 100vh;
			margin: 0;
		}
		.error-box {
			background: white;
			padding: 2rem;
			border-radius: 8px;
			box-shadow: 0 4px 10px rgba(0, 0, 0, 0.1);
			max-width: 500px;
			text-align: center;
			white-space: pre-wrap;
		}
		h1 { color: #d9534f; margin-bottom: 1rem; }
		p { margin: 0.5rem 0; }
		.footer { margin-top: 1.5rem; font-size: 0.9rem; color: #888; }
	</style>
</head>
<body>
	<div class="error-box">
		<h1>$ERR_CODE</h1>
		<p>$ERR_KIND</p>
		<p>$ERR_MSG</p>
		<div class="footer">reactornet error page</div>
	</div>
</body>
</html>
"#;

/// Key-value substitution over a template: every `$KEY` occurrence is
/// replaced by its bound value.
pub struct HtmlTemplate {
    bindings: Vec<(String, String)>,
}

impl HtmlTemplate {
    pub fn new() -> Self {
        Self { bindings: Vec::new() }
    }

    pub fn bind(&mut self, key: &str, value: &str) {
        self.bindings.push((format!("${key}"), value.to_string()));
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (key, value) in &self.bindings {
            out = out.replace(key, value);
        }
        out
    }
}

impl Default for HtmlTemplate {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the built-in template for an error, with no config lookup.
pub fn generated(err: &ServerError) -> HttpResponse {
    let status = err.http_status();
    let mut template = HtmlTemplate::new();
    template.bind("ERR_CODE", &format!("{} {}", status.code(), status.reason()));
    template.bind("ERR_KIND", err.kind_message());
    template.bind("ERR_MSG", &err.detail());
    HttpResponse::with_body(
        status,
        "text/html",
        template.apply(ERROR_TEMPLATE).into_bytes(),
    )
}

/// Resolves the page for an error: the location's error-page map wins over
/// the server's; an unreadable configured page falls back to the template.
pub fn error_response(
    data: &ServerData,
    location: Option<&LocationConfig>,
    err: &ServerError,
) -> HttpResponse {
    let status = err.http_status();
    let key = status.code().to_string();

    let configured = location
        .and_then(|loc| loc.error_pages.get(&key))
        .or_else(|| data.error_pages.get(&key));
    if let Some(path) = configured {
        match std::fs::read(path) {
            Ok(bytes) => {
                let extension = Path::new(path).extension().and_then(|e| e.to_str());
                return HttpResponse::with_body(status, content_type_for(extension), bytes);
            }
            Err(read_err) => log::warn!("cannot read error page {path}: {read_err}"),
        }
    }
    generated(err)
}
