//! Directory listing pages.

use std::fs;
use std::path::Path;

use crate::error::ServerError;
use crate::http::response::HttpResponse;
use crate::http::status::HttpStatus;
use crate::url::Url;

/// Renders an index page for `dir`. Entries are sorted, directories get a
/// trailing slash, dotfiles are skipped.
pub fn render(dir: &Path, request_path: &Url) -> Result<HttpResponse, ServerError> {
    let reader = fs::read_dir(dir)
        .map_err(|_| ServerError::FileNotFound(request_path.render(true)))?;

    let mut entries: Vec<String> = Vec::new();
    for entry in reader.flatten() {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort();

    let title = request_path.render(true);
    let mut html = format!(
        "<html><head><title>Index of {title}</title></head><body>\
         <h1>Index of {title}</h1><hr><pre>\n"
    );
    for name in &entries {
        html.push_str(&format!("<a href=\"{name}\">{name}</a>\n"));
    }
    html.push_str("</pre><hr></body></html>\n");

    Ok(HttpResponse::with_body(
        HttpStatus::Ok,
        "text/html",
        html.into_bytes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_sorted_entries_with_directory_markers() {
        let dir = std::env::temp_dir().join(format!("listing-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("b.txt"), b"b").unwrap();
        std::fs::write(dir.join("a.txt"), b"a").unwrap();
        std::fs::write(dir.join(".hidden"), b"x").unwrap();

        let path = Url::parse("/files").unwrap();
        let response = render(&dir, &path).unwrap();
        let body = String::from_utf8(response.body).unwrap();

        assert!(body.contains("Index of /files"));
        assert!(body.contains("href=\"a.txt\""));
        assert!(body.contains("href=\"sub/\""));
        assert!(!body.contains(".hidden"));
        assert!(body.find("a.txt").unwrap() < body.find("b.txt").unwrap());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_directory_is_not_found() {
        let path = Url::parse("/nope").unwrap();
        let err = render(Path::new("/definitely/not/here"), &path).unwrap_err();
        assert!(matches!(err, ServerError::FileNotFound(_)));
    }
}
