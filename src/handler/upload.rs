//! File writes driven by client requests: multipart form uploads, PUT
//! and DELETE.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::ServerError;
use crate::http::request::HttpRequest;
use crate::http::response::find_subsequence;
use crate::http::response::HttpResponse;
use crate::http::status::HttpStatus;

/// Writes the request body verbatim to `path`.
pub fn put_file(path: &Path, body: &[u8]) -> Result<HttpResponse, ServerError> {
    fs::write(path, body).map_err(|err| match err.kind() {
        ErrorKind::NotFound => ServerError::FileNotFound(path.to_string_lossy().into_owned()),
        _ => ServerError::Io(err),
    })?;
    log::info!("stored {} bytes at {}", body.len(), path.display());
    Ok(HttpResponse::with_body(
        HttpStatus::Created,
        "text/plain",
        b"Created\n".to_vec(),
    ))
}

pub fn delete_file(path: &Path) -> Result<HttpResponse, ServerError> {
    fs::remove_file(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => ServerError::FileNotFound(path.to_string_lossy().into_owned()),
        _ => ServerError::Io(err),
    })?;
    log::info!("deleted {}", path.display());
    Ok(HttpResponse::with_body(
        HttpStatus::Ok,
        "text/plain",
        b"Deleted\n".to_vec(),
    ))
}

/// Parses a `multipart/form-data` body and stores every part whose field
/// name matches `field` under `target_dir`. Returns the number of files
/// written.
pub fn store_multipart(
    request: &HttpRequest,
    field: &str,
    target_dir: &Path,
) -> Result<usize, ServerError> {
    let content_type = request
        .header("Content-Type")
        .ok_or_else(|| malformed("missing Content-Type"))?;
    let boundary = content_type
        .split("boundary=")
        .nth(1)
        .map(|rest| rest.split(|c: char| c.is_whitespace() || c == ';').next().unwrap_or(rest))
        .map(|b| b.trim_matches('"'))
        .filter(|b| !b.is_empty())
        .ok_or_else(|| malformed("missing multipart boundary"))?;

    let delimiter = format!("--{boundary}").into_bytes();
    let body = &request.body;
    let mut pos = find_subsequence(body, &delimiter)
        .ok_or_else(|| malformed("boundary absent from body"))? + delimiter.len();

    let mut stored = 0;
    loop {
        if body[pos..].starts_with(b"--") {
            break;
        }
        if body[pos..].starts_with(b"\r\n") {
            pos += 2;
        }
        let next = match find_subsequence(&body[pos..], &delimiter) {
            Some(offset) => offset,
            None => break,
        };
        let part = &body[pos..pos + next];
        let part = part.strip_suffix(b"\r\n").unwrap_or(part);

        if let Some((name, filename, data)) = parse_part(part) {
            if name == field {
                let filename = sanitize_filename(filename.as_deref().unwrap_or("upload.bin"));
                let target = target_dir.join(&filename);
                fs::write(&target, data).map_err(ServerError::Io)?;
                log::info!("uploaded {} ({} bytes)", target.display(), data.len());
                stored += 1;
            }
        }
        pos += next + delimiter.len();
    }

    if stored == 0 {
        return Err(malformed("no part matched the configured upload field"));
    }
    Ok(stored)
}

fn malformed(detail: &str) -> ServerError {
    ServerError::MalformedRequest(format!("multipart: {detail}"))
}

/// Splits one multipart part into (field name, filename, data).
fn parse_part(part: &[u8]) -> Option<(String, Option<String>, &[u8])> {
    let head_end = find_subsequence(part, b"\r\n\r\n")?;
    let head = String::from_utf8_lossy(&part[..head_end]);
    let data = &part[head_end + 4..];

    for line in head.lines() {
        if !line.to_ascii_lowercase().starts_with("content-disposition") {
            continue;
        }
        let name = quoted_param(line, "name=")?;
        let filename = quoted_param(line, "filename=");
        return Some((name, filename, data));
    }
    None
}

fn quoted_param(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Keeps only the last path component so a crafted filename cannot escape
/// the upload directory.
fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    if last.is_empty() || last == "." || last == ".." {
        "upload.bin".to_string()
    } else {
        last.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::headers::HttpHeaders;
    use crate::http::HttpMethod;
    use crate::url::Url;

    fn multipart_request(field: &str, filename: &str, data: &[u8]) -> HttpRequest {
        let boundary = "XBOUND";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let mut headers = HttpHeaders::new();
        headers.set(
            "Content-Type",
            &format!("multipart/form-data; boundary={boundary}"),
        );
        HttpRequest {
            method: HttpMethod::Post,
            path: Url::parse("/upload").unwrap(),
            headers,
            body,
        }
    }

    #[test]
    fn stores_matching_part() {
        let dir = std::env::temp_dir().join(format!("upload-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let request = multipart_request("file", "hello.txt", b"payload bytes");
        let stored = store_multipart(&request, "file", &dir).unwrap();
        assert_eq!(stored, 1);
        assert_eq!(std::fs::read(dir.join("hello.txt")).unwrap(), b"payload bytes");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn traversal_filenames_are_flattened() {
        let dir = std::env::temp_dir().join(format!("upload-trav-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let request = multipart_request("file", "../../etc/evil.txt", b"x");
        store_multipart(&request, "file", &dir).unwrap();
        assert!(dir.join("evil.txt").is_file());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn wrong_field_name_is_rejected() {
        let dir = std::env::temp_dir().join(format!("upload-field-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let request = multipart_request("other", "a.txt", b"x");
        let err = store_multipart(&request, "file", &dir).unwrap_err();
        assert!(matches!(err, ServerError::MalformedRequest(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn sanitizes_degenerate_names() {
        assert_eq!(sanitize_filename("plain.txt"), "plain.txt");
        assert_eq!(sanitize_filename("a/b/c.txt"), "c.txt");
        assert_eq!(sanitize_filename(".."), "upload.bin");
        assert_eq!(sanitize_filename(""), "upload.bin");
    }
}
