//! Static file serving: direct files, index documents and directory
//! listings.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::ServerError;
use crate::handler::listing;
use crate::http::content_type_for;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::http::status::HttpStatus;
use crate::locations::RouteMatch;

/// Resolves the filesystem path for a route: root plus the remainder
/// segments past the matched prefix.
pub fn target_path(root: &str, route: &RouteMatch) -> PathBuf {
    let mut path = PathBuf::from(root);
    for segment in route.remainder.segments() {
        path.push(segment);
    }
    path
}

pub fn serve(
    request: &HttpRequest,
    route: &RouteMatch,
    root: &str,
) -> Result<HttpResponse, ServerError> {
    let fs_path = target_path(root, route);
    let metadata = fs::metadata(&fs_path)
        .map_err(|_| ServerError::FileNotFound(request.path.render(true)))?;

    if metadata.is_dir() {
        let index = route.location.index.as_deref().unwrap_or("index.html");
        let candidate = fs_path.join(index);
        if candidate.is_file() {
            return file_response(&candidate);
        }
        if route.location.dir_listing {
            return listing::render(&fs_path, &request.path);
        }
        return Err(ServerError::FileNotFound(request.path.render(true)));
    }

    file_response(&fs_path)
}

fn file_response(path: &Path) -> Result<HttpResponse, ServerError> {
    let bytes = fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => ServerError::FileNotFound(path.to_string_lossy().into_owned()),
        ErrorKind::PermissionDenied => {
            ServerError::PathParsing(path.to_string_lossy().into_owned())
        }
        _ => ServerError::Io(err),
    })?;
    let extension = path.extension().and_then(|e| e.to_str());
    Ok(HttpResponse::with_body(
        HttpStatus::Ok,
        content_type_for(extension),
        bytes,
    ))
}
