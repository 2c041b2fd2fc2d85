//! Routing: turns a parsed request plus its matched location into either a
//! ready response or a CGI pipeline description.
//!
//! Handling priority, first match wins: redirect, CGI, multipart upload,
//! PUT, DELETE, static file.

use std::path::Path;

use crate::error::ServerError;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::http::status::HttpStatus;
use crate::http::HttpMethod;
use crate::locations::RouteMatch;
use crate::server::ServerData;
use crate::tasks::cgi::CgiPipeline;

use super::{static_files, upload};

#[derive(Debug)]
pub enum Handled {
    Response(HttpResponse),
    Cgi(CgiPipeline),
}

pub fn dispatch(request: &HttpRequest, data: &ServerData) -> Result<Handled, ServerError> {
    let route = data
        .locations
        .find(&request.path)
        .ok_or_else(|| ServerError::FileNotFound(request.path.render(true)))?;

    if !route.location.allows(request.method) {
        return Err(ServerError::MethodNotAllowed);
    }
    if !route.remainder.is_traversal_safe() {
        return Err(ServerError::PathParsing(request.path.render(true)));
    }

    if let Some(target) = &route.location.redirect {
        return Ok(Handled::Response(redirect_response(target, &route)));
    }

    let root = route
        .location
        .root
        .clone()
        .unwrap_or_else(|| data.root.clone());

    if route.location.allow_cgi
        && matches!(request.method, HttpMethod::Get | HttpMethod::Post)
    {
        if let Some(pipeline) = cgi_pipeline(request, &route, &root, data)? {
            return Ok(Handled::Cgi(pipeline));
        }
    }

    match request.method {
        HttpMethod::Post if route.remainder.is_empty() => {
            if let Some(field) = &route.location.upload_field {
                if request.is_form() {
                    let stored = upload::store_multipart(request, field, Path::new(&root))?;
                    return Ok(Handled::Response(HttpResponse::with_body(
                        HttpStatus::Created,
                        "text/plain",
                        format!("Stored {stored} file(s)\n").into_bytes(),
                    )));
                }
            }
            static_files::serve(request, &route, &root).map(Handled::Response)
        }
        HttpMethod::Put => {
            let target = static_files::target_path(&root, &route);
            upload::put_file(&target, &request.body).map(Handled::Response)
        }
        HttpMethod::Delete => {
            let target = static_files::target_path(&root, &route);
            upload::delete_file(&target).map(Handled::Response)
        }
        _ => static_files::serve(request, &route, &root).map(Handled::Response),
    }
}

fn redirect_response(target: &str, route: &RouteMatch) -> HttpResponse {
    let location = if route.remainder.is_empty() {
        target.to_string()
    } else {
        format!(
            "{}/{}",
            target.trim_end_matches('/'),
            route.remainder.render(false)
        )
    };
    let mut response = HttpResponse::new(HttpStatus::MovedPermanently);
    response.set_header("Location", &location);
    response.set_header("Cache-Control", "no-cache");
    response
}

/// Builds the pipeline when the first remainder segment is a script with a
/// configured interpreter. Later segments become `PATH_INFO`.
fn cgi_pipeline(
    request: &HttpRequest,
    route: &RouteMatch,
    root: &str,
    data: &ServerData,
) -> Result<Option<CgiPipeline>, ServerError> {
    let script_name = match route.remainder.segments().first() {
        Some(segment) => segment.clone(),
        None => return Ok(None),
    };
    let extension = match Path::new(&script_name).extension().and_then(|e| e.to_str()) {
        Some(ext) => ext,
        None => return Ok(None),
    };
    let interpreter = match data.cgi_interpreters.get(extension) {
        Some(interpreter) => interpreter.clone(),
        None => return Ok(None),
    };

    let script_path = Path::new(root).join(&script_name);
    if !script_path.is_file() {
        return Err(ServerError::FileNotFound(request.path.render(true)));
    }

    let extra = route.remainder.tail();
    let path_info = if extra.is_empty() {
        String::new()
    } else {
        extra.render(true)
    };

    Ok(Some(CgiPipeline {
        interpreter,
        working_dir: root.to_string(),
        script_name,
        path_info,
        query: request.path.query().unwrap_or("").to_string(),
        request: request.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocationConfig, METHOD_GET};
    use crate::http::headers::HttpHeaders;
    use crate::locations::LocationTree;
    use crate::url::Url;
    use std::collections::HashMap;
    use std::rc::Rc;

    fn data_with(prefix: &str, location: LocationConfig, root: &Path) -> ServerData {
        let mut locations = LocationTree::new();
        locations.insert(&Url::parse(prefix).unwrap(), Rc::new(location));
        ServerData {
            locations,
            server_names: Vec::new(),
            root: root.to_string_lossy().into_owned(),
            max_request_size: 1 << 20,
            message_buffer_size: 4096,
            cgi_interpreters: HashMap::from([("sh".to_string(), "/bin/sh".to_string())]),
            error_pages: HashMap::new(),
        }
    }

    fn request(method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest {
            method,
            path: Url::parse(path).unwrap(),
            headers: HttpHeaders::new(),
            body: Vec::new(),
        }
    }

    fn temp_root(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("router-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn unrouted_path_is_not_found() {
        let root = temp_root("unrouted");
        let data = data_with("/files", LocationConfig::default(), &root);
        let err = dispatch(&request(HttpMethod::Get, "/elsewhere"), &data).unwrap_err();
        assert!(matches!(err, ServerError::FileNotFound(_)));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn disallowed_method_is_rejected() {
        let root = temp_root("methods");
        let location = LocationConfig {
            allowed_methods: METHOD_GET,
            ..LocationConfig::default()
        };
        let data = data_with("/ro", location, &root);
        let err = dispatch(&request(HttpMethod::Delete, "/ro/x"), &data).unwrap_err();
        assert!(matches!(err, ServerError::MethodNotAllowed));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn redirect_short_circuits() {
        let root = temp_root("redirect");
        let location = LocationConfig {
            redirect: Some("https://example.com/new".to_string()),
            ..LocationConfig::default()
        };
        let data = data_with("/old", location, &root);

        let handled = dispatch(&request(HttpMethod::Get, "/old/deep/page"), &data).unwrap();
        match handled {
            Handled::Response(response) => {
                assert_eq!(response.status, HttpStatus::MovedPermanently);
                assert_eq!(
                    response.headers.get("Location"),
                    Some("https://example.com/new/deep/page")
                );
            }
            Handled::Cgi(_) => panic!("redirect must not reach CGI"),
        }
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn traversal_remainder_is_forbidden() {
        let root = temp_root("traversal");
        let data = data_with("/files", LocationConfig::default(), &root);
        let err = dispatch(&request(HttpMethod::Get, "/files/../secret"), &data).unwrap_err();
        assert!(matches!(err, ServerError::PathParsing(_)));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn cgi_route_yields_pipeline_with_path_info() {
        let root = temp_root("cgi");
        std::fs::write(root.join("run.sh"), b"echo hi").unwrap();
        let location = LocationConfig {
            allow_cgi: true,
            root: Some(root.to_string_lossy().into_owned()),
            ..LocationConfig::default()
        };
        let data = data_with("/cgi", location, &root);

        let handled =
            dispatch(&request(HttpMethod::Get, "/cgi/run.sh/extra/bits?q=1"), &data).unwrap();
        match handled {
            Handled::Cgi(pipeline) => {
                assert_eq!(pipeline.interpreter, "/bin/sh");
                assert_eq!(pipeline.script_name, "run.sh");
                assert_eq!(pipeline.path_info, "/extra/bits");
                assert_eq!(pipeline.query, "q=1");
            }
            Handled::Response(_) => panic!("expected a CGI pipeline"),
        }
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn missing_cgi_script_is_not_found() {
        let root = temp_root("cgi-missing");
        let location = LocationConfig {
            allow_cgi: true,
            ..LocationConfig::default()
        };
        let data = data_with("/cgi", location, &root);
        let err = dispatch(&request(HttpMethod::Get, "/cgi/gone.sh"), &data).unwrap_err();
        assert!(matches!(err, ServerError::FileNotFound(_)));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn put_then_delete_round_trip() {
        let root = temp_root("putdel");
        let data = data_with("/files", LocationConfig::default(), &root);

        let mut put = request(HttpMethod::Put, "/files/note.txt");
        put.body = b"content".to_vec();
        match dispatch(&put, &data).unwrap() {
            Handled::Response(response) => assert_eq!(response.status, HttpStatus::Created),
            Handled::Cgi(_) => panic!("PUT must not reach CGI"),
        }
        assert_eq!(std::fs::read(root.join("note.txt")).unwrap(), b"content");

        match dispatch(&request(HttpMethod::Delete, "/files/note.txt"), &data).unwrap() {
            Handled::Response(response) => assert_eq!(response.status, HttpStatus::Ok),
            Handled::Cgi(_) => panic!("DELETE must not reach CGI"),
        }
        assert!(!root.join("note.txt").exists());
        std::fs::remove_dir_all(&root).ok();
    }
}
