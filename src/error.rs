//! Server-wide error type.
//!
//! Every failure that can occur while serving a request is collapsed into
//! [`ServerError`]. Most variants are caught at the task boundary and turned
//! into an HTTP error response via the fixed [`ServerError::http_status`]
//! mapping; only [`ServerError::CgiBrokenPipe`] (recoverable, tears down one
//! pipeline) and [`ServerError::ShutdownSignal`] receive special handling in
//! the dispatcher loop. Anything else that escapes
//! [`Dispatcher::update`](crate::dispatcher::Dispatcher::update) is fatal.

use std::fmt;

use crate::http::status::HttpStatus;

#[derive(Debug)]
pub enum ServerError {
    Generic(String),

    // Covers the socket/bind/listen sequence; std performs all three in one
    // call, so the phases are not reported separately.
    SocketSetup(std::io::Error),
    SocketAccept(std::io::Error),
    Epoll(String),
    Io(std::io::Error),

    MalformedRequest(String),
    UnsupportedMethod(String),
    LengthRequired,
    PayloadTooLarge,
    MethodNotAllowed,
    HostMismatch(String),

    FileNotFound(String),
    PathParsing(String),
    Config(String),

    // A write to a CGI child that already closed its stdin. The dispatcher
    // removes the failing task instead of shutting the process down.
    CgiBrokenPipe,
    // The child exited non-zero; the payload is whatever it wrote to stdout.
    CgiRuntime(String),

    // An error carrying an explicit status code, for handler branches that
    // answer with a specific code rather than a taxonomy tag.
    Status(HttpStatus, String),

    // Raised by the `"close"`-body debug hook; stops the reactor loop.
    ShutdownSignal,
}

impl ServerError {
    /// Short human-readable description of the error kind, used as the
    /// headline of generated error pages.
    pub fn kind_message(&self) -> &'static str {
        match self {
            ServerError::Generic(_) => "Internal server error",
            ServerError::SocketSetup(_) => "Failed to set up a listening socket",
            ServerError::SocketAccept(_) => "Failed to accept a connection",
            ServerError::Epoll(_) => "Readiness polling failure",
            ServerError::Io(_) => "I/O failure",
            ServerError::MalformedRequest(_) => "Malformed HTTP request",
            ServerError::UnsupportedMethod(_) => "Unsupported HTTP method",
            ServerError::LengthRequired => "Missing Content-Length",
            ServerError::PayloadTooLarge => "Request body too large",
            ServerError::MethodNotAllowed => "Method not allowed here",
            ServerError::HostMismatch(_) => "Unknown host",
            ServerError::FileNotFound(_) => "File not found",
            ServerError::PathParsing(_) => "Error in path construction",
            ServerError::Config(_) => "Configuration error",
            ServerError::CgiBrokenPipe => "CGI pipe closed early",
            ServerError::CgiRuntime(_) => "CGI script failed",
            ServerError::Status(..) => "Request failed",
            ServerError::ShutdownSignal => "Shutdown signal",
        }
    }

    /// Fixed tag-to-status mapping used for every generated error response.
    pub fn http_status(&self) -> HttpStatus {
        match self {
            ServerError::MalformedRequest(_) => HttpStatus::BadRequest,
            ServerError::UnsupportedMethod(_) => HttpStatus::NotImplemented,
            ServerError::LengthRequired => HttpStatus::LengthRequired,
            ServerError::PayloadTooLarge => HttpStatus::PayloadTooLarge,
            ServerError::MethodNotAllowed => HttpStatus::MethodNotAllowed,
            ServerError::HostMismatch(_) => HttpStatus::BadRequest,
            ServerError::FileNotFound(_) => HttpStatus::NotFound,
            ServerError::PathParsing(_) => HttpStatus::Forbidden,
            ServerError::Status(status, _) => *status,
            ServerError::ShutdownSignal => HttpStatus::Ok,
            _ => HttpStatus::InternalServerError,
        }
    }

    /// The detail line of the error, if any.
    pub fn detail(&self) -> String {
        match self {
            ServerError::Generic(msg)
            | ServerError::Epoll(msg)
            | ServerError::MalformedRequest(msg)
            | ServerError::UnsupportedMethod(msg)
            | ServerError::HostMismatch(msg)
            | ServerError::FileNotFound(msg)
            | ServerError::PathParsing(msg)
            | ServerError::Config(msg)
            | ServerError::CgiRuntime(msg)
            | ServerError::Status(_, msg) => msg.clone(),
            ServerError::SocketSetup(err)
            | ServerError::SocketAccept(err)
            | ServerError::Io(err) => err.to_string(),
            _ => String::new(),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = self.detail();
        if detail.is_empty() {
            write!(f, "{}", self.kind_message())
        } else {
            write!(f, "{}: {}", self.kind_message(), detail)
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(err)
    }
}
