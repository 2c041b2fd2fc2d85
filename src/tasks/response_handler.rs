use std::io::ErrorKind;
use std::os::fd::RawFd;

use crate::dispatcher::{fd_write, Dispatcher, IoMode, Task};
use crate::error::ServerError;
use crate::http::response::HttpResponse;
use crate::http::status::HttpStatus;

/// Writes one response to a client socket, then completes.
///
/// The handler may be registered before its response exists (the CGI path
/// does this); it idles on write readiness until something calls
/// [`set_response`](ResponseHandler::set_response), or grows a body via
/// [`feed`](ResponseHandler::feed) until [`finish`](ResponseHandler::finish)
/// seals it. The response is serialized exactly once and `written` tracks
/// progress across partial writes.
pub struct ResponseHandler {
    fd: RawFd,
    response: Option<HttpResponse>,
    pending: Vec<u8>,
    wire: Option<Vec<u8>>,
    written: usize,
}

impl ResponseHandler {
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            response: None,
            pending: Vec::new(),
            wire: None,
            written: 0,
        }
    }

    pub fn with_response(fd: RawFd, response: HttpResponse) -> Self {
        Self {
            fd,
            response: Some(response),
            pending: Vec::new(),
            wire: None,
            written: 0,
        }
    }

    pub fn set_response(&mut self, response: HttpResponse) {
        self.response = Some(response);
    }

    /// Appends to the growing body. Writing starts only once
    /// [`finish`](ResponseHandler::finish) seals the response.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Seals a fed body into the response that will be written.
    pub fn finish(&mut self, status: HttpStatus, content_type: &str) {
        let body = std::mem::take(&mut self.pending);
        self.response = Some(HttpResponse::with_body(status, content_type, body));
    }
}

impl Task for ResponseHandler {
    fn descriptor(&self) -> RawFd {
        self.fd
    }

    fn io_mode(&self) -> IoMode {
        IoMode::Write
    }

    fn run(&mut self, _dispatcher: &mut Dispatcher) -> Result<bool, ServerError> {
        let wire = match (&mut self.wire, self.response.take()) {
            (Some(wire), _) => wire,
            (slot @ None, Some(response)) => slot.insert(response.serialize()),
            // Still waiting for a producer (a CGI reader) to deliver.
            (None, None) => return Ok(true),
        };

        while self.written < wire.len() {
            match fd_write(self.fd, &wire[self.written..]) {
                Ok(0) => {
                    log::warn!("client on fd {} stopped accepting data", self.fd);
                    return Ok(false);
                }
                Ok(n) => self.written += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(true),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("write to client fd {} failed: {err}", self.fd);
                    return Ok(false);
                }
            }
        }
        log::debug!("wrote {} bytes to fd {}", self.written, self.fd);
        Ok(false)
    }
}
