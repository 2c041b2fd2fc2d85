use std::cell::RefCell;
use std::io::ErrorKind;
use std::mem;
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::config::LocationConfig;
use crate::dispatcher::{fd_read, Dispatcher, IoMode, Task};
use crate::error::ServerError;
use crate::handler::{self, error_pages, Handled};
use crate::http::builder::{BuilderState, RequestBuilder};
use crate::tasks::cgi;
use crate::tasks::response_handler::ResponseHandler;
use crate::server::ServerData;

/// How the end of the request body is recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// No body expected; the request is complete once headers are.
    None,
    /// Content-Length bytes follow the headers.
    Declared(usize),
    /// Chunked transfer coding; complete at the zero-size chunk.
    Chunked,
}

/// Reads a client socket until one full request has been assembled, then
/// dispatches it and hands the socket to a [`ResponseHandler`].
///
/// Header-dependent checks (virtual host, routing existence, body framing
/// and size limits) run once, as soon as the header block is complete, so
/// oversized or unroutable requests are rejected without buffering their
/// bodies.
pub struct RequestHandler {
    fd: RawFd,
    data: Rc<ServerData>,
    builder: RequestBuilder,
    validated: bool,
    framing: Framing,
    limit: usize,
    location: Option<Rc<LocationConfig>>,
}

impl RequestHandler {
    pub fn new(fd: RawFd, data: Rc<ServerData>) -> Self {
        let limit = data.max_request_size;
        Self {
            fd,
            data,
            builder: RequestBuilder::new(),
            validated: false,
            framing: Framing::None,
            limit,
            location: None,
        }
    }

    fn advance(&mut self, dispatcher: &mut Dispatcher) -> Result<bool, ServerError> {
        let mut buf = vec![0u8; self.data.message_buffer_size];
        let n = match fd_read(self.fd, &mut buf) {
            Ok(n) => n,
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.kind() == ErrorKind::Interrupted =>
            {
                return Ok(true)
            }
            Err(err) => return Err(ServerError::Io(err)),
        };
        if n == 0 {
            // A chunked body cut off by the peer is finalized with whatever
            // was decoded; anything else is just a vanished client.
            if self.validated && self.framing == Framing::Chunked {
                self.finish(dispatcher)?;
                return Ok(false);
            }
            log::debug!("peer on fd {} hung up mid-request", self.fd);
            return Ok(false);
        }

        let state = self.builder.append_data(&buf[..n])?;
        if state != BuilderState::Initial && !self.validated {
            self.validate()?;
            self.validated = true;
        }

        // Chunked bodies carry no up-front size, so the ceiling is enforced
        // as the chunks decode instead of after the terminating zero chunk.
        if self.framing == Framing::Chunked && self.builder.body_size() > self.limit {
            return Err(ServerError::PayloadTooLarge);
        }

        let complete = match self.framing {
            Framing::None => state != BuilderState::Initial,
            Framing::Declared(length) => self.builder.body_size() >= length,
            Framing::Chunked => state == BuilderState::ChunkedComplete,
        };
        if !complete {
            return Ok(true);
        }

        self.finish(dispatcher)?;
        Ok(false)
    }

    /// Checks that run as soon as the header block is in.
    fn validate(&mut self) -> Result<(), ServerError> {
        if !self.data.server_names.is_empty() {
            let host = self.builder.host().unwrap_or("");
            if !self.data.server_names.iter().any(|name| name == host) {
                return Err(ServerError::HostMismatch(host.to_string()));
            }
        }

        let path = self
            .builder
            .header_path()
            .ok_or_else(|| ServerError::MalformedRequest("missing request path".to_string()))?;
        let route = self
            .data
            .locations
            .find(path)
            .ok_or_else(|| ServerError::FileNotFound(path.render(true)))?;
        // A location may tighten the server ceiling, never raise it.
        self.limit = match route.location.max_request_size {
            Some(limit) => limit.min(self.data.max_request_size),
            None => self.data.max_request_size,
        };
        self.location = Some(route.location);

        let method = self
            .builder
            .method()
            .ok_or_else(|| ServerError::MalformedRequest("missing method".to_string()))?;
        self.framing = if self.builder.is_chunked() {
            Framing::Chunked
        } else {
            match self.builder.content_length() {
                Some(length) if length > self.limit => return Err(ServerError::PayloadTooLarge),
                Some(length) => Framing::Declared(length),
                None if method.defaults_to_empty_body() => Framing::None,
                None => return Err(ServerError::LengthRequired),
            }
        };
        Ok(())
    }

    fn finish(&mut self, dispatcher: &mut Dispatcher) -> Result<(), ServerError> {
        let builder = mem::replace(&mut self.builder, RequestBuilder::new());
        let request = builder.build(Some(self.limit))?;
        if request.body == b"close" {
            return Err(ServerError::ShutdownSignal);
        }
        log::info!(
            "{} {} ({} body bytes)",
            request.method.as_str(),
            request.path.render(true),
            request.body.len()
        );

        match handler::handle_request(&request, &self.data)? {
            Handled::Response(response) => {
                dispatcher.register_task(Rc::new(RefCell::new(ResponseHandler::with_response(
                    self.fd, response,
                ))));
            }
            Handled::Cgi(pipeline) => {
                cgi::launch(dispatcher, self.fd, pipeline, &self.data)?;
            }
        }
        Ok(())
    }
}

impl Task for RequestHandler {
    fn descriptor(&self) -> RawFd {
        self.fd
    }

    fn io_mode(&self) -> IoMode {
        IoMode::Read
    }

    fn run(&mut self, dispatcher: &mut Dispatcher) -> Result<bool, ServerError> {
        match self.advance(dispatcher) {
            Ok(keep) => Ok(keep),
            Err(ServerError::ShutdownSignal) => Err(ServerError::ShutdownSignal),
            Err(err) => {
                log::warn!("request on fd {} failed: {err}", self.fd);
                let response =
                    error_pages::error_response(&self.data, self.location.as_deref(), &err);
                dispatcher.register_task(Rc::new(RefCell::new(ResponseHandler::with_response(
                    self.fd, response,
                ))));
                Ok(false)
            }
        }
    }
}
