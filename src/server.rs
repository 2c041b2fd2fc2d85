//! Server assembly: turns a [`Config`] into bound listeners plus the
//! shared per-virtual-server state handed to every connection task.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::TcpListener;
use std::rc::Rc;

use nix::sys::signal::{signal, SigHandler, Signal};

use crate::config::{Config, ServerConfig};
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::locations::LocationTree;
use crate::tasks::listener::Listener;
use crate::url::Url;

/// Immutable state one virtual server shares across all of its
/// connection tasks.
pub struct ServerData {
    pub locations: LocationTree,
    pub server_names: Vec<String>,
    pub root: String,
    pub max_request_size: usize,
    pub message_buffer_size: usize,
    pub cgi_interpreters: HashMap<String, String>,
    pub error_pages: HashMap<String, String>,
}

impl ServerData {
    fn build(config: &Config, server: &ServerConfig) -> Self {
        let mut locations = LocationTree::new();
        for (prefix, location) in &server.locations {
            match Url::parse(prefix) {
                Some(url) => locations.insert(&url, Rc::new(location.clone())),
                None => log::error!("skipping unparseable location prefix {prefix:?}"),
            }
        }
        Self {
            locations,
            server_names: server.server_names.clone(),
            root: server.root.clone().unwrap_or_else(|| "./www".to_string()),
            max_request_size: server.max_request_size.unwrap_or(config.max_request_size),
            message_buffer_size: config.message_buffer_size,
            cgi_interpreters: config.cgi_interpreters.clone(),
            error_pages: server.error_pages.clone(),
        }
    }
}

pub struct Server {
    dispatcher: Dispatcher,
    ports: Vec<u16>,
}

impl Server {
    /// Binds one listening socket per configured virtual server. A server
    /// block whose port cannot be bound is skipped with an error log; a
    /// configuration yielding no listener at all is fatal.
    pub fn new(config: &Config) -> Result<Self, ServerError> {
        // Writing to a pipe whose read end died must surface as EPIPE, not
        // kill the process.
        unsafe {
            signal(Signal::SIGPIPE, SigHandler::SigIgn)
                .map_err(|e| ServerError::Generic(format!("sigaction: {e}")))?;
        }

        let mut dispatcher = Dispatcher::new()?;
        let mut ports = Vec::new();

        for server in &config.servers {
            let port = server.port.unwrap_or(config.default_port);
            let socket = match TcpListener::bind(("0.0.0.0", port)) {
                Ok(socket) => socket,
                Err(err) => {
                    log::error!("cannot bind port {port}: {err}");
                    continue;
                }
            };
            socket
                .set_nonblocking(true)
                .map_err(ServerError::SocketSetup)?;
            let bound = socket
                .local_addr()
                .map_err(ServerError::SocketSetup)?
                .port();
            log::info!(
                "listening on port {bound} ({})",
                if server.server_names.is_empty() {
                    "any host".to_string()
                } else {
                    server.server_names.join(", ")
                }
            );
            ports.push(bound);

            let data = Rc::new(ServerData::build(config, server));
            dispatcher.register_task(Rc::new(RefCell::new(Listener::new(socket, data))));
        }

        if ports.is_empty() {
            return Err(ServerError::Generic(
                "no listening socket could be created".to_string(),
            ));
        }
        Ok(Self { dispatcher, ports })
    }

    /// Ports actually bound, in configuration order. Useful when a server
    /// block asked for port 0.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Runs reactor iterations until a fatal error or a shutdown request
    /// bubbles up.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            self.dispatcher.update()?;
        }
    }

    /// One reactor iteration; exposed for tests driving the loop manually.
    pub fn poll_once(&mut self) -> Result<(), ServerError> {
        self.dispatcher.update()
    }
}
