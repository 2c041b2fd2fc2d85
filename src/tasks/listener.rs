use std::cell::RefCell;
use std::io::ErrorKind;
use std::net::TcpListener;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::rc::Rc;

use crate::dispatcher::{Dispatcher, IoMode, Task};
use crate::error::ServerError;
use crate::server::ServerData;
use crate::tasks::request_handler::RequestHandler;

/// Permanent task on a listening socket. Each readiness notification
/// accepts one connection and hands the client descriptor to a fresh
/// [`RequestHandler`].
pub struct Listener {
    socket: TcpListener,
    data: Rc<ServerData>,
}

impl Listener {
    pub fn new(socket: TcpListener, data: Rc<ServerData>) -> Self {
        Self { socket, data }
    }
}

impl Task for Listener {
    fn descriptor(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn io_mode(&self) -> IoMode {
        IoMode::Read
    }

    fn run(&mut self, dispatcher: &mut Dispatcher) -> Result<bool, ServerError> {
        match self.socket.accept() {
            Ok((stream, peer)) => {
                log::info!("accepted connection from {peer}");
                stream.set_nonblocking(true).map_err(ServerError::SocketAccept)?;
                // From here on the dispatcher's refcount table owns the fd.
                let fd = stream.into_raw_fd();
                dispatcher.register_task(Rc::new(RefCell::new(RequestHandler::new(
                    fd,
                    Rc::clone(&self.data),
                ))));
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(true),
            Err(err) => Err(ServerError::SocketAccept(err)),
        }
    }
}
