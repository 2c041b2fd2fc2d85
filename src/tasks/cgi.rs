//! CGI execution: fork/exec of an interpreter with the request piped to
//! the child's stdin and its stdout read back as the response.
//!
//! A pipeline is three tasks. The [`CgiWriter`] feeds the serialized
//! request into the child, the [`CgiReader`] accumulates the child's
//! output, and a [`ResponseHandler`] (registered up front, idle until fed)
//! owns the client socket. When the reader hits EOF it closes the writer,
//! reaps the child with a blocking `waitpid` and delivers either the parsed
//! script output or a 500 page to the response handler.

use std::cell::RefCell;
use std::ffi::CString;
use std::io::ErrorKind;
use std::os::fd::{IntoRawFd, RawFd};
use std::rc::Rc;

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};

use crate::dispatcher::{fd_read, fd_write, Dispatcher, IoMode, Task};
use crate::error::ServerError;
use crate::handler::error_pages;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::server::ServerData;
use crate::tasks::response_handler::ResponseHandler;

/// Everything the router resolved about a CGI request; turned into a
/// running child by [`launch`].
#[derive(Debug)]
pub struct CgiPipeline {
    /// Absolute path of the interpreter binary.
    pub interpreter: String,
    /// Directory the child runs in; the script lives here.
    pub working_dir: String,
    /// Script filename relative to `working_dir`.
    pub script_name: String,
    /// Path segments past the script, exported as `PATH_INFO`.
    pub path_info: String,
    /// Raw query string, exported as `QUERY_INFO`.
    pub query: String,
    pub request: HttpRequest,
}

struct SpawnedCgi {
    pid: Pid,
    /// Parent's write end of the child's stdin.
    stdin: RawFd,
    /// Parent's read end of the child's stdout.
    stdout: RawFd,
}

/// Spawns the child and registers the three pipeline tasks.
pub fn launch(
    dispatcher: &mut Dispatcher,
    client_fd: RawFd,
    pipeline: CgiPipeline,
    data: &Rc<ServerData>,
) -> Result<(), ServerError> {
    let payload = pipeline.request.serialize();
    let spawned = spawn_cgi(&pipeline)?;
    log::info!(
        "running {} {} (pid {})",
        pipeline.interpreter,
        pipeline.script_name,
        spawned.pid
    );

    let response_handler = Rc::new(RefCell::new(ResponseHandler::new(client_fd)));
    let writer = Rc::new(RefCell::new(CgiWriter::new(spawned.stdin, false)));
    writer.borrow_mut().feed(&payload);
    let reader = Rc::new(RefCell::new(CgiReader::new(
        spawned.stdout,
        spawned.pid,
        data.message_buffer_size,
        Rc::clone(&writer),
        Rc::clone(&response_handler),
    )));

    dispatcher.register_task(response_handler);
    dispatcher.register_task(writer);
    dispatcher.register_task(reader);
    Ok(())
}

/// Forks and execs the interpreter. All strings the child needs are
/// prepared before the fork; the child only touches async-signal-safe
/// libc calls.
fn spawn_cgi(pipeline: &CgiPipeline) -> Result<SpawnedCgi, ServerError> {
    let interpreter = cstring(&pipeline.interpreter)?;
    let script = cstring(&pipeline.script_name)?;
    let dir = cstring(&pipeline.working_dir)?;

    let argv = [interpreter.as_ptr(), script.as_ptr(), std::ptr::null()];

    let mut env_strings: Vec<CString> = std::env::vars()
        .filter_map(|(key, value)| CString::new(format!("{key}={value}")).ok())
        .collect();
    env_strings.push(cstring(&format!("PATH_INFO={}", pipeline.path_info))?);
    env_strings.push(cstring(&format!("QUERY_INFO={}", pipeline.query))?);
    let mut envp: Vec<*const libc::c_char> =
        env_strings.iter().map(|entry| entry.as_ptr()).collect();
    envp.push(std::ptr::null());

    // (child stdin read, parent write) and (parent read, child stdout write)
    let (stdin_read, stdin_write) = pipe().map_err(|e| cgi_error("pipe", e))?;
    let (stdout_read, stdout_write) = pipe().map_err(|e| cgi_error("pipe", e))?;
    let (stdin_read, stdin_write) = (stdin_read.into_raw_fd(), stdin_write.into_raw_fd());
    let (stdout_read, stdout_write) = (stdout_read.into_raw_fd(), stdout_write.into_raw_fd());

    match unsafe { fork() }.map_err(|e| cgi_error("fork", e))? {
        ForkResult::Child => {
            unsafe {
                libc::dup2(stdin_read, libc::STDIN_FILENO);
                libc::dup2(stdout_write, libc::STDOUT_FILENO);
                libc::dup2(stdout_write, libc::STDERR_FILENO);
                libc::close(stdin_read);
                libc::close(stdin_write);
                libc::close(stdout_read);
                libc::close(stdout_write);
                libc::chdir(dir.as_ptr());
                libc::execve(interpreter.as_ptr(), argv.as_ptr(), envp.as_ptr());
                // Only reached when execve itself failed.
                libc::_exit(1)
            }
        }
        ForkResult::Parent { child } => {
            unsafe {
                libc::close(stdin_read);
                libc::close(stdout_write);
                libc::fcntl(stdin_write, libc::F_SETFL, libc::O_NONBLOCK);
                libc::fcntl(stdout_read, libc::F_SETFL, libc::O_NONBLOCK);
            }
            Ok(SpawnedCgi {
                pid: child,
                stdin: stdin_write,
                stdout: stdout_read,
            })
        }
    }
}

fn cstring(text: &str) -> Result<CString, ServerError> {
    CString::new(text).map_err(|_| ServerError::CgiRuntime(format!("NUL byte in {text:?}")))
}

fn cgi_error(what: &str, err: nix::errno::Errno) -> ServerError {
    ServerError::CgiRuntime(format!("{what}: {err}"))
}

/// Feeds bytes to the child's stdin. In one-shot mode the task completes
/// once its buffer drains; in continuous mode it stays registered and
/// flushes whatever [`feed`](CgiWriter::feed) queued since the last tick.
/// Closed early by the reader if the child exits without draining it.
pub struct CgiWriter {
    fd: RawFd,
    buffer: Vec<u8>,
    written: usize,
    continuous: bool,
    closed: bool,
}

impl CgiWriter {
    pub fn new(fd: RawFd, continuous: bool) -> Self {
        Self {
            fd,
            buffer: Vec::new(),
            written: 0,
            continuous,
            closed: false,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn descriptor(&self) -> RawFd {
        self.fd
    }
}

impl Task for CgiWriter {
    fn descriptor(&self) -> RawFd {
        self.fd
    }

    fn io_mode(&self) -> IoMode {
        IoMode::Write
    }

    fn run(&mut self, _dispatcher: &mut Dispatcher) -> Result<bool, ServerError> {
        if self.closed {
            return Ok(false);
        }
        while self.written < self.buffer.len() {
            match fd_write(self.fd, &self.buffer[self.written..]) {
                Ok(n) => self.written += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(true),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("CGI stdin write failed: {err}");
                    return Err(ServerError::CgiBrokenPipe);
                }
            }
        }
        Ok(self.continuous)
    }
}

/// Accumulates the child's stdout. On EOF: closes the writer, reaps the
/// child and delivers the response to the linked [`ResponseHandler`].
pub struct CgiReader {
    fd: RawFd,
    pid: Pid,
    read_size: usize,
    buffer: Vec<u8>,
    writer: Rc<RefCell<CgiWriter>>,
    response_handler: Rc<RefCell<ResponseHandler>>,
}

impl CgiReader {
    pub fn new(
        fd: RawFd,
        pid: Pid,
        read_size: usize,
        writer: Rc<RefCell<CgiWriter>>,
        response_handler: Rc<RefCell<ResponseHandler>>,
    ) -> Self {
        Self {
            fd,
            pid,
            read_size,
            buffer: Vec::new(),
            writer,
            response_handler,
        }
    }

    fn finish(&mut self, dispatcher: &mut Dispatcher) -> Result<HttpResponse, ServerError> {
        let writer_fd = self.writer.borrow().descriptor();
        self.writer.borrow_mut().close();
        dispatcher.remove_by_fd(writer_fd);

        // Deliberately blocks: EOF on stdout means the child is exiting, so
        // the reactor stall is bounded by process teardown.
        let status = waitpid(self.pid, None).map_err(|e| cgi_error("waitpid", e))?;
        match status {
            WaitStatus::Exited(_, 0) => match HttpResponse::parse(&self.buffer) {
                Some(response) => Ok(response),
                None => {
                    log::warn!("pid {} produced unparseable output", self.pid);
                    Ok(error_pages::generated(&ServerError::CgiRuntime(
                        "script produced unparseable output".to_string(),
                    )))
                }
            },
            WaitStatus::Exited(_, code) => {
                log::warn!("pid {} exited with code {code}", self.pid);
                Ok(error_pages::generated(&ServerError::CgiRuntime(
                    String::from_utf8_lossy(&self.buffer).into_owned(),
                )))
            }
            other => {
                log::warn!("pid {} did not exit normally: {other:?}", self.pid);
                Ok(error_pages::generated(&ServerError::CgiRuntime(
                    "script terminated abnormally".to_string(),
                )))
            }
        }
    }
}

impl Task for CgiReader {
    fn descriptor(&self) -> RawFd {
        self.fd
    }

    fn io_mode(&self) -> IoMode {
        IoMode::Read
    }

    fn run(&mut self, dispatcher: &mut Dispatcher) -> Result<bool, ServerError> {
        let mut buf = vec![0u8; self.read_size];
        let n = match fd_read(self.fd, &mut buf) {
            Ok(n) => n,
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.kind() == ErrorKind::Interrupted =>
            {
                return Ok(true)
            }
            Err(err) => return Err(ServerError::CgiRuntime(format!("stdout read: {err}"))),
        };
        if n > 0 {
            self.buffer.extend_from_slice(&buf[..n]);
            return Ok(true);
        }

        let response = self.finish(dispatcher)?;
        self.response_handler.borrow_mut().set_response(response);
        Ok(false)
    }
}
