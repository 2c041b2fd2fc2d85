//! The reactor: a single-threaded task dispatcher multiplexing client
//! sockets and CGI pipes over one epoll instance.
//!
//! A [`Task`] is a unit of work bound to one file descriptor and one I/O
//! direction. The dispatcher maintains the set of active tasks (at most one
//! per descriptor), a FIFO insertion queue for tasks whose descriptor is
//! still busy, and a reference-count table deciding when a descriptor is
//! physically closed. Tasks cooperate: each `run` performs at most one unit
//! of non-blocking work and suspends by returning `Ok(true)` until the next
//! readiness notification for its descriptor.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::{BorrowedFd, RawFd};
use std::rc::Rc;

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::error::ServerError;

const EPOLL_EVENT_COUNT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    Read,
    Write,
}

/// A file-descriptor-bound task. `run` returns `Ok(true)` to stay
/// registered, `Ok(false)` when its work is done, or an error. Running a
/// task may register further tasks through the dispatcher reference.
pub trait Task {
    fn descriptor(&self) -> RawFd;
    fn io_mode(&self) -> IoMode;
    fn run(&mut self, dispatcher: &mut Dispatcher) -> Result<bool, ServerError>;
}

pub type TaskRef = Rc<RefCell<dyn Task>>;

/// Reference counts for raw descriptors shared by several logical owners
/// (e.g. a client socket passed from a request handler to a response
/// handler). The descriptor must be closed exactly once, when the count
/// drops from 1 to 0.
#[derive(Debug, Default)]
pub struct DescriptorTable {
    alive: HashMap<RawFd, u32>,
}

impl DescriptorTable {
    pub fn retain(&mut self, fd: RawFd) {
        *self.alive.entry(fd).or_insert(0) += 1;
    }

    /// Drops one reference. Returns `true` when the caller must now close
    /// the descriptor. Releasing an untracked descriptor is a logic error
    /// upstream; it is logged and ignored rather than double-closed.
    pub fn release(&mut self, fd: RawFd) -> bool {
        match self.alive.get_mut(&fd) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.alive.remove(&fd);
                true
            }
            None => {
                log::error!("release of untracked descriptor {fd}");
                false
            }
        }
    }

    pub fn count(&self, fd: RawFd) -> u32 {
        self.alive.get(&fd).copied().unwrap_or(0)
    }
}

pub struct Dispatcher {
    epoll: Epoll,
    active: HashMap<RawFd, TaskRef>,
    insertion_queue: Vec<TaskRef>,
    table: DescriptorTable,
}

impl Dispatcher {
    pub fn new() -> Result<Self, ServerError> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| ServerError::Epoll(format!("epoll_create: {e}")))?;
        Ok(Self {
            epoll,
            active: HashMap::new(),
            insertion_queue: Vec::new(),
            table: DescriptorTable::default(),
        })
    }

    /// Queues a task for registration and immediately takes a reference on
    /// its descriptor, so close ordering stays correct even while the
    /// registration is still pending.
    pub fn register_task(&mut self, task: TaskRef) {
        let fd = task.borrow().descriptor();
        self.table.retain(fd);
        log::debug!("queued task on fd {fd} (refcount {})", self.table.count(fd));
        self.insertion_queue.push(task);
    }

    /// One reactor iteration: drain the insertion queue, block for
    /// readiness, run every ready task once, then retire completed ones.
    pub fn update(&mut self) -> Result<(), ServerError> {
        self.drain_insertion_queue()?;

        let mut events = [EpollEvent::empty(); EPOLL_EVENT_COUNT];
        let ready = match self.epoll.wait(&mut events, EpollTimeout::NONE) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => return Ok(()),
            Err(e) => return Err(ServerError::Epoll(format!("epoll_wait: {e}"))),
        };

        let ready_fds: Vec<RawFd> = events[..ready].iter().map(|ev| ev.data() as RawFd).collect();

        let mut completed: Vec<RawFd> = Vec::new();
        for fd in ready_fds {
            // The task may have been cancelled by an earlier task in this
            // same iteration (removeByFd), so a miss is not an error.
            let task = match self.active.get(&fd) {
                Some(task) => Rc::clone(task),
                None => continue,
            };

            let outcome = task.borrow_mut().run(self);
            match outcome {
                Ok(true) => {}
                Ok(false) => completed.push(fd),
                Err(ServerError::CgiBrokenPipe) => {
                    log::warn!("CGI pipe on fd {fd} broke; dropping its task");
                    completed.push(fd);
                }
                Err(err) => return Err(err),
            }
        }

        for fd in completed {
            self.retire(fd);
        }
        Ok(())
    }

    /// Out-of-band cancellation: drops poll interest and the registry entry
    /// for `fd` (active or still queued) without waiting for a readiness
    /// cycle. Unknown descriptors are tolerated.
    pub fn remove_by_fd(&mut self, fd: RawFd) {
        if self.active.remove(&fd).is_some() {
            log::debug!("cancelling active task on fd {fd}");
            let _ = self.epoll.delete(borrow_fd(fd));
            self.release(fd);
        }

        let before = self.insertion_queue.len();
        self.insertion_queue.retain(|task| task.borrow().descriptor() != fd);
        for _ in 0..before - self.insertion_queue.len() {
            self.release(fd);
        }
    }

    pub fn descriptor_refcount(&self, fd: RawFd) -> u32 {
        self.table.count(fd)
    }

    fn drain_insertion_queue(&mut self) -> Result<(), ServerError> {
        let pending = std::mem::take(&mut self.insertion_queue);
        for task in pending {
            let (fd, mode) = {
                let t = task.borrow();
                (t.descriptor(), t.io_mode())
            };

            // Collision: the descriptor is still owned by an active task.
            // Keep the newcomer queued until the owner retires.
            if self.active.contains_key(&fd) {
                self.insertion_queue.push(task);
                continue;
            }

            let flags = match mode {
                IoMode::Read => EpollFlags::EPOLLIN,
                IoMode::Write => EpollFlags::EPOLLOUT,
            };
            self.epoll
                .add(borrow_fd(fd), EpollEvent::new(flags, fd as u64))
                .map_err(|e| ServerError::Epoll(format!("epoll_ctl add fd {fd}: {e}")))?;
            self.active.insert(fd, task);
        }
        Ok(())
    }

    /// Retires a completed active task: unregister from epoll, drop the
    /// registry entry, release one descriptor reference.
    fn retire(&mut self, fd: RawFd) {
        if self.active.remove(&fd).is_none() {
            return;
        }
        let _ = self.epoll.delete(borrow_fd(fd));
        self.release(fd);
    }

    fn release(&mut self, fd: RawFd) {
        if self.table.release(fd) {
            log::debug!("closing fd {fd}");
            unsafe { libc::close(fd) };
        }
    }
}

/// Borrows a raw descriptor for an epoll_ctl call. The dispatcher's
/// refcount table guarantees the fd outlives the call.
fn borrow_fd(fd: RawFd) -> BorrowedFd<'static> {
    unsafe { BorrowedFd::borrow_raw(fd) }
}

/// Reads from a raw descriptor, mapping the raw syscall result to
/// `io::Result` so callers can branch on `WouldBlock`/`Interrupted`.
pub fn fd_read(fd: RawFd, buf: &mut [u8]) -> std::io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Writes to a raw descriptor; see [`fd_read`].
pub fn fd_write(fd: RawFd, buf: &[u8]) -> std::io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}
