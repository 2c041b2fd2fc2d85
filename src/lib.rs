//! A single-process, single-threaded HTTP server built around a
//! non-blocking reactor. Client sockets and CGI subprocess pipes are
//! multiplexed over one epoll handle; every unit of work is a task bound
//! to a file descriptor.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod http;
pub mod locations;
pub mod server;
pub mod tasks;
pub mod url;
