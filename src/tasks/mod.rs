//! The tasks the reactor juggles: accepting connections, assembling
//! requests, driving CGI pipelines and writing responses back.

pub mod cgi;
pub mod listener;
pub mod request_handler;
pub mod response_handler;
