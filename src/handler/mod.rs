//! Request handling past the parsing stage: routing, the concrete
//! handlers and response post-processing.

pub mod error_pages;
pub mod listing;
pub mod middleware;
pub mod router;
pub mod static_files;
pub mod upload;

pub use router::Handled;

use crate::error::ServerError;
use crate::http::request::HttpRequest;
use crate::server::ServerData;

/// Routes a request and applies the response middleware. CGI outcomes pass
/// through untouched; their responses are produced asynchronously.
pub fn handle_request(request: &HttpRequest, data: &ServerData) -> Result<Handled, ServerError> {
    let mut handled = router::dispatch(request, data)?;
    if let Handled::Response(response) = &mut handled {
        middleware::apply(request, response);
    }
    Ok(handled)
}
