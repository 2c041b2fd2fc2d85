//! Incremental HTTP request assembly.
//!
//! Socket reads arrive as arbitrary fragments; [`RequestBuilder`] turns them
//! into a parsed header plus a size-tracked or chunk-decoded body without
//! ever re-scanning bytes it has already resolved. Header accessors become
//! valid as soon as [`BuilderState::HeaderComplete`] is reached, so the
//! caller can route the request and enforce body limits before the body has
//! fully arrived.

use crate::error::ServerError;
use crate::http::headers::HttpHeaders;
use crate::http::request::HttpRequest;
use crate::http::response::find_subsequence;
use crate::http::HttpMethod;
use crate::url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Initial,
    HeaderComplete,
    ChunkedComplete,
}

#[derive(Default)]
pub struct RequestBuilder {
    state: Option<BuilderState>,
    head: Vec<u8>,
    // How far `head` has been scanned for the terminating blank line.
    // Re-scans resume 3 bytes earlier to catch a terminator split across
    // fragments.
    scanned: usize,
    request: Option<HttpRequest>,
    body: Vec<u8>,
    chunked: bool,
    decoder: ChunkDecoder,
}

impl RequestBuilder {
    pub fn new() -> Self {
        RequestBuilder::default()
    }

    pub fn state(&self) -> BuilderState {
        self.state.unwrap_or(BuilderState::Initial)
    }

    /// Feeds one raw fragment. Returns the macro-state after consuming it.
    pub fn append_data(&mut self, data: &[u8]) -> Result<BuilderState, ServerError> {
        match self.state() {
            BuilderState::Initial => {
                let resume = self.scanned.saturating_sub(3);
                self.head.extend_from_slice(data);

                if let Some(at) = find_subsequence(&self.head[resume..], b"\r\n\r\n") {
                    let header_end = resume + at + 4;
                    let request = parse_head(&self.head[..header_end])?;
                    self.chunked = request.is_chunked();
                    self.request = Some(request);
                    self.state = Some(BuilderState::HeaderComplete);

                    let leftover = self.head.split_off(header_end);
                    self.head = Vec::new();
                    if !leftover.is_empty() {
                        self.push_body(&leftover)?;
                    }
                } else {
                    self.scanned = self.head.len();
                }
            }
            BuilderState::HeaderComplete => self.push_body(data)?,
            BuilderState::ChunkedComplete => {}
        }
        Ok(self.state())
    }

    fn push_body(&mut self, data: &[u8]) -> Result<(), ServerError> {
        if self.chunked {
            if self.decoder.feed(data, &mut self.body)? {
                self.state = Some(BuilderState::ChunkedComplete);
            }
        } else {
            self.body.extend_from_slice(data);
        }
        Ok(())
    }

    /// Decoded (or raw) body bytes accumulated so far.
    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn method(&self) -> Option<HttpMethod> {
        self.request.as_ref().map(|r| r.method)
    }

    pub fn header_path(&self) -> Option<&Url> {
        self.request.as_ref().map(|r| &r.path)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.request.as_ref().and_then(|r| r.content_length())
    }

    pub fn host(&self) -> Option<&str> {
        self.request.as_ref().and_then(|r| r.host())
    }

    /// Promotes the accumulated data into an immutable [`HttpRequest`].
    /// For declared-length framing the body is cut at the declared length,
    /// so surplus bytes a peer sent past it never reach a handler. `limit`
    /// is a ceiling on whatever remains.
    pub fn build(mut self, limit: Option<usize>) -> Result<HttpRequest, ServerError> {
        let mut request = self
            .request
            .take()
            .ok_or_else(|| ServerError::MalformedRequest("incomplete header".to_string()))?;
        if !self.chunked {
            if let Some(declared) = request.content_length() {
                self.body.truncate(declared);
            }
        }
        if let Some(limit) = limit {
            if self.body.len() > limit {
                return Err(ServerError::PayloadTooLarge);
            }
        }
        request.body = self.body;
        Ok(request)
    }
}

fn parse_head(head: &[u8]) -> Result<HttpRequest, ServerError> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));

    let request_line = lines
        .next()
        .ok_or_else(|| ServerError::MalformedRequest("empty request".to_string()))?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts
        .next()
        .ok_or_else(|| ServerError::MalformedRequest("missing method".to_string()))?;
    let method = HttpMethod::from_str(method_str)
        .ok_or_else(|| ServerError::UnsupportedMethod(method_str.to_string()))?;

    let path_str = parts
        .next()
        .ok_or_else(|| ServerError::MalformedRequest("missing path".to_string()))?;
    let path = Url::parse(path_str)
        .ok_or_else(|| ServerError::MalformedRequest(format!("bad path: {path_str}")))?;

    if parts.next().is_none() {
        return Err(ServerError::MalformedRequest(
            "missing HTTP version".to_string(),
        ));
    }

    let mut headers = HttpHeaders::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ServerError::MalformedRequest(format!("bad header: {line}")))?;
        headers.set(name.trim(), value.trim());
    }

    Ok(HttpRequest {
        method,
        path,
        headers,
        body: Vec::new(),
    })
}

/// Decoder for chunked transfer encoding. Consumes
/// `<hex-size>\r\n<payload>\r\n` units byte by byte, so a size line or a
/// trailing CRLF split across two socket reads decodes the same as one
/// contiguous buffer.
#[derive(Debug, Default)]
struct ChunkDecoder {
    stage: ChunkStage,
    size_line: Vec<u8>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ChunkStage {
    #[default]
    Size,
    Data(usize),
    DataCr,
    DataLf,
    Done,
}

impl ChunkDecoder {
    /// Feeds raw bytes, appending decoded payload to `out`. Returns `true`
    /// once the zero-size chunk has been seen.
    fn feed(&mut self, mut data: &[u8], out: &mut Vec<u8>) -> Result<bool, ServerError> {
        while !data.is_empty() {
            match self.stage {
                ChunkStage::Size => {
                    if let Some(nl) = data.iter().position(|&b| b == b'\n') {
                        self.size_line.extend_from_slice(&data[..nl]);
                        data = &data[nl + 1..];
                        let size = parse_chunk_size(&self.size_line)?;
                        self.size_line.clear();
                        self.stage = if size == 0 {
                            ChunkStage::Done
                        } else {
                            ChunkStage::Data(size)
                        };
                    } else {
                        self.size_line.extend_from_slice(data);
                        data = &[];
                    }
                }
                ChunkStage::Data(remaining) => {
                    let take = remaining.min(data.len());
                    out.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if take == remaining {
                        self.stage = ChunkStage::DataCr;
                    } else {
                        self.stage = ChunkStage::Data(remaining - take);
                    }
                }
                ChunkStage::DataCr => match data[0] {
                    b'\r' => {
                        self.stage = ChunkStage::DataLf;
                        data = &data[1..];
                    }
                    b'\n' => {
                        self.stage = ChunkStage::Size;
                        data = &data[1..];
                    }
                    other => {
                        return Err(ServerError::MalformedRequest(format!(
                            "expected chunk terminator, got byte {other:#04x}"
                        )))
                    }
                },
                ChunkStage::DataLf => {
                    if data[0] != b'\n' {
                        return Err(ServerError::MalformedRequest(
                            "chunk terminator missing LF".to_string(),
                        ));
                    }
                    self.stage = ChunkStage::Size;
                    data = &data[1..];
                }
                // Trailing CRLF (or trailers) after the zero chunk are ignored.
                ChunkStage::Done => break,
            }
        }
        Ok(self.stage == ChunkStage::Done)
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ServerError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches('\r');
    // Chunk extensions after ';' are permitted but ignored.
    let size_part = text.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size_part, 16)
        .map_err(|_| ServerError::MalformedRequest(format!("bad chunk size: {text}")))
}
