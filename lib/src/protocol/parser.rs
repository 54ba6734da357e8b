//! Request-line parsing and message-boundary detection
//!
//! ferry only understands enough HTTP to route a request: the first line
//! `<METHOD> http://<host>[/] <VERSION>`. Nothing after it is validated.
//! Whether a message is complete is decided separately, by looking at the
//! end of the bytes accumulated so far.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Unknown,
}

impl Method {
    fn new(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            _ => Method::Unknown,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Unknown => "UNKNOWN",
        };
        f.write_str(method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
    Unknown,
}

impl Version {
    fn new(token: &str) -> Self {
        match token {
            "HTTP/1.0" => Version::Http10,
            "HTTP/1.1" => Version::Http11,
            _ => Version::Unknown,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
            Version::Unknown => "UNKNOWN",
        };
        f.write_str(version)
    }
}

/// The routing information of a request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    pub method: Method,
    pub version: Version,
    /// the target without its `http://` scheme and trailing slash
    pub uri: String,
}

impl Default for ParsedHeader {
    fn default() -> Self {
        ParsedHeader {
            method: Method::Unknown,
            version: Version::Unknown,
            uri: String::new(),
        }
    }
}

impl ParsedHeader {
    pub fn is_valid(&self) -> bool {
        self.method != Method::Unknown && self.version != Version::Unknown && !self.uri.is_empty()
    }

    /// the only requests forwarded upstream
    pub fn is_routable(&self) -> bool {
        self.is_valid() && self.method == Method::Get && self.version == Version::Http10
    }
}

const SCHEME: &str = "http://";

/// Parse the request line at the start of `buffer`.
///
/// Truncated or malformed input never fails: parsing stops at the first
/// missing or unexpected token and returns what was filled so far, which
/// then does not pass [`ParsedHeader::is_valid`].
pub fn parse(buffer: &[u8]) -> ParsedHeader {
    let first_line = match buffer.iter().position(|&byte| byte == b'\n') {
        Some(end) => &buffer[..end],
        None => buffer,
    };
    let first_line = String::from_utf8_lossy(first_line);
    let mut tokens = first_line.split_ascii_whitespace();

    let mut header = ParsedHeader::default();

    let Some(method) = tokens.next() else {
        return header;
    };
    header.method = Method::new(method);
    if header.method == Method::Unknown {
        return header;
    }

    let Some(target) = tokens.next() else {
        return header;
    };
    let Some(target) = target.strip_prefix(SCHEME) else {
        return header;
    };
    header.uri = target.strip_suffix('/').unwrap_or(target).to_owned();

    if let Some(version) = tokens.next() {
        header.version = Version::new(version);
    }

    header
}

/// Heuristic end-of-message test, applied to requests and responses alike:
/// a blank line, a lowercase closing html tag, or an uppercase closing html
/// tag followed by CRLF. There is no Content-Length accounting.
pub fn is_message_complete(buffer: &[u8]) -> bool {
    buffer.ends_with(b"\r\n\r\n") || buffer.ends_with(b"</html>") || buffer.ends_with(b"</HTML>\r\n")
}
