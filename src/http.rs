//! Request line parsing and response serialization.
//!
//! Only the request line is interpreted. Headers are skipped and the body
//! of a POST is whatever followed the first blank line in the receive
//! buffer. Responses always carry `Connection: close` and a `text/html`
//! content type; nothing else goes on the wire.

use std::fmt;
use std::io::{self, Write};

pub use bytes::Bytes;

/// Resource served when the request target is empty or `/`.
pub const DEFAULT_DOCUMENT: &str = "/index.html";

/// Longest method token kept for diagnostics.
pub const MAX_METHOD_LEN: usize = 4;
/// Longest request target kept; anything beyond is cut.
pub const MAX_TARGET_LEN: usize = 2047;
/// Longest version token kept for diagnostics.
pub const MAX_VERSION_LEN: usize = 15;

/// Request methods the router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    /// Any other token. Never matches a route and never falls back to a file.
    Unknown,
}

impl Method {
    /// Matches the token case-sensitively against the closed set.
    pub fn from_token(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => Method::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol versions a connection can be pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    #[default]
    Http11,
}

impl Version {
    /// Matches the token against the supported set, falling back to HTTP/1.1.
    pub fn from_token(token: &str) -> Version {
        match token {
            "HTTP/1.1" => Version::Http11,
            other => {
                log::warn!("Unknown or unsupported HTTP version {:?}, using HTTP/1.1", other);
                Version::Http11
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method-specific data carried by a request, handed out unvalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    /// Query string of a GET, including its leading `?`
    Query(Option<&'a str>),
    /// Raw bytes after the header block of a POST
    Body(&'a [u8]),
    None,
}

/// A parsed request line.
///
/// Produced once per receive and dropped after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    version: Version,
    body: Bytes,
}

impl Request {
    /// Parses the request line out of a raw receive buffer.
    ///
    /// Parsing never fails: unknown methods become [`Method::Unknown`],
    /// unknown versions become HTTP/1.1 and overlong tokens are truncated.
    ///
    /// ```
    /// use ptth::{Method, Request};
    ///
    /// let request = Request::parse(b"GET /search?q=x HTTP/1.1\r\nHost: a\r\n\r\n");
    /// assert_eq!(request.method(), Method::Get);
    /// assert_eq!(request.path(), "/search");
    /// assert_eq!(request.query(), Some("?q=x"));
    /// ```
    pub fn parse(data: &[u8]) -> Request {
        // blank lines before the request line are ignored
        let start = data
            .iter()
            .position(|&b| b != b'\r' && b != b'\n')
            .unwrap_or(data.len());
        let line_end = data[start..]
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .map_or(data.len(), |at| start + at);
        let line = String::from_utf8_lossy(&data[start..line_end]);
        log::debug!("{}", line);

        let mut tokens = line.split_ascii_whitespace();
        let method_token = tokens.next().unwrap_or("");
        let target = bounded(tokens.next().unwrap_or(""), MAX_TARGET_LEN);
        let version_token = bounded(tokens.next().unwrap_or(""), MAX_VERSION_LEN);

        let method = Method::from_token(method_token);
        if method == Method::Unknown {
            log::warn!("Unknown http method: {:?}", bounded(method_token, MAX_METHOD_LEN));
        }

        let (path, query) = match target.find('?') {
            Some(at) => (&target[..at], Some(target[at..].to_string())),
            None => (target, None),
        };
        let path = match path {
            "" | "/" => DEFAULT_DOCUMENT.to_string(),
            other => other.to_string(),
        };

        let body = match method {
            Method::Post => Bytes::copy_from_slice(body_of(&data[start..])),
            _ => Bytes::new(),
        };

        Request {
            method,
            path,
            query,
            version: Version::from_token(version_token),
            body,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Resource path with the query string removed.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query string including its leading `?`, if the target had one.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn payload(&self) -> Payload<'_> {
        match self.method {
            Method::Get => Payload::Query(self.query()),
            Method::Post => Payload::Body(&self.body),
            Method::Unknown => Payload::None,
        }
    }
}

/// Cuts `s` to at most `max` bytes without splitting a character.
fn bounded(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn body_of(data: &[u8]) -> &[u8] {
    data.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|at| &data[at + 4..])
        .unwrap_or(&[])
}

/// Body sent when a GET matches neither a route nor a file.
pub const NOT_FOUND_BODY: &str = "<h1>File not found</h1>";

const CONTENT_TYPE: &str = "text/html";

/// A status code and the bytes that follow the header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: u16,
    body: Bytes,
}

impl Response {
    /// Creates a response from a string or bytes.
    ///
    /// ```
    /// # use ptth::Response;
    /// let borrowed = Response::new(200, "<h1>ok</h1>");
    /// let owned = Response::new(200, vec![b'o', b'k']);
    /// assert_eq!(borrowed.content_length(), 11);
    /// assert_eq!(owned.content_length(), 2);
    /// ```
    pub fn new(code: u16, body: impl Into<Bytes>) -> Response {
        Response {
            code,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Response {
        Response::new(200, body)
    }

    /// The fixed 404 page.
    pub fn not_found() -> Response {
        Response::new(404, NOT_FOUND_BODY)
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    pub fn head(&self) -> Head {
        Head { code: self.code }
    }
}

/// Reason phrase for the supported status codes.
pub fn reason_phrase(code: u16) -> Option<&'static str> {
    match code {
        200 => Some("OK"),
        404 => Some("File not Found"),
        _ => None,
    }
}

/// The header block of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    code: u16,
}

impl Head {
    fn reason(&self) -> &'static str {
        reason_phrase(self.code).unwrap_or("")
    }

    /// Exact number of bytes [`encode`](Head::encode) produces.
    pub fn encoded_len(&self) -> usize {
        const FIXED: usize = "HTTP/1.1 ".len()
            + " ".len()
            + "\r\nConnection: close\r\nContent-Type: ".len()
            + CONTENT_TYPE.len()
            + "\r\n\r\n".len();

        FIXED + digits(self.code) + self.reason().len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let out = format!(
            "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-Type: {}\r\n\r\n",
            self.code,
            self.reason(),
            CONTENT_TYPE
        )
        .into_bytes();
        debug_assert_eq!(out.len(), self.encoded_len());
        out
    }
}

fn digits(mut n: u16) -> usize {
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}

/// Writes the header block and then the body, as two separate writes.
///
/// Failures are returned to the caller, which logs them; nothing is retried.
pub fn send<W: Write>(out: &mut W, response: &Response) -> io::Result<()> {
    if reason_phrase(response.code).is_none() {
        log::warn!("Unknown or unsupported response code: {}", response.code);
    }

    out.write_all(&response.head().encode())?;
    out.write_all(&response.body)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get() {
        let request = Request::parse(b"GET /callback HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.path(), "/callback");
        assert_eq!(request.query(), None);
        assert_eq!(request.version(), Version::Http11);
        assert_eq!(request.payload(), Payload::Query(None));
    }

    /// Tests that routing data and query data are split at the first `?`
    #[test]
    fn test_parse_query_string() {
        let request = Request::parse(b"GET /search?q=x&r=?y HTTP/1.1\r\n\r\n");
        assert_eq!(request.path(), "/search");
        assert_eq!(request.query(), Some("?q=x&r=?y"));
        assert_eq!(request.payload(), Payload::Query(Some("?q=x&r=?y")));
    }

    /// Tests that the root and an empty target both become the default document
    #[test]
    fn test_root_rewritten_to_default_document() {
        assert_eq!(Request::parse(b"GET / HTTP/1.1\r\n").path(), DEFAULT_DOCUMENT);
        assert_eq!(Request::parse(b"GET /?a=1 HTTP/1.1\r\n").path(), DEFAULT_DOCUMENT);
        assert_eq!(Request::parse(b"GET").path(), DEFAULT_DOCUMENT);
        assert_eq!(Request::parse(b"").path(), DEFAULT_DOCUMENT);
    }

    #[test]
    fn test_parse_post_body() {
        let request = Request::parse(b"POST /form HTTP/1.1\r\nContent-Length: 3\r\n\r\na=1");
        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.payload(), Payload::Body(b"a=1"));
    }

    #[test]
    fn test_parse_post_without_body() {
        let request = Request::parse(b"POST /form HTTP/1.1\r\nHost: a\r\n");
        assert_eq!(request.payload(), Payload::Body(b""));
    }

    /// Tests that unknown methods are kept as an explicit outcome
    #[test]
    fn test_unknown_method() {
        let request = Request::parse(b"DELETE /thing HTTP/1.1\r\n\r\n");
        assert_eq!(request.method(), Method::Unknown);
        assert_eq!(request.path(), "/thing");
        assert_eq!(request.payload(), Payload::None);

        assert_eq!(Request::parse(b"get / HTTP/1.1\r\n").method(), Method::Unknown);
        assert_eq!(Request::parse(b"POSTX / HTTP/1.1\r\n").method(), Method::Unknown);
    }

    #[test]
    fn test_unknown_version_defaults() {
        let request = Request::parse(b"GET /a HTTP/9.9\r\n\r\n");
        assert_eq!(request.version(), Version::Http11);
        assert_eq!(Request::parse(b"GET /a\r\n").version(), Version::Http11);
    }

    /// Tests that an overlong target is cut to its bound
    #[test]
    fn test_overlong_target_truncated() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(5000));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");

        let request = Request::parse(&raw);
        assert_eq!(request.path().len(), MAX_TARGET_LEN);
        assert!(request.path().starts_with("/aaa"));
    }

    #[test]
    fn test_bounded_respects_char_boundary() {
        assert_eq!(bounded("héllo", 2), "h");
        assert_eq!(bounded("héllo", 3), "hé");
        assert_eq!(bounded("abc", 10), "abc");
    }

    /// Tests that empty lines before the request line are skipped
    #[test]
    fn test_leading_blank_lines_ignored() {
        let request = Request::parse(b"\r\nGET /a HTTP/1.1\r\n\r\n");
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.path(), "/a");

        let request = Request::parse(b"\r\n\r\nPOST /form HTTP/1.1\r\n\r\nx=1");
        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.payload(), Payload::Body(b"x=1"));

        assert_eq!(Request::parse(b"\r\n\r\n").method(), Method::Unknown);
    }

    #[test]
    fn test_version_display() {
        assert_eq!(Version::Http11.to_string(), "HTTP/1.1");
        assert_eq!(Request::parse(b"GET / HTTP/1.1\r\n").version().as_str(), "HTTP/1.1");
    }

    #[test]
    fn test_request_line_ends_at_bare_newline() {
        let request = Request::parse(b"GET /a\nHTTP/1.1\r\n");
        assert_eq!(request.path(), "/a");
    }

    /// Tests the header length against the literal header text for
    /// bodies of different sizes
    #[test]
    fn test_head_length_matches_literal_text() {
        let literal = "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Type: text/html\r\n\r\n";

        for body in ["<h1>ok</h1>", "", "a much longer body than the first one"] {
            let response = Response::ok(body);
            assert_eq!(response.head().encoded_len(), literal.len());
            assert_eq!(response.head().encode(), literal.as_bytes());
        }
    }

    #[test]
    fn test_send_writes_head_then_body() {
        let mut out = Vec::new();
        send(&mut out, &Response::ok("<h1>ok</h1>")).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Type: text/html\r\n\r\n<h1>ok</h1>"
        );
    }

    #[test]
    fn test_send_not_found() {
        let mut out = Vec::new();
        send(&mut out, &Response::not_found()).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 File not Found\r\n"));
        assert!(text.ends_with("\r\n\r\n<h1>File not found</h1>"));
    }

    /// Tests that codes outside the supported set go out with an empty reason
    #[test]
    fn test_unsupported_code_has_empty_reason() {
        let head = Response::new(500, "").head();
        let encoded = head.encode();
        assert!(encoded.starts_with(b"HTTP/1.1 500 \r\n"));
        assert_eq!(encoded.len(), head.encoded_len());
    }

    /// Tests that write failures reach the caller
    #[test]
    fn test_send_reports_write_failure() {
        struct Broken;

        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let err = send(&mut Broken, &Response::ok("x")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
