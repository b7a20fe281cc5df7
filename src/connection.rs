//! Per-connection HTTP/1.1 parse → dispatch → write state machine.
//!
//! Covers the line sub-state scanner (`parse_line`), the request-line/header/body
//! parse states (`process_read`), the dispatcher's fixed-offset form parsing and tag
//! table (`do_request`), and the status-line/write-buffer assembly plus the `writev`
//! loop (`process_write`/`write`). Static files are served via `memmap2` rather than
//! copying bytes into the write buffer; the scatter/gather write itself goes through
//! a raw `writev(2)` call via `libc`, since neither the standard library nor `memmap2`
//! expose vectored writes.
//!
//! The socket read (`read_from_socket`) and write (`write_to_socket`) loops run on the
//! reactor thread; `process` (parse, dispatch, response assembly) runs on a worker
//! thread — the reactor's epoll-equivalent loop only ever touches raw bytes, never
//! application state.

use std::fmt;
use std::io::{self, ErrorKind, Read};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use memmap2::Mmap;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::accounts::{Accounts, RegisterOutcome};
use crate::logger::Logger;

/// Usernames and passwords are bounded at 99 bytes, leaving room for a trailing
/// null terminator in a 100-byte scratch buffer.
const MAX_CREDENTIAL_LEN: usize = 99;

/// Literal fallback body for a zero-byte static file (see DESIGN.md OQ-4).
const ZERO_BYTE_BODY: &[u8] = b"<html><body>Hello</body></html>";

const BAD_REQUEST_BODY: &[u8] =
    b"Your request has bad syntax or is inherently impossible to satisfy.\n";
const FORBIDDEN_BODY: &[u8] = b"You do not have permission to get the file from this server.\n";
const NOT_FOUND_BODY: &[u8] = b"The requested file was not found on this server.\n";
const INTERNAL_ERROR_BODY: &[u8] =
    b"There was an unusual problem serving the requested file.\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    RequestLine,
    Headers,
    Body,
}

/// Outcome of scanning one line out of the read buffer, starting from `checked_idx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A complete `CRLF`-terminated line was found; both terminator bytes were replaced
    /// with `0` in place.
    Ok,
    /// A bare `CR` not followed by `LF`, or an `LF` not preceded by `CR`.
    Bad,
    /// The buffer ends mid-line; more data is needed.
    Open,
}

/// Scans `buf[*checked_idx..read_end]` for the next `CRLF`-terminated line, nulling both
/// terminator bytes in place and advancing `*checked_idx` past them on success.
pub fn scan_line(buf: &mut [u8], checked_idx: &mut usize, read_end: usize) -> LineStatus {
    let mut i = *checked_idx;
    while i < read_end {
        match buf[i] {
            b'\r' => {
                if i + 1 == read_end {
                    *checked_idx = i;
                    return LineStatus::Open;
                } else if buf[i + 1] == b'\n' {
                    buf[i] = 0;
                    buf[i + 1] = 0;
                    *checked_idx = i + 2;
                    return LineStatus::Ok;
                }
                *checked_idx = i;
                return LineStatus::Bad;
            }
            b'\n' => {
                if i > 0 && buf[i - 1] == b'\r' {
                    buf[i - 1] = 0;
                    buf[i] = 0;
                    *checked_idx = i + 1;
                    return LineStatus::Ok;
                }
                *checked_idx = i;
                return LineStatus::Bad;
            }
            _ => i += 1,
        }
    }
    *checked_idx = i;
    LineStatus::Open
}

/// Result of the parse/dispatch phase. Carries no payload: the file (if any) is left in
/// `Connection::file` for `process_write` to pick up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    NoRequest,
    BadRequest,
    Forbidden,
    NoResource,
    InternalError,
    FileRequest,
}

/// What the reactor should do once a worker has finished with a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcess {
    NeedMoreData,
    ReadyToWrite,
    Close,
}

/// Outcome of draining the socket on the reactor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Ok,
    Closed,
}

/// Outcome of one `write_to_socket` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// `EAGAIN`: caller should rearm writable and wait for the next event.
    Pending,
    /// All bytes were sent; the connection either resets for the next request or closes.
    Done { keep_alive: bool },
}

/// Per-connection state. One instance per accepted socket, shared between the reactor and
/// worker threads via `Arc<Mutex<Connection>>`; the one-shot readiness protocol guarantees
/// at most one thread ever touches a given instance at a time.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    token: Token,

    read_buf: Vec<u8>,
    read_end: usize,
    checked_idx: usize,
    start_line: usize,

    write_buf: Vec<u8>,
    write_cap: usize,

    state: ParseState,
    method: Method,
    target: String,
    host: Option<String>,
    content_length: usize,
    keep_alive: bool,
    cgi: bool,
    body: Vec<u8>,

    file: Option<Mmap>,
    file_len: usize,
    header_len: usize,
    sent_header: usize,
    sent_file: usize,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("token", &self.token)
            .field("state", &self.state)
            .field("target", &self.target)
            .finish()
    }
}

impl Connection {
    pub fn new(
        token: Token,
        stream: TcpStream,
        peer: SocketAddr,
        read_buf_cap: usize,
        write_buf_cap: usize,
    ) -> Self {
        Connection {
            stream,
            peer,
            token,
            read_buf: vec![0u8; read_buf_cap],
            read_end: 0,
            checked_idx: 0,
            start_line: 0,
            write_buf: Vec::with_capacity(write_buf_cap.min(256)),
            write_cap: write_buf_cap,
            state: ParseState::RequestLine,
            method: Method::Get,
            target: String::new(),
            host: None,
            content_length: 0,
            keep_alive: false,
            cgi: false,
            body: Vec::new(),
            file: None,
            file_len: 0,
            header_len: 0,
            sent_header: 0,
            sent_file: 0,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Reinitializes parse state for the next request on the same (keep-alive) connection.
    /// Both buffers are cleared unconditionally between requests; pipelining (bytes for a
    /// second request arriving early) is an explicit non-goal, so discarding anything past
    /// the current request's bytes is intentional.
    fn reset_for_next_request(&mut self) {
        self.read_buf.iter_mut().for_each(|b| *b = 0);
        self.read_end = 0;
        self.checked_idx = 0;
        self.start_line = 0;
        self.write_buf.clear();
        self.state = ParseState::RequestLine;
        self.method = Method::Get;
        self.target.clear();
        self.host = None;
        self.content_length = 0;
        self.keep_alive = false;
        self.cgi = false;
        self.body.clear();
        self.file = None;
        self.file_len = 0;
        self.header_len = 0;
        self.sent_header = 0;
        self.sent_file = 0;
    }

    pub fn register(&mut self, registry: &Registry, interest: Interest) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, interest)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }

    /// Non-blocking read loop into `read_buf`, draining the socket until it would block.
    /// A full buffer with no complete request yet is treated as a hard failure rather than
    /// growing the buffer without bound.
    pub fn read_from_socket(&mut self) -> io::Result<ReadOutcome> {
        if self.read_end >= self.read_buf.len() {
            return Ok(ReadOutcome::Closed);
        }
        loop {
            if self.read_end >= self.read_buf.len() {
                return Ok(ReadOutcome::Closed);
            }
            match self.stream.read(&mut self.read_buf[self.read_end..]) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => self.read_end += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadOutcome::Ok),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Parse + dispatch, invoked by a worker. Runs `process_read`, then, unless it
    /// returned `NoRequest`, `process_write`.
    pub fn process(
        &mut self,
        accounts: &Accounts,
        doc_root: &Path,
        logger: &Logger,
    ) -> PostProcess {
        let code = self.process_read(accounts, doc_root, logger);
        if code == HttpCode::NoRequest {
            return PostProcess::NeedMoreData;
        }
        if self.process_write(code) {
            PostProcess::ReadyToWrite
        } else {
            PostProcess::Close
        }
    }

    /// The main parse state machine.
    fn process_read(&mut self, accounts: &Accounts, doc_root: &Path, logger: &Logger) -> HttpCode {
        loop {
            if self.state == ParseState::Body {
                if self.read_end >= self.content_length + self.checked_idx {
                    let start = self.checked_idx;
                    let end = start + self.content_length;
                    self.body = self.read_buf[start..end].to_vec();
                    self.checked_idx = end;
                    return self.do_request(accounts, doc_root, logger);
                }
                return HttpCode::NoRequest;
            }

            match scan_line(&mut self.read_buf, &mut self.checked_idx, self.read_end) {
                LineStatus::Open => return HttpCode::NoRequest,
                LineStatus::Bad => return HttpCode::BadRequest,
                LineStatus::Ok => {
                    let line = self.read_buf[self.start_line..self.checked_idx - 2].to_vec();
                    self.start_line = self.checked_idx;

                    match self.state {
                        ParseState::RequestLine => {
                            if self.parse_request_line(&line).is_err() {
                                return HttpCode::BadRequest;
                            }
                            self.state = ParseState::Headers;
                        }
                        ParseState::Headers => {
                            if line.is_empty() {
                                if self.content_length > 0 {
                                    self.state = ParseState::Body;
                                } else {
                                    return self.do_request(accounts, doc_root, logger);
                                }
                            } else {
                                self.parse_header_line(&line, logger);
                            }
                        }
                        ParseState::Body => unreachable!(),
                    }
                }
            }
        }
    }

    /// Splits `METHOD TARGET VERSION` by spaces/tabs.
    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), ()> {
        fn is_space(b: u8) -> bool {
            b == b' ' || b == b'\t'
        }
        // Splits on the first run of whitespace: multiple consecutive spaces or tabs
        // between tokens collapse rather than producing spurious empty fields.
        fn next_token(line: &[u8], from: usize) -> Option<(&[u8], usize)> {
            let start = from + line[from..].iter().position(|b| !is_space(*b))?;
            let len = line[start..].iter().position(|b| is_space(*b)).unwrap_or(line.len() - start);
            Some((&line[start..start + len], start + len))
        }

        let (method, end) = next_token(line, 0).ok_or(())?;
        let (target, end) = next_token(line, end).ok_or(())?;
        let (version, _) = next_token(line, end).ok_or(())?;

        self.method = if method.eq_ignore_ascii_case(b"GET") {
            Method::Get
        } else if method.eq_ignore_ascii_case(b"POST") {
            self.cgi = true;
            Method::Post
        } else {
            return Err(());
        };

        if version != b"HTTP/1.1" {
            return Err(());
        }

        let mut target = target;
        if target.len() >= 7 && target[..7].eq_ignore_ascii_case(b"http://") {
            target = &target[7..];
            match target.iter().position(|b| *b == b'/') {
                Some(idx) => target = &target[idx..],
                None => return Err(()),
            }
        }
        if target.first() != Some(&b'/') {
            return Err(());
        }

        self.target = if target == b"/" {
            "/judge.html".to_string()
        } else {
            String::from_utf8_lossy(target).into_owned()
        };

        Ok(())
    }

    /// Recognizes `Connection`, `Content-Length`, `Host`; anything else is logged and
    /// dropped. The `Connection:` handling keeps a deliberate quirk: only tab characters
    /// are skipped after the colon, not spaces (see DESIGN.md OQ-2), so a single leading
    /// space suppresses keep-alive recognition.
    fn parse_header_line(&mut self, line: &[u8], logger: &Logger) {
        if let Some(rest) = strip_ci_prefix(line, b"Connection:") {
            let value = skip_tabs(rest);
            if value.eq_ignore_ascii_case(b"keep-alive") {
                self.keep_alive = true;
            }
        } else if let Some(rest) = strip_ci_prefix(line, b"Content-Length:") {
            let value = skip_tabs(rest);
            if let Ok(text) = std::str::from_utf8(value) {
                self.content_length = text.trim().parse().unwrap_or(0);
            }
        } else if let Some(rest) = strip_ci_prefix(line, b"Host:") {
            let value = skip_tabs(rest);
            self.host = Some(String::from_utf8_lossy(value).into_owned());
        } else {
            logger.debug(format!("unknown header: {}", String::from_utf8_lossy(line)));
        }
    }

    /// Resolves the request to a response outcome: the byte immediately after the
    /// target's last `/` selects the CGI/rewrite action, then the (possibly rewritten)
    /// target is resolved under `doc_root`.
    fn do_request(&mut self, accounts: &Accounts, doc_root: &Path, logger: &Logger) -> HttpCode {
        let tag = self.target.rfind('/').and_then(|i| self.target.as_bytes().get(i + 1).copied());

        match (self.cgi, tag) {
            (true, Some(b'2')) => match self.parse_credentials() {
                Some((user, pass)) => {
                    self.target = if accounts.check(&user, &pass) {
                        "/welcome.html".to_string()
                    } else {
                        "/logError.html".to_string()
                    };
                }
                None => return HttpCode::BadRequest,
            },
            (true, Some(b'3')) => match self.parse_credentials() {
                Some((user, pass)) => {
                    self.target = match accounts.register(&user, &pass) {
                        RegisterOutcome::Success => "/log.html".to_string(),
                        RegisterOutcome::Collision | RegisterOutcome::DbError => {
                            "/registerError.html".to_string()
                        }
                    };
                }
                None => return HttpCode::BadRequest,
            },
            (_, Some(b'0')) => self.target = "/register.html".to_string(),
            (_, Some(b'1')) => self.target = "/log.html".to_string(),
            (_, Some(b'5')) => self.target = "/picture.html".to_string(),
            (_, Some(b'6')) => self.target = "/video.html".to_string(),
            (_, Some(b'7')) => self.target = "/fans.html".to_string(),
            _ => {}
        }

        let path = doc_root.join(self.target.trim_start_matches('/'));

        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => return HttpCode::NoResource,
        };
        if metadata.permissions().mode() & 0o004 == 0 {
            return HttpCode::Forbidden;
        }
        if metadata.is_dir() {
            return HttpCode::BadRequest;
        }

        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => return HttpCode::NoResource,
        };
        let len = metadata.len() as usize;
        if len == 0 {
            self.file = None;
            self.file_len = 0;
        } else {
            match unsafe { Mmap::map(&file) } {
                Ok(mmap) => {
                    self.file = Some(mmap);
                    self.file_len = len;
                }
                Err(e) => {
                    logger.error(format!("mmap failed for {path:?}: {e}"));
                    return HttpCode::InternalError;
                }
            }
        }
        HttpCode::FileRequest
    }

    /// Fixed-offset form parse: `user=<u>&password=<p>`. Preserved byte-for-byte per
    /// DESIGN.md OQ-1: no general `key=value` parsing, URL-decoding, or reordering is
    /// attempted. Bounds-checked so a malformed body can never read out of range; a body
    /// that doesn't match the expected shape simply fails the request rather than
    /// invoking undefined behavior.
    fn parse_credentials(&self) -> Option<(String, String)> {
        const PREFIX: &[u8] = b"user=";
        const INFIX: &[u8] = b"&password=";

        if self.body.len() < PREFIX.len() || &self.body[..PREFIX.len()] != PREFIX {
            return None;
        }
        let amp = self.body[PREFIX.len()..].iter().position(|b| *b == b'&')? + PREFIX.len();
        let infix_end = amp + INFIX.len();
        if infix_end > self.body.len() || &self.body[amp..infix_end] != INFIX {
            return None;
        }

        let user_raw = &self.body[PREFIX.len()..amp];
        let pass_raw = &self.body[infix_end..];
        let user_bytes = &user_raw[..user_raw.len().min(MAX_CREDENTIAL_LEN)];
        let pass_bytes = &pass_raw[..pass_raw.len().min(MAX_CREDENTIAL_LEN)];

        let user = String::from_utf8_lossy(user_bytes).into_owned();
        let pass = String::from_utf8_lossy(pass_bytes).into_owned();
        Some((user, pass))
    }

    fn push_header(&mut self, bytes: &[u8]) -> bool {
        if self.write_buf.len() + bytes.len() > self.write_cap {
            return false;
        }
        self.write_buf.extend_from_slice(bytes);
        true
    }

    /// Builds the status line, headers, and body/segment layout. Returns `false` only
    /// when the write buffer's fixed capacity is exceeded.
    fn process_write(&mut self, code: HttpCode) -> bool {
        let (status, title, body): (u16, &str, &[u8]) = match code {
            HttpCode::FileRequest => (200, "OK", &[]),
            HttpCode::BadRequest => (400, "Bad Request", BAD_REQUEST_BODY),
            HttpCode::Forbidden => (403, "Forbidden", FORBIDDEN_BODY),
            HttpCode::NoResource => (404, "Not Found", NOT_FOUND_BODY),
            HttpCode::InternalError => (500, "Internal Error", INTERNAL_ERROR_BODY),
            HttpCode::NoRequest => unreachable!("NoRequest never reaches process_write"),
        };

        if !self.push_header(format!("HTTP/1.1 {status} {title}\r\n").as_bytes()) {
            return false;
        }

        let content_len = match code {
            HttpCode::FileRequest if self.file.is_some() => self.file_len,
            HttpCode::FileRequest => ZERO_BYTE_BODY.len(),
            _ => body.len(),
        };

        if !self.push_header(format!("Content-Length: {content_len}\r\n").as_bytes()) {
            return false;
        }
        let conn_header = if self.keep_alive { "keep-alive" } else { "close" };
        if !self.push_header(format!("Connection: {conn_header}\r\n\r\n").as_bytes()) {
            return false;
        }

        match code {
            HttpCode::FileRequest if self.file.is_some() => {
                self.header_len = self.write_buf.len();
            }
            HttpCode::FileRequest => {
                if !self.push_header(ZERO_BYTE_BODY) {
                    return false;
                }
                self.header_len = self.write_buf.len();
            }
            _ => {
                if !self.push_header(body) {
                    return false;
                }
                self.header_len = self.write_buf.len();
            }
        }

        self.sent_header = 0;
        self.sent_file = 0;
        true
    }

    /// Vectored write loop: header segment first, then the mapped file (if any). Segment
    /// progress is tracked with two plain cursors rather than manual `iov_base`/`iov_len`
    /// bookkeeping, so there's no raw pointer arithmetic to re-derive on every call.
    pub fn write_to_socket(&mut self) -> io::Result<WriteOutcome> {
        loop {
            let header_remaining = self.header_len - self.sent_header;
            let file_remaining = self.file_len - self.sent_file;
            if header_remaining == 0 && file_remaining == 0 {
                self.file = None;
                let keep_alive = self.keep_alive;
                if keep_alive {
                    self.reset_for_next_request();
                }
                return Ok(WriteOutcome::Done { keep_alive });
            }

            let header_slice = &self.write_buf[self.sent_header..self.header_len];
            let file_slice: &[u8] = match &self.file {
                Some(mmap) => &mmap[self.sent_file..],
                None => &[],
            };

            let mut segments: Vec<&[u8]> = Vec::with_capacity(2);
            if header_remaining > 0 {
                segments.push(header_slice);
            }
            if file_remaining > 0 {
                segments.push(file_slice);
            }

            match writev(self.stream.as_raw_fd(), &segments) {
                Ok(n) => {
                    let mut remaining = n;
                    let take_header = remaining.min(header_remaining);
                    self.sent_header += take_header;
                    remaining -= take_header;
                    self.sent_file += remaining.min(file_remaining);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(WriteOutcome::Pending),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.file = None;
                    return Err(e);
                }
            }
        }
    }
}

fn strip_ci_prefix<'a>(line: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

fn skip_tabs(value: &[u8]) -> &[u8] {
    let skip = value.iter().take_while(|b| **b == b'\t').count();
    &value[skip..]
}

/// Thin safe wrapper over `writev(2)`, the one syscall with no safe wrapper in the standard
/// library or in `memmap2`.
fn writev(fd: std::os::unix::io::RawFd, segments: &[&[u8]]) -> io::Result<usize> {
    let iov: Vec<libc::iovec> = segments
        .iter()
        .map(|s| libc::iovec { iov_base: s.as_ptr() as *mut libc::c_void, iov_len: s.len() })
        .collect();
    let n = unsafe { libc::writev(fd, iov.as_ptr(), iov.len() as i32) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_line_splits_on_crlf_and_nulls_terminators_in_place() {
        let mut buf = b"GET / HTTP/1.1\r\nHost: h\r\n\r\n".to_vec();
        let mut checked = 0;
        let read_end = buf.len();

        assert_eq!(scan_line(&mut buf, &mut checked, read_end), LineStatus::Ok);
        assert_eq!(&buf[..checked - 2], b"GET / HTTP/1.1");
        assert_eq!(buf[checked - 2], 0);
        assert_eq!(buf[checked - 1], 0);
    }

    #[test]
    fn scan_line_reports_open_on_bare_trailing_cr() {
        let mut buf = b"GET / HTTP/1.1\r".to_vec();
        let mut checked = 0;
        let read_end = buf.len();
        assert_eq!(scan_line(&mut buf, &mut checked, read_end), LineStatus::Open);
    }

    #[test]
    fn scan_line_rejects_lf_without_preceding_cr() {
        let mut buf = b"bad\nline".to_vec();
        let mut checked = 0;
        let read_end = buf.len();
        assert_eq!(scan_line(&mut buf, &mut checked, read_end), LineStatus::Bad);
    }

    #[test]
    fn scan_line_fed_one_byte_at_a_time_matches_feeding_it_whole() {
        let whole = b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n";

        let mut whole_buf = whole.to_vec();
        let mut checked = 0;
        let status_whole = scan_line(&mut whole_buf, &mut checked, whole_buf.len());

        // Feeding one byte at a time: re-run scan_line as read_end grows, the same way the
        // reactor calls it again after every partial socket read.
        let mut incr_buf = whole.to_vec();
        let mut incr_checked = 0;
        let mut status_incr = LineStatus::Open;
        for end in 1..=incr_buf.len() {
            status_incr = scan_line(&mut incr_buf, &mut incr_checked, end);
            if status_incr != LineStatus::Open {
                break;
            }
        }

        assert_eq!(status_whole, status_incr);
        assert_eq!(checked, incr_checked);
    }

    #[test]
    fn checked_idx_never_decreases_across_calls() {
        let mut buf = b"GET / HTTP/1.1\r\nHost: h\r\n\r\nmore".to_vec();
        let mut checked = 0;
        let read_end = buf.len();
        let mut last = 0;
        loop {
            let before = checked;
            match scan_line(&mut buf, &mut checked, read_end) {
                LineStatus::Ok => {
                    assert!(checked >= before);
                    assert!(checked <= read_end);
                    last = checked;
                }
                _ => break,
            }
            if last >= read_end {
                break;
            }
        }
    }

    #[test]
    fn parse_request_line_strips_http_scheme_and_host() {
        let mut conn = test_connection();
        conn.parse_request_line(b"GET http://example.com/index.html HTTP/1.1").unwrap();
        assert_eq!(conn.target, "/index.html");
        assert_eq!(conn.method, Method::Get);
    }

    #[test]
    fn parse_request_line_rewrites_root_to_judge_html() {
        let mut conn = test_connection();
        conn.parse_request_line(b"GET / HTTP/1.1").unwrap();
        assert_eq!(conn.target, "/judge.html");
    }

    #[test]
    fn parse_request_line_rejects_unsupported_method() {
        let mut conn = test_connection();
        assert!(conn.parse_request_line(b"PUT /x HTTP/1.1").is_err());
    }

    #[test]
    fn parse_request_line_sets_cgi_on_post() {
        let mut conn = test_connection();
        conn.parse_request_line(b"POST /2CGISQL HTTP/1.1").unwrap();
        assert!(conn.cgi);
    }

    #[test]
    fn connection_header_requires_tab_not_space_before_value() {
        let mut conn = test_connection();
        let logger = test_logger();
        conn.parse_header_line(b"Connection: keep-alive", &logger);
        assert!(!conn.keep_alive, "a leading space should not activate keep-alive (OQ-2)");

        let mut conn = test_connection();
        conn.parse_header_line(b"Connection:\tkeep-alive", &logger);
        assert!(conn.keep_alive);
    }

    #[test]
    fn parse_credentials_extracts_user_and_password() {
        let mut conn = test_connection();
        conn.body = b"user=alice&password=pw".to_vec();
        assert_eq!(conn.parse_credentials(), Some(("alice".to_string(), "pw".to_string())));
    }

    #[test]
    fn parse_credentials_rejects_malformed_body_without_panicking() {
        let mut conn = test_connection();
        conn.body = b"not a form body".to_vec();
        assert_eq!(conn.parse_credentials(), None);

        conn.body = b"user=".to_vec();
        assert_eq!(conn.parse_credentials(), None);
    }

    #[test]
    fn parse_credentials_truncates_at_99_bytes() {
        let mut conn = test_connection();
        let long_user = "a".repeat(150);
        conn.body = format!("user={long_user}&password=pw").into_bytes();
        let (user, pass) = conn.parse_credentials().unwrap();
        assert_eq!(user.len(), MAX_CREDENTIAL_LEN);
        assert_eq!(pass, "pw");
    }

    fn test_connection() -> Connection {
        // A Connection needs a real socket to construct; tests below exercise only the
        // parsing helpers against a loopback pair, never the socket itself.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        client.set_nonblocking(true).unwrap();
        std::mem::forget(client);
        let stream = TcpStream::from_std(server);
        Connection::new(Token(0), stream, peer, 2048, 1024)
    }

    fn test_logger() -> Logger {
        let dir = std::env::temp_dir().join(format!("holt-conn-test-{}", std::process::id()));
        Logger::init(dir, "test.log", 2000, 8, 800_000).unwrap()
    }
}
