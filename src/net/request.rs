//! Line-oriented request heads and response status lines.

use std::fmt::Write as _;

/// Request line plus headers, terminated by the blank line.
///
/// `Host` is always written first and `Content-Length` last; other headers
/// keep their insertion order.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: &'static str,
    host: String,
    target: String,
    headers: Vec<(String, String)>,
    content_length: u64,
}

impl RequestHead {
    pub fn post(host: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: "POST",
            host: host.into(),
            target: target.into(),
            headers: Vec::new(),
            content_length: 0,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn content_length(mut self, len: u64) -> Self {
        self.content_length = len;
        self
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(128);
        let _ = write!(out, "{} {} HTTP/1.1\r\n", self.method, self.target);
        let _ = write!(out, "Host: {}\r\n", self.host);
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        let _ = write!(out, "Content-Length: {}\r\n\r\n", self.content_length);
        out
    }
}

/// `path` plus `?query` when the query is non-empty.
pub fn target(path: &str, query: &str) -> String {
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    }
}

/// Parsed `HTTP/1.1 200 OK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: u16,
    pub reason: String,
}

impl StatusLine {
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim_end().splitn(3, ' ');
        let version = parts.next()?;
        if !version.starts_with("HTTP/") {
            return None;
        }
        let code = parts.next()?.parse().ok()?;
        let reason = parts.next().unwrap_or("").to_string();
        Some(Self { code, reason })
    }

    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

/// Position just past the blank line ending a header block, if present.
pub fn header_end(buf: &[u8]) -> Option<usize> {
    if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some(i + 4);
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_request_in_order() {
        let head = RequestHead::post("api.example.com", target("/v1/listen", "model=x&language=en"))
            .header("Authorization", "Token k")
            .header("Content-Type", "audio/wav")
            .content_length(3116);

        assert_eq!(
            head.encode(),
            "POST /v1/listen?model=x&language=en HTTP/1.1\r\n\
             Host: api.example.com\r\n\
             Authorization: Token k\r\n\
             Content-Type: audio/wav\r\n\
             Content-Length: 3116\r\n\r\n"
        );
    }

    #[test]
    fn empty_query_has_no_question_mark() {
        assert_eq!(target("/v1/speak", ""), "/v1/speak");
    }

    #[test]
    fn status_line_parsing() {
        assert_eq!(
            StatusLine::parse("HTTP/1.1 200 OK\r\n"),
            Some(StatusLine { code: 200, reason: "OK".into() })
        );
        let bad = StatusLine::parse("HTTP/1.1 401 Unauthorized").unwrap();
        assert!(!bad.is_success());
        assert_eq!(StatusLine::parse("garbage"), None);
        assert_eq!(StatusLine::parse("HTTP/1.1 abc"), None);
    }

    #[test]
    fn header_end_finds_blank_line() {
        assert_eq!(header_end(b"HTTP/1.1 200 OK\r\nA: b\r\n\r\nPCM"), Some(25));
        assert_eq!(header_end(b"HTTP/1.1 200 OK\nA: b\n\nPCM"), Some(22));
        assert_eq!(header_end(b"HTTP/1.1 200 OK\r\n"), None);
    }
}
