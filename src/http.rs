//! Minimal HTTP/1.1 request-line and header parsing, shared by the
//! handshake validator and the plain-HTTP branch of the connection
//! state machine.
//!
//! Every header lookup in this crate goes through [`Headers::get`], which is
//! case-insensitive — there is no case-sensitive substring-matching
//! shortcut anywhere.

/// One HTTP request's headers, preserved in arrival order.
#[derive(Debug, Clone, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Case-insensitive lookup of the first header with this name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn push(&mut self, name: String, value: String) {
        self.0.push((name, value));
    }
}

/// A parsed HTTP/1.1 request line plus headers. The body, if any, is not
/// parsed here — §4.G hands the whole post-header buffer to the embedder.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Headers,
}

/// Splits a comma-separated header value into trimmed, ordered tokens.
pub fn split_comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parses a full header block (request line + headers, terminated by the
/// blank line) out of `raw`. `raw` must already contain the CRLF-CRLF
/// terminator; the caller (the connection state machine) is responsible for
/// detecting that before calling this.
pub fn parse_request(raw: &str) -> Option<Request> {
    let mut lines = raw.split("\r\n");

    let request_line = lines.next()?;
    let mut tokens = request_line.split_whitespace();
    let method = tokens.next()?.to_string();
    let path = tokens.next()?.to_string();
    let version = tokens.next()?.to_string();
    if tokens.next().is_some() {
        return None;
    }

    let mut headers = Headers::default();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':')?;
        headers.push(name.trim().to_string(), value.trim().to_string());
    }

    Some(Request {
        method,
        path,
        version,
        headers,
    })
}

/// Returns the index just past `\r\n\r\n` in `buf`, if present — the HTTP
/// header terminator the RECEIVING state (§4.G) watches for.
pub fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}
