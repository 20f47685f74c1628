//! HTTP/1.x messages carried in application data.

use tlsprobe_types::ParserError;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// An HTTP request line plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpsRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

/// An HTTP status line, headers and a `Content-Length` delimited body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpsResponse {
    pub version: String,
    pub status_code: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Split `data` into the header block (as text) and the offset just past it.
fn header_block(data: &[u8]) -> Result<(&str, usize), ParserError> {
    let end = data
        .windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .ok_or_else(|| ParserError::Malformed("no end of HTTP header".into()))?;
    let text = std::str::from_utf8(&data[..end])
        .map_err(|_| ParserError::Malformed("HTTP header is not UTF-8".into()))?;
    Ok((text, end + HEADER_END.len()))
}

fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, String)>, ParserError> {
    lines
        .map(|line| {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParserError::Malformed(format!("bad header line: {line}")))?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn write_headers(out: &mut Vec<u8>, headers: &[(String, String)]) {
    for (name, value) in headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

impl HttpsRequest {
    /// A `GET` request for `path` with a `Host` header.
    pub fn get(path: &str, host: &str) -> Self {
        Self {
            method: "GET".into(),
            path: path.into(),
            version: "HTTP/1.1".into(),
            headers: vec![("Host".into(), host.into())],
        }
    }

    /// Parse a request. Returns the request and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParserError> {
        let (text, consumed) = header_block(data)?;
        let mut lines = text.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split(' ');
        let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v)) if !m.is_empty() && v.starts_with("HTTP/") => (m, p, v),
            _ => {
                return Err(ParserError::Malformed(format!(
                    "bad request line: {request_line}"
                )))
            }
        };
        Ok((
            Self {
                method: method.into(),
                path: path.into(),
                version: version.into(),
                headers: parse_headers(lines)?,
            },
            consumed,
        ))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.path, self.version).into_bytes();
        write_headers(&mut out, &self.headers);
        out
    }
}

impl HttpsResponse {
    /// Parse a response. Returns the response and the number of bytes consumed.
    ///
    /// The body is taken from `Content-Length`; without that header the body
    /// is empty and trailing bytes are left for the next message.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParserError> {
        if !data.starts_with(b"HTTP/") {
            return Err(ParserError::Malformed("not an HTTP response".into()));
        }
        let (text, header_len) = header_block(data)?;
        let mut lines = text.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let status_code = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| ParserError::Malformed(format!("bad status line: {status_line}")))?;
        let reason = parts.next().unwrap_or_default();
        let headers = parse_headers(lines)?;

        let content_length = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .map(|(_, value)| {
                value
                    .parse::<usize>()
                    .map_err(|_| ParserError::Malformed("bad Content-Length".into()))
            })
            .transpose()?
            .unwrap_or(0);
        let available = data.len() - header_len;
        if available < content_length {
            return Err(ParserError::Truncated {
                offset: header_len,
                need: content_length,
                got: available,
            });
        }

        Ok((
            Self {
                version: version.into(),
                status_code,
                reason: reason.into(),
                headers,
                body: data[header_len..header_len + content_length].to_vec(),
            },
            header_len + content_length,
        ))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out =
            format!("{} {} {}\r\n", self.version, self.status_code, self.reason).into_bytes();
        write_headers(&mut out, &self.headers);
        out.extend_from_slice(&self.body);
        out
    }
}
