//! Wire-level request/response codec.
//!
//! Requests are textual, newline-delimited: a `METHOD <path> HTTP/1.1` line,
//! `Key: value` header lines, and (for PUT) a blank-separated brace payload.
//! Responses are always `<clock>\n<body>` where the body is a status token
//! or an encoded payload. The grammar is a stable contract; nothing outside
//! this module parses or builds wire text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("empty request")]
    Empty,
    #[error("malformed request line: {0:?}")]
    BadRequestLine(String),
    #[error("unknown method: {0:?}")]
    UnknownMethod(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Put,
    Get,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Put => "PUT",
            Method::Get => "GET",
        }
    }
}

/// Response status tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Update applied to an existing record.
    Ok,
    /// New record created.
    Created,
    /// No content / nothing to return.
    NoContent,
    /// Malformed request line.
    BadRequest,
    /// Schema or structural violation.
    Internal,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "200",
            Status::Created => "201",
            Status::NoContent => "204",
            Status::BadRequest => "400",
            Status::Internal => "500",
        }
    }
}

/// Token in the `Accept` header selecting the most recently touched record.
pub const LATEST: &str = "latest";

/// A parsed request envelope.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    headers: Vec<(String, String)>,
    /// Raw body lines including the brace delimiters (PUT only).
    pub body: Vec<String>,
}

impl Request {
    /// Parse raw envelope text into a request.
    ///
    /// Splits the request line, collects headers up to the first blank line,
    /// and keeps everything after it as body lines.
    pub fn parse(raw: &str) -> Result<Self, ProtoError> {
        let mut lines = raw.lines();
        let request_line = lines.next().ok_or(ProtoError::Empty)?;
        if request_line.trim().is_empty() {
            return Err(ProtoError::Empty);
        }

        let mut parts = request_line.split_whitespace();
        let method_token = parts.next().ok_or(ProtoError::Empty)?;
        let method = match method_token {
            "PUT" => Method::Put,
            "GET" => Method::Get,
            other => return Err(ProtoError::UnknownMethod(other.to_string())),
        };
        let path = parts
            .next()
            .ok_or_else(|| ProtoError::BadRequestLine(request_line.to_string()))?
            .to_string();

        let mut headers = Vec::new();
        let mut body = Vec::new();
        let mut in_body = false;
        for line in lines {
            if in_body {
                body.push(line.to_string());
                continue;
            }
            if line.trim().is_empty() {
                in_body = true;
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        Ok(Self {
            method,
            path,
            headers,
            body,
        })
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Header-level validation: necessary but not sufficient. Body schema
    /// checks happen in the executor.
    pub fn is_valid(&self) -> bool {
        if self.header("Host").is_none() || self.header("User-Agent").is_none() {
            return false;
        }
        match self.method {
            Method::Put => {
                self.header("Content-Type").is_some() && self.header("Content-Length").is_some()
            }
            Method::Get => self.header("Accept").is_some(),
        }
    }

    /// Declared number of body field lines (PUT).
    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length")?.trim().parse().ok()
    }

    /// Target identity from `Accept: <identity-or-latest>/json`.
    pub fn accept_target(&self) -> Option<&str> {
        let accept = self.header("Accept")?;
        let target = accept.split('/').next().unwrap_or("").trim();
        if target.is_empty() { None } else { Some(target) }
    }
}

/// Build the wire response: the post-event clock value, a separator, then
/// the status token or payload.
pub fn response(clock: u64, body: &str) -> String {
    format!("{clock}\n{body}")
}

/// Build a PUT request envelope (client side).
pub fn build_put(host: &str, content_type: &str, payload: &str, field_count: usize) -> String {
    let mut out = String::new();
    out.push_str("PUT /weather.json HTTP/1.1\n");
    out.push_str(&format!("Host: {host}\n"));
    out.push_str("User-Agent: ATOMClient/1/0\n");
    out.push_str(&format!("Content-Type: {content_type}\n"));
    out.push_str(&format!("Content-Length: {field_count}\n"));
    out.push('\n');
    out.push_str(payload);
    out
}

/// Build a GET request envelope (client side). Ends with the blank line
/// that terminates the header block.
pub fn build_get(host: &str, target: &str) -> String {
    format!(
        "GET /weather.json HTTP/1.1\nHost: {host}\nUser-Agent: ATOMClient/1/0\nAccept: {target}/json\n\n"
    )
}
