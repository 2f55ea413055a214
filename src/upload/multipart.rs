//! `multipart/form-data` body parser
//!
//! A small grammar state machine over the raw body:
//!
//! ```text
//! SeekingBoundary -> ReadingHeaders -> ReadingBody -> (ReadingHeaders | Done)
//! ```
//!
//! The first delimiter `--<boundary>` must sit at the start of the body or at the
//! start of a line; anything before it is preamble. Each delimiter line ends with
//! CRLF (optionally preceded by spaces or tabs). Part headers run up to the first
//! empty line. A part body ends right before `CRLF--<boundary>`: that CRLF belongs
//! to the delimiter and is never part of the body. `--<boundary>--` closes the body
//! and whatever follows is epilogue.

use bytes::Bytes;

use super::content_type::{find_param, parse_params};
use crate::error::DecodeError;

const CRLF: &[u8] = b"\r\n";

/// One part of a multipart body
#[derive(Debug, Clone)]
pub struct Part {
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Part {
    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Form field name from `Content-Disposition: form-data; name="..."`
    pub fn field_name(&self) -> Option<String> {
        self.disposition_param("name")
    }

    /// Client-supplied file name, if any
    pub fn filename(&self) -> Option<String> {
        self.disposition_param("filename")
    }

    /// Declared content type of this part
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    fn disposition_param(&self, name: &str) -> Option<String> {
        let disposition = self.header("content-disposition")?;
        let (kind, rest) = disposition.split_once(';').unwrap_or((disposition, ""));
        if !kind.trim().eq_ignore_ascii_case("form-data") {
            return None;
        }
        let params = parse_params(rest);
        find_param(&params, name).map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingBoundary,
    ReadingHeaders,
    ReadingBody,
    Done,
}

/// Parse a complete multipart body into its parts
pub fn parse(body: &Bytes, boundary: &str) -> Result<Vec<Part>, DecodeError> {
    if boundary.is_empty() {
        return Err(DecodeError::MissingBoundary);
    }

    let delimiter = format!("--{}", boundary).into_bytes();
    let mut body_terminator = Vec::with_capacity(delimiter.len() + CRLF.len());
    body_terminator.extend_from_slice(CRLF);
    body_terminator.extend_from_slice(&delimiter);

    let mut parts = Vec::new();
    let mut headers = Vec::new();
    let mut state = State::SeekingBoundary;
    let mut pos = 0usize;

    loop {
        state = match state {
            State::SeekingBoundary => {
                let start = find_first_delimiter(body, &delimiter)
                    .ok_or_else(|| malformed("no boundary delimiter found"))?;
                pos = start + delimiter.len();
                after_delimiter(body, &mut pos)?
            }
            State::ReadingHeaders => {
                headers = read_headers(body, &mut pos)?;
                State::ReadingBody
            }
            State::ReadingBody => {
                let end = find(&body[pos..], &body_terminator)
                    .map(|offset| pos + offset)
                    .ok_or_else(|| malformed("part is not terminated by a boundary delimiter"))?;
                parts.push(Part {
                    headers: std::mem::take(&mut headers),
                    body: body.slice(pos..end),
                });
                pos = end + body_terminator.len();
                after_delimiter(body, &mut pos)?
            }
            State::Done => break,
        };
    }

    Ok(parts)
}

/// First part whose form field name is `name`
pub fn find_field(parts: Vec<Part>, name: &str) -> Option<Part> {
    parts
        .into_iter()
        .find(|part| part.field_name().as_deref() == Some(name))
}

fn malformed(reason: &str) -> DecodeError {
    DecodeError::MalformedMultipart(reason.to_string())
}

/// The opening delimiter is either at offset 0 or right after a CRLF
fn find_first_delimiter(body: &[u8], delimiter: &[u8]) -> Option<usize> {
    if body.starts_with(delimiter) {
        return Some(0);
    }
    let mut line_delimiter = Vec::with_capacity(delimiter.len() + CRLF.len());
    line_delimiter.extend_from_slice(CRLF);
    line_delimiter.extend_from_slice(delimiter);
    find(body, &line_delimiter).map(|idx| idx + CRLF.len())
}

/// Consume what follows a delimiter: `--` closes the body, otherwise
/// optional transport padding and a CRLF open the next part's headers.
fn after_delimiter(body: &[u8], pos: &mut usize) -> Result<State, DecodeError> {
    let rest = &body[*pos..];
    if rest.starts_with(b"--") {
        *pos += 2;
        return Ok(State::Done);
    }

    let padding = rest
        .iter()
        .take_while(|&&b| b == b' ' || b == b'\t')
        .count();
    let rest = &rest[padding..];

    if rest.starts_with(CRLF) {
        *pos += padding + CRLF.len();
        Ok(State::ReadingHeaders)
    } else if rest.is_empty() {
        Err(malformed("body ends without a closing delimiter"))
    } else {
        Err(malformed("expected CRLF after boundary delimiter"))
    }
}

/// Read header lines up to and including the empty separator line
fn read_headers(body: &[u8], pos: &mut usize) -> Result<Vec<(String, String)>, DecodeError> {
    let mut headers: Vec<(String, String)> = Vec::new();

    loop {
        let line_len = find(&body[*pos..], CRLF)
            .ok_or_else(|| malformed("part headers are not terminated by an empty line"))?;
        let line = &body[*pos..*pos + line_len];
        *pos += line_len + CRLF.len();

        if line.is_empty() {
            return Ok(headers);
        }

        let line = String::from_utf8_lossy(line);

        // obsolete line folding continues the previous header value
        if line.starts_with(|c: char| c == ' ' || c == '\t') {
            match headers.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                    continue;
                }
                None => return Err(malformed("continuation line before any header")),
            }
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed("header line without ':'"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(malformed("header line with empty name"));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
