//! Minimal HTTP/1.1 request reading and response writing.
//!
//! One request per connection. Bodies are only read when `Content-Length` is
//! present and within the caller's limit. Multipart uploads are parsed with
//! `multer` over the already-read body.

use std::borrow::Cow;
use std::collections::HashMap;
use std::convert::Infallible;
use std::io::{Read, Write};

use bytes::Bytes;
use futures::{executor, future, stream};
use thiserror::Error;

const MAX_HEADER_BYTES: usize = 8192;

#[derive(Debug, Error)]
pub(crate) enum RequestError {
    #[error("request headers too large")]
    HeadersTooLarge,
    #[error("request body of {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] multer::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    query: Option<String>,
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Percent-decoded query parameter; empty values count as absent.
    pub fn query_param(&self, key: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.trim().is_empty())
    }

    /// The uploaded video: the `video` multipart field, or the raw body.
    ///
    /// `Ok(None)` when the body is empty or a multipart body has no `video`
    /// field. A multipart body that does not parse is an error.
    pub fn video_payload(&self) -> Result<Option<Cow<'_, [u8]>>, RequestError> {
        let content_type = self.header("content-type").unwrap_or("");
        let payload = if is_multipart(content_type) {
            let boundary = multer::parse_boundary(content_type)?;
            match multipart_field(&self.body, boundary, "video")? {
                Some(field) => Cow::Owned(field.to_vec()),
                None => return Ok(None),
            }
        } else {
            Cow::Borrowed(self.body.as_slice())
        };
        Ok((!payload.is_empty()).then_some(payload))
    }
}

pub(crate) fn read_request<R: Read>(
    reader: &mut R,
    max_body: usize,
) -> Result<HttpRequest, RequestError> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find(&data, b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::HeadersTooLarge);
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed(
                "connection closed before end of headers".into(),
            ));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = std::str::from_utf8(&data[..header_end])
        .map_err(|_| RequestError::Malformed("headers are not utf-8".into()))?;
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".into()))?
        .to_string();
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".into()))?
        .to_string();
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed(format!("bad content-length '{}'", value)))?,
        None => 0,
    };
    if content_length > max_body {
        return Err(RequestError::BodyTooLarge {
            size: content_length,
            limit: max_body,
        });
    }

    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    if body.len() < content_length {
        let mut rest = vec![0u8; content_length - body.len()];
        reader.read_exact(&mut rest)?;
        body.extend_from_slice(&rest);
    }

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (raw_path.to_string(), None),
    };
    Ok(HttpRequest {
        method,
        path,
        query,
        headers,
        body,
    })
}

pub(crate) fn write_response<W: Write>(
    stream: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status = status,
        reason = reason_phrase(status),
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        422 => "Unprocessable Entity",
        _ => "Internal Server Error",
    }
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("multipart/form-data"))
        .unwrap_or(false)
}

/// Content of the form field `name` in an already-read multipart body.
fn multipart_field(
    body: &[u8],
    boundary: String,
    name: &str,
) -> Result<Option<Bytes>, multer::Error> {
    let chunk = Bytes::copy_from_slice(body);
    let stream = stream::once(future::ready(Ok::<Bytes, Infallible>(chunk)));
    let mut multipart = multer::Multipart::new(stream, boundary);
    executor::block_on(async {
        while let Some(field) = multipart.next_field().await? {
            if field.name() == Some(name) {
                return field.bytes().await.map(Some);
            }
        }
        Ok::<_, multer::Error>(None)
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(raw: &[u8]) -> Result<HttpRequest, RequestError> {
        read_request(&mut Cursor::new(raw.to_vec()), 1024)
    }

    #[test]
    fn parses_request_line_query_and_body() {
        let req = parse(
            b"POST /predict?device=camera%3Astub%3A%2F%2Ffront HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello",
        )
        .unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/predict");
        assert_eq!(req.query_param("device").as_deref(), Some("camera:stub://front"));
        assert_eq!(req.query_param("missing"), None);
        assert_eq!(req.header("HOST"), Some("x"));
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn rejects_oversized_bodies_before_reading_them() {
        let err = parse(b"POST /predict HTTP/1.1\r\nContent-Length: 4096\r\n\r\n").unwrap_err();
        assert!(matches!(
            err,
            RequestError::BodyTooLarge {
                size: 4096,
                limit: 1024
            }
        ));
    }

    #[test]
    fn truncated_body_is_an_io_error() {
        let err = parse(b"POST /predict HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc").unwrap_err();
        assert!(matches!(err, RequestError::Io(_)));
    }

    #[test]
    fn extracts_video_from_multipart() {
        let body = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"note\"\r\n\r\n\
hi\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"video\"; filename=\"clip.mp4\"\r\n\
Content-Type: video/mp4\r\n\r\n\
\x00\x01\r\nbytes\r\n\
--XyZ--\r\n";
        let mut raw = format!(
            "POST /predict HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=\"XyZ\"\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        raw.extend_from_slice(body);
        let req = parse(&raw).unwrap();
        let payload = req.video_payload().unwrap().expect("video field");
        assert_eq!(payload.as_ref(), &b"\x00\x01\r\nbytes"[..]);
    }

    #[test]
    fn multipart_without_video_field_has_no_payload() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\ndata\r\n--b--\r\n";
        let mut raw = format!(
            "POST /predict HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        raw.extend_from_slice(body);
        assert!(parse(&raw).unwrap().video_payload().unwrap().is_none());
    }

    #[test]
    fn unterminated_multipart_is_an_error() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"video\"\r\n\r\ndata";
        let mut raw = format!(
            "POST /predict HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        raw.extend_from_slice(body);
        assert!(matches!(
            parse(&raw).unwrap().video_payload(),
            Err(RequestError::Multipart(_))
        ));
    }

    #[test]
    fn raw_body_is_the_payload() {
        let req = parse(b"POST /predict HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc").unwrap();
        assert_eq!(req.video_payload().unwrap().as_deref(), Some(&b"abc"[..]));
        let empty = parse(b"POST /predict HTTP/1.1\r\n\r\n").unwrap();
        assert!(empty.video_payload().unwrap().is_none());
    }

    #[test]
    fn writes_status_line_and_length() {
        let mut out = Vec::new();
        write_response(&mut out, 422, "application/json", b"{}").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 422 Unprocessable Entity\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }
}
