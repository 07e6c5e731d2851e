use crate::error::{Error, Result};

use super::method::HttpMethod;
use super::request::HttpRequest;

const MAX_HEADERS: usize = 64;

pub struct ParsedHeaders {
    pub request: HttpRequest,
    /// Bytes of `buf` consumed by the request line + headers (not the body).
    pub consumed: usize,
    pub content_length: usize,
}

/// Feeds `buf` to `httparse::Request::parse`. Returns `Ok(None)` when the
/// headers aren't fully buffered yet — the caller re-calls this with more
/// bytes appended, exactly as `httparse` is designed to be driven.
pub fn parse_headers(buf: &[u8], max_body: usize) -> Result<Option<ParsedHeaders>> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut raw_headers);

    let consumed = match parsed.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(Error::Parse(e.to_string())),
    };

    let version_minor = parsed.version.unwrap_or(1);
    let version = (1u8 << 4) | (version_minor & 0x0f) as u8;
    let default_close = version_minor == 0;

    let mut request = HttpRequest::new(version, default_close);
    request.method = parsed.method.map(HttpMethod::from).unwrap_or(HttpMethod::Invalid);

    if let Some(full_path) = parsed.path {
        let (path, query, fragment) = split_target(full_path);
        request.path = path.to_string();
        request.query = query.to_string();
        request.fragment = fragment.to_string();
    }

    for header in parsed.headers.iter() {
        if header.name.is_empty() {
            continue;
        }
        let value = String::from_utf8_lossy(header.value).into_owned();
        request.set_header(header.name, value);
    }

    request.finalize();

    let content_length = request
        .header("content-length")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    if content_length > max_body {
        return Err(Error::BufferOverflow);
    }

    Ok(Some(ParsedHeaders {
        request,
        consumed,
        content_length,
    }))
}

fn split_target(target: &str) -> (&str, &str, &str) {
    let (path_and_query, fragment) = match target.split_once('#') {
        Some((p, f)) => (p, f),
        None => (target, ""),
    };

    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, q),
        None => (path_and_query, ""),
    };

    (path, query, fragment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let buf = b"GET /hello?x=1 HTTP/1.1\r\nHost: example.com\r\nConnection: keep-alive\r\n\r\n";
        let parsed = parse_headers(buf, 1024).unwrap().unwrap();

        assert_eq!(parsed.request.path, "/hello");
        assert_eq!(parsed.request.query, "x=1");
        assert!(!parsed.request.close);
        assert_eq!(parsed.consumed, buf.len());
        assert_eq!(parsed.content_length, 0);
    }

    #[test]
    fn partial_headers_return_none() {
        let buf = b"GET / HTTP/1.1\r\nHost: exa";
        assert!(parse_headers(buf, 1024).unwrap().is_none());
    }

    #[test]
    fn content_length_over_max_body_errors() {
        let buf = b"POST / HTTP/1.1\r\nContent-Length: 999999\r\n\r\n";
        assert!(matches!(parse_headers(buf, 100), Err(Error::BufferOverflow)));
    }
}
