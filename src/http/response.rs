use indexmap::IndexMap;

use super::status::HttpStatus;

/// A response under construction. `to_bytes` serializes it exactly as the
/// wire format requires: status line, headers (skipping a caller-set
/// `connection` header — persistence is always driven by `close`),
/// `Set-Cookie` lines, the `connection` header, then `content-length` and
/// the body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: HttpStatus,
    pub version: u8,
    pub close: bool,
    pub reason: Option<String>,
    headers: IndexMap<String, String>,
    cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(version: u8, close: bool) -> HttpResponse {
        HttpResponse {
            status: HttpStatus::Ok,
            version,
            close,
            reason: None,
            headers: IndexMap::new(),
            cookies: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn set_status(&mut self, status: HttpStatus) -> &mut Self {
        self.status = status;
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn set_header(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.body = body.into();
        self
    }

    pub fn set_redirect(&mut self, uri: impl Into<String>) -> &mut Self {
        self.status = HttpStatus::Found;
        self.set_header("location", uri.into());
        self
    }

    pub fn set_cookie(&mut self, key: &str, value: &str, path: Option<&str>, domain: Option<&str>, secure: bool) -> &mut Self {
        let mut cookie = format!("{}={}", key, value);

        if let Some(domain) = domain {
            cookie.push_str(&format!(";domain={}", domain));
        }
        if let Some(path) = path {
            cookie.push_str(&format!(";path={}", path));
        }
        if secure {
            cookie.push_str(";secure");
        }

        self.cookies.push(cookie);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let reason = self.reason.as_deref().unwrap_or_else(|| self.status.reason());

        let mut head = format!(
            "HTTP/{}.{} {} {}\r\n",
            self.version >> 4,
            self.version & 0x0f,
            self.status.code(),
            reason
        );

        for (k, v) in &self.headers {
            if k == "connection" {
                continue;
            }
            head.push_str(k);
            head.push_str(": ");
            head.push_str(v);
            head.push_str("\r\n");
        }

        for cookie in &self.cookies {
            head.push_str("Set-Cookie: ");
            head.push_str(cookie);
            head.push_str("\r\n");
        }

        head.push_str("connection: ");
        head.push_str(if self.close { "close" } else { "keep-alive" });
        head.push_str("\r\n");

        head.push_str(&format!("content-length: {}\r\n\r\n", self.body.len()));

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}
