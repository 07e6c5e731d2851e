use indexmap::IndexMap;

use super::method::HttpMethod;
use super::response::HttpResponse;

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn parse_form(s: &str, into: &mut IndexMap<String, String>) {
    for pair in s.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((k, v)) => into.insert(url_decode(k), url_decode(v)),
            None => into.insert(url_decode(pair), String::new()),
        };
    }
}

/// A parsed HTTP request. Header lookups are case-insensitive (header keys
/// are stored lower-cased); query and form-encoded body params merge into a
/// single lazily-initialized `params` map, matching the source's on-demand
/// parsing of query/body/cookies.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: String,
    pub fragment: String,
    pub version: u8,
    pub close: bool,
    headers: IndexMap<String, String>,
    params: IndexMap<String, String>,
    cookies: IndexMap<String, String>,
    pub body: Vec<u8>,
    params_initialized: bool,
    cookies_initialized: bool,
}

impl HttpRequest {
    pub fn new(version: u8, close: bool) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            path: "/".to_string(),
            query: String::new(),
            fragment: String::new(),
            version,
            close,
            headers: IndexMap::new(),
            params: IndexMap::new(),
            cookies: IndexMap::new(),
            body: Vec::new(),
            params_initialized: false,
            cookies_initialized: false,
        }
    }

    pub fn create_response(&self) -> HttpResponse {
        HttpResponse::new(self.version, self.close)
    }

    pub fn version_major(&self) -> u8 {
        self.version >> 4
    }

    pub fn version_minor(&self) -> u8 {
        self.version & 0x0f
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn header_or(&self, key: &str, default: &str) -> String {
        self.header(key).unwrap_or(default).to_string()
    }

    pub fn set_header(&mut self, key: &str, value: impl Into<String>) {
        self.headers.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    fn ensure_params(&mut self) {
        if self.params_initialized {
            return;
        }

        let query = self.query.clone();
        parse_form(&query, &mut self.params);

        let is_form = self
            .header("content-type")
            .map(|ct| ct.to_ascii_lowercase().contains("application/x-www-form-urlencoded"))
            .unwrap_or(false);

        if is_form {
            if let Ok(body) = std::str::from_utf8(&self.body) {
                let body = body.to_string();
                parse_form(&body, &mut self.params);
            }
        }

        self.params_initialized = true;
    }

    pub fn param(&mut self, key: &str, default: &str) -> String {
        self.ensure_params();
        self.params.get(key).cloned().unwrap_or_else(|| default.to_string())
    }

    fn ensure_cookies(&mut self) {
        if self.cookies_initialized {
            return;
        }

        if let Some(raw) = self.header("cookie") {
            let raw = raw.to_string();
            for pair in raw.split(';') {
                let pair = pair.trim();
                if let Some((k, v)) = pair.split_once('=') {
                    self.cookies.insert(k.trim().to_string(), v.trim().to_string());
                }
            }
        }

        self.cookies_initialized = true;
    }

    pub fn cookie(&mut self, key: &str, default: &str) -> String {
        self.ensure_cookies();
        self.cookies.get(key).cloned().unwrap_or_else(|| default.to_string())
    }

    /// Resolves the persistence flag from the `connection` header, matching
    /// the source's post-parse `init()` step: default is per-HTTP-version,
    /// an explicit header overrides it either way.
    pub fn finalize(&mut self) {
        if let Some(conn) = self.header("connection") {
            self.close = !conn.eq_ignore_ascii_case("keep-alive");
        }
    }
}
