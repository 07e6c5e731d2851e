use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use super::request::HttpRequest;
use super::response::HttpResponse;
use super::status::HttpStatus;

/// A request handler. `FunctionServlet` (via `ServletDispatch::add_function`)
/// covers the common case of a plain closure; implement the trait directly
/// for handlers that need their own state.
pub trait Servlet: Send + Sync {
    fn name(&self) -> &str;
    fn handle(&self, request: &mut HttpRequest, response: &mut HttpResponse);
}

struct FunctionServlet<F> {
    name: String,
    cb: F,
}

impl<F> Servlet for FunctionServlet<F>
where
    F: Fn(&mut HttpRequest, &mut HttpResponse) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, request: &mut HttpRequest, response: &mut HttpResponse) {
        (self.cb)(request, response)
    }
}

struct NotFoundServlet {
    body: Vec<u8>,
}

impl NotFoundServlet {
    fn new(server_name: &str) -> NotFoundServlet {
        let body = format!(
            "<html><head><title>404 Not Found</title></head><body><center><h1>404 Not Found</h1></center><hr><center>{}</center></body></html>",
            server_name
        );

        NotFoundServlet { body: body.into_bytes() }
    }
}

impl Servlet for NotFoundServlet {
    fn name(&self) -> &str {
        "NotFoundServlet"
    }

    fn handle(&self, _request: &mut HttpRequest, response: &mut HttpResponse) {
        response.set_status(HttpStatus::NotFound);
        response.set_header("server", "reactor_net");
        response.set_header("content-type", "text/html");
        response.set_body(self.body.clone());
    }
}

struct GlobEntry {
    pattern: String,
    servlet: Arc<dyn Servlet>,
}

/// Routes a request path to a Servlet: exact matches first, then glob
/// patterns in registration order, falling back to a default 404 servlet.
/// Registrable from any thread while requests are being served concurrently
/// on worker loops, hence the `RwLock`.
pub struct ServletDispatch {
    exact: RwLock<IndexMap<String, Arc<dyn Servlet>>>,
    globs: RwLock<Vec<GlobEntry>>,
    default: RwLock<Arc<dyn Servlet>>,
}

impl ServletDispatch {
    pub fn new() -> ServletDispatch {
        ServletDispatch {
            exact: RwLock::new(IndexMap::new()),
            globs: RwLock::new(Vec::new()),
            default: RwLock::new(Arc::new(NotFoundServlet::new("reactor_net/1.0"))),
        }
    }

    pub fn add_servlet(&self, uri: impl Into<String>, servlet: Arc<dyn Servlet>) {
        self.exact.write().unwrap().insert(uri.into(), servlet);
    }

    pub fn add_function(
        &self,
        uri: impl Into<String>,
        name: impl Into<String>,
        cb: impl Fn(&mut HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    ) {
        let servlet = Arc::new(FunctionServlet { name: name.into(), cb });
        self.add_servlet(uri, servlet);
    }

    pub fn add_glob_servlet(&self, pattern: impl Into<String>, servlet: Arc<dyn Servlet>) {
        let pattern = pattern.into();
        let mut globs = self.globs.write().unwrap();
        globs.retain(|e| e.pattern != pattern);
        globs.push(GlobEntry { pattern, servlet });
    }

    pub fn add_glob_function(
        &self,
        pattern: impl Into<String>,
        name: impl Into<String>,
        cb: impl Fn(&mut HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    ) {
        let servlet = Arc::new(FunctionServlet { name: name.into(), cb });
        self.add_glob_servlet(pattern, servlet);
    }

    pub fn remove_servlet(&self, uri: &str) {
        self.exact.write().unwrap().shift_remove(uri);
    }

    pub fn set_default(&self, servlet: Arc<dyn Servlet>) {
        *self.default.write().unwrap() = servlet;
    }

    pub fn matched(&self, path: &str) -> Arc<dyn Servlet> {
        if let Some(servlet) = self.exact.read().unwrap().get(path) {
            return servlet.clone();
        }

        let globs = self.globs.read().unwrap();
        for entry in globs.iter() {
            if glob_match(&entry.pattern, path) {
                return entry.servlet.clone();
            }
        }

        self.default.read().unwrap().clone()
    }

    pub fn handle(&self, request: &mut HttpRequest, response: &mut HttpResponse) {
        let servlet = self.matched(&request.path.clone());
        servlet.handle(request, response);
    }
}

impl Default for ServletDispatch {
    fn default() -> Self {
        ServletDispatch::new()
    }
}

/// Shell-style glob match (`*` any run, `?` single char), anchored at both
/// ends. No wildcard crate in the dependency set, so this is hand-rolled.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_inner(&pattern, &text)
}

fn glob_match_inner(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            glob_match_inner(&pattern[1..], text)
                || (!text.is_empty() && glob_match_inner(pattern, &text[1..]))
        }
        Some('?') => !text.is_empty() && glob_match_inner(&pattern[1..], &text[1..]),
        Some(c) => text.first() == Some(c) && glob_match_inner(&pattern[1..], &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_beats_glob() {
        let dispatch = ServletDispatch::new();
        dispatch.add_function("/a", "exact", |_r, resp| {
            resp.set_body("exact");
        });
        dispatch.add_glob_function("/*", "glob", |_r, resp| {
            resp.set_body("glob");
        });

        let mut req = HttpRequest::new(0x11, false);
        req.path = "/a".to_string();
        let mut resp = req.create_response();
        dispatch.handle(&mut req, &mut resp);

        assert_eq!(resp.body, b"exact");
    }

    #[test]
    fn unmatched_path_hits_default_404() {
        let dispatch = ServletDispatch::new();

        let mut req = HttpRequest::new(0x11, false);
        req.path = "/missing".to_string();
        let mut resp = req.create_response();
        dispatch.handle(&mut req, &mut resp);

        assert_eq!(resp.status, HttpStatus::NotFound);
    }

    #[test]
    fn glob_question_mark_matches_single_char() {
        assert!(glob_match("/item/?", "/item/5"));
        assert!(!glob_match("/item/?", "/item/55"));
        assert!(glob_match("/item/*", "/item/5/more"));
    }
}
