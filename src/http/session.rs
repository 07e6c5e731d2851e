use std::sync::{Arc, Mutex};

use log::{error, warn};

use crate::config::Config;
use crate::connection::Connection;

use super::parser::parse_headers;
use super::request::HttpRequest;
use super::servlet::ServletDispatch;

enum ParseState {
    Headers,
    Body { request: HttpRequest, needed: usize },
}

/// Per-connection incremental HTTP/1.x reader, grounded on the source's
/// buffer-fed `httparse`-equivalent algorithm but driven by `Connection`'s
/// message callback instead of a blocking `read` loop: each call to
/// `on_readable` drains as many complete requests as are already buffered,
/// dispatches each to `dispatch`, and leaves a still-partial request's state
/// parked for the next call.
pub struct HttpSession {
    conn: Arc<Connection>,
    dispatch: Arc<ServletDispatch>,
    config: Config,
    state: Mutex<ParseState>,
}

impl HttpSession {
    pub fn new(conn: Arc<Connection>, dispatch: Arc<ServletDispatch>, config: Config) -> Arc<HttpSession> {
        Arc::new(HttpSession {
            conn,
            dispatch,
            config,
            state: Mutex::new(ParseState::Headers),
        })
    }

    pub fn on_readable(self: &Arc<HttpSession>) {
        loop {
            let mut state = self.state.lock().unwrap();

            match &*state {
                ParseState::Headers => {
                    let snapshot = self.conn.input_buffer().lock().unwrap().to_vec();

                    match parse_headers(&snapshot, self.config.http_request_max_body) {
                        Ok(None) => {
                            if snapshot.len() >= self.config.http_request_buffer_size {
                                drop(state);
                                warn!("connection[{}] request headers exceed buffer size", self.conn.name());
                                self.conn.force_close();
                                return;
                            }
                            return;
                        }
                        Ok(Some(parsed)) => {
                            self.conn.input_buffer().lock().unwrap().skip(parsed.consumed).ok();

                            if parsed.content_length == 0 {
                                *state = ParseState::Headers;
                                drop(state);
                                self.dispatch_request(parsed.request);
                                continue;
                            }

                            *state = ParseState::Body {
                                request: parsed.request,
                                needed: parsed.content_length,
                            };
                        }
                        Err(e) => {
                            drop(state);
                            warn!("connection[{}] malformed request: {}", self.conn.name(), e);
                            self.conn.force_close();
                            return;
                        }
                    }
                }
                ParseState::Body { needed, .. } => {
                    let available = self.conn.input_buffer().lock().unwrap().readable_size();

                    if available < *needed {
                        return;
                    }

                    let needed = *needed;
                    let request = match std::mem::replace(&mut *state, ParseState::Headers) {
                        ParseState::Body { request, .. } => request,
                        ParseState::Headers => unreachable!(),
                    };
                    drop(state);

                    let mut body = vec![0u8; needed];
                    if let Err(e) = self.conn.input_buffer().lock().unwrap().read(&mut body) {
                        error!("connection[{}] failed to read body: {}", self.conn.name(), e);
                        self.conn.force_close();
                        return;
                    }

                    let mut request = request;
                    request.body = body;
                    self.dispatch_request(request);
                }
            }
        }
    }

    fn dispatch_request(self: &Arc<HttpSession>, mut request: HttpRequest) {
        let mut response = request.create_response();
        self.dispatch.handle(&mut request, &mut response);

        let close = request.close;
        self.conn.send(&response.to_bytes());

        if close {
            self.conn.shutdown();
        }
    }
}
