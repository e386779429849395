//! The default HTTP parser/router binding installed on every newly
//! observed accepted connection.

mod query;

pub use query::parse_query;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;
use tracing::{error, warn};

use crate::coroutine::bind_coroutine;
use crate::reader::BufferedReader;
use crate::router::Router;
use crate::socket::Socket;

/// Installs the default request-parsing coroutine on `socket`.
pub fn install(socket: &Rc<RefCell<Socket>>, router: Rc<RefCell<Router>>) {
    let socket_for_body = socket.clone();
    bind_coroutine::<_, ()>(socket, move |stream| {
        serve_http(socket_for_body, router, BufferedReader::new(stream))
    });
}

struct Request {
    method: String,
    script: String,
    query: String,
    headers: HashMap<String, String>,
}

fn parse_start_line_and_headers(header_block: &[u8]) -> Option<Request> {
    let text = std::str::from_utf8(header_block).ok()?;
    let mut lines = text.split("\r\n");

    let start_line = lines.next()?;
    let mut parts = start_line.splitn(3, ' ');
    let method = parts.next()?.to_string();
    let url = parts.next()?;
    parts.next()?; // HTTP/x.y, validated only for presence

    let (script, query) = match url.split_once('?') {
        Some((s, q)) => (s.to_string(), q.to_string()),
        None => (url.to_string(), String::new()),
    };

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':')?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Some(Request { method, script, query, headers })
}

/// Parses HTTP requests off `reader` in a loop, dispatching each to
/// `router` and responding, until the connection closes or asks to.
pub async fn serve_http(socket: Rc<RefCell<Socket>>, router: Rc<RefCell<Router>>, mut reader: BufferedReader) {
    loop {
        let header_block = match reader.read_until(b"\r\n\r\n").await {
            Some(block) => block,
            None => return, // peer closed before a full header arrived
        };

        let request = match parse_start_line_and_headers(&header_block) {
            Some(request) => request,
            None => {
                warn!("malformed request start line, closing");
                socket.borrow_mut().close();
                return;
            }
        };

        let body = match request.headers.get("content-length") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => Bytes::new(),
                Ok(n) => match reader.read_exact(n).await {
                    Some(body) => body,
                    None => {
                        socket.borrow_mut().close();
                        return;
                    }
                },
                Err(_) => {
                    warn!(value = %raw, "non-numeric content-length, closing");
                    socket.borrow_mut().close();
                    return;
                }
            },
            None => Bytes::new(),
        };

        let close_requested = request
            .headers
            .get("connection")
            .map(|v| v.to_ascii_lowercase() == "close")
            .unwrap_or(false);
        socket.borrow_mut().set_close_after_write(close_requested);

        let handler = router.borrow().lookup(&request.method, &request.script);

        let dispatch_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut socket = socket.borrow_mut();
            match &handler {
                Some(handler) => handler(&mut socket, &request.query, &request.headers, &body),
                None => {
                    let message = format!("{} was not found on this server", request.script);
                    socket.http_response("404 Not Found", "Content-type: text/plain\r\n", message.as_bytes());
                }
            }
        }));

        if dispatch_result.is_err() {
            error!(method = %request.method, path = %request.script, "handler panicked");
        }

        let socket_state = socket.borrow();
        if socket_state.is_closed() || socket_state.is_close_after_write() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_path_and_headers() {
        let raw = b"GET /items?x=1 HTTP/1.1\r\nHost: example\r\nConnection: close\r\n\r\n";
        let req = parse_start_line_and_headers(raw).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.script, "/items");
        assert_eq!(req.query, "x=1");
        assert_eq!(req.headers.get("connection").unwrap(), "close");
    }

    #[test]
    fn malformed_start_line_returns_none() {
        assert!(parse_start_line_and_headers(b"not a request\r\n\r\n").is_none());
    }
}
