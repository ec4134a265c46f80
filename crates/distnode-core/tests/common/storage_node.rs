//! Minimal HTTP/1.1 storage node for integration tests.
//!
//! Serves `GET /api/v1/state/version`, `HEAD /api/v1/files/{id}` and
//! `GET /api/v1/files/{id}` (with open-ended `Range: bytes=N-` support) from an
//! in-memory object map. Every request line is recorded.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone)]
pub struct StorageNode {
    /// Root URL, e.g. `http://127.0.0.1:12345/`.
    pub root: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StorageNode {
    /// Request lines seen so far, e.g. `HEAD /api/v1/files/1` or
    /// `GET /api/v1/files/1 bytes=100-`.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn file_gets(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.starts_with("GET /api/v1/files/"))
            .collect()
    }
}

/// Start a node in a background thread holding `objects` (id -> body). The
/// server runs until the process exits.
pub fn start(objects: HashMap<String, Vec<u8>>) -> StorageNode {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let objects = Arc::new(objects);
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let objects = Arc::clone(&objects);
            let seen = Arc::clone(&seen);
            thread::spawn(move || handle(stream, &objects, &seen));
        }
    });
    StorageNode {
        root: format!("http://127.0.0.1:{}/", port),
        requests,
    }
}

fn handle(mut stream: TcpStream, objects: &HashMap<String, Vec<u8>>, seen: &Mutex<Vec<String>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, path, range_start) = parse_request(request);
    seen.lock().unwrap().push(match range_start {
        Some(start) => format!("{method} {path} bytes={start}-"),
        None => format!("{method} {path}"),
    });

    if method == "GET" && path == "/api/v1/state/version" {
        let body = br#"{"version":"1.0.0"}"#;
        respond(&mut stream, "200 OK", body.len(), "", Some(body));
        return;
    }

    let Some(id) = path.strip_prefix("/api/v1/files/") else {
        respond(&mut stream, "404 Not Found", 0, "", None);
        return;
    };
    let Some(body) = objects.get(id) else {
        respond(&mut stream, "404 Not Found", 0, "", None);
        return;
    };
    let total = body.len();
    match method {
        "HEAD" => respond(&mut stream, "200 OK", total, "", None),
        "GET" => match range_start {
            Some(start) if (start as usize) < total => {
                let slice = &body[start as usize..];
                let range = format!("Content-Range: bytes {}-{}/{}\r\n", start, total - 1, total);
                respond(&mut stream, "206 Partial Content", slice.len(), &range, Some(slice));
            }
            Some(_) => {
                let range = format!("Content-Range: bytes */{}\r\n", total);
                respond(&mut stream, "416 Range Not Satisfiable", 0, &range, None);
            }
            None => respond(&mut stream, "200 OK", total, "", Some(body)),
        },
        _ => respond(&mut stream, "405 Method Not Allowed", 0, "", None),
    }
}

fn respond(stream: &mut TcpStream, status: &str, len: usize, extra: &str, body: Option<&[u8]>) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
        status, len, extra
    );
    let _ = stream.write_all(head.as_bytes());
    if let Some(body) = body {
        let _ = stream.write_all(body);
    }
}

/// (method, path, start of `Range: bytes=N-`).
fn parse_request(request: &str) -> (&str, &str, Option<u64>) {
    let mut lines = request.lines();
    let mut first = lines.next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("");
    let path = first.next().unwrap_or("");
    let mut range = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                range = value
                    .trim()
                    .strip_prefix("bytes=")
                    .and_then(|r| r.split('-').next())
                    .and_then(|s| s.trim().parse().ok());
            }
        }
    }
    (method, path, range)
}
