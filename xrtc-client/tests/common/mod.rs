#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use xrtc_client::{ConnectionConfig, Credentials};

/// One parsed HTTP/1.1 request.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

impl Request {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

/// Starts an HTTP server on a loopback port and returns its base URL.
///
/// Every connection gets its own thread; `handler` receives the request
/// index (in accept order), the request and the socket to answer on.
pub fn spawn_server<F>(handler: F) -> String
where
    F: Fn(usize, Request, &mut TcpStream) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handler = Arc::new(handler);
    let counter = Arc::new(AtomicUsize::new(0));

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let handler = Arc::clone(&handler);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
                let mut reader = BufReader::new(stream.try_clone().expect("clone"));
                if let Ok(request) = read_request(&mut reader) {
                    let idx = counter.fetch_add(1, Ordering::SeqCst);
                    handler(idx, request, &mut stream);
                }
            });
        }
    });

    format!("http://{}", addr)
}

fn read_request(reader: &mut BufReader<TcpStream>) -> std::io::Result<Request> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;
    Ok(Request { method, path, body })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

pub fn write_json(stream: &mut TcpStream, status: u16, body: &str) {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason(status),
        body.len()
    );
    stream.write_all(head.as_bytes()).expect("write head");
    stream.write_all(body.as_bytes()).expect("write body");
    stream.flush().expect("flush");
}

pub fn write_login(stream: &mut TcpStream) {
    write_json(stream, 200, r#"{"servertimestamp":1700000000000}"#);
}

pub fn start_chunked(stream: &mut TcpStream) {
    let head = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
    stream.write_all(head.as_bytes()).expect("write head");
    stream.flush().expect("flush");
}

pub fn write_chunk(stream: &mut TcpStream, data: &str) -> std::io::Result<()> {
    write!(stream, "{:x}\r\n{}\r\n", data.len(), data)?;
    stream.flush()
}

pub fn end_chunked(stream: &mut TcpStream) -> std::io::Result<()> {
    stream.write_all(b"0\r\n\r\n")?;
    stream.flush()
}

pub fn item_line(portal: &str, payload: &str, ts: i64) -> String {
    format!(
        "{{\"items\":[{{\"portalid\":\"{}\",\"payload\":\"{}\",\"servertimestamp\":{}}}]}}\n",
        portal, payload, ts
    )
}

pub fn config(base: &str) -> ConnectionConfig {
    let mut config = ConnectionConfig::default()
        .with_base_url(base)
        .expect("base url");
    config.timeouts.total = Some(Duration::from_secs(5));
    config.timeouts.connect = Duration::from_secs(2);
    config.timeouts.read = Duration::from_secs(5);
    config.limits.concurrent_requests = 2;
    config
}

pub fn credentials() -> Credentials {
    Credentials::new("acc", "key")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
