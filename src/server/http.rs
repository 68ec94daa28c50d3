//! Minimal blocking HTTP/1.1 handling for the query protocol.
//!
//! The workers own blocking sockets end to end, so request parsing is a
//! small GET-only reader: request line, headers skipped until the blank
//! line, query string decoded with `form_urlencoded`. Anything that does
//! not parse is a protocol error: the caller logs, closes, continues.

use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;

const MAX_REQUEST_LINE: usize = 16 * 1024;
const MAX_HEADERS: usize = 128;

#[derive(Debug)]
pub struct Request {
    /// Raw request target, for logging
    pub target: String,
    /// Decoded query parameters in order of appearance
    pub params: Vec<(String, String)>,
}

impl Request {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Read one request. `Ok(None)` is a protocol error (malformed framing);
/// the connection should be closed without a response body.
pub fn read_request(stream: &mut TcpStream) -> io::Result<Option<Request>> {
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.len() > MAX_REQUEST_LINE {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let method = match parts.next() {
        Some(m) => m,
        None => return Ok(None),
    };
    let target = match parts.next() {
        Some(t) => t.to_string(),
        None => return Ok(None),
    };
    if method != "GET" {
        return Ok(None);
    }

    // drain headers until the blank line
    for _ in 0..MAX_HEADERS {
        let mut header = String::new();
        let n = reader.read_line(&mut header)?;
        if n == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    let query = target.split_once('?').map(|(_, q)| q).unwrap_or("");
    let params = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    Ok(Some(Request { target, params }))
}

fn write_head(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    content_length: usize,
) -> io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status, content_type, content_length
    )
}

pub fn write_json(stream: &mut TcpStream, body: &[u8]) -> io::Result<()> {
    write_head(stream, "200 OK", "application/json", body.len())?;
    stream.write_all(body)?;
    stream.flush()
}

pub fn write_binary(stream: &mut TcpStream, body: &[u8]) -> io::Result<()> {
    write_head(stream, "200 OK", "application/octet-stream", body.len())?;
    stream.write_all(body)?;
    stream.flush()
}

pub fn write_bad_request(stream: &mut TcpStream, body: &[u8]) -> io::Result<()> {
    write_head(stream, "400 Bad Request", "application/json", body.len())?;
    stream.write_all(body)?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn roundtrip(raw: &'static [u8]) -> io::Result<Option<Request>> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let writer = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(raw).unwrap();
            stream
        });
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream);
        drop(writer.join().unwrap());
        request
    }

    #[test]
    fn test_parse_get_with_query() {
        let request = roundtrip(b"GET /?q=hello%20world&d=a HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(request.param("q"), Some("hello world"));
        assert_eq!(request.param("d"), Some("a"));
        assert_eq!(request.param("s"), None);
        assert_eq!(request.target, "/?q=hello%20world&d=a");
    }

    #[test]
    fn test_non_get_is_protocol_error() {
        let request = roundtrip(b"POST / HTTP/1.1\r\n\r\n").unwrap();
        assert!(request.is_none());
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        let request = roundtrip(b"\r\n").unwrap();
        assert!(request.is_none());
    }
}
