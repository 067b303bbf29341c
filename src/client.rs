//! Producer/consumer client for the aggregation wire protocol.
//!
//! Each invocation is one session: handshake, one clock-prefixed request,
//! one reply. The client keeps its own logical clock and merges the clock
//! value the engine returns.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::Path;

use thiserror::Error;

use crate::core::codec;
use crate::core::{Fields, LamportClock, StationId};
use crate::proto;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("failed to read entry file {path}: {source}")]
    ReadEntry {
        path: String,
        source: std::io::Error,
    },
    #[error("entry file {path} contains no field:value lines")]
    EmptyEntry { path: String },
    #[error("connection io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed before a reply arrived")]
    NoReply,
    #[error("malformed reply clock line: {0:?}")]
    BadReplyClock(String),
}

/// Outcome of a PUT: the engine's post-event clock and the status token.
#[derive(Debug)]
pub struct PutReply {
    pub clock: u64,
    pub status: String,
}

#[derive(Debug)]
pub struct GetReply {
    pub clock: u64,
    pub body: GetBody,
}

#[derive(Debug)]
pub enum GetBody {
    Record(Fields),
    Status(String),
}

/// Upload the entry file's fields under `station`.
pub fn put_station(addr: &str, station: &StationId, entry: &Path) -> Result<PutReply, ClientError> {
    let fields = read_entry(entry)?;
    let clock = LamportClock::new();

    let mut stream = connect(addr)?;
    handshake(&mut stream, &clock, station.as_str())?;

    let payload = codec::encode(&fields);
    let request = proto::build_put(addr, "weather/entry", &payload, fields.len());
    // Writes carry the sender's clock ahead of the envelope so the engine
    // merges before it applies.
    let framed = format!("{}\n{request}", clock.tick());
    send_request(&mut stream, &framed)?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let engine_clock = read_reply_clock(&mut reader, &clock)?;
    let status = read_reply_line(&mut reader)?;
    tracing::debug!(%station, status, "put acknowledged");
    Ok(PutReply {
        clock: engine_clock,
        status,
    })
}

/// Fetch one station's merged record, or the most recently updated one when
/// `target` is `latest`.
pub fn get_station(addr: &str, client_id: &StationId, target: &str) -> Result<GetReply, ClientError> {
    let clock = LamportClock::new();

    let mut stream = connect(addr)?;
    handshake(&mut stream, &clock, client_id.as_str())?;

    // Reads go bare: the consumer's clock advances only through the reply.
    let request = proto::build_get(addr, target);
    send_request(&mut stream, &request)?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let engine_clock = read_reply_clock(&mut reader, &clock)?;

    let first = read_reply_line(&mut reader)?;
    let body = if first.trim() == "{" {
        let mut payload = String::from("{\n");
        loop {
            let line = read_reply_line(&mut reader)?;
            let done = line.trim() == "}";
            payload.push_str(&line);
            payload.push('\n');
            if done {
                break;
            }
        }
        GetBody::Record(codec::decode(&payload))
    } else {
        GetBody::Status(first)
    };

    Ok(GetReply {
        clock: engine_clock,
        body,
    })
}

fn connect(addr: &str) -> Result<TcpStream, ClientError> {
    TcpStream::connect(addr).map_err(|source| ClientError::Connect {
        addr: addr.to_string(),
        source,
    })
}

/// Opening lines of every session: local logical time, then identity.
fn handshake(stream: &mut TcpStream, clock: &LamportClock, identity: &str) -> Result<(), ClientError> {
    let greeting = format!("{}\n{identity}\n", clock.tick());
    stream.write_all(greeting.as_bytes())?;
    stream.flush()?;
    Ok(())
}

fn send_request(stream: &mut TcpStream, request: &str) -> Result<(), ClientError> {
    let mut framed = request.to_string();
    if !framed.ends_with('\n') {
        framed.push('\n');
    }
    stream.write_all(framed.as_bytes())?;
    stream.flush()?;
    Ok(())
}

fn read_reply_line(reader: &mut BufReader<TcpStream>) -> Result<String, ClientError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(ClientError::NoReply);
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn read_reply_clock(
    reader: &mut BufReader<TcpStream>,
    clock: &LamportClock,
) -> Result<u64, ClientError> {
    let line = read_reply_line(reader)?;
    let value: u64 = line
        .trim()
        .parse()
        .map_err(|_| ClientError::BadReplyClock(line.clone()))?;
    clock.merge(value);
    Ok(value)
}

/// Entry files are `field:value` lines, one pair per line.
fn read_entry(path: &Path) -> Result<Fields, ClientError> {
    let contents = fs::read_to_string(path).map_err(|source| ClientError::ReadEntry {
        path: path.display().to_string(),
        source,
    })?;

    let mut fields = Fields::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() {
                fields.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
    if fields.is_empty() {
        return Err(ClientError::EmptyEntry {
            path: path.display().to_string(),
        });
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use std::io::BufRead;
    use std::net::TcpListener;

    use tempfile::TempDir;

    use super::*;

    /// Capture the first `count` lines a client writes to a socket.
    fn capture_lines<F>(count: usize, drive: F) -> Vec<String>
    where
        F: FnOnce(String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let client = std::thread::spawn(move || drive(addr));

        let (stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream);
        let mut lines = Vec::new();
        for _ in 0..count {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read line");
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        drop(reader);
        let _ = client.join();
        lines
    }

    #[test]
    fn entry_file_parses_field_lines() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("entry.txt");
        fs::write(&path, "id:IDS60901\nair_temp:13.3\n\ncloud: Partly cloudy\n").expect("write");

        let fields = read_entry(&path).expect("read entry");
        assert_eq!(fields.get("id").map(String::as_str), Some("IDS60901"));
        assert_eq!(fields.get("cloud").map(String::as_str), Some("Partly cloudy"));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn get_envelope_follows_handshake_without_a_clock_line() {
        let lines = capture_lines(3, |addr| {
            let reader = StationId::parse("reader-1").expect("id");
            let _ = get_station(&addr, &reader, "latest");
        });

        assert!(lines[0].parse::<u64>().is_ok(), "handshake clock: {lines:?}");
        assert_eq!(lines[1], "reader-1");
        assert_eq!(lines[2], "GET /weather.json HTTP/1.1");
    }

    #[test]
    fn put_envelope_is_prefixed_by_a_clock_line() {
        let dir = TempDir::new().expect("tempdir");
        let entry = dir.path().join("entry.txt");
        fs::write(&entry, "air_temp:13.3\n").expect("write");

        let lines = capture_lines(4, move |addr| {
            let station = StationId::parse("IDS60901").expect("id");
            let _ = put_station(&addr, &station, &entry);
        });

        assert!(lines[0].parse::<u64>().is_ok(), "handshake clock: {lines:?}");
        assert_eq!(lines[1], "IDS60901");
        assert!(lines[2].parse::<u64>().is_ok(), "request clock: {lines:?}");
        assert_eq!(lines[3], "PUT /weather.json HTTP/1.1");
    }

    #[test]
    fn empty_entry_file_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("entry.txt");
        fs::write(&path, "\n\n").expect("write");
        assert!(matches!(
            read_entry(&path),
            Err(ClientError::EmptyEntry { .. })
        ));
    }
}
