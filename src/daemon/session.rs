//! Connection admission and per-peer reader loops.
//!
//! Every peer opens with a handshake: its logical time on one line, its
//! identity on the next. A peer that fails the handshake is dropped without
//! a reply. Admitted peers get a liveness flag in the session registry; a
//! later connection claiming the same identity force-closes the earlier one
//! by flipping that flag, which the reader notices on its next poll.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Sender, bounded};

use crate::core::{LamportClock, StationId};
use crate::proto::{self, Request, Status};

use super::executor::{EngineMessage, RequestEnvelope};

/// Poll interval for the acceptor and the reader loops.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cap on PUT body lines when no usable Content-Length arrives.
const MAX_BODY_LINES: usize = 256;

/// Live sessions keyed by producer identity.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `identity`, force-closing any earlier session holding it.
    /// Returns the liveness flag the new reader must poll.
    pub fn admit(&self, identity: &str) -> Arc<AtomicBool> {
        let alive = Arc::new(AtomicBool::new(true));
        let mut sessions = self.inner.lock().expect("session registry poisoned");
        if let Some(previous) = sessions.insert(identity.to_string(), Arc::clone(&alive)) {
            previous.store(false, Ordering::Release);
            tracing::info!(identity, "superseding earlier session");
        }
        alive
    }

    /// Drop the entry, but only if it still belongs to this session. A
    /// superseded reader must not evict its replacement.
    pub fn release(&self, identity: &str, alive: &Arc<AtomicBool>) {
        let mut sessions = self.inner.lock().expect("session registry poisoned");
        if let Some(current) = sessions.get(identity)
            && Arc::ptr_eq(current, alive)
        {
            sessions.remove(identity);
        }
    }

    pub fn close_all(&self) {
        let sessions = self.inner.lock().expect("session registry poisoned");
        for alive in sessions.values() {
            alive.store(false, Ordering::Release);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accept loop. The listener is nonblocking so the shutdown flag is polled
/// between accepts; each admitted connection gets its own reader thread.
pub fn run_acceptor(
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    req_tx: Sender<EngineMessage>,
    sessions: SessionRegistry,
    clock: Arc<LamportClock>,
) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "connection accepted");
                let req_tx = req_tx.clone();
                let sessions = sessions.clone();
                let clock = Arc::clone(&clock);
                thread::spawn(move || {
                    if let Err(err) = handle_peer(stream, req_tx, sessions, clock) {
                        tracing::debug!(%peer, "session ended with error: {err}");
                    }
                });
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                tracing::warn!("accept failed: {err}");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
    tracing::debug!("acceptor stopped");
}

/// Outcome of one timeout-tolerant line read.
enum LineRead {
    Line(String),
    Eof,
    Superseded,
}

/// Read one line, polling the liveness flag across read timeouts. Partial
/// bytes read before a timeout are kept and completed on the next pass.
fn read_line(
    reader: &mut BufReader<TcpStream>,
    alive: &AtomicBool,
) -> std::io::Result<LineRead> {
    let mut line = String::new();
    loop {
        if !alive.load(Ordering::Acquire) {
            return Ok(LineRead::Superseded);
        }
        match reader.read_line(&mut line) {
            Ok(0) => return Ok(LineRead::Eof),
            Ok(_) => {
                return Ok(LineRead::Line(line.trim_end_matches(['\r', '\n']).to_string()));
            }
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => return Err(err),
        }
    }
}

/// One admitted peer: handshake, then a request/reply loop until the peer
/// disconnects or the session is superseded.
fn handle_peer(
    stream: TcpStream,
    req_tx: Sender<EngineMessage>,
    sessions: SessionRegistry,
    clock: Arc<LamportClock>,
) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    // Handshake is read blocking; timeouts only start once admitted.
    let Some((identity, peer_time)) = read_handshake(&mut reader)? else {
        tracing::debug!("handshake rejected, dropping peer silently");
        return Ok(());
    };
    clock.merge(peer_time);

    let alive = sessions.admit(identity.as_str());
    reader.get_ref().set_read_timeout(Some(POLL_INTERVAL))?;
    tracing::info!(identity = %identity, "session admitted");

    let result = serve_peer(&mut reader, &mut writer, &identity, &alive, &req_tx, &clock);
    sessions.release(identity.as_str(), &alive);
    tracing::info!(identity = %identity, "session closed");
    result
}

/// Handshake lines: `<logical-time>\n<identity>`. Any violation rejects the
/// peer without a response.
fn read_handshake(
    reader: &mut BufReader<TcpStream>,
) -> std::io::Result<Option<(StationId, u64)>> {
    let mut time_line = String::new();
    if reader.read_line(&mut time_line)? == 0 {
        return Ok(None);
    }
    let Ok(peer_time) = time_line.trim().parse::<u64>() else {
        return Ok(None);
    };

    let mut identity_line = String::new();
    if reader.read_line(&mut identity_line)? == 0 {
        return Ok(None);
    }
    match StationId::parse(identity_line.trim()) {
        Ok(identity) => Ok(Some((identity, peer_time))),
        Err(_) => Ok(None),
    }
}

fn serve_peer(
    reader: &mut BufReader<TcpStream>,
    writer: &mut TcpStream,
    identity: &StationId,
    alive: &AtomicBool,
    req_tx: &Sender<EngineMessage>,
    clock: &LamportClock,
) -> std::io::Result<()> {
    loop {
        let line = match read_line(reader, alive)? {
            LineRead::Line(line) => line,
            LineRead::Eof | LineRead::Superseded => return Ok(()),
        };
        if line.is_empty() {
            continue;
        }

        // A bare number is the peer's clock value sent ahead of its request.
        if line.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(peer_time) = line.parse::<u64>() {
                clock.merge(peer_time);
            }
            continue;
        }

        let method = line.split_whitespace().next().unwrap_or("");
        if method != "PUT" && method != "GET" {
            reply(writer, &proto::response(clock.tick(), Status::BadRequest.as_str()))?;
            continue;
        }

        let Some(raw) = collect_request(reader, alive, &line)? else {
            return Ok(());
        };

        let request = Request::parse(&raw).ok();
        if !request.is_some_and(|r| r.is_valid()) {
            reply(writer, &proto::response(clock.tick(), Status::BadRequest.as_str()))?;
            continue;
        }

        // Queue admission is an event of its own.
        clock.tick();
        let (respond, reply_rx) = bounded(1);
        let envelope = RequestEnvelope {
            identity: identity.to_string(),
            raw,
            respond,
        };
        if req_tx.send(EngineMessage::Request(envelope)).is_err() {
            // Executor is gone; the daemon is shutting down.
            tracing::warn!(identity = %identity, "request queue closed, dropping request");
            return Ok(());
        }
        match reply_rx.recv() {
            Ok(response) => reply(writer, &response)?,
            Err(_) => return Ok(()),
        }
    }
}

/// Gather the remaining lines of one request: headers up to the blank line,
/// then (for PUT) the brace payload through its closing line. Returns `None`
/// if the peer vanished mid-request.
fn collect_request(
    reader: &mut BufReader<TcpStream>,
    alive: &AtomicBool,
    request_line: &str,
) -> std::io::Result<Option<String>> {
    let mut raw = String::from(request_line);
    raw.push('\n');

    let is_put = request_line.starts_with("PUT");
    loop {
        let line = match read_line(reader, alive)? {
            LineRead::Line(line) => line,
            LineRead::Eof | LineRead::Superseded => return Ok(None),
        };
        let blank = line.is_empty();
        raw.push_str(&line);
        raw.push('\n');
        if blank {
            break;
        }
    }
    if !is_put {
        return Ok(Some(raw));
    }

    // Body reads are bounded by the declared Content-Length (field lines
    // plus the two brace lines). A payload cut off by the bound fails the
    // brace check downstream.
    let declared = Request::parse(&raw).ok().and_then(|r| r.content_length());
    let limit = declared.unwrap_or(MAX_BODY_LINES).saturating_add(2);

    let mut taken = 0;
    while taken < limit {
        let line = match read_line(reader, alive)? {
            LineRead::Line(line) => line,
            LineRead::Eof | LineRead::Superseded => return Ok(None),
        };
        let done = line.trim() == "}";
        raw.push_str(&line);
        raw.push('\n');
        taken += 1;
        if done {
            break;
        }
    }
    Ok(Some(raw))
}

fn reply(writer: &mut TcpStream, response: &str) -> std::io::Result<()> {
    writer.write_all(response.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admit_supersedes_prior_session() {
        let sessions = SessionRegistry::new();
        let first = sessions.admit("station-1");
        assert!(first.load(Ordering::Acquire));

        let second = sessions.admit("station-1");
        assert!(!first.load(Ordering::Acquire));
        assert!(second.load(Ordering::Acquire));
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn release_only_removes_own_entry() {
        let sessions = SessionRegistry::new();
        let first = sessions.admit("station-1");
        let second = sessions.admit("station-1");

        // The superseded reader releasing must not evict its replacement.
        sessions.release("station-1", &first);
        assert_eq!(sessions.len(), 1);

        sessions.release("station-1", &second);
        assert!(sessions.is_empty());
    }

    #[test]
    fn close_all_flips_every_flag() {
        let sessions = SessionRegistry::new();
        let a = sessions.admit("a");
        let b = sessions.admit("b");
        sessions.close_all();
        assert!(!a.load(Ordering::Acquire));
        assert!(!b.load(Ordering::Acquire));
    }
}
