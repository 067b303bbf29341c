//! Serialized request executor.
//!
//! A single thread owns the store, the expiry registry, and the only
//! tick-on-event uses of the logical clock. Reader threads hand requests
//! over a channel and block on a one-shot reply channel; the sweep ticker
//! feeds the same select loop, so evictions interleave with writes in a
//! total order.

use crossbeam::channel::{Receiver, Sender, select};
use std::sync::Arc;
use std::time::Instant;

use crate::core::codec::{self, clean_token};
use crate::core::{Fields, LamportClock, StationId, schema};
use crate::proto::{self, Method, ProtoError, Request, Status};

use super::expiry::ExpiryRegistry;
use super::now_ms;
use super::store::StationStore;

/// A request handed from a reader thread to the executor. The reply is the
/// complete wire response, written back by the reader that owns the socket.
pub struct RequestEnvelope {
    pub identity: String,
    pub raw: String,
    pub respond: Sender<String>,
}

pub enum EngineMessage {
    Request(RequestEnvelope),
    Shutdown,
}

/// Executor loop. Runs until `Shutdown` arrives or the request channel
/// disconnects.
pub fn run_state_loop(
    req_rx: Receiver<EngineMessage>,
    sweep_rx: Receiver<Instant>,
    mut store: StationStore,
    mut registry: ExpiryRegistry,
    clock: Arc<LamportClock>,
    ttl_ms: u64,
) {
    loop {
        select! {
            recv(req_rx) -> msg => match msg {
                Ok(EngineMessage::Request(envelope)) => {
                    let reply = execute(&mut store, &mut registry, &clock, &envelope);
                    // A gone reader means the peer hung up mid-flight.
                    let _ = envelope.respond.send(reply);
                }
                Ok(EngineMessage::Shutdown) | Err(_) => break,
            },
            recv(sweep_rx) -> tick => match tick {
                Ok(_) => sweep(&mut store, &mut registry, ttl_ms),
                Err(_) => break,
            },
        }
    }
    tracing::debug!("executor stopped");
}

/// Evict every station whose last touch is older than the TTL.
fn sweep(store: &mut StationStore, registry: &mut ExpiryRegistry, ttl_ms: u64) {
    let now = now_ms();
    for station in registry.expired(now, ttl_ms) {
        registry.remove(&station);
        match store.delete(&station) {
            Ok(()) => tracing::info!(%station, "expired station evicted"),
            Err(err) => tracing::warn!(%station, "eviction failed: {err}"),
        }
    }
}

/// Apply one request against the state and produce the full wire response.
///
/// Every outcome, including rejections, is an event: the response clock is
/// always a fresh tick taken after the state change (or the decision not to
/// change it).
fn execute(
    store: &mut StationStore,
    registry: &mut ExpiryRegistry,
    clock: &LamportClock,
    envelope: &RequestEnvelope,
) -> String {
    let status = match Request::parse(&envelope.raw) {
        Ok(request) => match request.method {
            Method::Put => apply_put(store, registry, &envelope.identity, &request),
            Method::Get => {
                return respond_get(store, clock, &request);
            }
        },
        // Admission filters these, but the contract must hold regardless.
        Err(ProtoError::UnknownMethod(method)) => {
            tracing::debug!(identity = %envelope.identity, method, "unsupported method");
            Status::Internal
        }
        Err(err) => {
            tracing::debug!(identity = %envelope.identity, "unparsable request: {err}");
            Status::NoContent
        }
    };
    proto::response(clock.tick(), status.as_str())
}

/// PUT: validate the brace payload against the field schema, then merge
/// into the station's record. Fail-fast: any schema violation rejects the
/// whole request and leaves the record untouched.
fn apply_put(
    store: &mut StationStore,
    registry: &mut ExpiryRegistry,
    identity: &str,
    request: &Request,
) -> Status {
    let Ok(station) = StationId::parse(identity) else {
        return Status::Internal;
    };
    let Some(fields) = parse_payload(&request.body) else {
        return Status::Internal;
    };
    for (name, value) in &fields {
        if !schema::check(name, value) {
            tracing::debug!(%station, field = %name, "schema violation");
            return Status::Internal;
        }
    }

    let now = now_ms();
    match store.upsert(&station, fields, now) {
        Ok(outcome) => {
            registry.touch(&station, now);
            match outcome {
                super::store::UpsertOutcome::Created => Status::Created,
                super::store::UpsertOutcome::Updated => Status::Ok,
            }
        }
        Err(err) => {
            tracing::error!(%station, "persist failed: {err}");
            Status::Internal
        }
    }
}

/// Body lines must form a well-delimited brace payload. Returns the parsed
/// interior pairs, or `None` on a structural violation.
fn parse_payload(body: &[String]) -> Option<Fields> {
    let first = body.first()?;
    let last = body.last()?;
    if first.trim() != "{" || last.trim() != "}" {
        return None;
    }

    let mut fields = Fields::new();
    for line in &body[1..body.len() - 1] {
        let (name, value) = line.split_once(':')?;
        let name = clean_token(name);
        let value = clean_token(value);
        if name.is_empty() {
            return None;
        }
        fields.insert(name, value);
    }
    Some(fields)
}

/// GET: resolve the Accept target to a record and encode its merged view.
/// The payload is built before the response tick, so the reply observes a
/// consistent snapshot.
fn respond_get(store: &StationStore, clock: &LamportClock, request: &Request) -> String {
    let target = match request.accept_target() {
        Some(target) => target.to_string(),
        None => return proto::response(clock.tick(), Status::NoContent.as_str()),
    };

    let station = if target == proto::LATEST {
        store.most_recently_touched()
    } else {
        StationId::parse(&target).ok()
    };

    let body = station
        .as_ref()
        .and_then(|station| store.get(station))
        .map(|record| codec::encode(&record.fields));

    match body {
        Some(payload) => proto::response(clock.tick(), &payload),
        None => proto::response(clock.tick(), Status::NoContent.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use crossbeam::channel::{bounded, unbounded};
    use tempfile::TempDir;

    use super::*;

    struct Harness {
        _dir: TempDir,
        store: StationStore,
        registry: ExpiryRegistry,
        clock: LamportClock,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().expect("tempdir");
            let store = StationStore::open(dir.path().to_path_buf()).expect("open");
            Self {
                _dir: dir,
                store,
                registry: ExpiryRegistry::new(),
                clock: LamportClock::new(),
            }
        }

        fn run(&mut self, identity: &str, raw: &str) -> String {
            let (tx, _rx) = bounded(1);
            let envelope = RequestEnvelope {
                identity: identity.to_string(),
                raw: raw.to_string(),
                respond: tx,
            };
            execute(&mut self.store, &mut self.registry, &self.clock, &envelope)
        }
    }

    fn put_raw(pairs: &[(&str, &str)]) -> String {
        let payload: Fields = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        proto::build_put("test", "weather/entry", &codec::encode(&payload), pairs.len())
    }

    fn get_raw(target: &str) -> String {
        proto::build_get("test", target)
    }

    fn body_of(reply: &str) -> &str {
        reply.split_once('\n').expect("clock line").1
    }

    #[test]
    fn put_creates_then_updates() {
        let mut h = Harness::new();
        let reply = h.run("IDS60901", &put_raw(&[("air_temp", "13.3")]));
        assert_eq!(body_of(&reply), "201");

        let reply = h.run("IDS60901", &put_raw(&[("rel_hum", "60")]));
        assert_eq!(body_of(&reply), "200");
        assert_eq!(h.registry.len(), 1);
    }

    #[test]
    fn response_clock_advances_per_request() {
        let mut h = Harness::new();
        let first = h.run("a", &put_raw(&[("air_temp", "1")]));
        let second = h.run("a", &put_raw(&[("air_temp", "2")]));
        let c1: u64 = first.split('\n').next().unwrap().parse().expect("clock");
        let c2: u64 = second.split('\n').next().unwrap().parse().expect("clock");
        assert!(c2 > c1);
    }

    #[test]
    fn schema_violation_rejects_whole_request() {
        let mut h = Harness::new();
        h.run("a", &put_raw(&[("air_temp", "13.3")]));

        // rel_hum is numeric; a word must fail, and air_temp must survive.
        let reply = h.run("a", &put_raw(&[("rel_hum", "humid"), ("air_temp", "99")]));
        assert_eq!(body_of(&reply), "500");

        let record = h.store.get(&StationId::parse("a").unwrap()).expect("record");
        assert_eq!(record.fields.get("air_temp").map(String::as_str), Some("13.3"));
        assert!(!record.fields.contains_key("rel_hum"));
    }

    #[test]
    fn unknown_fields_pass_untyped() {
        let mut h = Harness::new();
        let reply = h.run("a", &put_raw(&[("vibe", "immaculate")]));
        assert_eq!(body_of(&reply), "201");
    }

    #[test]
    fn malformed_brace_payload_is_internal_error() {
        let mut h = Harness::new();
        let raw = proto::build_put("test", "weather/entry", "\"air_temp\" : 13.3", 1);
        let reply = h.run("a", &raw);
        assert_eq!(body_of(&reply), "500");
        assert!(h.store.is_empty());
    }

    #[test]
    fn get_returns_merged_view() {
        let mut h = Harness::new();
        h.run("a", &put_raw(&[("air_temp", "13.3")]));
        h.run("a", &put_raw(&[("cloud", "Clear")]));

        let reply = h.run("reader", &get_raw("a"));
        let payload = body_of(&reply);
        assert!(payload.contains("\"air_temp\" : 13.3"));
        assert!(payload.contains("\"cloud\" : \"Clear\""));
    }

    #[test]
    fn get_latest_selects_most_recently_touched() {
        let mut h = Harness::new();
        h.run("first", &put_raw(&[("air_temp", "1")]));
        std::thread::sleep(std::time::Duration::from_millis(5));
        h.run("second", &put_raw(&[("air_temp", "2")]));

        let reply = h.run("reader", &get_raw(proto::LATEST));
        assert!(body_of(&reply).contains("\"air_temp\" : 2"));
    }

    #[test]
    fn get_absent_station_is_no_content() {
        let mut h = Harness::new();
        let reply = h.run("reader", &get_raw("ghost"));
        assert_eq!(body_of(&reply), "204");

        let reply = h.run("reader", &get_raw(proto::LATEST));
        assert_eq!(body_of(&reply), "204");
    }

    #[test]
    fn unparsable_request_is_no_content() {
        let mut h = Harness::new();
        let reply = h.run("a", "");
        assert_eq!(body_of(&reply), "204");
    }

    #[test]
    fn unsupported_method_is_internal_error() {
        let mut h = Harness::new();
        let reply = h.run("a", "POST /weather.json HTTP/1.1\nHost: x\n\n");
        assert_eq!(body_of(&reply), "500");
        assert!(h.store.is_empty());
    }

    #[test]
    fn sweep_evicts_only_stale_stations() {
        let mut h = Harness::new();
        h.run("stale", &put_raw(&[("air_temp", "1")]));
        h.run("fresh", &put_raw(&[("air_temp", "2")]));
        // Backdate one touch far past any TTL.
        h.registry.touch(&StationId::parse("stale").unwrap(), 0);

        sweep(&mut h.store, &mut h.registry, 30_000);
        assert!(h.store.get(&StationId::parse("stale").unwrap()).is_none());
        assert!(h.store.get(&StationId::parse("fresh").unwrap()).is_some());
        assert_eq!(h.registry.len(), 1);
    }

    #[test]
    fn concurrent_disjoint_puts_union_through_the_loop() {
        let dir = TempDir::new().expect("tempdir");
        let store = StationStore::open(dir.path().to_path_buf()).expect("open");
        let clock = Arc::new(LamportClock::new());
        let (req_tx, req_rx) = unbounded();
        let (_sweep_tx, sweep_rx) = unbounded::<Instant>();

        let loop_clock = Arc::clone(&clock);
        let executor = std::thread::spawn(move || {
            run_state_loop(
                req_rx,
                sweep_rx,
                store,
                ExpiryRegistry::new(),
                loop_clock,
                30_000,
            );
        });

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let req_tx = req_tx.clone();
                std::thread::spawn(move || {
                    let field = format!("field_{i}");
                    let raw = put_raw(&[(field.as_str(), "value")]);
                    let (tx, rx) = bounded(1);
                    req_tx
                        .send(EngineMessage::Request(RequestEnvelope {
                            identity: "shared".to_string(),
                            raw,
                            respond: tx,
                        }))
                        .expect("send");
                    rx.recv().expect("reply")
                })
            })
            .collect();

        let replies: Vec<String> = writers.into_iter().map(|w| w.join().expect("join")).collect();
        // Exactly one writer observes creation.
        let created = replies.iter().filter(|r| body_of(r) == "201").count();
        assert_eq!(created, 1);
        assert_eq!(replies.len(), 8);

        let (tx, rx) = bounded(1);
        req_tx
            .send(EngineMessage::Request(RequestEnvelope {
                identity: "reader".to_string(),
                raw: get_raw("shared"),
                respond: tx,
            }))
            .expect("send");
        let reply = rx.recv().expect("reply");
        for i in 0..8 {
            assert!(body_of(&reply).contains(&format!("field_{i}")));
        }

        req_tx.send(EngineMessage::Shutdown).expect("shutdown");
        executor.join().expect("executor join");
    }
}
