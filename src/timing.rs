//! Converts the lifecycle instants captured for one request into HAR
//! `timings`.

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::har::Timings;

/// Chrome's network panel renders a zero or negative `blocked` as a stall
/// that swallows the `wait` time.
pub const MIN_BLOCKED_MS: f64 = 0.01;

/// Monotonic milestones for a single physical request. Only `start` is
/// guaranteed; every other field is set when the transport reports it.
#[derive(Debug, Clone, Copy)]
pub struct Timestamps {
    pub started_at: DateTime<Utc>,
    pub start: Instant,
    pub socket: Option<Instant>,
    pub lookup: Option<Instant>,
    pub connect: Option<Instant>,
    pub secure_connect: Option<Instant>,
    pub sent: Option<Instant>,
    pub first_byte: Option<Instant>,
    pub received: Option<Instant>,
}

impl Timestamps {
    pub fn now() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
            socket: None,
            lookup: None,
            connect: None,
            secure_connect: None,
            sent: None,
            first_byte: None,
            received: None,
        }
    }
}

fn millis(from: Instant, to: Instant) -> f64 {
    to.saturating_duration_since(from).as_secs_f64() * 1000.0
}

/// Resolve a milestone: a missing one inherits the previous instant, and
/// none may be earlier than the previous one.
fn resolve(value: Option<Instant>, previous: Instant) -> Instant {
    value.map_or(previous, |at| at.max(previous))
}

/// Build HAR timings and the total `time` from captured milestones.
pub fn reconcile(ts: &Timestamps) -> (Timings, f64) {
    let socket = resolve(ts.socket, ts.start);
    let lookup = resolve(ts.lookup, socket);
    let connect = resolve(ts.connect, lookup);
    let secure = ts.secure_connect.map(|at| at.max(connect));
    let connected = secure.unwrap_or(connect);
    let sent = resolve(ts.sent, connected);
    let first_byte = resolve(ts.first_byte, sent);
    let received = resolve(ts.received, first_byte);

    let timings = Timings {
        blocked: millis(ts.start, socket).max(MIN_BLOCKED_MS),
        dns: if ts.lookup.is_some() {
            millis(socket, lookup)
        } else {
            -1.0
        },
        connect: if ts.connect.is_some() {
            millis(lookup, connected)
        } else {
            -1.0
        },
        ssl: secure.map_or(-1.0, |secure| millis(connect, secure)),
        send: millis(connected, sent),
        wait: millis(sent, first_byte).max(0.0),
        receive: millis(first_byte, received),
    };

    let time = timings.total();
    (timings, time)
}
