use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::config::HardwareMode;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub hardware: HardwareMode,
    pub session: SensingSession,
    pub relay: RelayState,
    pub climate: Option<ClimateSnapshot>,
    pub events: VecDeque<SystemEvent>,
}

/// Light-counting cycle carried between input polls.
///
/// One session per process: two browsers polling at once advance the same
/// counter.  Each update happens under the state lock, but a cycle of
/// `sensing_count` polls may mix both clients' reads.
#[derive(Debug, Clone, Serialize)]
pub struct SensingSession {
    pub light_cnt: u32,
    pub light_sum: u32,
    pub sensing_count: u32,
    pub relays: [bool; 4],
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayState {
    pub on: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_changed: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClimateSnapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub temperature: f32,
    pub humidity: f32,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Relay,
    Climate,
    Inputs,
    Config,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub hardware: HardwareMode,
    pub session: SensingSession,
    pub relay: RelayState,
    pub climate: Option<ClimateSnapshot>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Sensing session
// ---------------------------------------------------------------------------

impl SensingSession {
    pub fn new(sensing_count: u32, relays: [bool; 4]) -> Self {
        Self {
            light_cnt: 0,
            light_sum: 0,
            sensing_count: sensing_count.max(1),
            relays,
        }
    }

    /// Step to the next poll of the cycle.  Wrapping to 0 starts a new cycle
    /// and clears the running light sum.
    pub fn advance(&mut self) -> u32 {
        self.light_cnt = (self.light_cnt + 1) % self.sensing_count.max(1);
        if self.light_cnt == 0 {
            self.light_sum = 0;
        }
        self.light_cnt
    }

    pub fn accumulate(&mut self, lit: u32) {
        self.light_sum += lit;
    }

    /// Pick up freshly read settings without disturbing the cycle.
    pub fn configure(&mut self, sensing_count: u32, relays: [bool; 4]) {
        self.sensing_count = sensing_count.max(1);
        self.relays = relays;
    }

    /// After a settings save the cycle restarts from the top.
    pub fn restart(&mut self) {
        self.light_cnt = 0;
    }
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(hardware: HardwareMode, session: SensingSession) -> Self {
        Self {
            started_at: Instant::now(),
            hardware,
            session,
            relay: RelayState::default(),
            climate: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Record a grow-light change.  `simulated` marks try-mode requests that
    /// never reached the relays.
    pub fn record_relay(&mut self, on: bool, mask: u8, simulated: bool) {
        self.relay = RelayState {
            on,
            last_changed: Some(OffsetDateTime::now_utc()),
        };
        let state_str = if on { "ON" } else { "OFF" };
        let detail = if simulated {
            format!("grow light {state_str} (try)")
        } else {
            format!("grow light {state_str} mask=0x{mask:02x}")
        };
        self.push_event(EventKind::Relay, detail);
    }

    /// Record a climate sample that was stored.
    pub fn record_climate(&mut self, temperature: f32, humidity: f32) {
        self.climate = Some(ClimateSnapshot {
            ts: OffsetDateTime::now_utc(),
            temperature,
            humidity,
        });
        self.push_event(
            EventKind::Climate,
            format!("{temperature:.1}°C {humidity:.1}%"),
        );
    }

    pub fn record_inputs(&mut self, log: &str) {
        self.push_event(EventKind::Inputs, log.to_string());
    }

    pub fn record_config(&mut self, detail: String) {
        self.push_event(EventKind::Config, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            hardware: self.hardware,
            session: self.session.clone(),
            relay: self.relay.clone(),
            climate: self.climate.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
