use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{bridge::BridgeState, broadcast::BroadcastReport};

/// Counters shared between the read loop and the connection handlers.
#[derive(Debug)]
pub struct BridgeStats {
    started_at: DateTime<Utc>,
    last_sample_at_ms: AtomicI64,

    lines: AtomicU64,
    samples: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
    read_errors: AtomicU64,

    broadcasts: AtomicU64,
    delivered: AtomicU64,
    lagged: AtomicU64,
    send_failures: AtomicU64,

    connections: AtomicU64,
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            last_sample_at_ms: AtomicI64::new(i64::MIN),
            lines: Default::default(),
            samples: Default::default(),
            ignored: Default::default(),
            malformed: Default::default(),
            read_errors: Default::default(),
            broadcasts: Default::default(),
            delivered: Default::default(),
            lagged: Default::default(),
            send_failures: Default::default(),
            connections: Default::default(),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn add(counter: &AtomicU64, amount: usize) {
    counter.fetch_add(amount as u64, Ordering::Relaxed);
}

impl BridgeStats {
    pub(crate) fn line_read(&self) {
        bump(&self.lines);
    }

    pub(crate) fn line_ignored(&self) {
        bump(&self.ignored);
    }

    pub(crate) fn line_malformed(&self) {
        bump(&self.malformed);
    }

    pub(crate) fn read_error(&self) {
        bump(&self.read_errors);
    }

    pub(crate) fn connection_accepted(&self) {
        bump(&self.connections);
    }

    pub(crate) fn sample_parsed(&self) {
        bump(&self.samples);
        self.last_sample_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn broadcast_done(&self, report: &BroadcastReport) {
        if report.recipients == 0 {
            return;
        }

        bump(&self.broadcasts);
        add(&self.delivered, report.delivered);
        add(&self.lagged, report.lagged);
        add(&self.send_failures, report.failed.len());
    }

    /// The current values.
    pub fn snapshot(&self, clients: usize, state: BridgeState) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        let last_sample_at = match self.last_sample_at_ms.load(Ordering::Relaxed) {
            i64::MIN => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        };

        StatsSnapshot {
            state,
            clients,
            started_at: self.started_at,
            last_sample_at,
            lines: load(&self.lines),
            samples: load(&self.samples),
            ignored: load(&self.ignored),
            malformed: load(&self.malformed),
            read_errors: load(&self.read_errors),
            broadcasts: load(&self.broadcasts),
            delivered: load(&self.delivered),
            lagged: load(&self.lagged),
            send_failures: load(&self.send_failures),
            connections: load(&self.connections),
        }
    }
}

/// Statistics at some point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// What the bridge is doing.
    pub state: BridgeState,

    /// Currently connected clients.
    pub clients: usize,

    /// When the bridge was started.
    pub started_at: DateTime<Utc>,

    /// When the last sample was parsed, if any.
    pub last_sample_at: Option<DateTime<Utc>>,

    /// Lines read from the device.
    pub lines: u64,

    /// Lines which were samples.
    pub samples: u64,

    /// Lines without the sample marker.
    pub ignored: u64,

    /// Lines with the marker which could not be parsed.
    pub malformed: u64,

    /// Failed reads, excluding idle timeouts.
    pub read_errors: u64,

    /// Samples sent to at least one client.
    pub broadcasts: u64,

    /// Messages queued for clients.
    pub delivered: u64,

    /// Messages dropped because a client was behind.
    pub lagged: u64,

    /// Clients dropped because sending to them failed.
    pub send_failures: u64,

    /// Connections accepted since start.
    pub connections: u64,
}
