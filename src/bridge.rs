use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::{
    broadcast::broadcast,
    config::Timing,
    registry::ClientRegistry,
    sample::LineParser,
    serial::{error::ReadError, RawLine},
    stats::BridgeStats,
};

/// What the bridge is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeState {
    /// Opening the device and binding the listener.
    Starting,

    /// Reading, parsing and broadcasting.
    Running,

    /// Told to stop.
    ShuttingDown,
}

/// Keeps track of consecutive read failures,
/// so that a device which keeps failing does not flood the logs.
#[derive(Debug, Default)]
struct FailureStreak {
    count: u64,
}

impl FailureStreak {
    fn failed(&mut self, error: &ReadError) {
        self.count += 1;

        // First failure, then every power of two.
        if self.count.is_power_of_two() {
            warn!(?error, consecutive = self.count, "Read failed, retrying");
        } else {
            trace!(?error, consecutive = self.count, "Read failed, retrying");
        }
    }

    fn succeeded(&mut self) {
        if self.count > 0 {
            info!(failures = self.count, "Reading again");
            self.count = 0;
        }
    }
}

/// Everything the read loop needs besides its lines.
#[derive(Debug, Clone)]
pub struct ReadLoop {
    /// Turns lines into samples.
    pub parser: LineParser,

    /// Who to broadcast to.
    pub registry: ClientRegistry,

    /// Where to count things.
    pub stats: Arc<BridgeStats>,

    /// Backoff and polling delays.
    pub timing: Timing,
}

impl ReadLoop {
    /// Read, parse and broadcast until the lines run out.
    ///
    /// A device never runs out of lines, so for a real serial port this runs
    /// for the life of the process.
    pub async fn run<S>(self, lines: S)
    where
        S: Stream<Item = Result<RawLine, ReadError>>,
    {
        tokio::pin!(lines);

        let mut streak = FailureStreak::default();

        while let Some(next) = lines.next().await {
            match next {
                Ok(line) => {
                    streak.succeeded();
                    self.handle_line(line).await;
                }
                Err(ReadError::Idle) => {
                    tokio::time::sleep(self.timing.idle_poll()).await;
                }
                Err(e) => {
                    self.stats.read_error();
                    streak.failed(&e);
                    tokio::time::sleep(self.timing.retry_backoff()).await;
                }
            }
        }

        info!("Line source ended");
    }

    async fn handle_line(&self, line: RawLine) {
        self.stats.line_read();
        debug!(%line);

        match self.parser.parse(line.as_str()) {
            Ok(Some(sample)) => {
                self.stats.sample_parsed();

                let report = broadcast(&self.registry, &sample).await;
                self.stats.broadcast_done(&report);
            }
            Ok(None) => {
                trace!("Not a sample");
                self.stats.line_ignored();
            }
            Err(e) => {
                debug!(%e, "Malformed sample, discarding");
                self.stats.line_malformed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, time::Duration};

    use pretty_assertions::assert_eq;
    use tokio::{sync::mpsc, time::timeout};

    use super::*;
    use crate::{
        mock::MockLines,
        registry::{ClientConnection, Message},
    };

    fn fast_timing() -> Timing {
        Timing {
            retry_backoff_ms: 1,
            idle_poll_ms: 1,
            read_timeout_ms: 10,
            write_timeout_ms: 10,
        }
    }

    struct Harness {
        feeder: MockLines,
        registry: ClientRegistry,
        stats: Arc<BridgeStats>,
    }

    fn start() -> Harness {
        let (feeder, lines) = MockLines::new();
        let registry = ClientRegistry::new();
        let stats = Arc::new(BridgeStats::default());

        let read_loop = ReadLoop {
            parser: LineParser::default(),
            registry: registry.clone(),
            stats: stats.clone(),
            timing: fast_timing(),
        };
        tokio::spawn(read_loop.run(lines));

        Harness {
            feeder,
            registry,
            stats,
        }
    }

    async fn client_with_capacity(
        registry: &ClientRegistry,
        capacity: usize,
    ) -> mpsc::Receiver<Message> {
        let (connection, rx) =
            ClientConnection::new(SocketAddr::from(([127, 0, 0, 1], 1)), capacity);
        registry.add(connection).await;
        rx
    }

    async fn client(registry: &ClientRegistry) -> mpsc::Receiver<Message> {
        client_with_capacity(registry, 64).await
    }

    async fn wait_for_samples(stats: &BridgeStats, samples: u64) {
        timeout(Duration::from_secs(5), async {
            while stats.snapshot(0, BridgeState::Running).samples < samples {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("Samples should be parsed");
    }

    async fn next(rx: &mut mpsc::Receiver<Message>) -> String {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Message should arrive")
            .expect("Outbox should be open")
            .to_string()
    }

    #[tokio::test]
    async fn sample_reaches_clients() {
        let harness = start();
        let mut a = client(&harness.registry).await;
        let mut b = client(&harness.registry).await;

        harness.feeder.line("HR:hr:72,spo2:98");

        assert_eq!(next(&mut a).await, r#"{"hr":72,"spo2":98}"#);
        assert_eq!(next(&mut b).await, r#"{"hr":72,"spo2":98}"#);
    }

    #[tokio::test]
    async fn ignored_and_malformed_lines_do_not_stop_the_loop() {
        let harness = start();
        let mut rx = client(&harness.registry).await;

        harness.feeder.line("status: ok");
        harness.feeder.line("HR:hr:abc");
        harness.feeder.line("HR:hr");
        harness.feeder.line("HR:hr:61");

        assert_eq!(next(&mut rx).await, r#"{"hr":61}"#);

        let stats = harness.stats.snapshot(1, BridgeState::Running);
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.samples, 1);
    }

    #[tokio::test]
    async fn read_errors_are_survived() {
        let harness = start();
        let mut rx = client(&harness.registry).await;

        harness.feeder.error(ReadError::Disconnected);
        harness.feeder.error(ReadError::Idle);
        harness
            .feeder
            .error(ReadError::Reconnect(std::io::ErrorKind::NotFound.into()));
        harness.feeder.line("HR:hr:90");

        assert_eq!(next(&mut rx).await, r#"{"hr":90}"#);

        // Idle is not an error.
        assert_eq!(
            harness.stats.snapshot(1, BridgeState::Running).read_errors,
            2
        );
    }

    #[tokio::test]
    async fn samples_keep_device_order() {
        let harness = start();
        let mut rx = client(&harness.registry).await;

        for hr in 60..80 {
            harness.feeder.line(format!("HR:hr:{hr}"));
        }

        for hr in 60..80 {
            assert_eq!(next(&mut rx).await, format!(r#"{{"hr":{hr}}}"#));
        }
    }

    #[tokio::test]
    async fn burst_beyond_outbox_is_lagged() {
        let harness = start();
        let mut rx = client_with_capacity(&harness.registry, 16).await;

        // Nothing is received until the whole burst has been broadcast.
        for hr in 60..80 {
            harness.feeder.line(format!("HR:hr:{hr}"));
        }
        timeout(Duration::from_secs(5), async {
            loop {
                let stats = harness.stats.snapshot(1, BridgeState::Running);
                if stats.delivered + stats.lagged == 20 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("Whole burst should be broadcast");

        let stats = harness.stats.snapshot(1, BridgeState::Running);
        assert_eq!(stats.delivered, 16);
        assert_eq!(stats.lagged, 4);
        assert_eq!(stats.send_failures, 0);

        // The oldest ones made it, in order.
        for hr in 60..76 {
            assert_eq!(next(&mut rx).await, format!(r#"{{"hr":{hr}}}"#));
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(harness.registry.len().await, 1);
    }

    #[tokio::test]
    async fn no_clients_no_broadcast() {
        let harness = start();

        harness.feeder.line("HR:hr:72,spo2:98");

        wait_for_samples(&harness.stats, 1).await;

        assert_eq!(harness.stats.snapshot(0, BridgeState::Running).broadcasts, 0);
    }

    #[test]
    fn failure_streak_resets() {
        let mut streak = FailureStreak::default();

        streak.failed(&ReadError::Disconnected);
        streak.failed(&ReadError::Disconnected);
        assert_eq!(streak.count, 2);

        streak.succeeded();
        assert_eq!(streak.count, 0);
    }
}
