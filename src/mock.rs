//! Mocked line sources, useful to run the bridge without an actual serial port.

use std::{fmt::Display, io, path::Path, time::Duration};

use futures::{Stream, StreamExt};
use tokio::{
    io::DuplexStream,
    sync::mpsc::{self, error::TryRecvError},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use crate::{
    error::Error,
    serial::{error::ReadError, Connector, RawLine},
};

const WIRE_BUFFER: usize = 64 * 1024;

/// An in-memory device.
///
/// Each time it is plugged in, a new in-memory wire is created.
/// The test side writes bytes into its end of the wire.
/// Dropping that end looks like the device disconnecting.
#[derive(Debug)]
pub struct MockDevice {
    pending: mpsc::UnboundedReceiver<DuplexStream>,
    handle: MockDeviceHandle,
}

/// Controls when a [`MockDevice`] is available.
#[derive(Debug, Clone)]
pub struct MockDeviceHandle {
    pending: mpsc::UnboundedSender<DuplexStream>,
}

impl MockDeviceHandle {
    /// Make the device available for the next connection attempt.
    /// Returns the wire end to write device output into.
    pub fn plug_in(&self) -> DuplexStream {
        let (device_end, wire_end) = tokio::io::duplex(WIRE_BUFFER);

        // The receiving side lives in the device; if it is gone nobody will connect anyway.
        let _ = self.pending.send(device_end);

        wire_end
    }
}

impl MockDevice {
    /// A device which is plugged in once.
    pub fn new() -> (Self, DuplexStream) {
        let device = Self::unplugged();
        let wire = device.handle.plug_in();

        (device, wire)
    }

    /// A device which can not be connected to until plugged in via its handle.
    pub fn unplugged() -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();

        Self {
            pending: pending_rx,
            handle: MockDeviceHandle {
                pending: pending_tx,
            },
        }
    }

    /// A handle for plugging the device in again later.
    pub fn handle(&self) -> MockDeviceHandle {
        self.handle.clone()
    }
}

impl Display for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mock")
    }
}

impl Connector for MockDevice {
    type Io = DuplexStream;

    fn connect(&mut self) -> io::Result<Self::Io> {
        match self.pending.try_recv() {
            Ok(io) => Ok(io),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "mock device is not plugged in",
            )),
        }
    }
}

/// Feeds lines (and read errors) straight into the bridge, skipping the byte level.
#[derive(Debug, Clone)]
pub struct MockLines {
    sender: mpsc::UnboundedSender<Result<RawLine, ReadError>>,
}

impl MockLines {
    /// Create a feeder and the stream it feeds.
    pub fn new() -> (
        Self,
        impl Stream<Item = Result<RawLine, ReadError>> + Send + Unpin,
    ) {
        let (sender, receiver) = mpsc::unbounded_channel();

        (Self { sender }, UnboundedReceiverStream::new(receiver))
    }

    /// Emit a line as if the device printed it.
    pub fn line<S: AsRef<str>>(&self, line: S) {
        self.send(Ok(RawLine::from(line)));
    }

    /// Emit a read error.
    pub fn error(&self, error: ReadError) {
        self.send(Err(error));
    }

    fn send(&self, item: Result<RawLine, ReadError>) {
        if self.sender.send(item).is_err() {
            debug!("Mock line stream is gone");
        }
    }
}

/// Replay the lines of a file forever, one line per `interval`.
///
/// Fails if the file can not be read or has no lines.
pub fn replay(
    path: &Path,
    interval: Duration,
) -> Result<impl Stream<Item = Result<RawLine, ReadError>> + Send, Error> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::DeviceUnavailable {
        device: path.display().to_string(),
        source,
    })?;

    let lines = contents.lines().map(RawLine::from).collect::<Vec<_>>();

    if lines.is_empty() {
        return Err(Error::DeviceUnavailable {
            device: path.display().to_string(),
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "replay file has no lines"),
        });
    }

    info!(?path, lines = lines.len(), ?interval, "Replaying file");

    let ticks = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(interval));

    Ok(ticks
        .zip(futures::stream::iter(lines.into_iter().cycle()))
        .map(|(_, line)| Ok(line)))
}
