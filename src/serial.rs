use std::{fmt::Display, io, time::Duration};

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::codec::FramedRead;
use tracing::{debug, info};

use crate::error::Error;

use self::{
    codecs::lines::{Frame, LinesCodec},
    error::ReadError,
};

/// Serial port related errors.
pub mod error;

/// Codecs for decoding messages from the wire.
pub(crate) mod codecs;

/// One line of text from the device.
/// The delimiter and any trailing whitespace are stripped.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Deserialize, Serialize)]
pub struct RawLine(String);

impl RawLine {
    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T: AsRef<str>> From<T> for RawLine {
    fn from(string_like: T) -> Self {
        Self(string_like.as_ref().trim_end().into())
    }
}

impl Display for RawLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0.chars().take(48).collect::<String>();

        write!(f, "{}", s.trim())
    }
}

/// Something which can (re)open the device we read lines from.
pub trait Connector: Display + Send + 'static {
    /// The byte stream of an opened device.
    type Io: AsyncRead + Unpin + Send + 'static;

    /// Open the device.
    fn connect(&mut self) -> io::Result<Self::Io>;
}

/// Opens a tty/COM port.
#[derive(Debug, Clone)]
pub struct TtyConnector {
    path: String,
    baud: u32,
    flow_control: serialport::FlowControl,
}

impl TtyConnector {
    /// The path should likely be along the lines of `/dev/ttyACMx` on unix, and `COMx` on Windows.
    pub fn new(path: &str, baud: u32, flow_control: serialport::FlowControl) -> Self {
        Self {
            path: path.into(),
            baud,
            flow_control,
        }
    }
}

impl Display for TtyConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.path, self.baud)
    }
}

impl Connector for TtyConnector {
    type Io = SerialStream;

    fn connect(&mut self) -> io::Result<Self::Io> {
        tokio_serial::new(&self.path, self.baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(self.flow_control)
            .open_native_async()
            .map_err(io::Error::from)
    }
}

/// How a [`SerialSource`] reads.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Give up waiting for a line after this long and report [`ReadError::Idle`].
    pub read_timeout: Duration,

    /// Longer lines are discarded.
    pub max_line_length: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            max_line_length: 4096,
        }
    }
}

/// The single reader of the device.
///
/// Yields lines forever.
/// Errors are never fatal: after an IO error or a disconnect the device is
/// reopened on the next read.
pub struct SerialSource<C: Connector> {
    connector: C,
    frames: Option<FramedRead<C::Io, LinesCodec>>,
    options: ReadOptions,
}

impl<C: Connector> SerialSource<C> {
    /// Open the device.
    ///
    /// Failing here is fatal, since there is nothing to bridge without it.
    pub fn open(mut connector: C, options: ReadOptions) -> Result<Self, Error> {
        let io = connector
            .connect()
            .map_err(|source| Error::DeviceUnavailable {
                device: connector.to_string(),
                source,
            })?;

        info!(device = %connector, "Opened device");

        Ok(Self {
            frames: Some(Self::framed(io, &options)),
            connector,
            options,
        })
    }

    fn framed(io: C::Io, options: &ReadOptions) -> FramedRead<C::Io, LinesCodec> {
        FramedRead::new(io, LinesCodec::new(b'\n', options.max_line_length))
    }

    /// Wait for the next line.
    pub async fn next_line(&mut self) -> Result<RawLine, ReadError> {
        if self.frames.is_none() {
            let io = self.connector.connect().map_err(ReadError::Reconnect)?;
            info!(device = %self.connector, "Reopened device");
            self.frames = Some(Self::framed(io, &self.options));
        }

        let Some(frames) = self.frames.as_mut() else {
            return Err(ReadError::Disconnected);
        };

        let frame = match tokio::time::timeout(self.options.read_timeout, frames.next()).await {
            Ok(frame) => frame,
            Err(_) => return Err(ReadError::Idle),
        };

        match frame {
            Some(Ok(Frame::Line(bytes))) => Ok(RawLine::from(String::from_utf8(bytes)?)),
            Some(Ok(Frame::Overlong(limit))) => Err(ReadError::LineTooLong(limit)),
            Some(Err(e)) => {
                debug!(device = %self.connector, "Dropping device after error");
                self.frames = None;
                Err(e)
            }
            None => {
                debug!(device = %self.connector, "Device stream ended");
                self.frames = None;
                Err(ReadError::Disconnected)
            }
        }
    }

    /// The lines of this source as an endless stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<RawLine, ReadError>> + Send {
        futures::stream::unfold(self, |mut source| async move {
            let next = source.next_line().await;
            Some((next, source))
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::mock::MockDevice;

    fn options() -> ReadOptions {
        ReadOptions {
            read_timeout: Duration::from_millis(50),
            max_line_length: 64,
        }
    }

    #[test]
    fn raw_line_strips_trailing_whitespace() {
        assert_eq!(RawLine::from("HR:hr:72\r").as_str(), "HR:hr:72");
        assert_eq!(RawLine::from("  status \t ").as_str(), "  status");
    }

    #[tokio::test]
    async fn reads_lines() {
        let (device, mut wire) = MockDevice::new();
        let mut source = SerialSource::open(device, options()).unwrap();

        wire.write_all(b"HR:hr:72\r\nstatus: ok\n").await.unwrap();

        assert_eq!(source.next_line().await.unwrap().as_str(), "HR:hr:72");
        assert_eq!(source.next_line().await.unwrap().as_str(), "status: ok");
    }

    #[tokio::test]
    async fn quiet_device_is_idle() {
        let (device, _wire) = MockDevice::new();
        let mut source = SerialSource::open(device, options()).unwrap();

        assert!(source.next_line().await.unwrap_err().is_idle());
    }

    #[tokio::test]
    async fn partial_line_survives_idle() {
        let (device, mut wire) = MockDevice::new();
        let mut source = SerialSource::open(device, options()).unwrap();

        wire.write_all(b"HR:hr").await.unwrap();
        assert!(source.next_line().await.unwrap_err().is_idle());

        wire.write_all(b":72\n").await.unwrap();
        assert_eq!(source.next_line().await.unwrap().as_str(), "HR:hr:72");
    }

    #[tokio::test]
    async fn bad_utf8_is_transient() {
        let (device, mut wire) = MockDevice::new();
        let mut source = SerialSource::open(device, options()).unwrap();

        wire.write_all(b"\xff\xfe\n").await.unwrap();
        wire.write_all(b"ok\n").await.unwrap();

        assert!(matches!(
            source.next_line().await.unwrap_err(),
            ReadError::Utf8(_)
        ));
        assert_eq!(source.next_line().await.unwrap().as_str(), "ok");
    }

    #[tokio::test]
    async fn overlong_line_is_transient() {
        let (device, mut wire) = MockDevice::new();
        let mut source = SerialSource::open(device, options()).unwrap();

        wire.write_all(&[b'x'; 100]).await.unwrap();
        wire.write_all(b"\nok\n").await.unwrap();

        assert!(matches!(
            source.next_line().await.unwrap_err(),
            ReadError::LineTooLong(64)
        ));
        assert_eq!(source.next_line().await.unwrap().as_str(), "ok");
    }

    #[tokio::test]
    async fn reconnects_after_disconnect() {
        let (device, wire) = MockDevice::new();
        let replug = device.handle();
        let mut source = SerialSource::open(device, options()).unwrap();

        drop(wire);
        assert!(matches!(
            source.next_line().await.unwrap_err(),
            ReadError::Disconnected
        ));

        // Nothing plugged in yet.
        assert!(matches!(
            source.next_line().await.unwrap_err(),
            ReadError::Reconnect(_)
        ));

        let mut wire = replug.plug_in();
        wire.write_all(b"HR:hr:80\n").await.unwrap();

        assert_eq!(source.next_line().await.unwrap().as_str(), "HR:hr:80");
    }

    #[tokio::test]
    async fn unavailable_device_is_fatal() {
        let device = MockDevice::unplugged();

        assert!(matches!(
            SerialSource::open(device, options()),
            Err(Error::DeviceUnavailable { .. })
        ));
    }
}
