use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    sample::{LineParser, DEFAULT_MARKER},
    serial::{ReadOptions, TtyConnector},
};

/// The default port to run the server on.
pub const DEFAULT_PORT: u16 = 8765;

/// The device to read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Likely "/dev/ttyACMx", "/dev/cu.usbmodemX" or "COMx".
    pub path: String,

    /// Baud rate.
    pub baud: u32,

    /// Flow control used on the port.
    pub flow_control: serialport::FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyACM0".into(),
            baud: 115_200,
            flow_control: serialport::FlowControl::None,
        }
    }
}

/// Where clients connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Host name or IP address to bind.
    ///
    /// Only the first address a host name resolves to is bound.
    /// E.g. "localhost" may resolve to `::1` first, and then clients using
    /// `127.0.0.1` are refused. Use an IP address to be explicit.
    pub host: String,

    /// Port to bind. Zero lets the OS pick one.
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_PORT,
        }
    }
}

/// Delays and timeouts, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// How long to back off after a failed read.
    pub retry_backoff_ms: u64,

    /// How long to wait before polling a quiet device again.
    pub idle_poll_ms: u64,

    /// How long a single read may wait for a full line.
    pub read_timeout_ms: u64,

    /// How long a single write to a client may take before the client is dropped.
    pub write_timeout_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 100,
            idle_poll_ms: 10,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
        }
    }
}

impl Timing {
    /// See [`Timing::retry_backoff_ms`].
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// See [`Timing::idle_poll_ms`].
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// See [`Timing::read_timeout_ms`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// See [`Timing::write_timeout_ms`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// The configuration used for running the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The device.
    pub serial: SerialConfig,

    /// The listener.
    pub listen: ListenConfig,

    /// Lines starting with this are samples.
    pub marker: String,

    /// Delays and timeouts.
    pub timing: Timing,

    /// How many messages may be queued per client before it misses samples.
    pub client_buffer: usize,

    /// Longer device lines are discarded.
    pub max_line_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            listen: ListenConfig::default(),
            marker: DEFAULT_MARKER.into(),
            timing: Timing::default(),
            client_buffer: 64,
            max_line_length: 4096,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    /// Omitted fields take their default values.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Not valid RON: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            serial: SerialConfig {
                path: "/dev/cu.usbmodem101".into(),
                ..Default::default()
            },
            listen: ListenConfig {
                host: "0.0.0.0".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap_or_else(|e| format!("Could not serialize the configuration: {e}"))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let p = p.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::BadConfig(format!("Could not read {p:?}: {e}")))?;

        Self::deserialize(&s)
    }

    /// The parser for device lines.
    pub fn line_parser(&self) -> LineParser {
        LineParser::new(&self.marker)
    }

    /// How to open the device.
    pub fn tty_connector(&self) -> TtyConnector {
        TtyConnector::new(
            &self.serial.path,
            self.serial.baud,
            self.serial.flow_control,
        )
    }

    /// How to read from the device.
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            read_timeout: self.timing.read_timeout(),
            max_line_length: self.max_line_length,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        let mut problems = vec![];

        if self.serial.path.is_empty() {
            problems.push("the serial path is empty");
        }
        if self.serial.baud == 0 {
            problems.push("the baud rate is zero");
        }
        if self.listen.host.is_empty() {
            problems.push("the listen host is empty");
        }
        if self.marker.is_empty() {
            problems.push("the sample marker is empty, so every line would be a sample");
        }
        if self.client_buffer == 0 {
            problems.push("the client buffer is zero");
        }
        if self.max_line_length == 0 {
            problems.push("the max line length is zero");
        }
        if self.timing.read_timeout_ms == 0 || self.timing.write_timeout_ms == 0 {
            problems.push("timeouts must be non-zero");
        }
        if self.timing.retry_backoff_ms == 0 || self.timing.idle_poll_ms == 0 {
            problems.push("delays must be non-zero, or the reader would spin");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(problems.join("; ")))
        }
    }
}
