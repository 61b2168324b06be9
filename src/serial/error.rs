use std::{io, string};

use thiserror::Error;

/// A problem reading a line from the device.
///
/// All of these are transient: the reader backs off and tries again.
#[derive(Debug, Error)]
pub enum ReadError {
    /// IO related errors.
    #[error("Underlying IO problem")]
    Io(#[from] io::Error),

    /// The line was not valid UTF-8.
    #[error("Problem with UTF8 conversion")]
    Utf8(#[from] string::FromUtf8Error),

    /// The device stream ended.
    #[error("Serial port disconnected")]
    Disconnected,

    /// The device could not be opened again after a disconnect.
    #[error("Could not reopen serial port")]
    Reconnect(#[source] io::Error),

    /// No complete line arrived within the read timeout.
    #[error("No data within the read timeout")]
    Idle,

    /// The device sent more bytes than allowed without a delimiter.
    #[error("Line exceeded {0} bytes and was discarded")]
    LineTooLong(usize),
}

impl ReadError {
    /// True if this only means the device had nothing to say.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}
