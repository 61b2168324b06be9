use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors which stop the bridge from starting or running.
///
/// Problems with single lines or single clients never show up here,
/// those are handled where they happen.
#[derive(Debug, Error)]
pub enum Error {
    /// The device to bridge could not be opened.
    #[error("The device `{device}` is unavailable")]
    DeviceUnavailable {
        /// Which device.
        device: String,

        /// Why it could not be opened.
        #[source]
        source: io::Error,
    },

    /// The configuration is not usable.
    #[error("Bad configuration. Problem: `{0}`")]
    BadConfig(String),

    /// The listener address could not be bound.
    #[error("Could not listen on `{addr}`")]
    Bind {
        /// The address we tried.
        addr: String,

        /// Why it failed.
        #[source]
        source: io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("The server failed on {addr}")]
    Server {
        /// Where the server was listening.
        addr: SocketAddr,

        /// The underlying problem.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// If the error is [`Error::BadConfig`], get the problem description.
    pub fn try_into_bad_config(self) -> Option<String> {
        if let Self::BadConfig(problem) = self {
            Some(problem)
        } else {
            None
        }
    }
}
