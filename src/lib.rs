#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_imports,
    unused_import_braces,
    unused_qualifications
)]

//! A crate which implements Diagnostics over IP (DoIP, ISO 13400-2:2019) for
//! making an ECU discoverable and diagnosable over Ethernet, together with a
//! server-side UDS (ISO 14229) service dispatcher.
//!
//! ## DoIP roles
//!
//! ### Entity (server)
//! The [entity::DoipEntity] answers vehicle identification requests on UDP
//! port 13400, broadcasts vehicle announcements on startup, accepts TCP
//! diagnostic connections from testers, performs routing activation, and
//! forwards validated diagnostic messages to the embedding application.
//!
//! ### Tester (client)
//! The [tester::DoipTester] discovers entities on the local network, connects
//! to one, activates routing and exchanges UDS payloads with it.
//!
//! ## Network abstraction
//!
//! All socket I/O goes through the [netops::NetworkOps] capability trait, so
//! the protocol core runs unchanged over non-blocking BSD sockets
//! ([netops::StdNetworkOps]) or over the in-memory
//! [netops::SimulationNetwork] used by the unit tests.
//!
//! ## Threading model
//!
//! The core is single-threaded cooperative: one periodic task calls
//! `process` followed by `update_timers`. Applications that need to reach
//! the gateway from several tasks wrap it in an `Arc<Mutex<_>>`; the crate
//! itself never blocks on network I/O.

use netops::NetError;

pub mod entity;
pub mod gateway;
pub mod interface;
pub mod netops;
pub mod protocol;
pub mod tester;
pub mod uds;

/// DoIP operation result
pub type DoipResult<T> = Result<T, DoipError>;

#[derive(Debug)]
/// DoIP stack error
pub enum DoipError {
    /// A parameter given to the function is invalid. Check the function's
    /// documentation for more information
    InvalidParam,
    /// The supplied buffer is too small for the encoded message
    BufferTooSmall,
    /// The message payload does not match the wire format of its payload type
    InvalidFormat,
    /// The requested target is not connected or not activated yet
    NotReady,
    /// Error with the underlying network operations
    Network(NetError),
}

impl std::fmt::Display for DoipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DoipError::InvalidParam => write!(f, "a parameter provided was invalid"),
            DoipError::BufferTooSmall => write!(f, "buffer too small for encoded message"),
            DoipError::InvalidFormat => write!(f, "payload does not match its wire format"),
            DoipError::NotReady => write!(f, "target is not connected or not activated"),
            DoipError::Network(err) => write!(f, "underlying network error: {}", err),
        }
    }
}

impl std::error::Error for DoipError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let DoipError::Network(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<NetError> for DoipError {
    fn from(x: NetError) -> Self {
        Self::Network(x)
    }
}
