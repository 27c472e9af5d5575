//! Server-side UDS (ISO 14229) request dispatcher
//!
//! The [UdsServer] processes raw UDS requests handed up by the DoIP entity
//! and produces the response bytes to send back: `[SID + 0x40, data...]` for
//! a positive response, `[0x7F, SID, NRC]` for a negative one, or nothing
//! when the request suppressed its positive response.
//!
//! Session and security state live in the [UdsContext], owned by the
//! application wrapper that invokes the dispatcher.

use automotive_diag::ByteWrapper::Standard;
use automotive_diag::uds::{UdsCommand, UdsCommandByte};
use log::{debug, warn};

use self::diagnostic_session_control::UdsSessionType;
use self::ecu_reset::ResetType;
use self::read_data_by_identifier::EcuIdentity;

pub mod diagnostic_session_control;
pub mod ecu_reset;
pub mod read_data_by_identifier;
pub mod security_access;
pub mod tester_present;

#[cfg(test)]
mod test;

/// Offset added to the request SID in a positive response
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
/// SID of a negative response message
pub const NEGATIVE_RESPONSE_SID: u8 = 0x7F;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// UDS negative response codes emitted by the dispatcher
pub enum UdsError {
    /// Service is not supported by the ECU
    ServiceNotSupported,
    /// Sub function is not supported by the ECU
    SubFunctionNotSupported,
    /// Request message was an invalid length, or the format of the request
    /// was incorrect
    IncorrectMessageLengthOrInvalidFormat,
    /// The request message contains data outside of a valid range
    RequestOutOfRange,
    /// The request could not be completed due to security access being
    /// denied
    SecurityAccessDenied,
    /// The key sent during security access was invalid
    InvalidKey,
    /// The client has tried to obtain security access too many times with
    /// incorrect keys
    ExceedNumberOfAttempts,
    /// Seed requests are refused until the security timeout period expires
    RequiredTimeDelayNotExpired,
}

impl From<UdsError> for u8 {
    fn from(x: UdsError) -> Self {
        match x {
            UdsError::ServiceNotSupported => 0x11,
            UdsError::SubFunctionNotSupported => 0x12,
            UdsError::IncorrectMessageLengthOrInvalidFormat => 0x13,
            UdsError::RequestOutOfRange => 0x31,
            UdsError::SecurityAccessDenied => 0x33,
            UdsError::InvalidKey => 0x35,
            UdsError::ExceedNumberOfAttempts => 0x36,
            UdsError::RequiredTimeDelayNotExpired => 0x37,
        }
    }
}

/// Session and security state of one diagnostic server
#[derive(Debug, Copy, Clone)]
pub struct UdsContext {
    /// Active diagnostic session
    pub session: UdsSessionType,
    /// True once a seed/key exchange succeeded
    pub security_unlocked: bool,
    /// Seed issued by the last RequestSeed
    pub seed: u32,
    /// Invalid keys received since the last successful unlock
    pub failed_security_attempts: u8,
    /// Remaining lockout after too many failed attempts, in milliseconds
    pub security_delay_timer_ms: u32,
    /// Uptime at which the last TesterPresent was received
    pub last_tester_present_ms: u64,
    /// Dispatcher uptime in milliseconds
    pub uptime_ms: u64,
    /// Reset requested by ECUReset; the platform performs it after the
    /// response has been transmitted
    pub reset_pending: Option<ResetType>,
}

impl UdsContext {
    /// Creates a context in the default session, locked
    pub fn new() -> Self {
        Self {
            session: UdsSessionType::Default,
            security_unlocked: false,
            seed: 0,
            failed_security_attempts: 0,
            security_delay_timer_ms: 0,
            last_tester_present_ms: 0,
            uptime_ms: 0,
            reset_pending: None,
        }
    }
}

impl Default for UdsContext {
    fn default() -> Self {
        Self::new()
    }
}

/// UDS dispatcher options
#[derive(Debug, Copy, Clone)]
pub struct UdsServerOptions {
    /// Fixed security seed for reproducible tests. When unset, seeds come
    /// from an internal pseudorandom stream
    pub fixed_seed: Option<u32>,
    /// Invalid key count that triggers the security lockout
    pub max_security_attempts: u8,
    /// Lockout duration after too many invalid keys, in milliseconds
    pub security_delay_ms: u32,
}

impl Default for UdsServerOptions {
    fn default() -> Self {
        Self {
            fixed_seed: None,
            max_security_attempts: 3,
            security_delay_ms: 10_000,
        }
    }
}

/// UDS diagnostic server: routes requests to the service handlers and owns
/// the session/security state
#[derive(Debug)]
pub struct UdsServer {
    options: UdsServerOptions,
    identity: EcuIdentity,
    context: UdsContext,
    seed_state: u32,
}

impl UdsServer {
    /// Creates a dispatcher with the given options and identification data
    pub fn new(options: UdsServerOptions, identity: EcuIdentity) -> Self {
        Self {
            options,
            identity,
            context: UdsContext::new(),
            seed_state: options.fixed_seed.unwrap_or(0x1234_5678),
        }
    }

    /// Current session and security state
    pub fn context(&self) -> &UdsContext {
        &self.context
    }

    /// Mutable session and security state, for platform intervention (e.g.
    /// relocking after a reset)
    pub fn context_mut(&mut self) -> &mut UdsContext {
        &mut self.context
    }

    /// Takes the reset requested by a processed ECUReset, if any. The
    /// platform performs it after the response went out
    pub fn take_pending_reset(&mut self) -> Option<ResetType> {
        self.context.reset_pending.take()
    }

    /// Processes one raw UDS request (`[SID, data...]`).
    ///
    /// ## Returns
    /// The response bytes to transmit; empty when the request suppressed
    /// its positive response or carried no SID
    pub fn process_request(&mut self, request: &[u8]) -> Vec<u8> {
        let Some((&sid, payload)) = request.split_first() else {
            warn!("zero length UDS request dropped");
            return Vec::new();
        };
        debug!("UDS request SID 0x{:02X}, {} data bytes", sid, payload.len());

        let fresh_seed = self.next_seed();
        match UdsCommandByte::from(sid) {
            Standard(UdsCommand::DiagnosticSessionControl) => {
                diagnostic_session_control::handle(&mut self.context, payload)
            }
            Standard(UdsCommand::ECUReset) => ecu_reset::handle(&mut self.context, payload),
            Standard(UdsCommand::SecurityAccess) => {
                security_access::handle(&mut self.context, &self.options, fresh_seed, payload)
            }
            Standard(UdsCommand::TesterPresent) => {
                tester_present::handle(&mut self.context, payload)
            }
            Standard(UdsCommand::ReadDataByIdentifier) => {
                read_data_by_identifier::handle(&self.identity, payload)
            }
            _ => {
                debug!("unsupported SID 0x{:02X}", sid);
                negative_response(sid, UdsError::ServiceNotSupported)
            }
        }
    }

    /// Advances the dispatcher clock and the security lockout delay
    pub fn update_timers(&mut self, elapsed_ms: u32) {
        self.context.uptime_ms += u64::from(elapsed_ms);
        if self.context.security_delay_timer_ms > 0 {
            if self.context.security_delay_timer_ms > elapsed_ms {
                self.context.security_delay_timer_ms -= elapsed_ms;
            } else {
                self.context.security_delay_timer_ms = 0;
                self.context.failed_security_attempts = 0;
                debug!("security access delay expired");
            }
        }
    }

    fn next_seed(&mut self) -> u32 {
        if let Some(seed) = self.options.fixed_seed {
            return seed;
        }
        // xorshift32; explicitly not cryptographic
        let mut x = self.seed_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.seed_state = x;
        x
    }
}

pub(crate) fn positive_response(sid: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(sid.wrapping_add(POSITIVE_RESPONSE_OFFSET));
    response.extend_from_slice(data);
    response
}

pub(crate) fn negative_response(sid: u8, error: UdsError) -> Vec<u8> {
    vec![NEGATIVE_RESPONSE_SID, sid, error.into()]
}
