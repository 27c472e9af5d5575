//! Handler for SecurityAccess (SID 0x27), level 1 seed/key
//!
//! The key is the seed XORed with a fixed mask. Too many invalid keys lock
//! the service: further seed requests are refused with NRC 0x37 until the
//! configured delay expires.

use automotive_diag::uds::UdsCommand;
use log::{info, warn};

use super::{UdsContext, UdsError, UdsServerOptions, negative_response, positive_response};

/// Security access sub-functions of level 1
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SecurityOperation {
    /// Asks the ECU for a security seed
    RequestSeed,
    /// Sends the computed key to the ECU
    SendKey,
}

impl From<SecurityOperation> for u8 {
    fn from(from: SecurityOperation) -> Self {
        match from {
            SecurityOperation::RequestSeed => 0x01,
            SecurityOperation::SendKey => 0x02,
        }
    }
}

const KEY_MASK: u32 = 0xA5A5_A5A5;

pub(crate) fn handle(
    context: &mut UdsContext,
    options: &UdsServerOptions,
    fresh_seed: u32,
    payload: &[u8],
) -> Vec<u8> {
    const SID: u8 = UdsCommand::SecurityAccess as u8;

    let Some(&sub_function) = payload.first() else {
        return negative_response(SID, UdsError::IncorrectMessageLengthOrInvalidFormat);
    };

    if sub_function == SecurityOperation::RequestSeed.into() {
        // An unlocked server answers with an all-zero seed
        if context.security_unlocked {
            return positive_response(SID, &[sub_function, 0x00, 0x00, 0x00, 0x00]);
        }
        if context.security_delay_timer_ms > 0 {
            return negative_response(SID, UdsError::RequiredTimeDelayNotExpired);
        }

        context.seed = fresh_seed;
        let mut data = vec![sub_function];
        data.extend_from_slice(&context.seed.to_be_bytes());
        positive_response(SID, &data)
    } else if sub_function == SecurityOperation::SendKey.into() {
        if payload.len() < 5 {
            return negative_response(SID, UdsError::IncorrectMessageLengthOrInvalidFormat);
        }

        let received_key = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
        let expected_key = context.seed ^ KEY_MASK;

        if received_key == expected_key {
            context.security_unlocked = true;
            context.failed_security_attempts = 0;
            info!("security access unlocked");
            positive_response(SID, &[sub_function])
        } else {
            context.failed_security_attempts = context.failed_security_attempts.saturating_add(1);
            warn!(
                "invalid security key, attempt {}",
                context.failed_security_attempts
            );
            if context.failed_security_attempts >= options.max_security_attempts {
                context.security_delay_timer_ms = options.security_delay_ms;
                negative_response(SID, UdsError::ExceedNumberOfAttempts)
            } else {
                negative_response(SID, UdsError::InvalidKey)
            }
        }
    } else {
        negative_response(SID, UdsError::SubFunctionNotSupported)
    }
}
