//! Handler for ECUReset (SID 0x11)
//!
//! The handler only validates and acknowledges the request; the actual
//! reset is performed by the platform after the positive response has been
//! transmitted, via [crate::uds::UdsServer::take_pending_reset].

use automotive_diag::uds::UdsCommand;
use log::info;

use super::diagnostic_session_control::UdsSessionType;
use super::{UdsContext, UdsError, negative_response, positive_response};

/// ECU reset types handled by SID 0x11
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResetType {
    /// Power cycle equivalent reset
    HardReset,
    /// Simulates an ignition key off/on cycle
    KeyOffReset,
    /// Software restart without dropping power
    SoftReset,
}

impl From<ResetType> for u8 {
    fn from(from: ResetType) -> u8 {
        match from {
            ResetType::HardReset => 0x01,
            ResetType::KeyOffReset => 0x02,
            ResetType::SoftReset => 0x03,
        }
    }
}

impl TryFrom<u8> for ResetType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::HardReset),
            0x02 => Ok(Self::KeyOffReset),
            0x03 => Ok(Self::SoftReset),
            _ => Err(()),
        }
    }
}

pub(crate) fn handle(context: &mut UdsContext, payload: &[u8]) -> Vec<u8> {
    const SID: u8 = UdsCommand::ECUReset as u8;

    let Some(&sub_function) = payload.first() else {
        return negative_response(SID, UdsError::IncorrectMessageLengthOrInvalidFormat);
    };
    let Ok(reset_type) = ResetType::try_from(sub_function) else {
        return negative_response(SID, UdsError::SubFunctionNotSupported);
    };

    // Outside the default session a reset is a privileged operation
    if !context.security_unlocked && context.session != UdsSessionType::Default {
        return negative_response(SID, UdsError::SecurityAccessDenied);
    }

    info!("{:?} accepted, deferred until the response is out", reset_type);
    context.reset_pending = Some(reset_type);
    positive_response(SID, &[sub_function])
}
