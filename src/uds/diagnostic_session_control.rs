//! Handler for DiagnosticSessionControl (SID 0x10)

use automotive_diag::uds::UdsCommand;
use log::info;

use super::{UdsContext, UdsError, negative_response, positive_response};

/// UDS diagnostic session modes handled by SID 0x10
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UdsSessionType {
    /// Default diagnostic session mode (the ECU is in this mode on startup)
    Default,
    /// Enables all diagnostic services related to flashing or programming
    /// the ECU
    Programming,
    /// Enables all diagnostic services and allows adjusting ECU values
    Extended,
}

impl From<UdsSessionType> for u8 {
    fn from(from: UdsSessionType) -> u8 {
        match from {
            UdsSessionType::Default => 0x01,
            UdsSessionType::Programming => 0x02,
            UdsSessionType::Extended => 0x03,
        }
    }
}

impl TryFrom<u8> for UdsSessionType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Default),
            0x02 => Ok(Self::Programming),
            0x03 => Ok(Self::Extended),
            _ => Err(()),
        }
    }
}

// Performance requirement bytes of the positive response:
// P2 server max = 50 ms, P2* server max = 5000 ms (in 10 ms units)
const P2_SERVER_MAX: u16 = 0x0032;
const P2_STAR_SERVER_MAX: u16 = 0x01F4;

pub(crate) fn handle(context: &mut UdsContext, payload: &[u8]) -> Vec<u8> {
    const SID: u8 = UdsCommand::DiagnosticSessionControl as u8;

    let Some(&sub_function) = payload.first() else {
        return negative_response(SID, UdsError::IncorrectMessageLengthOrInvalidFormat);
    };
    let Ok(session) = UdsSessionType::try_from(sub_function) else {
        return negative_response(SID, UdsError::SubFunctionNotSupported);
    };

    context.session = session;
    info!("diagnostic session switched to {:?}", session);

    let mut data = vec![sub_function];
    data.extend_from_slice(&P2_SERVER_MAX.to_be_bytes());
    data.extend_from_slice(&P2_STAR_SERVER_MAX.to_be_bytes());
    positive_response(SID, &data)
}
