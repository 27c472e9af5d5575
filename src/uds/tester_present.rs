//! Handler for TesterPresent (SID 0x3E)

use automotive_diag::uds::UdsCommand;

use super::{UdsContext, UdsError, negative_response, positive_response};

/// Sub-function value that suppresses the positive response
pub const SUPPRESS_POS_RSP: u8 = 0x80;

pub(crate) fn handle(context: &mut UdsContext, payload: &[u8]) -> Vec<u8> {
    const SID: u8 = UdsCommand::TesterPresent as u8;

    let Some(&sub_function) = payload.first() else {
        return negative_response(SID, UdsError::IncorrectMessageLengthOrInvalidFormat);
    };

    match sub_function {
        0x00 => {
            context.last_tester_present_ms = context.uptime_ms;
            positive_response(SID, &[sub_function])
        }
        SUPPRESS_POS_RSP => {
            context.last_tester_present_ms = context.uptime_ms;
            Vec::new()
        }
        _ => negative_response(SID, UdsError::SubFunctionNotSupported),
    }
}
