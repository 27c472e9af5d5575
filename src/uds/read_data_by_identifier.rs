//! Handler for ReadDataByIdentifier (SID 0x22)

use automotive_diag::uds::UdsCommand;
use strum_macros::FromRepr;

use crate::protocol::VIN_LENGTH;

use super::{UdsError, negative_response, positive_response};

/// Data identifiers recognized by the dispatcher
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
#[repr(u16)]
pub enum DataIdentifier {
    /// Vehicle identification number
    Vin = 0xF190,
    /// ECU serial number string
    EcuSerialNumber = 0xF18C,
    /// ECU software version (major, minor, patch)
    EcuSoftwareNumber = 0xF194,
}

/// Identification data served by ReadDataByIdentifier
#[derive(Debug, Clone)]
pub struct EcuIdentity {
    /// Vehicle identification number, DID 0xF190
    pub vin: [u8; VIN_LENGTH],
    /// Serial number string, DID 0xF18C
    pub serial_number: Vec<u8>,
    /// Software version as major/minor/patch, DID 0xF194
    pub software_version: [u8; 3],
}

impl Default for EcuIdentity {
    fn default() -> Self {
        Self {
            vin: [b'0'; VIN_LENGTH],
            serial_number: b"SN123456789".to_vec(),
            software_version: [0x01, 0x00, 0x05],
        }
    }
}

pub(crate) fn handle(identity: &EcuIdentity, payload: &[u8]) -> Vec<u8> {
    const SID: u8 = UdsCommand::ReadDataByIdentifier as u8;

    if payload.len() < 2 {
        return negative_response(SID, UdsError::IncorrectMessageLengthOrInvalidFormat);
    }
    let did = u16::from_be_bytes([payload[0], payload[1]]);

    // The response echoes the DID ahead of the record data
    let mut data = vec![payload[0], payload[1]];
    match DataIdentifier::from_repr(did) {
        Some(DataIdentifier::Vin) => data.extend_from_slice(&identity.vin),
        Some(DataIdentifier::EcuSerialNumber) => {
            data.extend_from_slice(&identity.serial_number)
        }
        Some(DataIdentifier::EcuSoftwareNumber) => {
            data.extend_from_slice(&identity.software_version)
        }
        None => return negative_response(SID, UdsError::RequestOutOfRange),
    }
    positive_response(SID, &data)
}
