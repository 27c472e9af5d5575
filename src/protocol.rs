//! Wire format codec for DoIP (ISO 13400-2:2019) messages
//!
//! Everything in here is a pure function over byte slices. All multi-byte
//! integers on the wire are big-endian, regardless of host byte order.
//! Decoding a value and re-encoding it yields byte-identical output,
//! provided the input length matched the payload type's canonical size.

use strum_macros::{EnumIter, FromRepr};

use crate::{DoipError, DoipResult};

/// DoIP protocol version byte for ISO 13400-2:2012
pub const PROTOCOL_VERSION_2012: u8 = 0x02;
/// DoIP protocol version byte for ISO 13400-2:2019
pub const PROTOCOL_VERSION_2019: u8 = 0x03;
/// Inverse protocol version byte for ISO 13400-2:2012
pub const INVERSE_VERSION_2012: u8 = 0xFD;
/// Inverse protocol version byte for ISO 13400-2:2019
pub const INVERSE_VERSION_2019: u8 = 0xFC;

/// Length of the DoIP generic header in bytes
pub const HEADER_SIZE: usize = 8;
/// Largest payload accepted in a single DoIP message
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024;
/// Length of a Vehicle Identification Number
pub const VIN_LENGTH: usize = 17;
/// Length of an Entity ID (typically the MAC address)
pub const EID_LENGTH: usize = 6;
/// Length of a Group ID
pub const GID_LENGTH: usize = 6;

/// DoIP payload types of ISO 13400-2:2019
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, EnumIter)]
#[repr(u16)]
pub enum PayloadType {
    /// Generic DoIP header negative acknowledge
    GenericNack = 0x0000,
    /// Vehicle identification request
    VehicleIdRequest = 0x0001,
    /// Vehicle identification request with EID filter
    VehicleIdRequestByEid = 0x0002,
    /// Vehicle identification request with VIN filter
    VehicleIdRequestByVin = 0x0003,
    /// Vehicle announcement / vehicle identification response
    VehicleAnnouncement = 0x0004,
    /// Routing activation request
    RoutingActivationRequest = 0x0005,
    /// Routing activation response
    RoutingActivationResponse = 0x0006,
    /// Alive check request
    AliveCheckRequest = 0x0007,
    /// Alive check response
    AliveCheckResponse = 0x0008,
    /// Diagnostic message carrying a UDS payload
    DiagMessage = 0x8001,
    /// Diagnostic message positive acknowledge
    DiagMessageAck = 0x8002,
    /// Diagnostic message negative acknowledge
    DiagMessageNack = 0x8003,
}

impl From<PayloadType> for u16 {
    fn from(x: PayloadType) -> Self {
        x as u16
    }
}

/// Routing activation response codes
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum ActivationResponseCode {
    /// Source address unknown or outside the allowed tester range
    UnknownSourceAddress = 0x00,
    /// All TCP_DATA sockets are registered and active
    NoFreeSockets = 0x01,
    /// The socket is already registered with a different source address
    DifferentSourceAddress = 0x02,
    /// The source address is already active on a different socket
    AlreadyActive = 0x03,
    /// Missing authentication
    AuthenticationMissing = 0x04,
    /// Confirmation rejected
    ConfirmationRejected = 0x05,
    /// Unsupported routing activation type
    UnsupportedActivationType = 0x06,
    /// Routing successfully activated
    Success = 0x10,
    /// Activation accepted, confirmation required
    ConfirmationRequired = 0x11,
}

impl From<ActivationResponseCode> for u8 {
    fn from(x: ActivationResponseCode) -> Self {
        x as u8
    }
}

/// Diagnostic message negative acknowledge codes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiagnosticNackCode {
    /// Source address is not activated on this socket
    InvalidSourceAddress,
    /// Target address is not known to this entity
    UnknownTargetAddress,
    /// The diagnostic message exceeds the maximum supported length
    MessageTooLarge,
    /// Out of memory while forwarding the message
    OutOfMemory,
    /// The target is known but currently unreachable
    TargetUnreachable,
    /// Unknown network
    UnknownNetwork,
    /// Transport protocol error
    TransportProtocolError,
}

impl From<DiagnosticNackCode> for u8 {
    fn from(x: DiagnosticNackCode) -> Self {
        match x {
            DiagnosticNackCode::InvalidSourceAddress => 0x02,
            DiagnosticNackCode::UnknownTargetAddress => 0x03,
            DiagnosticNackCode::MessageTooLarge => 0x04,
            DiagnosticNackCode::OutOfMemory => 0x05,
            DiagnosticNackCode::TargetUnreachable => 0x06,
            DiagnosticNackCode::UnknownNetwork => 0x07,
            DiagnosticNackCode::TransportProtocolError => 0x08,
        }
    }
}

/// Generic DoIP header negative acknowledge codes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GenericNackCode {
    /// Protocol version / inverse version mismatch
    IncorrectPattern,
    /// Payload type not supported
    UnknownPayloadType,
    /// Message larger than the receiver supports
    MessageTooLarge,
    /// Receiver ran out of memory
    OutOfMemory,
    /// Payload length does not match the payload type
    InvalidPayloadLength,
}

impl From<GenericNackCode> for u8 {
    fn from(x: GenericNackCode) -> Self {
        match x {
            GenericNackCode::IncorrectPattern => 0x00,
            GenericNackCode::UnknownPayloadType => 0x01,
            GenericNackCode::MessageTooLarge => 0x02,
            GenericNackCode::OutOfMemory => 0x03,
            GenericNackCode::InvalidPayloadLength => 0x04,
        }
    }
}

/// DoIP generic header (8 bytes on the wire)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DoipHeader {
    /// Protocol version byte
    pub protocol_version: u8,
    /// Bitwise inverse of the protocol version byte
    pub inverse_protocol_version: u8,
    /// Raw payload type selector
    pub payload_type: u16,
    /// Number of payload bytes following the header
    pub payload_length: u32,
}

impl DoipHeader {
    /// Creates a 2019-version header for the given payload type and length
    pub fn new(payload_type: PayloadType, payload_length: u32) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION_2019,
            inverse_protocol_version: INVERSE_VERSION_2019,
            payload_type: payload_type.into(),
            payload_length,
        }
    }
}

/// Vehicle identification response / vehicle announcement (33 byte payload)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VehicleIdResponse {
    /// Vehicle identification number
    pub vin: [u8; VIN_LENGTH],
    /// Logical address of the announcing entity
    pub logical_address: u16,
    /// Entity ID
    pub eid: [u8; EID_LENGTH],
    /// Group ID
    pub gid: [u8; GID_LENGTH],
    /// Further action required byte (0x00 = none)
    pub further_action_required: u8,
    /// VIN/GID synchronization status (0x00 = synchronized)
    pub sync_status: u8,
}

/// Routing activation request (11 byte payload; the trailing 4 OEM bytes are
/// optional on the wire)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RoutingActivationRequest {
    /// Source address of the requesting tester
    pub source_address: u16,
    /// Activation type (0x00 = default)
    pub activation_type: u8,
    /// Reserved by ISO 13400
    pub reserved: u32,
    /// OEM specific extension
    pub oem_specific: u32,
}

/// Routing activation response (13 byte payload)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RoutingActivationResponse {
    /// Logical address of the tester the response is addressed to
    pub tester_address: u16,
    /// Logical address of the responding entity
    pub entity_address: u16,
    /// Raw activation response code
    pub response_code: u8,
    /// Reserved by ISO 13400
    pub reserved: u32,
    /// OEM specific extension
    pub oem_specific: u32,
}

/// Diagnostic message (4 byte addressing prefix + UDS payload).
///
/// `user_data` borrows from the buffer the message was decoded from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage<'a> {
    /// Logical address of the sender
    pub source_address: u16,
    /// Logical address of the receiver
    pub target_address: u16,
    /// UDS payload
    pub user_data: &'a [u8],
}

/// Diagnostic message acknowledge (positive or negative, 5 byte payload)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DiagMessageAck {
    /// Logical address of the acknowledging node
    pub source_address: u16,
    /// Logical address the acknowledge is addressed to
    pub target_address: u16,
    /// 0x00 for a positive acknowledge, a NACK code otherwise
    pub ack_code: u8,
}

/// Encodes the 8 byte DoIP generic header into `buffer`
pub fn encode_header(header: &DoipHeader, buffer: &mut [u8]) -> DoipResult<()> {
    if buffer.len() < HEADER_SIZE {
        return Err(DoipError::BufferTooSmall);
    }
    buffer[0] = header.protocol_version;
    buffer[1] = header.inverse_protocol_version;
    buffer[2..4].copy_from_slice(&header.payload_type.to_be_bytes());
    buffer[4..8].copy_from_slice(&header.payload_length.to_be_bytes());
    Ok(())
}

/// Decodes the 8 byte DoIP generic header from the start of `buffer`.
///
/// No semantic validation is performed, see [validate_header]
pub fn decode_header(buffer: &[u8]) -> DoipResult<DoipHeader> {
    if buffer.len() < HEADER_SIZE {
        return Err(DoipError::BufferTooSmall);
    }
    Ok(DoipHeader {
        protocol_version: buffer[0],
        inverse_protocol_version: buffer[1],
        payload_type: u16::from_be_bytes([buffer[2], buffer[3]]),
        payload_length: u32::from_be_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]),
    })
}

/// Checks the version/inverse-version pattern and the payload length bound.
///
/// Only the 2012 (0x02/0xFD) and 2019 (0x03/0xFC) protocol versions are
/// accepted, and the payload must fit in [MAX_PAYLOAD_SIZE]
pub fn validate_header(header: &DoipHeader) -> bool {
    let version_ok = matches!(
        (header.protocol_version, header.inverse_protocol_version),
        (PROTOCOL_VERSION_2012, INVERSE_VERSION_2012)
            | (PROTOCOL_VERSION_2019, INVERSE_VERSION_2019)
    );
    version_ok && header.payload_length as usize <= MAX_PAYLOAD_SIZE
}

/// Encodes a vehicle identification response (also used as the vehicle
/// announcement, payload type 0x0004).
///
/// ## Returns
/// The total number of bytes written (header + 33 byte payload)
pub fn encode_vehicle_id_response(
    response: &VehicleIdResponse,
    buffer: &mut [u8],
) -> DoipResult<usize> {
    if buffer.len() < HEADER_SIZE + 33 {
        return Err(DoipError::BufferTooSmall);
    }
    let header = DoipHeader::new(PayloadType::VehicleAnnouncement, 33);
    encode_header(&header, buffer)?;

    let mut offset = HEADER_SIZE;
    buffer[offset..offset + VIN_LENGTH].copy_from_slice(&response.vin);
    offset += VIN_LENGTH;
    buffer[offset..offset + 2].copy_from_slice(&response.logical_address.to_be_bytes());
    offset += 2;
    buffer[offset..offset + EID_LENGTH].copy_from_slice(&response.eid);
    offset += EID_LENGTH;
    buffer[offset..offset + GID_LENGTH].copy_from_slice(&response.gid);
    offset += GID_LENGTH;
    buffer[offset] = response.further_action_required;
    buffer[offset + 1] = response.sync_status;
    Ok(offset + 2)
}

/// Decodes a vehicle identification response payload (33 bytes, without the
/// DoIP header)
pub fn decode_vehicle_id_response(payload: &[u8]) -> DoipResult<VehicleIdResponse> {
    if payload.len() < 33 {
        return Err(DoipError::InvalidFormat);
    }
    let mut vin = [0u8; VIN_LENGTH];
    vin.copy_from_slice(&payload[0..VIN_LENGTH]);
    let mut eid = [0u8; EID_LENGTH];
    eid.copy_from_slice(&payload[19..19 + EID_LENGTH]);
    let mut gid = [0u8; GID_LENGTH];
    gid.copy_from_slice(&payload[25..25 + GID_LENGTH]);
    Ok(VehicleIdResponse {
        vin,
        logical_address: u16::from_be_bytes([payload[17], payload[18]]),
        eid,
        gid,
        further_action_required: payload[31],
        sync_status: payload[32],
    })
}

/// Encodes a vehicle identification request (payload type 0x0001, empty
/// payload). Returns the number of bytes written
pub fn encode_vehicle_id_request(buffer: &mut [u8]) -> DoipResult<usize> {
    let header = DoipHeader::new(PayloadType::VehicleIdRequest, 0);
    encode_header(&header, buffer)?;
    Ok(HEADER_SIZE)
}

/// Encodes a routing activation request. Returns the number of bytes written
pub fn encode_routing_activation_req(
    request: &RoutingActivationRequest,
    buffer: &mut [u8],
) -> DoipResult<usize> {
    if buffer.len() < HEADER_SIZE + 11 {
        return Err(DoipError::BufferTooSmall);
    }
    let header = DoipHeader::new(PayloadType::RoutingActivationRequest, 11);
    encode_header(&header, buffer)?;

    let mut offset = HEADER_SIZE;
    buffer[offset..offset + 2].copy_from_slice(&request.source_address.to_be_bytes());
    offset += 2;
    buffer[offset] = request.activation_type;
    offset += 1;
    buffer[offset..offset + 4].copy_from_slice(&request.reserved.to_be_bytes());
    offset += 4;
    buffer[offset..offset + 4].copy_from_slice(&request.oem_specific.to_be_bytes());
    Ok(offset + 4)
}

/// Decodes a routing activation request payload.
///
/// ISO 13400-2 allows the 4 OEM specific bytes to be absent, so any payload
/// of at least 7 bytes is accepted; `oem_specific` is decoded only when all
/// 11 bytes are present and is zero otherwise
pub fn decode_routing_activation_req(payload: &[u8]) -> DoipResult<RoutingActivationRequest> {
    if payload.len() < 7 {
        return Err(DoipError::InvalidFormat);
    }
    let oem_specific = if payload.len() >= 11 {
        u32::from_be_bytes([payload[7], payload[8], payload[9], payload[10]])
    } else {
        0
    };
    Ok(RoutingActivationRequest {
        source_address: u16::from_be_bytes([payload[0], payload[1]]),
        activation_type: payload[2],
        reserved: u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]),
        oem_specific,
    })
}

/// Encodes a routing activation response. Returns the number of bytes written
pub fn encode_routing_activation_res(
    response: &RoutingActivationResponse,
    buffer: &mut [u8],
) -> DoipResult<usize> {
    if buffer.len() < HEADER_SIZE + 13 {
        return Err(DoipError::BufferTooSmall);
    }
    let header = DoipHeader::new(PayloadType::RoutingActivationResponse, 13);
    encode_header(&header, buffer)?;

    let mut offset = HEADER_SIZE;
    buffer[offset..offset + 2].copy_from_slice(&response.tester_address.to_be_bytes());
    offset += 2;
    buffer[offset..offset + 2].copy_from_slice(&response.entity_address.to_be_bytes());
    offset += 2;
    buffer[offset] = response.response_code;
    offset += 1;
    buffer[offset..offset + 4].copy_from_slice(&response.reserved.to_be_bytes());
    offset += 4;
    buffer[offset..offset + 4].copy_from_slice(&response.oem_specific.to_be_bytes());
    Ok(offset + 4)
}

/// Decodes a routing activation response payload (13 bytes)
pub fn decode_routing_activation_res(payload: &[u8]) -> DoipResult<RoutingActivationResponse> {
    if payload.len() < 13 {
        return Err(DoipError::InvalidFormat);
    }
    Ok(RoutingActivationResponse {
        tester_address: u16::from_be_bytes([payload[0], payload[1]]),
        entity_address: u16::from_be_bytes([payload[2], payload[3]]),
        response_code: payload[4],
        reserved: u32::from_be_bytes([payload[5], payload[6], payload[7], payload[8]]),
        oem_specific: u32::from_be_bytes([payload[9], payload[10], payload[11], payload[12]]),
    })
}

/// Encodes a diagnostic message (payload type 0x8001).
///
/// ## Parameters
/// * message - The addressing pair and UDS payload to encode
/// * buffer - Output buffer, must hold `12 + user_data.len()` bytes
///
/// ## Returns
/// The total number of bytes written
pub fn encode_diagnostic_message(
    message: &DiagnosticMessage<'_>,
    buffer: &mut [u8],
) -> DoipResult<usize> {
    if message.user_data.len() > MAX_PAYLOAD_SIZE - 4 {
        return Err(DoipError::InvalidParam);
    }
    let total = HEADER_SIZE + 4 + message.user_data.len();
    if buffer.len() < total {
        return Err(DoipError::BufferTooSmall);
    }
    let header = DoipHeader::new(PayloadType::DiagMessage, (4 + message.user_data.len()) as u32);
    encode_header(&header, buffer)?;

    let mut offset = HEADER_SIZE;
    buffer[offset..offset + 2].copy_from_slice(&message.source_address.to_be_bytes());
    offset += 2;
    buffer[offset..offset + 2].copy_from_slice(&message.target_address.to_be_bytes());
    offset += 2;
    buffer[offset..offset + message.user_data.len()].copy_from_slice(message.user_data);
    Ok(total)
}

/// Decodes a diagnostic message payload. The returned `user_data` borrows
/// from `payload`
pub fn decode_diagnostic_message(payload: &[u8]) -> DoipResult<DiagnosticMessage<'_>> {
    if payload.len() < 4 {
        return Err(DoipError::InvalidFormat);
    }
    Ok(DiagnosticMessage {
        source_address: u16::from_be_bytes([payload[0], payload[1]]),
        target_address: u16::from_be_bytes([payload[2], payload[3]]),
        user_data: &payload[4..],
    })
}

fn encode_diag_ack_payload(
    payload_type: PayloadType,
    source_address: u16,
    target_address: u16,
    code: u8,
    buffer: &mut [u8],
) -> DoipResult<usize> {
    if buffer.len() < HEADER_SIZE + 5 {
        return Err(DoipError::BufferTooSmall);
    }
    let header = DoipHeader::new(payload_type, 5);
    encode_header(&header, buffer)?;
    buffer[8..10].copy_from_slice(&source_address.to_be_bytes());
    buffer[10..12].copy_from_slice(&target_address.to_be_bytes());
    buffer[12] = code;
    Ok(HEADER_SIZE + 5)
}

/// Encodes a positive diagnostic message acknowledge (payload type 0x8002,
/// ack code 0x00). Returns the number of bytes written
pub fn encode_diag_message_ack(
    source_address: u16,
    target_address: u16,
    buffer: &mut [u8],
) -> DoipResult<usize> {
    encode_diag_ack_payload(
        PayloadType::DiagMessageAck,
        source_address,
        target_address,
        0x00,
        buffer,
    )
}

/// Encodes a negative diagnostic message acknowledge (payload type 0x8003).
/// Returns the number of bytes written
pub fn encode_diag_message_nack(
    source_address: u16,
    target_address: u16,
    code: DiagnosticNackCode,
    buffer: &mut [u8],
) -> DoipResult<usize> {
    encode_diag_ack_payload(
        PayloadType::DiagMessageNack,
        source_address,
        target_address,
        code.into(),
        buffer,
    )
}

/// Decodes a diagnostic message acknowledge payload (positive or negative,
/// 5 bytes)
pub fn decode_diag_message_ack(payload: &[u8]) -> DoipResult<DiagMessageAck> {
    if payload.len() < 5 {
        return Err(DoipError::InvalidFormat);
    }
    Ok(DiagMessageAck {
        source_address: u16::from_be_bytes([payload[0], payload[1]]),
        target_address: u16::from_be_bytes([payload[2], payload[3]]),
        ack_code: payload[4],
    })
}

/// Encodes a generic DoIP header negative acknowledge (payload type 0x0000,
/// 1 byte payload). Returns the number of bytes written
pub fn encode_generic_nack(code: GenericNackCode, buffer: &mut [u8]) -> DoipResult<usize> {
    if buffer.len() < HEADER_SIZE + 1 {
        return Err(DoipError::BufferTooSmall);
    }
    let header = DoipHeader::new(PayloadType::GenericNack, 1);
    encode_header(&header, buffer)?;
    buffer[8] = code.into();
    Ok(HEADER_SIZE + 1)
}

/// Encodes an alive check request (payload type 0x0007, empty payload).
/// Returns the number of bytes written
pub fn encode_alive_check_request(buffer: &mut [u8]) -> DoipResult<usize> {
    let header = DoipHeader::new(PayloadType::AliveCheckRequest, 0);
    encode_header(&header, buffer)?;
    Ok(HEADER_SIZE)
}

/// Encodes an alive check response carrying the responder's logical address
/// (payload type 0x0008, 2 byte payload). Returns the number of bytes written
pub fn encode_alive_check_response(source_address: u16, buffer: &mut [u8]) -> DoipResult<usize> {
    if buffer.len() < HEADER_SIZE + 2 {
        return Err(DoipError::BufferTooSmall);
    }
    let header = DoipHeader::new(PayloadType::AliveCheckResponse, 2);
    encode_header(&header, buffer)?;
    buffer[8..10].copy_from_slice(&source_address.to_be_bytes());
    Ok(HEADER_SIZE + 2)
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn header_round_trip() {
        for payload_type in PayloadType::iter() {
            let header = DoipHeader::new(payload_type, 0x0123);
            let mut buf = [0u8; HEADER_SIZE];
            encode_header(&header, &mut buf).unwrap();
            assert_eq!(decode_header(&buf).unwrap(), header);
            assert!(validate_header(&header));
            assert_eq!(PayloadType::from_repr(header.payload_type), Some(payload_type));
        }
    }

    #[test]
    fn header_wire_layout() {
        // Vehicle identification request broadcast by a tester
        let raw = [0x03, 0xFC, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
        let header = decode_header(&raw).unwrap();
        assert_eq!(header.protocol_version, PROTOCOL_VERSION_2019);
        assert_eq!(header.inverse_protocol_version, INVERSE_VERSION_2019);
        assert_eq!(header.payload_type, 0x0001);
        assert_eq!(header.payload_length, 0);
        assert!(validate_header(&header));

        let mut buf = [0u8; HEADER_SIZE];
        encode_header(&header, &mut buf).unwrap();
        assert_eq!(buf, raw);
    }

    #[test]
    fn header_validation_rejects_bad_patterns() {
        let mut header = DoipHeader::new(PayloadType::VehicleIdRequest, 0);
        header.inverse_protocol_version = 0xFD;
        assert!(!validate_header(&header));

        let header = DoipHeader {
            protocol_version: 0x01,
            inverse_protocol_version: 0xFE,
            payload_type: 0x0001,
            payload_length: 0,
        };
        assert!(!validate_header(&header));

        let oversized = DoipHeader::new(PayloadType::DiagMessage, MAX_PAYLOAD_SIZE as u32 + 1);
        assert!(!validate_header(&oversized));
        let at_limit = DoipHeader::new(PayloadType::DiagMessage, MAX_PAYLOAD_SIZE as u32);
        assert!(validate_header(&at_limit));
    }

    #[test]
    fn header_decode_too_short() {
        assert!(matches!(
            decode_header(&[0x03, 0xFC, 0x00]),
            Err(DoipError::BufferTooSmall)
        ));
    }

    #[test]
    fn vehicle_id_response_wire_layout() {
        let response = VehicleIdResponse {
            vin: *b"WVWZZZ1KZ1A234567",
            logical_address: 0x1000,
            eid: [0x00, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F],
            gid: [0xFF; GID_LENGTH],
            further_action_required: 0x00,
            sync_status: 0x00,
        };
        let mut buf = [0u8; 64];
        let n = encode_vehicle_id_response(&response, &mut buf).unwrap();
        assert_eq!(n, 41);

        let expected: [u8; 41] = [
            0x03, 0xFC, 0x00, 0x04, 0x00, 0x00, 0x00, 0x21, // header
            0x57, 0x56, 0x57, 0x5A, 0x5A, 0x5A, 0x31, 0x4B, 0x5A, 0x31, 0x41, 0x32, 0x33, 0x34,
            0x35, 0x36, 0x37, // VIN
            0x10, 0x00, // logical address
            0x00, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F, // EID
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // GID
            0x00, 0x00, // further action, sync status
        ];
        assert_eq!(&buf[..n], &expected);

        let decoded = decode_vehicle_id_response(&buf[HEADER_SIZE..n]).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn routing_activation_round_trip() {
        let request = RoutingActivationRequest {
            source_address: 0x0E00,
            activation_type: 0x00,
            reserved: 0,
            oem_specific: 0,
        };
        let mut buf = [0u8; 32];
        let n = encode_routing_activation_req(&request, &mut buf).unwrap();
        assert_eq!(n, 19);
        assert_eq!(decode_routing_activation_req(&buf[HEADER_SIZE..n]).unwrap(), request);

        // Short form without the OEM specific trailer
        let short = decode_routing_activation_req(&buf[HEADER_SIZE..HEADER_SIZE + 7]).unwrap();
        assert_eq!(short.source_address, 0x0E00);
        assert_eq!(short.oem_specific, 0);
        assert!(matches!(
            decode_routing_activation_req(&buf[HEADER_SIZE..HEADER_SIZE + 6]),
            Err(DoipError::InvalidFormat)
        ));

        let response = RoutingActivationResponse {
            tester_address: 0x0E00,
            entity_address: 0x1000,
            response_code: ActivationResponseCode::Success.into(),
            reserved: 0,
            oem_specific: 0,
        };
        let n = encode_routing_activation_res(&response, &mut buf).unwrap();
        let expected: [u8; 21] = [
            0x03, 0xFC, 0x00, 0x06, 0x00, 0x00, 0x00, 0x0D, 0x0E, 0x00, 0x10, 0x00, 0x10, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(&buf[..n], &expected);
        assert_eq!(decode_routing_activation_res(&buf[HEADER_SIZE..n]).unwrap(), response);
    }

    #[test]
    fn diagnostic_message_round_trip() {
        let message = DiagnosticMessage {
            source_address: 0x0E00,
            target_address: 0x1000,
            user_data: &[0x22, 0xF1, 0x90],
        };
        let mut buf = [0u8; 64];
        let n = encode_diagnostic_message(&message, &mut buf).unwrap();
        let expected: [u8; 15] = [
            0x03, 0xFC, 0x80, 0x01, 0x00, 0x00, 0x00, 0x06, 0x0E, 0x00, 0x10, 0x00, 0x22, 0xF1,
            0x90,
        ];
        assert_eq!(&buf[..n], &expected);

        let decoded = decode_diagnostic_message(&buf[HEADER_SIZE..n]).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn diagnostic_message_rejects_oversize() {
        let data = vec![0u8; MAX_PAYLOAD_SIZE - 3];
        let message = DiagnosticMessage {
            source_address: 0x0E00,
            target_address: 0x1000,
            user_data: &data,
        };
        let mut buf = vec![0u8; MAX_PAYLOAD_SIZE + HEADER_SIZE + 8];
        assert!(matches!(
            encode_diagnostic_message(&message, &mut buf),
            Err(DoipError::InvalidParam)
        ));
    }

    #[test]
    fn diag_ack_wire_layout() {
        let mut buf = [0u8; 16];
        let n = encode_diag_message_ack(0x1000, 0x0E00, &mut buf).unwrap();
        let expected: [u8; 13] = [
            0x03, 0xFC, 0x80, 0x02, 0x00, 0x00, 0x00, 0x05, 0x10, 0x00, 0x0E, 0x00, 0x00,
        ];
        assert_eq!(&buf[..n], &expected);

        let n = encode_diag_message_nack(
            0x1000,
            0x0000,
            DiagnosticNackCode::InvalidSourceAddress,
            &mut buf,
        )
        .unwrap();
        assert_eq!(buf[3], 0x03); // payload type 0x8003
        assert_eq!(buf[12], 0x02);

        let ack = decode_diag_message_ack(&buf[HEADER_SIZE..n]).unwrap();
        assert_eq!(ack.source_address, 0x1000);
        assert_eq!(ack.target_address, 0x0000);
        assert_eq!(ack.ack_code, 0x02);
    }

    #[test]
    fn control_message_encodings() {
        let mut buf = [0u8; 16];
        let n = encode_generic_nack(GenericNackCode::UnknownPayloadType, &mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x03, 0xFC, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01]);

        let n = encode_alive_check_request(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x03, 0xFC, 0x00, 0x07, 0x00, 0x00, 0x00, 0x00]);

        let n = encode_alive_check_response(0x0E00, &mut buf).unwrap();
        assert_eq!(
            &buf[..n],
            &[0x03, 0xFC, 0x00, 0x08, 0x00, 0x00, 0x00, 0x02, 0x0E, 0x00]
        );
    }

    #[test]
    fn encode_into_undersized_buffer() {
        let response = VehicleIdResponse {
            vin: [b'0'; VIN_LENGTH],
            logical_address: 0x1000,
            eid: [0u8; EID_LENGTH],
            gid: [0u8; GID_LENGTH],
            further_action_required: 0,
            sync_status: 0,
        };
        let mut buf = [0u8; 16];
        assert!(matches!(
            encode_vehicle_id_response(&response, &mut buf),
            Err(DoipError::BufferTooSmall)
        ));
        assert!(matches!(
            encode_diag_message_ack(0x1000, 0x0E00, &mut buf[..10]),
            Err(DoipError::BufferTooSmall)
        ));
    }
}
