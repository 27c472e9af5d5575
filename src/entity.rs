//! DoIP entity (server) role
//!
//! The [DoipEntity] makes an ECU discoverable and diagnosable: it answers
//! vehicle identification requests on UDP, broadcasts the startup vehicle
//! announcements, runs the routing activation state machine for every
//! tester connection, acknowledges diagnostic messages and forwards their
//! UDS payload to the embedding application, and closes connections whose
//! inactivity or alive-check timers expire.

use std::net::SocketAddr;

use log::{debug, info, warn};

use crate::interface::{
    DOIP_MAX_CONNECTIONS, DOIP_TCP_DATA_PORT, DOIP_UDP_DISCOVERY_PORT, DoipInterface,
    InterfaceEvents, TcpSender, UdpSender,
};
use crate::netops::NetworkOps;
use crate::protocol::{
    ActivationResponseCode, DiagnosticMessage, DiagnosticNackCode, EID_LENGTH, GID_LENGTH,
    HEADER_SIZE, PayloadType, RoutingActivationResponse, VIN_LENGTH, VehicleIdResponse,
    decode_diagnostic_message, decode_header, decode_routing_activation_req,
    encode_alive_check_request, encode_diag_message_ack, encode_diag_message_nack,
    encode_diagnostic_message, encode_routing_activation_res, encode_vehicle_id_response,
    validate_header,
};
use crate::{DoipError, DoipResult};

/// Interval between the startup vehicle announcements
pub const DOIP_ANNOUNCEMENT_INTERVAL_MS: u32 = 500;
/// Number of vehicle announcements broadcast after startup, per ISO 13400
pub const DOIP_ANNOUNCEMENT_COUNT: u32 = 3;
/// Lowest logical address assigned to external testers
pub const DOIP_TESTER_ADDRESS_MIN: u16 = 0x0E00;
/// Highest logical address assigned to external testers
pub const DOIP_TESTER_ADDRESS_MAX: u16 = 0x0FFF;

/// Static configuration of a DoIP entity. Immutable once the entity is
/// created
#[derive(Debug, Copy, Clone)]
pub struct EntityConfig {
    /// Vehicle identification number, announced and matched against
    /// VIN-filtered identification requests
    pub vin: [u8; VIN_LENGTH],
    /// Entity ID, matched against EID-filtered identification requests
    pub eid: [u8; EID_LENGTH],
    /// Group ID, returned in announcements
    pub gid: [u8; GID_LENGTH],
    /// Logical address of this entity on the diagnostic network
    pub logical_address: u16,
    /// Idle timeout of an activated connection in milliseconds
    pub general_inactivity_time_ms: u32,
    /// Timeout for a connection to activate routing in milliseconds
    pub initial_inactivity_time_ms: u32,
    /// Alive check period in milliseconds; 0 disables the alive check
    pub alive_check_time_ms: u32,
    /// Maximum number of simultaneously connected testers
    pub max_tester_connections: u8,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            vin: [b'0'; VIN_LENGTH],
            eid: [0; EID_LENGTH],
            gid: [0; GID_LENGTH],
            logical_address: 0x1000,
            general_inactivity_time_ms: 5000,
            initial_inactivity_time_ms: 2000,
            alive_check_time_ms: 500,
            max_tester_connections: DOIP_MAX_CONNECTIONS as u8,
        }
    }
}

/// Lifecycle state of one tester connection
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection in this slot
    Closed,
    /// Connected, waiting for a routing activation request
    PendingActivation,
    /// Routing activated; diagnostic messages are accepted
    Activated,
    /// Being torn down; transient while the socket is closed
    Finalize,
}

/// Callbacks from the entity to the embedding application
pub trait DiagnosticHandler {
    /// A validated diagnostic message addressed to this entity arrived.
    ///
    /// The positive acknowledge has already been sent when this is invoked;
    /// the application answers later via
    /// [DoipEntity::send_diagnostic_response]
    fn on_uds_request(&mut self, source_address: u16, target_address: u16, data: &[u8]);

    /// A tester connected (observability hook)
    fn on_tester_connected(&mut self, _conn_id: usize) {}

    /// A tester connection went away (observability hook)
    fn on_tester_disconnected(&mut self, _conn_id: usize) {}
}

#[derive(Debug, Copy, Clone)]
struct EntityConnection {
    state: ConnectionState,
    source_address: u16,
    initial_inactivity_timer: u32,
    general_inactivity_timer: u32,
    alive_check_timer: u32,
    alive_check_pending: bool,
}

impl EntityConnection {
    const IDLE: Self = Self {
        state: ConnectionState::Closed,
        source_address: 0,
        initial_inactivity_timer: 0,
        general_inactivity_timer: 0,
        alive_check_timer: 0,
        alive_check_pending: false,
    };

    fn reset(&mut self) {
        *self = Self::IDLE;
    }
}

/// DoIP server: discovery, routing activation, diagnostic message transport
#[derive(Debug)]
pub struct DoipEntity<N: NetworkOps> {
    config: EntityConfig,
    interface: DoipInterface<N>,
    connections: [EntityConnection; DOIP_MAX_CONNECTIONS],
    announcement_count: u32,
    announcement_timer: u32,
}

fn identification(config: &EntityConfig) -> VehicleIdResponse {
    VehicleIdResponse {
        vin: config.vin,
        logical_address: config.logical_address,
        eid: config.eid,
        gid: config.gid,
        further_action_required: 0x00,
        sync_status: 0x00,
    }
}

impl<N: NetworkOps> DoipEntity<N> {
    /// Creates an entity over `interface`. The tester connection limit of
    /// the interface is taken from the configuration
    pub fn new(config: EntityConfig, mut interface: DoipInterface<N>) -> Self {
        interface.set_connection_limit(config.max_tester_connections as usize);
        Self {
            config,
            interface,
            connections: [EntityConnection::IDLE; DOIP_MAX_CONNECTIONS],
            announcement_count: 0,
            announcement_timer: 0,
        }
    }

    /// Entity configuration
    pub fn config(&self) -> &EntityConfig {
        &self.config
    }

    /// Lifecycle state of connection `conn_id`
    pub fn connection_state(&self, conn_id: usize) -> ConnectionState {
        self.connections
            .get(conn_id)
            .map_or(ConnectionState::Closed, |c| c.state)
    }

    /// Binds UDP discovery and TCP data sockets on port 13400 and schedules
    /// the vehicle announcements: the first one goes out on the next timer
    /// update
    pub fn start(&mut self) -> DoipResult<()> {
        self.interface.start_udp(DOIP_UDP_DISCOVERY_PORT)?;
        self.interface.start_tcp_server(DOIP_TCP_DATA_PORT)?;
        self.announcement_count = 0;
        self.announcement_timer = 0;
        info!(
            "DoIP entity 0x{:04X} listening on port {}",
            self.config.logical_address, DOIP_TCP_DATA_PORT
        );
        Ok(())
    }

    /// Drives one polling iteration over the interface, dispatching received
    /// DoIP messages. Validated diagnostic payloads reach the application
    /// through `handler`
    pub fn process<H: DiagnosticHandler + ?Sized>(&mut self, handler: &mut H) -> DoipResult<()> {
        let Self {
            config,
            interface,
            connections,
            ..
        } = self;
        let mut events = EntityEvents {
            config,
            connections,
            handler,
        };
        interface.process(&mut events)
    }

    /// Broadcasts one vehicle announcement
    pub fn send_vehicle_announcement(&mut self) -> DoipResult<()> {
        let mut buffer = [0u8; 64];
        let n = encode_vehicle_id_response(&identification(&self.config), &mut buffer)?;
        debug!("UDP tx vehicle announcement, {} bytes", n);
        self.interface
            .udp_broadcast(&buffer[..n], DOIP_UDP_DISCOVERY_PORT)
    }

    /// Sends a diagnostic message to the activated tester with logical
    /// address `target_addr`, with this entity as the source.
    ///
    /// Fails with [DoipError::NotReady] when no activated connection exists
    /// for that address
    pub fn send_diagnostic_response(&mut self, target_addr: u16, data: &[u8]) -> DoipResult<()> {
        let conn_id = self
            .connections
            .iter()
            .position(|c| c.state == ConnectionState::Activated && c.source_address == target_addr)
            .ok_or(DoipError::NotReady)?;

        let message = DiagnosticMessage {
            source_address: self.config.logical_address,
            target_address: target_addr,
            user_data: data,
        };
        let mut buffer = vec![0u8; HEADER_SIZE + 4 + data.len()];
        let n = encode_diagnostic_message(&message, &mut buffer)?;
        debug!("TCP tx diagnostic message to 0x{:04X}, {} bytes", target_addr, n);
        self.interface.tcp_send(conn_id, &buffer[..n])
    }

    /// Advances all timers by `elapsed_ms`: the announcement schedule, the
    /// per-connection inactivity timers and the alive check. Expired
    /// connections are closed and reported through `handler` exactly once
    pub fn update_timers<H: DiagnosticHandler + ?Sized>(&mut self, elapsed_ms: u32, handler: &mut H) {
        if self.announcement_count < DOIP_ANNOUNCEMENT_COUNT {
            if self.announcement_timer > elapsed_ms {
                self.announcement_timer -= elapsed_ms;
            } else {
                self.announcement_timer = DOIP_ANNOUNCEMENT_INTERVAL_MS;
                match self.send_vehicle_announcement() {
                    Ok(()) => self.announcement_count += 1,
                    Err(e) => warn!("vehicle announcement failed, retrying next tick: {}", e),
                }
            }
        }

        for conn_id in 0..DOIP_MAX_CONNECTIONS {
            match self.connections[conn_id].state {
                ConnectionState::PendingActivation => {
                    let timer = &mut self.connections[conn_id].initial_inactivity_timer;
                    if *timer > elapsed_ms {
                        *timer -= elapsed_ms;
                    } else {
                        info!("initial inactivity timeout on connection {}", conn_id);
                        self.close_connection(conn_id, handler);
                    }
                }
                ConnectionState::Activated => {
                    let timer = &mut self.connections[conn_id].general_inactivity_timer;
                    if *timer > elapsed_ms {
                        *timer -= elapsed_ms;
                    } else {
                        info!("general inactivity timeout on connection {}", conn_id);
                        self.close_connection(conn_id, handler);
                        continue;
                    }
                    self.update_alive_check(conn_id, elapsed_ms, handler);
                }
                _ => {}
            }
        }
    }

    fn update_alive_check<H: DiagnosticHandler + ?Sized>(
        &mut self,
        conn_id: usize,
        elapsed_ms: u32,
        handler: &mut H,
    ) {
        if self.config.alive_check_time_ms == 0 {
            return;
        }
        let timer = &mut self.connections[conn_id].alive_check_timer;
        if *timer > elapsed_ms {
            *timer -= elapsed_ms;
            return;
        }

        if self.connections[conn_id].alive_check_pending {
            info!("alive check unanswered on connection {}, closing", conn_id);
            self.close_connection(conn_id, handler);
            return;
        }

        self.connections[conn_id].alive_check_timer = self.config.alive_check_time_ms;
        self.connections[conn_id].alive_check_pending = true;
        let mut buffer = [0u8; HEADER_SIZE];
        if encode_alive_check_request(&mut buffer).is_ok() {
            debug!("TCP tx alive check request on connection {}", conn_id);
            if self.interface.tcp_send(conn_id, &buffer).is_err() {
                // The interface already dropped the socket on the fault
                self.connections[conn_id].reset();
                handler.on_tester_disconnected(conn_id);
            }
        }
    }

    fn close_connection<H: DiagnosticHandler + ?Sized>(&mut self, conn_id: usize, handler: &mut H) {
        self.connections[conn_id].state = ConnectionState::Finalize;
        self.interface.close_connection(conn_id);
        self.connections[conn_id].reset();
        handler.on_tester_disconnected(conn_id);
    }
}

struct EntityEvents<'a, H: DiagnosticHandler + ?Sized> {
    config: &'a EntityConfig,
    connections: &'a mut [EntityConnection; DOIP_MAX_CONNECTIONS],
    handler: &'a mut H,
}

impl<H: DiagnosticHandler + ?Sized> EntityEvents<'_, H> {
    fn send_identification<N: NetworkOps>(&self, udp: &mut UdpSender<'_, N>, dest: SocketAddr) {
        let mut buffer = [0u8; 64];
        match encode_vehicle_id_response(&identification(self.config), &mut buffer) {
            Ok(n) => {
                debug!("UDP tx vehicle identification response to {}", dest);
                if let Err(e) = udp.send_to(dest, &buffer[..n]) {
                    warn!("vehicle identification response failed: {}", e);
                }
            }
            Err(e) => warn!("vehicle identification encode failed: {}", e),
        }
    }

    fn handle_routing_activation<N: NetworkOps>(
        &mut self,
        tcp: &mut TcpSender<'_, N>,
        conn_id: usize,
        payload: &[u8],
    ) {
        let request = decode_routing_activation_req(payload);
        let tester_address = request.as_ref().map_or(0, |r| r.source_address);

        let code = match request {
            Err(_) => ActivationResponseCode::UnknownSourceAddress,
            Ok(request) => {
                let source = request.source_address;
                let tester_range = DOIP_TESTER_ADDRESS_MIN..=DOIP_TESTER_ADDRESS_MAX;
                let duplicate = self.connections.iter().enumerate().any(|(i, c)| {
                    i != conn_id
                        && c.state == ConnectionState::Activated
                        && c.source_address == source
                });

                let conn = &mut self.connections[conn_id];
                match conn.state {
                    ConnectionState::PendingActivation if !tester_range.contains(&source) => {
                        ActivationResponseCode::UnknownSourceAddress
                    }
                    ConnectionState::PendingActivation if duplicate => {
                        ActivationResponseCode::AlreadyActive
                    }
                    ConnectionState::PendingActivation => {
                        conn.state = ConnectionState::Activated;
                        conn.source_address = source;
                        conn.general_inactivity_timer = self.config.general_inactivity_time_ms;
                        conn.alive_check_timer = self.config.alive_check_time_ms;
                        conn.alive_check_pending = false;
                        info!(
                            "routing activated for tester 0x{:04X} on connection {}",
                            source, conn_id
                        );
                        ActivationResponseCode::Success
                    }
                    ConnectionState::Activated if conn.source_address == source => {
                        conn.general_inactivity_timer = self.config.general_inactivity_time_ms;
                        ActivationResponseCode::Success
                    }
                    ConnectionState::Activated => ActivationResponseCode::DifferentSourceAddress,
                    _ => ActivationResponseCode::UnknownSourceAddress,
                }
            }
        };

        let response = RoutingActivationResponse {
            tester_address,
            entity_address: self.config.logical_address,
            response_code: code.into(),
            reserved: 0,
            oem_specific: 0,
        };
        let mut buffer = [0u8; 32];
        match encode_routing_activation_res(&response, &mut buffer) {
            Ok(n) => {
                debug!("TCP tx routing activation response, code 0x{:02X}", response.response_code);
                let _ = tcp.send(&buffer[..n]);
            }
            Err(e) => warn!("routing activation encode failed: {}", e),
        }
    }

    fn handle_diagnostic_message<N: NetworkOps>(
        &mut self,
        tcp: &mut TcpSender<'_, N>,
        conn_id: usize,
        payload: &[u8],
    ) {
        let mut ack_buffer = [0u8; HEADER_SIZE + 5];

        if self.connections[conn_id].state != ConnectionState::Activated {
            warn!("diagnostic message on unactivated connection {}", conn_id);
            if let Ok(n) = encode_diag_message_nack(
                self.config.logical_address,
                0x0000,
                DiagnosticNackCode::InvalidSourceAddress,
                &mut ack_buffer,
            ) {
                let _ = tcp.send(&ack_buffer[..n]);
            }
            return;
        }

        let message = match decode_diagnostic_message(payload) {
            Ok(m) => m,
            Err(_) => {
                debug!("undecodable diagnostic message on connection {}, dropping", conn_id);
                return;
            }
        };

        if message.target_address != self.config.logical_address {
            debug!(
                "diagnostic message for foreign target 0x{:04X}",
                message.target_address
            );
            if let Ok(n) = encode_diag_message_nack(
                self.config.logical_address,
                message.target_address,
                DiagnosticNackCode::UnknownTargetAddress,
                &mut ack_buffer,
            ) {
                let _ = tcp.send(&ack_buffer[..n]);
            }
            return;
        }

        // Positive acknowledge goes out before the application sees the
        // request, so any response it sends is ordered after the ack
        if let Ok(n) = encode_diag_message_ack(
            self.config.logical_address,
            message.source_address,
            &mut ack_buffer,
        ) {
            let _ = tcp.send(&ack_buffer[..n]);
        }

        self.handler
            .on_uds_request(message.source_address, message.target_address, message.user_data);

        self.connections[conn_id].general_inactivity_timer =
            self.config.general_inactivity_time_ms;
    }
}

impl<N: NetworkOps, H: DiagnosticHandler + ?Sized> InterfaceEvents<N> for EntityEvents<'_, H> {
    fn on_udp_datagram(&mut self, udp: &mut UdpSender<'_, N>, src: SocketAddr, data: &[u8]) {
        let Ok(header) = decode_header(data) else {
            return;
        };
        if !validate_header(&header) {
            debug!("dropping UDP datagram with invalid DoIP header");
            return;
        }
        let Some(payload) = data.get(HEADER_SIZE..HEADER_SIZE + header.payload_length as usize)
        else {
            debug!("UDP datagram shorter than its declared payload, dropping");
            return;
        };
        debug!(
            "UDP rx payload type 0x{:04X}, length {}",
            header.payload_type, header.payload_length
        );

        match PayloadType::from_repr(header.payload_type) {
            Some(PayloadType::VehicleIdRequest) => self.send_identification(udp, src),
            Some(PayloadType::VehicleIdRequestByEid) => {
                if payload.len() >= EID_LENGTH && payload[..EID_LENGTH] == self.config.eid {
                    self.send_identification(udp, src);
                }
            }
            Some(PayloadType::VehicleIdRequestByVin) => {
                if payload.len() >= VIN_LENGTH && payload[..VIN_LENGTH] == self.config.vin {
                    self.send_identification(udp, src);
                }
            }
            _ => debug!("unsupported payload type on UDP, dropping"),
        }
    }

    fn on_tcp_frame(&mut self, tcp: &mut TcpSender<'_, N>, conn_id: usize, frame: &[u8]) {
        let Ok(header) = decode_header(frame) else {
            return;
        };
        if !validate_header(&header) {
            debug!("dropping TCP frame with invalid DoIP header");
            return;
        }
        let payload = &frame[HEADER_SIZE..];
        debug!(
            "TCP rx payload type 0x{:04X}, length {} on connection {}",
            header.payload_type, header.payload_length, conn_id
        );

        // Any traffic proves the peer alive, including while a probe is
        // outstanding
        self.connections[conn_id].alive_check_timer = self.config.alive_check_time_ms;
        self.connections[conn_id].alive_check_pending = false;

        match PayloadType::from_repr(header.payload_type) {
            Some(PayloadType::RoutingActivationRequest) => {
                self.handle_routing_activation(tcp, conn_id, payload)
            }
            Some(PayloadType::DiagMessage) => {
                self.handle_diagnostic_message(tcp, conn_id, payload)
            }
            Some(PayloadType::AliveCheckResponse) => {
                debug!("alive check answered on connection {}", conn_id);
                self.connections[conn_id].general_inactivity_timer =
                    self.config.general_inactivity_time_ms;
            }
            _ => debug!("unhandled payload type on TCP, dropping"),
        }
    }

    fn on_tcp_connected(&mut self, conn_id: usize) {
        let conn = &mut self.connections[conn_id];
        conn.reset();
        conn.state = ConnectionState::PendingActivation;
        conn.initial_inactivity_timer = self.config.initial_inactivity_time_ms;
        info!("tester connected on connection {}", conn_id);
        self.handler.on_tester_connected(conn_id);
    }

    fn on_tcp_disconnected(&mut self, conn_id: usize) {
        self.connections[conn_id].reset();
        info!("connection {} disconnected and cleaned up", conn_id);
        self.handler.on_tester_disconnected(conn_id);
    }
}
