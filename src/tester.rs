//! DoIP tester (client) role
//!
//! The [DoipTester] discovers entities via UDP broadcast, connects to one
//! over TCP, activates routing and exchanges UDS payloads. Responses from
//! the entity are delivered through a [TesterHandler].

use std::net::SocketAddr;

use log::{debug, info, warn};

use crate::interface::{
    DOIP_TCP_DATA_PORT, DOIP_UDP_DISCOVERY_PORT, DoipInterface, InterfaceEvents, TcpSender,
    UdpSender,
};
use crate::netops::NetworkOps;
use crate::protocol::{
    ActivationResponseCode, DiagnosticMessage, EID_LENGTH, HEADER_SIZE, MAX_PAYLOAD_SIZE,
    PayloadType, RoutingActivationRequest, VIN_LENGTH, decode_diag_message_ack,
    decode_diagnostic_message, decode_header, decode_routing_activation_res,
    decode_vehicle_id_response, encode_alive_check_response, encode_diagnostic_message,
    encode_routing_activation_req, encode_vehicle_id_request, validate_header,
};
use crate::{DoipError, DoipResult};

/// Static configuration of a DoIP tester
#[derive(Debug, Copy, Clone)]
pub struct TesterConfig {
    /// Logical address of this tester (0x0E00..=0x0FFF)
    pub logical_address: u16,
    /// Routing activation type (0x00 = default)
    pub activation_type: u8,
    /// How long to wait for discovery and activation responses, in
    /// milliseconds
    pub response_timeout_ms: u32,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            logical_address: 0x0E00,
            activation_type: 0x00,
            response_timeout_ms: 2000,
        }
    }
}

/// Lifecycle state of a tester
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TesterState {
    /// Nothing in progress
    Idle,
    /// Waiting for a vehicle announcement
    Discovery,
    /// TCP connection established, routing not requested yet
    Connecting,
    /// Waiting for the routing activation response
    Activating,
    /// Routing active, diagnostic messages may be sent
    Ready,
    /// Discovery or activation failed or timed out
    Error,
}

/// Entity found during discovery
#[derive(Debug, Copy, Clone)]
pub struct DiscoveredEntity {
    /// TCP endpoint to connect to
    pub address: SocketAddr,
    /// Announced vehicle identification number
    pub vin: [u8; VIN_LENGTH],
    /// Logical address of the entity
    pub logical_address: u16,
    /// Entity ID
    pub eid: [u8; EID_LENGTH],
}

/// Callbacks from the tester to the embedding application
pub trait TesterHandler {
    /// A diagnostic message from the entity arrived; `data` is the UDS
    /// response payload
    fn on_uds_response(&mut self, source_address: u16, data: &[u8]);
}

/// DoIP client: discovery, routing activation, diagnostic requests
#[derive(Debug)]
pub struct DoipTester<N: NetworkOps> {
    config: TesterConfig,
    interface: DoipInterface<N>,
    state: TesterState,
    connection_id: Option<usize>,
    routing_activated: bool,
    timeout_timer: u32,
    entity: Option<DiscoveredEntity>,
}

impl<N: NetworkOps> DoipTester<N> {
    /// Creates a tester over `interface`
    pub fn new(config: TesterConfig, interface: DoipInterface<N>) -> Self {
        Self {
            config,
            interface,
            state: TesterState::Idle,
            connection_id: None,
            routing_activated: false,
            timeout_timer: 0,
            entity: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> TesterState {
        self.state
    }

    /// Entity found by the last discovery, if any
    pub fn discovered_entity(&self) -> Option<&DiscoveredEntity> {
        self.entity.as_ref()
    }

    /// True once routing is activated and diagnostics can be exchanged
    pub fn is_ready(&self) -> bool {
        self.state == TesterState::Ready && self.routing_activated
    }

    /// Broadcasts a vehicle identification request and starts waiting for
    /// announcements
    pub fn start_discovery(&mut self) -> DoipResult<()> {
        self.interface.start_udp(0)?;

        let mut buffer = [0u8; HEADER_SIZE];
        let n = encode_vehicle_id_request(&mut buffer)?;
        self.interface
            .udp_broadcast(&buffer[..n], DOIP_UDP_DISCOVERY_PORT)?;

        info!("vehicle discovery started");
        self.state = TesterState::Discovery;
        self.timeout_timer = self.config.response_timeout_ms;
        Ok(())
    }

    /// Opens the TCP connection to an entity
    pub fn connect(&mut self, entity_addr: SocketAddr) -> DoipResult<()> {
        let conn_id = self.interface.connect(entity_addr)?;
        self.connection_id = Some(conn_id);
        self.state = TesterState::Connecting;
        info!("connected to entity at {}", entity_addr);
        Ok(())
    }

    /// Requests routing activation on the open connection
    pub fn activate_routing(&mut self) -> DoipResult<()> {
        let conn_id = self.connection_id.ok_or(DoipError::NotReady)?;

        let request = RoutingActivationRequest {
            source_address: self.config.logical_address,
            activation_type: self.config.activation_type,
            reserved: 0,
            oem_specific: 0,
        };
        let mut buffer = [0u8; 32];
        let n = encode_routing_activation_req(&request, &mut buffer)?;
        self.interface.tcp_send(conn_id, &buffer[..n])?;

        self.state = TesterState::Activating;
        self.timeout_timer = self.config.response_timeout_ms;
        Ok(())
    }

    /// Sends a UDS payload to `target_addr`. Requires activated routing
    pub fn send_diagnostic(&mut self, target_addr: u16, uds_data: &[u8]) -> DoipResult<()> {
        if !self.routing_activated {
            return Err(DoipError::NotReady);
        }
        let conn_id = self.connection_id.ok_or(DoipError::NotReady)?;

        let message = DiagnosticMessage {
            source_address: self.config.logical_address,
            target_address: target_addr,
            user_data: uds_data,
        };
        let mut buffer = vec![0u8; MAX_PAYLOAD_SIZE + HEADER_SIZE];
        let n = encode_diagnostic_message(&message, &mut buffer)?;
        self.interface.tcp_send(conn_id, &buffer[..n])
    }

    /// Drives one polling iteration, delivering entity responses to
    /// `handler`
    pub fn process<H: TesterHandler + ?Sized>(&mut self, handler: &mut H) -> DoipResult<()> {
        let Self {
            config,
            interface,
            state,
            connection_id,
            routing_activated,
            timeout_timer,
            entity,
            ..
        } = self;
        let mut events = TesterEvents {
            config,
            state,
            connection_id,
            routing_activated,
            timeout_timer,
            entity,
            handler,
        };
        interface.process(&mut events)
    }

    /// Advances the response timeout. Expiry during discovery or activation
    /// moves the tester to [TesterState::Error]
    pub fn update_timers(&mut self, elapsed_ms: u32) {
        if self.timeout_timer == 0 {
            return;
        }
        if self.timeout_timer > elapsed_ms {
            self.timeout_timer -= elapsed_ms;
            return;
        }
        self.timeout_timer = 0;
        match self.state {
            TesterState::Discovery | TesterState::Activating => {
                warn!("response timeout in {:?} state", self.state);
                self.state = TesterState::Error;
            }
            _ => {}
        }
    }
}

struct TesterEvents<'a, H: TesterHandler + ?Sized> {
    config: &'a TesterConfig,
    state: &'a mut TesterState,
    connection_id: &'a mut Option<usize>,
    routing_activated: &'a mut bool,
    timeout_timer: &'a mut u32,
    entity: &'a mut Option<DiscoveredEntity>,
    handler: &'a mut H,
}

impl<N: NetworkOps, H: TesterHandler + ?Sized> InterfaceEvents<N> for TesterEvents<'_, H> {
    fn on_udp_datagram(&mut self, _udp: &mut UdpSender<'_, N>, src: SocketAddr, data: &[u8]) {
        let Ok(header) = decode_header(data) else {
            return;
        };
        if !validate_header(&header) {
            return;
        }
        if PayloadType::from_repr(header.payload_type) != Some(PayloadType::VehicleAnnouncement) {
            return;
        }
        if *self.state != TesterState::Discovery {
            return;
        }
        let Ok(announcement) = decode_vehicle_id_response(&data[HEADER_SIZE..]) else {
            debug!("malformed vehicle announcement from {}", src);
            return;
        };

        info!(
            "discovered entity 0x{:04X} at {}",
            announcement.logical_address, src
        );
        *self.entity = Some(DiscoveredEntity {
            address: SocketAddr::new(src.ip(), DOIP_TCP_DATA_PORT),
            vin: announcement.vin,
            logical_address: announcement.logical_address,
            eid: announcement.eid,
        });
        *self.state = TesterState::Idle;
        *self.timeout_timer = 0;
    }

    fn on_tcp_frame(&mut self, tcp: &mut TcpSender<'_, N>, conn_id: usize, frame: &[u8]) {
        let Ok(header) = decode_header(frame) else {
            return;
        };
        if !validate_header(&header) {
            return;
        }
        let payload = &frame[HEADER_SIZE..];
        debug!(
            "TCP rx payload type 0x{:04X} on connection {}",
            header.payload_type, conn_id
        );

        match PayloadType::from_repr(header.payload_type) {
            Some(PayloadType::RoutingActivationResponse) => {
                if *self.state != TesterState::Activating {
                    return;
                }
                let Ok(response) = decode_routing_activation_res(payload) else {
                    return;
                };
                match ActivationResponseCode::from_repr(response.response_code) {
                    Some(ActivationResponseCode::Success)
                    | Some(ActivationResponseCode::ConfirmationRequired) => {
                        info!("routing activated by entity 0x{:04X}", response.entity_address);
                        *self.routing_activated = true;
                        *self.state = TesterState::Ready;
                        *self.timeout_timer = 0;
                    }
                    _ => {
                        warn!(
                            "routing activation refused, code 0x{:02X}",
                            response.response_code
                        );
                        *self.state = TesterState::Error;
                    }
                }
            }
            Some(PayloadType::DiagMessage) => {
                let Ok(message) = decode_diagnostic_message(payload) else {
                    return;
                };
                self.handler
                    .on_uds_response(message.source_address, message.user_data);
            }
            Some(PayloadType::DiagMessageAck) | Some(PayloadType::DiagMessageNack) => {
                if let Ok(ack) = decode_diag_message_ack(payload) {
                    debug!(
                        "diagnostic message acknowledge, code 0x{:02X}",
                        ack.ack_code
                    );
                }
            }
            Some(PayloadType::AliveCheckRequest) => {
                let mut buffer = [0u8; HEADER_SIZE + 2];
                if let Ok(n) = encode_alive_check_response(self.config.logical_address, &mut buffer)
                {
                    debug!("answering alive check");
                    let _ = tcp.send(&buffer[..n]);
                }
            }
            _ => debug!("unhandled payload type on TCP, dropping"),
        }
    }

    fn on_tcp_connected(&mut self, _conn_id: usize) {}

    fn on_tcp_disconnected(&mut self, conn_id: usize) {
        info!("entity closed connection {}", conn_id);
        *self.connection_id = None;
        *self.routing_activated = false;
        *self.state = TesterState::Idle;
    }
}
