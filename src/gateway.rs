//! Ready-made glue between the DoIP entity and the UDS dispatcher
//!
//! [DoipGateway] is what an embedding application drives from its periodic
//! task: one [DoipGateway::poll] per cycle processes the network, dispatches
//! received UDS requests and advances every timer. Applications that reach
//! the gateway from several tasks wrap it in an `Arc<Mutex<_>>`.

use log::{debug, warn};

use crate::entity::{DiagnosticHandler, DoipEntity, EntityConfig};
use crate::interface::DoipInterface;
use crate::netops::NetworkOps;
use crate::uds::ecu_reset::ResetType;
use crate::uds::read_data_by_identifier::EcuIdentity;
use crate::uds::{UdsServer, UdsServerOptions};
use crate::DoipResult;

#[derive(Debug, Default)]
struct PendingRequests {
    requests: Vec<(u16, u16, Vec<u8>)>,
}

impl DiagnosticHandler for PendingRequests {
    fn on_uds_request(&mut self, source_address: u16, target_address: u16, data: &[u8]) {
        self.requests
            .push((source_address, target_address, data.to_vec()));
    }
}

/// DoIP entity wired to a UDS dispatcher
#[derive(Debug)]
pub struct DoipGateway<N: NetworkOps> {
    entity: DoipEntity<N>,
    uds: UdsServer,
}

impl<N: NetworkOps> DoipGateway<N> {
    /// Creates a gateway over `ops`. The VIN served for DID 0xF190 is the
    /// one announced by the entity
    pub fn new(config: EntityConfig, options: UdsServerOptions, ops: N) -> Self {
        let identity = EcuIdentity {
            vin: config.vin,
            ..Default::default()
        };
        Self {
            entity: DoipEntity::new(config, DoipInterface::new(ops)),
            uds: UdsServer::new(options, identity),
        }
    }

    /// Starts the entity sockets and the announcement schedule
    pub fn start(&mut self) -> DoipResult<()> {
        self.entity.start()
    }

    /// The DoIP entity
    pub fn entity(&self) -> &DoipEntity<N> {
        &self.entity
    }

    /// The UDS dispatcher
    pub fn uds(&self) -> &UdsServer {
        &self.uds
    }

    /// Mutable UDS dispatcher, e.g. to relock security after a reset
    pub fn uds_mut(&mut self) -> &mut UdsServer {
        &mut self.uds
    }

    /// Reset requested by a processed ECUReset. The platform performs it;
    /// the response went out before this returns it
    pub fn take_pending_reset(&mut self) -> Option<ResetType> {
        self.uds.take_pending_reset()
    }

    /// One gateway cycle: process the network, dispatch buffered UDS
    /// requests, advance all timers by `elapsed_ms`
    pub fn poll(&mut self, elapsed_ms: u32) -> DoipResult<()> {
        let mut pending = PendingRequests::default();
        self.entity.process(&mut pending)?;

        for (source, target, data) in pending.requests.drain(..) {
            debug!(
                "UDS request from 0x{:04X} to 0x{:04X}, {} bytes",
                source,
                target,
                data.len()
            );
            let response = self.uds.process_request(&data);
            if response.is_empty() {
                continue;
            }
            if let Err(e) = self.entity.send_diagnostic_response(source, &response) {
                warn!("UDS response to 0x{:04X} not sent: {}", source, e);
            }
        }

        self.uds.update_timers(elapsed_ms);
        self.entity.update_timers(elapsed_ms, &mut pending);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::netops::{SimPeer, SimulationNetwork};
    use crate::protocol::GID_LENGTH;

    fn gateway() -> (DoipGateway<SimulationNetwork>, SimulationNetwork) {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = EntityConfig {
            vin: *b"WVWZZZ1KZ1A234567",
            eid: [0x00, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F],
            gid: [0xFF; GID_LENGTH],
            logical_address: 0x1000,
            ..Default::default()
        };
        let options = UdsServerOptions {
            fixed_seed: Some(0x1234_5678),
            ..Default::default()
        };
        let net = SimulationNetwork::new();
        let mut gateway = DoipGateway::new(config, options, net.clone());
        gateway.start().unwrap();
        for _ in 0..3 {
            gateway.poll(500).unwrap();
        }
        net.take_udp_sent();
        (gateway, net)
    }

    fn activated_tester(
        gateway: &mut DoipGateway<SimulationNetwork>,
        net: &SimulationNetwork,
    ) -> SimPeer {
        let peer = net.connect_peer();
        gateway.poll(1).unwrap();
        peer.send(&[
            0x03, 0xFC, 0x00, 0x05, 0x00, 0x00, 0x00, 0x0B, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        gateway.poll(1).unwrap();
        peer.received();
        peer
    }

    fn diag_request(uds: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x03, 0xFC, 0x80, 0x01, 0x00, 0x00, 0x00];
        frame.push(4 + uds.len() as u8);
        frame.extend_from_slice(&[0x0E, 0x00, 0x10, 0x00]);
        frame.extend_from_slice(uds);
        frame
    }

    fn diag_response(uds: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x03, 0xFC, 0x80, 0x01, 0x00, 0x00, 0x00];
        frame.push(4 + uds.len() as u8);
        frame.extend_from_slice(&[0x10, 0x00, 0x0E, 0x00]);
        frame.extend_from_slice(uds);
        frame
    }

    const ACK: [u8; 13] = [
        0x03, 0xFC, 0x80, 0x02, 0x00, 0x00, 0x00, 0x05, 0x10, 0x00, 0x0E, 0x00, 0x00,
    ];

    #[test]
    fn read_vin_end_to_end() {
        let (mut gateway, net) = gateway();
        let peer = activated_tester(&mut gateway, &net);

        peer.send(&diag_request(&[0x22, 0xF1, 0x90]));
        gateway.poll(1).unwrap();

        let mut uds = vec![0x62, 0xF1, 0x90];
        uds.extend_from_slice(b"WVWZZZ1KZ1A234567");
        let mut expected = ACK.to_vec();
        expected.extend_from_slice(&diag_response(&uds));
        assert_eq!(peer.received(), expected);
    }

    #[test]
    fn suppressed_tester_present_gets_only_the_ack() {
        let (mut gateway, net) = gateway();
        let peer = activated_tester(&mut gateway, &net);

        peer.send(&diag_request(&[0x3E, 0x80]));
        gateway.poll(1).unwrap();
        assert_eq!(peer.received(), ACK.to_vec());

        peer.send(&diag_request(&[0x3E, 0x00]));
        gateway.poll(1).unwrap();
        let mut expected = ACK.to_vec();
        expected.extend_from_slice(&diag_response(&[0x7E, 0x00]));
        assert_eq!(peer.received(), expected);
    }

    #[test]
    fn security_access_and_deferred_reset() {
        let (mut gateway, net) = gateway();
        let peer = activated_tester(&mut gateway, &net);

        peer.send(&diag_request(&[0x10, 0x03]));
        gateway.poll(1).unwrap();
        peer.received();

        // Extended session without security: reset refused
        peer.send(&diag_request(&[0x11, 0x01]));
        gateway.poll(1).unwrap();
        let mut expected = ACK.to_vec();
        expected.extend_from_slice(&diag_response(&[0x7F, 0x11, 0x33]));
        assert_eq!(peer.received(), expected);
        assert_eq!(gateway.take_pending_reset(), None);

        peer.send(&diag_request(&[0x27, 0x01]));
        gateway.poll(1).unwrap();
        let mut expected = ACK.to_vec();
        expected.extend_from_slice(&diag_response(&[0x67, 0x01, 0x12, 0x34, 0x56, 0x78]));
        assert_eq!(peer.received(), expected);

        peer.send(&diag_request(&[0x27, 0x02, 0xB7, 0x91, 0xF3, 0xDD]));
        gateway.poll(1).unwrap();
        peer.received();
        assert!(gateway.uds().context().security_unlocked);

        peer.send(&diag_request(&[0x11, 0x01]));
        gateway.poll(1).unwrap();
        let mut expected = ACK.to_vec();
        expected.extend_from_slice(&diag_response(&[0x51, 0x01]));
        assert_eq!(peer.received(), expected);
        assert_eq!(gateway.take_pending_reset(), Some(ResetType::HardReset));
    }
}
