use super::diagnostic_session_control::UdsSessionType;
use super::ecu_reset::ResetType;
use super::read_data_by_identifier::EcuIdentity;
use super::*;

fn server() -> UdsServer {
    let _ = env_logger::builder().is_test(true).try_init();
    let options = UdsServerOptions {
        fixed_seed: Some(0x1234_5678),
        ..Default::default()
    };
    let identity = EcuIdentity {
        vin: *b"WVWZZZ1KZ1A234567",
        ..Default::default()
    };
    UdsServer::new(options, identity)
}

fn unlock(server: &mut UdsServer) {
    server.process_request(&[0x27, 0x01]);
    let response = server.process_request(&[0x27, 0x02, 0xB7, 0x91, 0xF3, 0xDD]);
    assert_eq!(response, vec![0x67, 0x02]);
    assert!(server.context().security_unlocked);
}

#[test]
fn session_control_switches_session() {
    let mut server = server();

    let response = server.process_request(&[0x10, 0x03]);
    assert_eq!(response, vec![0x50, 0x03, 0x00, 0x32, 0x01, 0xF4]);
    assert_eq!(server.context().session, UdsSessionType::Extended);

    let response = server.process_request(&[0x10, 0x01]);
    assert_eq!(response, vec![0x50, 0x01, 0x00, 0x32, 0x01, 0xF4]);
    assert_eq!(server.context().session, UdsSessionType::Default);
}

#[test]
fn session_control_rejections() {
    let mut server = server();
    assert_eq!(server.process_request(&[0x10, 0x05]), vec![0x7F, 0x10, 0x12]);
    assert_eq!(server.process_request(&[0x10]), vec![0x7F, 0x10, 0x13]);
    assert_eq!(server.context().session, UdsSessionType::Default);
}

#[test]
fn unknown_sids_are_rejected() {
    let mut server = server();
    // RoutineControl is a valid SID the dispatcher does not implement
    assert_eq!(server.process_request(&[0x31, 0x01, 0x02, 0x03]), vec![0x7F, 0x31, 0x11]);
    assert_eq!(server.process_request(&[0xBA]), vec![0x7F, 0xBA, 0x11]);
    assert!(server.process_request(&[]).is_empty());
}

#[test]
fn security_access_seed_and_key() {
    let mut server = server();

    let response = server.process_request(&[0x27, 0x01]);
    assert_eq!(response, vec![0x67, 0x01, 0x12, 0x34, 0x56, 0x78]);
    assert!(!server.context().security_unlocked);

    // Key = seed ^ 0xA5A5A5A5
    let response = server.process_request(&[0x27, 0x02, 0xB7, 0x91, 0xF3, 0xDD]);
    assert_eq!(response, vec![0x67, 0x02]);
    assert!(server.context().security_unlocked);

    // Once unlocked, a new seed request returns all zeroes
    let response = server.process_request(&[0x27, 0x01]);
    assert_eq!(response, vec![0x67, 0x01, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn security_access_lockout_and_recovery() {
    let mut server = server();
    server.process_request(&[0x27, 0x01]);

    assert_eq!(
        server.process_request(&[0x27, 0x02, 0x00, 0x00, 0x00, 0x01]),
        vec![0x7F, 0x27, 0x35]
    );
    assert_eq!(
        server.process_request(&[0x27, 0x02, 0x00, 0x00, 0x00, 0x02]),
        vec![0x7F, 0x27, 0x35]
    );
    assert_eq!(
        server.process_request(&[0x27, 0x02, 0x00, 0x00, 0x00, 0x03]),
        vec![0x7F, 0x27, 0x36]
    );

    // Locked out: seed requests refused until the delay elapses
    assert_eq!(server.process_request(&[0x27, 0x01]), vec![0x7F, 0x27, 0x37]);
    server.update_timers(9_999);
    assert_eq!(server.process_request(&[0x27, 0x01]), vec![0x7F, 0x27, 0x37]);
    server.update_timers(1);
    assert_eq!(
        server.process_request(&[0x27, 0x01]),
        vec![0x67, 0x01, 0x12, 0x34, 0x56, 0x78]
    );
    assert_eq!(server.context().failed_security_attempts, 0);
}

#[test]
fn security_access_malformed_requests() {
    let mut server = server();
    assert_eq!(server.process_request(&[0x27]), vec![0x7F, 0x27, 0x13]);
    assert_eq!(server.process_request(&[0x27, 0x02, 0xB7]), vec![0x7F, 0x27, 0x13]);
    assert_eq!(server.process_request(&[0x27, 0x05]), vec![0x7F, 0x27, 0x12]);
}

#[test]
fn ecu_reset_in_default_session() {
    let mut server = server();

    let response = server.process_request(&[0x11, 0x01]);
    assert_eq!(response, vec![0x51, 0x01]);
    assert_eq!(server.take_pending_reset(), Some(ResetType::HardReset));
    assert_eq!(server.take_pending_reset(), None);
}

#[test]
fn ecu_reset_needs_security_outside_default() {
    let mut server = server();
    server.process_request(&[0x10, 0x03]);

    assert_eq!(server.process_request(&[0x11, 0x03]), vec![0x7F, 0x11, 0x33]);
    assert_eq!(server.take_pending_reset(), None);

    unlock(&mut server);
    assert_eq!(server.process_request(&[0x11, 0x03]), vec![0x51, 0x03]);
    assert_eq!(server.take_pending_reset(), Some(ResetType::SoftReset));
}

#[test]
fn ecu_reset_rejections() {
    let mut server = server();
    assert_eq!(server.process_request(&[0x11, 0x07]), vec![0x7F, 0x11, 0x12]);
    assert_eq!(server.process_request(&[0x11]), vec![0x7F, 0x11, 0x13]);
}

#[test]
fn tester_present_and_suppression() {
    let mut server = server();
    server.update_timers(1500);

    assert_eq!(server.process_request(&[0x3E, 0x00]), vec![0x7E, 0x00]);
    assert_eq!(server.context().last_tester_present_ms, 1500);

    server.update_timers(500);
    assert!(server.process_request(&[0x3E, 0x80]).is_empty());
    assert_eq!(server.context().last_tester_present_ms, 2000);

    assert_eq!(server.process_request(&[0x3E, 0x01]), vec![0x7F, 0x3E, 0x12]);
}

#[test]
fn read_data_by_identifier_records() {
    let mut server = server();

    let mut expected = vec![0x62, 0xF1, 0x90];
    expected.extend_from_slice(b"WVWZZZ1KZ1A234567");
    assert_eq!(server.process_request(&[0x22, 0xF1, 0x90]), expected);

    let mut expected = vec![0x62, 0xF1, 0x8C];
    expected.extend_from_slice(b"SN123456789");
    assert_eq!(server.process_request(&[0x22, 0xF1, 0x8C]), expected);

    assert_eq!(
        server.process_request(&[0x22, 0xF1, 0x94]),
        vec![0x62, 0xF1, 0x94, 0x01, 0x00, 0x05]
    );

    assert_eq!(server.process_request(&[0x22, 0x01, 0x02]), vec![0x7F, 0x22, 0x31]);
    assert_eq!(server.process_request(&[0x22, 0xF1]), vec![0x7F, 0x22, 0x13]);
}

#[test]
fn pseudorandom_seeds_change_between_requests() {
    let identity = EcuIdentity::default();
    let mut server = UdsServer::new(UdsServerOptions::default(), identity);

    let first = server.process_request(&[0x27, 0x01]);
    // Failed key attempt so a new seed may be requested
    server.process_request(&[0x27, 0x02, 0x00, 0x00, 0x00, 0x00]);
    let second = server.process_request(&[0x27, 0x01]);

    assert_eq!(first[0..2], [0x67, 0x01]);
    assert_eq!(second[0..2], [0x67, 0x01]);
    assert_ne!(first[2..6], second[2..6]);
}
