//! Sessions over a real loopback socket

use snpx::packet::{Reply, Request};
use snpx::transport::read_frame;
use snpx::{ClientConfig, ProtocolError, Session, SignalKind, SimulatedController, SnpxError, Value, VarType};
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// Server-side delay that outlasts the short client timeout below
const LATE: Duration = Duration::from_millis(400);

/// Accept one connection and hand every frame to `handler` until it returns false
fn serve_with<F>(mut handler: F) -> SocketAddr
where
    F: FnMut(usize, &[u8], &mut TcpStream) -> bool + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut index = 0;
        while let Ok(frame) = read_frame(&mut stream) {
            if !handler(index, &frame, &mut stream) {
                break;
            }
            index += 1;
        }
    });
    addr
}

fn serve_controller(controller: SimulatedController) -> SocketAddr {
    serve_with(move |_, frame, stream| match controller.handle_frame(frame) {
        Some(reply) => stream.write_all(&reply).is_ok(),
        None => true,
    })
}

fn config_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        read_timeout_ms: 500,
        ..ClientConfig::new(addr.ip().to_string(), addr.port())
    }
}

fn short_timeout(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        read_timeout_ms: 200,
        ..config_for(addr)
    }
}

#[test]
fn test_full_round_trip() {
    let controller = SimulatedController::with_demo_state();
    let addr = serve_controller(controller.clone());

    let mut session = Session::connect_with(config_for(addr)).unwrap();

    session.signal(SignalKind::Do).write(&[true, false, true], 1).unwrap();
    assert_eq!(
        session.signal(SignalKind::Do).read(3, 1).unwrap(),
        vec![true, false, true]
    );
    assert_eq!(
        session.signal(SignalKind::Di).read(4, 1).unwrap(),
        vec![true, false, true, true]
    );

    session
        .write_sys_var("$ANGTOL[1]", VarType::Real, &Value::Real(1200.13))
        .unwrap();
    match session.read_sys_var("$ANGTOL[1]", VarType::Real).unwrap() {
        Value::Real(v) => assert!((v - 1200.13).abs() < 1e-3),
        other => panic!("unexpected value {other:?}"),
    }
    assert_eq!(
        session.read_sys_var("$TP_CURPROG", VarType::String).unwrap(),
        Value::String("MAIN".into())
    );

    assert_eq!(
        session.joint_position().read().unwrap(),
        vec![0.0, -15.0, 30.0, 0.0, -45.0, 90.0]
    );
    assert_eq!(
        session.cartesian_position().read().unwrap(),
        vec![850.0, 0.0, 600.0, 180.0, 0.0, 0.0]
    );
    assert!(controller.commands().iter().any(|c| c == "SETASG 23 50 POS[G1:0] 0.0"));

    session.disconnect().unwrap();
    assert_eq!(controller.commands()[0], "CLRASG");
}

#[test]
fn test_silent_peer_times_out() {
    let addr = serve_with(|_, _, _| true);

    let err = Session::connect_with(config_for(addr)).err().unwrap();
    assert!(matches!(err, SnpxError::Timeout(_)), "got {err:?}");
}

#[test]
fn test_peer_close_mid_reply() {
    let controller = SimulatedController::new();
    let addr = serve_with(move |index, frame, stream| {
        // Hello, protocol open and CLRASG are answered normally
        if index < 3 {
            let reply = controller.handle_frame(frame).unwrap();
            return stream.write_all(&reply).is_ok();
        }
        let reply = controller.handle_frame(frame).unwrap();
        let _ = stream.write_all(&reply[..20]);
        false
    });

    let mut session = Session::connect_with(config_for(addr)).unwrap();
    let err = session.signal(SignalKind::Di).read(8, 1).unwrap_err();
    assert!(matches!(err, SnpxError::ConnectionClosed), "got {err:?}");
    assert!(!session.is_connected());

    assert!(matches!(
        session.signal(SignalKind::Di).read(8, 1),
        Err(SnpxError::ConnectionClosed)
    ));
}

#[test]
fn test_late_reply_after_timeout() {
    let controller = SimulatedController::with_demo_state();
    let addr = serve_with(move |index, frame, stream| {
        // The first signal read is answered after the client gave up
        if index == 3 {
            thread::sleep(LATE);
        }
        match controller.handle_frame(frame) {
            Some(reply) => stream.write_all(&reply).is_ok(),
            None => true,
        }
    });

    let mut session = Session::connect_with(short_timeout(addr)).unwrap();
    let err = session.signal(SignalKind::Di).read(4, 1).unwrap_err();
    assert!(matches!(err, SnpxError::Timeout(_)), "got {err:?}");
    assert!(session.is_connected());

    for _ in 0..3 {
        assert_eq!(
            session.signal(SignalKind::Di).read(4, 1).unwrap(),
            vec![true, false, true, true]
        );
    }
    assert_eq!(
        session.read_sys_var("$MCR.$GENOVERRIDE", VarType::Int).unwrap(),
        Value::Int(100)
    );
}

#[test]
fn test_reply_split_across_timeout() {
    let controller = SimulatedController::with_demo_state();
    let addr = serve_with(move |index, frame, stream| {
        let Some(reply) = controller.handle_frame(frame) else {
            return true;
        };
        if index == 3 {
            if stream.write_all(&reply[..20]).is_err() {
                return false;
            }
            thread::sleep(LATE);
            return stream.write_all(&reply[20..]).is_ok();
        }
        stream.write_all(&reply).is_ok()
    });

    let mut session = Session::connect_with(short_timeout(addr)).unwrap();
    let err = session.signal(SignalKind::Di).read(4, 1).unwrap_err();
    assert!(matches!(err, SnpxError::Timeout(_)), "got {err:?}");
    assert!(session.is_connected());

    // The buffered header is completed, recognised as late and skipped
    assert_eq!(
        session.signal(SignalKind::Ui).read(4, 1).unwrap(),
        vec![true, true, false, true]
    );
    assert_eq!(
        session.signal(SignalKind::Di).read(4, 1).unwrap(),
        vec![true, false, true, true]
    );
}

#[test]
fn test_sequence_mismatch() {
    let controller = SimulatedController::new();
    let addr = serve_with(move |index, frame, stream| {
        if index < 3 {
            let reply = controller.handle_frame(frame).unwrap();
            return stream.write_all(&reply).is_ok();
        }
        let (sequence, _) = Request::decode(frame).unwrap();
        stream
            .write_all(&Reply::ack(sequence.wrapping_add(5), vec![0u8; 1]).encode())
            .is_ok()
    });

    let mut session = Session::connect_with(config_for(addr)).unwrap();
    let err = session.signal(SignalKind::Di).read(8, 1).unwrap_err();
    assert!(matches!(
        err,
        SnpxError::Protocol(ProtocolError::SequenceMismatch { .. })
    ));
}

#[test]
fn test_handshake_requires_welcome() {
    let addr = serve_with(|_, _, stream| {
        stream.write_all(&Reply::ack(0, Vec::new()).encode()).is_ok()
    });

    let err = Session::connect_with(config_for(addr)).err().unwrap();
    assert!(matches!(
        err,
        SnpxError::Protocol(ProtocolError::HandshakeFailed(0x03))
    ));
}

#[test]
fn test_refused_connection() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let err = Session::connect_with(config_for(addr)).err().unwrap();
    assert!(matches!(err, SnpxError::Connection(_)), "got {err:?}");
}
