//! Local message passing: ports, ordered delivery, RPC

use std::sync::Arc;

use parking_lot::Mutex;

use minisys::{LoopbackHub, MsgId, Port, System, SystemConfig};

#[test]
fn test_port_lifecycle_and_validation() {
    let hub = LoopbackHub::new();
    System::run(SystemConfig::default(), hub.endpoint(), |sys| {
        let port = sys.port_create().unwrap();
        assert!(port.0 > 1);
        sys.port_destroy(port).unwrap();
        // the port is gone: destroying again fails, receiving fails
        assert!(sys.port_destroy(port).is_err());
        let mut buf = [0u8; 8];
        assert!(sys.receive(port, &mut buf).is_err());

        // the system port is reserved
        let system_port = sys.system_port();
        assert!(sys.port_destroy(system_port).is_err());

        // argument validation: no side effects on failure
        let a = sys.port_create().unwrap();
        let b = sys.port_create().unwrap();
        assert!(sys.send(a, b, &[]).is_err());
        let oversize = vec![0u8; minisys::MAX_MSG_SIZE + 1];
        assert!(sys.send(a, b, &oversize).is_err());
        assert!(sys.send(Port(999_999), b, &[1]).is_err());
        assert!(sys.receive(a, &mut []).is_err());
        sys.port_destroy(a).unwrap();
        sys.port_destroy(b).unwrap();
    })
    .unwrap();
}

#[test]
fn test_local_send_receive_in_order() {
    let hub = LoopbackHub::new();
    let received: Arc<Mutex<Vec<(u32, Port, MsgId)>>> = Arc::new(Mutex::new(Vec::new()));
    let received_outer = Arc::clone(&received);
    let sender_port: Arc<Mutex<Option<Port>>> = Arc::new(Mutex::new(None));
    let sender_port_outer = Arc::clone(&sender_port);
    System::run(SystemConfig::default(), hub.endpoint(), move |sys| {
        let a = sys.port_create().unwrap();
        let b = sys.port_create().unwrap();
        *sender_port_outer.lock() = Some(a);

        {
            let received = Arc::clone(&received_outer);
            sys.fork(move |sys| {
                let mut buf = [0u8; 16];
                for _ in 0..100 {
                    let (len, from, id) = sys.receive(b, &mut buf).unwrap();
                    assert_eq!(len, 4);
                    let value = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                    received.lock().push((value, from, id));
                }
                sys.port_destroy(b).unwrap();
            });
        }

        for value in 1u32..=100 {
            sys.send(a, b, &value.to_le_bytes()).unwrap();
        }
    })
    .unwrap();

    let received = received.lock();
    let a = sender_port.lock().unwrap();
    assert_eq!(received.len(), 100);
    for (i, &(value, from, id)) in received.iter().enumerate() {
        assert_eq!(value, i as u32 + 1);
        assert_eq!(from, a);
        // ids assigned by one correspondent increase strictly
        assert_eq!(id, MsgId(i as u32 + 1));
    }
}

#[test]
fn test_receive_truncates_to_buffer() {
    let hub = LoopbackHub::new();
    System::run(SystemConfig::default(), hub.endpoint(), |sys| {
        let a = sys.port_create().unwrap();
        let b = sys.port_create().unwrap();
        sys.send(a, b, b"a long message body").unwrap();
        let mut small = [0u8; 6];
        let (len, from, _) = sys.receive(b, &mut small).unwrap();
        assert_eq!(len, 6);
        assert_eq!(&small, b"a long");
        assert_eq!(from, a);
        sys.port_destroy(a).unwrap();
        sys.port_destroy(b).unwrap();
    })
    .unwrap();
}

#[test]
fn test_rpc_round_trip() {
    let hub = LoopbackHub::new();
    let response: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let response_outer = Arc::clone(&response);
    System::run(SystemConfig::default(), hub.endpoint(), move |sys| {
        let client = sys.port_create().unwrap();
        let server = sys.port_create().unwrap();

        sys.fork(move |sys| {
            let mut buf = [0u8; 64];
            let (len, from, id) = sys.receive(server, &mut buf).unwrap();
            assert_eq!(&buf[..len], b"question");
            let reply = b"answer";
            sys.send_reply(server, from, reply, id).unwrap();
        });

        let mut buf = [0u8; 64];
        let len = sys.rpc(client, server, b"question", &mut buf).unwrap();
        response_outer.lock().extend_from_slice(&buf[..len]);
    })
    .unwrap();
    assert_eq!(*response.lock(), b"answer");
}

#[test]
fn test_rpc_interleaved_responses() {
    let hub = LoopbackHub::new();
    let outcomes: Arc<Mutex<Vec<(u8, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let outcomes_outer = Arc::clone(&outcomes);
    System::run(SystemConfig::default(), hub.endpoint(), move |sys| {
        let client = sys.port_create().unwrap();
        let server = sys.port_create().unwrap();

        // server gathers both queries, then answers them in reverse order
        sys.fork(move |sys| {
            let mut buf = [0u8; 64];
            let mut queries = Vec::new();
            for _ in 0..2 {
                let (len, from, id) = sys.receive(server, &mut buf).unwrap();
                queries.push((from, id, buf[..len].to_vec()));
            }
            for (from, id, query) in queries.into_iter().rev() {
                let mut reply = b"re:".to_vec();
                reply.extend_from_slice(&query);
                sys.send_reply(server, from, &reply, id).unwrap();
            }
        });

        for tag in [1u8, 2u8] {
            let outcomes = Arc::clone(&outcomes_outer);
            sys.fork(move |sys| {
                let mut buf = [0u8; 64];
                let len = sys.rpc(client, server, &[tag], &mut buf).unwrap();
                outcomes.lock().push((tag, buf[..len].to_vec()));
            });
        }
    })
    .unwrap();

    let mut outcomes = outcomes.lock().clone();
    outcomes.sort();
    assert_eq!(outcomes.len(), 2);
    // each caller got the response to its own query, not the other's
    assert_eq!(outcomes[0], (1u8, vec![b'r', b'e', b':', 1]));
    assert_eq!(outcomes[1], (2u8, vec![b'r', b'e', b':', 2]));
}
