//! Push delivery through registered sinks

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tdbridge::{ClientId, Loopback, TdBridge, create_pipe};

const DELIVERY_DEADLINE: Duration = Duration::from_secs(5);

/// Forward every line read from `reader` to a channel, closing it on EOF.
fn spawn_line_reader(reader: impl Read + Send + 'static) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn square_request(x: i64) -> String {
    format!(r#"{{"@type":"testSquareInt","x":{x}}}"#)
}

fn value_of(line: &str) -> Value {
    serde_json::from_str::<Value>(line).unwrap()["value"].clone()
}

struct BrokenWriter;

impl Write for BrokenWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader went away"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_sink_receives_messages_in_send_order() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let id = bridge.create().unwrap();
    let (reader, writer) = create_pipe().unwrap();
    let lines = spawn_line_reader(reader);

    bridge.register_sink(id, Box::new(writer)).unwrap();
    for x in 1..=3 {
        bridge.send(id, &square_request(x)).unwrap();
    }

    let received: Vec<Value> = (0..3)
        .map(|_| value_of(&lines.recv_timeout(DELIVERY_DEADLINE).unwrap()))
        .collect();
    assert_eq!(received, vec![1, 4, 9]);
}

#[test]
fn test_delivery_latency_stays_within_a_few_poll_cycles() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let id = bridge.create().unwrap();
    let (reader, writer) = create_pipe().unwrap();
    let lines = spawn_line_reader(reader);
    bridge.register_sink(id, Box::new(writer)).unwrap();

    let mut worst = Duration::ZERO;
    for x in 0..20 {
        let sent = Instant::now();
        bridge.send(id, &square_request(x)).unwrap();
        let line = lines.recv_timeout(DELIVERY_DEADLINE).unwrap();
        worst = worst.max(sent.elapsed());
        assert_eq!(value_of(&line), x * x);
    }

    assert!(
        worst < Duration::from_millis(50),
        "Worst delivery latency {:?} exceeds 50ms with a 3ms poll interval",
        worst
    );
}

#[test]
fn test_each_message_is_one_line() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let id = bridge.create().unwrap();
    let (reader, writer) = create_pipe().unwrap();
    let lines = spawn_line_reader(reader);

    bridge.register_sink(id, Box::new(writer)).unwrap();
    bridge
        .send(id, r#"{"@type":"testCallString","x":"two\nlines"}"#)
        .unwrap();

    let line = lines.recv_timeout(DELIVERY_DEADLINE).unwrap();
    assert_eq!(value_of(&line), "two\nlines");
}

#[test]
fn test_unregister_stops_delivery() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let id = bridge.create().unwrap();
    let (reader, writer) = create_pipe().unwrap();
    let lines = spawn_line_reader(reader);

    bridge.register_sink(id, Box::new(writer)).unwrap();
    bridge.send(id, &square_request(2)).unwrap();
    assert_eq!(value_of(&lines.recv_timeout(DELIVERY_DEADLINE).unwrap()), 4);

    bridge.unregister_sink(id);
    assert!(!bridge.has_sink(id));

    // Closing the writer ends the reader; nothing else was written
    assert_eq!(
        lines.recv_timeout(DELIVERY_DEADLINE),
        Err(mpsc::RecvTimeoutError::Disconnected)
    );

    // The message now stays queued for pull delivery
    bridge.send(id, &square_request(3)).unwrap();
    let pulled = bridge.receive_all(id, Duration::from_secs(1)).unwrap();
    assert_eq!(pulled.len(), 1);
    assert_eq!(value_of(&pulled[0]), 9);
}

#[test]
fn test_two_clients_never_cross_deliver() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let first = bridge.create().unwrap();
    let second = bridge.create().unwrap();

    let (first_reader, first_writer) = create_pipe().unwrap();
    let (second_reader, second_writer) = create_pipe().unwrap();
    let first_lines = spawn_line_reader(first_reader);
    let second_lines = spawn_line_reader(second_reader);
    bridge.register_sink(first, Box::new(first_writer)).unwrap();
    bridge.register_sink(second, Box::new(second_writer)).unwrap();

    for round in 0..10 {
        bridge
            .send(first, &format!(r#"{{"@type":"testCallString","x":"first-{round}"}}"#))
            .unwrap();
        bridge
            .send(second, &format!(r#"{{"@type":"testCallString","x":"second-{round}"}}"#))
            .unwrap();
    }

    for round in 0..10 {
        let line = first_lines.recv_timeout(DELIVERY_DEADLINE).unwrap();
        assert_eq!(value_of(&line), format!("first-{round}"));
        let line = second_lines.recv_timeout(DELIVERY_DEADLINE).unwrap();
        assert_eq!(value_of(&line), format!("second-{round}"));
    }
}

#[test]
fn test_register_sink_requires_live_client() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();

    let never_created = ClientId::new(99);
    assert!(
        bridge
            .register_sink(never_created, Box::new(io::sink()))
            .unwrap_err()
            .is_unknown_client()
    );

    let id = bridge.create().unwrap();
    bridge.destroy(id).unwrap();
    assert!(
        bridge
            .register_sink(id, Box::new(io::sink()))
            .unwrap_err()
            .is_unknown_client()
    );
    assert!(!bridge.has_sink(id));
}

#[test]
fn test_register_sink_replaces_previous_writer() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let id = bridge.create().unwrap();
    let (old_reader, old_writer) = create_pipe().unwrap();
    let (new_reader, new_writer) = create_pipe().unwrap();
    let old_lines = spawn_line_reader(old_reader);
    let new_lines = spawn_line_reader(new_reader);

    bridge.register_sink(id, Box::new(old_writer)).unwrap();
    bridge.register_sink(id, Box::new(new_writer)).unwrap();
    bridge.send(id, &square_request(5)).unwrap();

    assert_eq!(value_of(&new_lines.recv_timeout(DELIVERY_DEADLINE).unwrap()), 25);
    assert_eq!(
        old_lines.recv_timeout(DELIVERY_DEADLINE),
        Err(mpsc::RecvTimeoutError::Disconnected)
    );
}

#[test]
fn test_clear_sinks_closes_every_writer() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let mut readers = Vec::new();
    for _ in 0..3 {
        let id = bridge.create().unwrap();
        let (reader, writer) = create_pipe().unwrap();
        bridge.register_sink(id, Box::new(writer)).unwrap();
        readers.push(reader);
    }

    bridge.clear_sinks();

    for mut reader in readers {
        let mut rest = Vec::new();
        // EOF only arrives once the table dropped the write end
        reader.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }
}

#[test]
fn test_destroy_closes_the_sink() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let id = bridge.create().unwrap();
    let (reader, writer) = create_pipe().unwrap();
    let lines = spawn_line_reader(reader);
    bridge.register_sink(id, Box::new(writer)).unwrap();

    bridge.destroy(id).unwrap();

    assert!(!bridge.has_sink(id));
    assert_eq!(
        lines.recv_timeout(DELIVERY_DEADLINE),
        Err(mpsc::RecvTimeoutError::Disconnected)
    );
}

#[test]
fn test_write_failure_unregisters_only_that_sink() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let broken = bridge.create().unwrap();
    let healthy = bridge.create().unwrap();
    let (reader, writer) = create_pipe().unwrap();
    let lines = spawn_line_reader(reader);

    bridge.register_sink(broken, Box::new(BrokenWriter)).unwrap();
    bridge.register_sink(healthy, Box::new(writer)).unwrap();
    bridge.send(broken, &square_request(3)).unwrap();
    bridge.send(healthy, &square_request(4)).unwrap();

    assert_eq!(value_of(&lines.recv_timeout(DELIVERY_DEADLINE).unwrap()), 16);

    let started = Instant::now();
    while bridge.has_sink(broken) {
        assert!(
            started.elapsed() < DELIVERY_DEADLINE,
            "Failed sink should be unregistered"
        );
        thread::sleep(Duration::from_millis(5));
    }
    assert!(bridge.has_sink(healthy));
    assert!(bridge.registry().contains(broken), "Client itself stays live");
}

#[test]
fn test_shutdown_stops_delivery_but_keeps_registration() {
    let mut bridge = TdBridge::new(Loopback::new()).unwrap();
    let id = bridge.create().unwrap();
    bridge.register_sink(id, Box::new(io::sink())).unwrap();

    bridge.shutdown();
    assert!(!bridge.is_polling());
    assert!(bridge.has_sink(id));

    bridge.send(id, &square_request(6)).unwrap();
    let pulled = bridge.receive_all(id, Duration::from_secs(1)).unwrap();
    assert_eq!(pulled.len(), 1, "Message must not be consumed after shutdown");
}
