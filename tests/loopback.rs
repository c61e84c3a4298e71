//! End-to-end runs against a scripted device over loopback UDP.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use smartflood::{ProtocolConfig, RunnerConfig, TestParams, TestRunner, TransportConfig};

/// Stand-in for the embedded target: answers every well-formed value request
/// with a 3-byte reply carrying `reply_command`.
struct FakeDevice {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FakeDevice {
    fn spawn(protocol: ProtocolConfig, reply_command: u8) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("device bind");
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("fake-device".into())
            .spawn(move || {
                let mut buf = [0u8; 16];
                while !stop_flag.load(Ordering::SeqCst) {
                    let (len, src) = match socket.recv_from(&mut buf) {
                        Ok(received) => received,
                        Err(_) => continue,
                    };
                    if len == 4
                        && buf[1] == protocol.target_device_id
                        && buf[2] == protocol.request_command
                    {
                        let reply = [protocol.target_device_id, buf[0], reply_command];
                        let _ = socket.send_to(&reply, src);
                    }
                }
            })
            .unwrap();

        Self {
            addr,
            stop,
            thread: Some(thread),
        }
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Runner aimed at the fake device: ephemeral local port, short drain window.
fn loopback_runner(device_addr: SocketAddr) -> TestRunner {
    let protocol = ProtocolConfig::default();
    let transport = TransportConfig {
        bind_port: 0,
        target: device_addr,
        recv_timeout: Duration::from_millis(20),
    };
    TestRunner::new(RunnerConfig {
        protocol,
        transport,
        drain_grace: Duration::from_millis(200),
    })
}

#[test]
fn responsive_device_measures_zero_loss() {
    let protocol = ProtocolConfig::default();
    let device = FakeDevice::spawn(protocol, protocol.reply_command);
    let runner = loopback_runner(device.addr);

    let params = TestParams::new(100, 1, 254);
    let result = runner.run(params).unwrap();

    assert_eq!(result.sent_packets, params.total_packets());
    assert_eq!(result.received_packets, result.sent_packets);
    assert_eq!(result.lost_packets(), 0);
    assert_eq!(result.loss_percent(), 0.0);
}

#[test]
fn wrong_reply_command_measures_total_loss() {
    let protocol = ProtocolConfig::default();
    let device = FakeDevice::spawn(protocol, protocol.reply_command + 1);
    let runner = loopback_runner(device.addr);

    let result = runner.run(TestParams::new(50, 1, 254)).unwrap();

    assert_eq!(result.sent_packets, 50);
    assert_eq!(result.received_packets, 0);
    assert_eq!(result.loss_percent(), 100.0);
}
