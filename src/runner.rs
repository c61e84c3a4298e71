//! Performance test runner
//! One send/count cycle: flood requests at a fixed rate while a counter
//! thread drains matching replies off the same socket

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::ProtocolConfig;
use crate::stats::{Counters, TestResult};
use crate::transport::{Transport, TransportConfig, UdpTransport};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to open run socket: {0}")]
    Socket(io::Error),
    #[error("failed to start reply counter: {0}")]
    Spawn(io::Error),
    #[error("reply counter thread panicked")]
    CounterPanicked,
    #[error(transparent)]
    Params(#[from] ParamError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("packet rate must be between 1 and 1000, got {got}")]
    RateOutOfRange { got: u32 },
    #[error("test duration must be at least 1 second, got {got}")]
    DurationOutOfRange { got: u32 },
}

/// Parameters for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestParams {
    /// Target request rate.
    pub packets_per_second: u32,
    /// Length of the send phase in seconds.
    pub duration_secs: u32,
    /// Device id our requests claim to originate from. Automatic mode rotates
    /// this between runs so consecutive runs do not bleed state into each
    /// other on the target.
    pub device_id: u8,
}

impl TestParams {
    /// Ceiling for operator-supplied rates.
    pub const MAX_MANUAL_RATE: u32 = 1000;

    pub fn new(packets_per_second: u32, duration_secs: u32, device_id: u8) -> Self {
        Self {
            packets_per_second,
            duration_secs,
            device_id,
        }
    }

    /// Bounds enforced on operator input. Automatic mode grows the rate past
    /// the manual ceiling on purpose and skips this check.
    pub fn validate_manual(&self) -> Result<(), ParamError> {
        if self.packets_per_second < 1 || self.packets_per_second > Self::MAX_MANUAL_RATE {
            return Err(ParamError::RateOutOfRange {
                got: self.packets_per_second,
            });
        }
        if self.duration_secs < 1 {
            return Err(ParamError::DurationOutOfRange {
                got: self.duration_secs,
            });
        }
        Ok(())
    }

    /// Total request datagrams for this run.
    pub fn total_packets(&self) -> u64 {
        self.packets_per_second as u64 * self.duration_secs as u64
    }

    /// Pause between two request datagrams.
    ///
    /// Computed at nanosecond precision. Millisecond truncation would overrun
    /// the requested rate whenever 1000 is not divisible by it.
    pub fn send_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.packets_per_second.max(1) as u64)
    }
}

/// Tuning knobs for the runner itself.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub protocol: ProtocolConfig,
    pub transport: TransportConfig,
    /// How long to keep draining replies after the last request went out.
    /// Bounds the measurement window; in-flight replies arriving later than
    /// this count as lost.
    pub drain_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let protocol = ProtocolConfig::default();
        let transport = TransportConfig::broadcast(&protocol);
        Self {
            protocol,
            transport,
            drain_grace: Duration::from_secs(1),
        }
    }
}

/// Orchestrates one send/count cycle and derives the result.
///
/// Sending and counting run concurrently because replies begin arriving while
/// requests are still going out; a sequential send-then-listen design would
/// undercount.
pub struct TestRunner {
    config: RunnerConfig,
}

impl TestRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one cycle over a fresh broadcast socket.
    pub fn run(&self, params: TestParams) -> Result<TestResult, RunError> {
        let transport = UdpTransport::open(&self.config.transport).map_err(RunError::Socket)?;
        self.run_on(Arc::new(transport), params)
    }

    /// Run one cycle over an arbitrary transport. This is the seam the
    /// concurrency tests use to drive the full cycle against an in-process
    /// scripted device.
    pub fn run_on<T>(&self, transport: Arc<T>, params: TestParams) -> Result<TestResult, RunError>
    where
        T: Transport + 'static,
    {
        let counters = Arc::new(Counters::new());
        let stop = Arc::new(AtomicBool::new(false));
        counters.start();

        let counter = spawn_counter(
            Arc::clone(&transport),
            self.config.protocol,
            params.device_id,
            Arc::clone(&counters),
            Arc::clone(&stop),
        )?;

        send_requests(transport.as_ref(), &self.config.protocol, &params, &counters);

        // Replies to the last requests are still in flight.
        thread::sleep(self.config.drain_grace);

        stop.store(true, Ordering::SeqCst);
        counter.join().map_err(|_| RunError::CounterPanicked)?;

        let result = counters.result();
        if result.received_packets > result.sent_packets {
            warn!(
                sent = result.sent_packets,
                received = result.received_packets,
                "more replies than requests; measurement anomaly"
            );
        }
        debug!(
            sent = result.sent_packets,
            received = result.received_packets,
            elapsed = ?counters.elapsed(),
            "run complete"
        );
        Ok(result)
    }
}

/// Emit `rate x duration` request datagrams, pausing one interval after every
/// send including the last. A failed send is logged and skipped; the sent
/// counter only reflects datagrams that actually left the socket, so the loss
/// figure stays meaningful.
fn send_requests<T>(
    transport: &T,
    protocol: &ProtocolConfig,
    params: &TestParams,
    counters: &Counters,
) where
    T: Transport + ?Sized,
{
    let payload = protocol.request(params.device_id);
    let interval = params.send_interval();

    for _ in 0..params.total_packets() {
        match transport.send_request(&payload) {
            Ok(()) => counters.record_sent(),
            Err(e) => warn!("send failed: {e}"),
        }
        thread::sleep(interval);
    }
}

/// Drain the socket until told to stop, counting datagrams that match this
/// run's reply signature. Short or foreign datagrams are ignored silently.
fn spawn_counter<T>(
    transport: Arc<T>,
    protocol: ProtocolConfig,
    device_id: u8,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, RunError>
where
    T: Transport + 'static,
{
    thread::Builder::new()
        .name("reply-counter".into())
        .spawn(move || {
            let mut buf = [0u8; 64];
            while !stop.load(Ordering::SeqCst) {
                match transport.recv(&mut buf) {
                    Ok(len) => {
                        if protocol.is_reply(&buf[..len], device_id) {
                            counters.record_received();
                        }
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                        ) => {}
                    Err(e) => {
                        // A dead socket ends the measurement, it does not fail it.
                        debug!("receive loop ended: {e}");
                        break;
                    }
                }
            }
        })
        .map_err(RunError::Spawn)
}
