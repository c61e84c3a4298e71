//! smartflood
//! UDP packet-loss and throughput tester for SmartHome devices
//!
//! Floods a device with broadcast value-request datagrams at a fixed rate
//! while concurrently counting the matching replies, then reports loss
//! statistics. Automatic mode wraps the runner in an adaptive search that
//! pinpoints the maximum packet rate the device sustains without loss.

pub mod protocol;
pub mod runner;
pub mod search;
pub mod stats;
pub mod transport;

pub use protocol::ProtocolConfig;
pub use runner::{ParamError, RunError, RunnerConfig, TestParams, TestRunner};
pub use search::{AdaptiveSearch, Probe, SearchConfig, SearchOutcome, SearchStep};
pub use stats::{Counters, TestResult};
pub use transport::{Transport, TransportConfig, UdpTransport};
