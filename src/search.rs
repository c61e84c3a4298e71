//! Adaptive rate search
//! Doubling, proportional backoff and unit increments around the device's
//! breaking point

use std::thread;
use std::time::Duration;

use tracing::info;

use crate::runner::TestParams;
use crate::stats::TestResult;

/// Phase of the automatic search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStep {
    /// Exponential probing until the first lossy rate brackets the limit.
    DoublePackets,
    /// 25% backoff until a loss-free rate is found again.
    LowerUntilNoLoss,
    /// Unit increments up to the exact boundary.
    AddOnePacket,
}

/// Knobs of the automatic search.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Seconds each probe run floods the device.
    pub duration_secs: u32,
    /// Pause after a lossy run so device-side backlog drains before the next
    /// measurement.
    pub settle_delay: Duration,
    /// Device ids rotate through this inclusive range between runs.
    pub device_id_range: (u8, u8),
}

impl SearchConfig {
    pub fn new(duration_secs: u32) -> Self {
        Self {
            duration_secs,
            settle_delay: Duration::from_secs(5),
            device_id_range: (100, 254),
        }
    }
}

/// One measurement in the search trace.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub packets_per_second: u32,
    pub step: SearchStep,
    pub result: TestResult,
}

/// Final answer of the automatic search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Highest rate the device handled without loss, or `None` if it lost
    /// packets at every probed rate.
    pub max_lossless_rate: Option<u32>,
    /// Every probe in the order it ran.
    pub probes: Vec<Probe>,
}

/// Three-phase search for the maximum sustainable packet rate.
///
/// Doubling brackets the breaking point quickly, proportional backoff
/// relocates into a loss-free region, and unit increments pinpoint the
/// boundary rate exactly. Runs are strictly sequential: a probe's transport
/// is fully closed before the next probe starts.
pub struct AdaptiveSearch {
    config: SearchConfig,
    step: SearchStep,
    rate: u32,
    device_id: u8,
    last_lossless: Option<u32>,
}

impl AdaptiveSearch {
    pub fn new(config: SearchConfig) -> Self {
        let device_id = config.device_id_range.0;
        Self {
            config,
            step: SearchStep::DoublePackets,
            rate: 1,
            device_id,
            last_lossless: None,
        }
    }

    /// Drive the search to completion. `measure` runs one performance test
    /// and is handed fresh parameters for every probe; its error aborts the
    /// search unchanged.
    pub fn run<F, E>(mut self, mut measure: F) -> Result<SearchOutcome, E>
    where
        F: FnMut(TestParams) -> Result<TestResult, E>,
    {
        let mut probes = Vec::new();

        loop {
            self.advance_rate();
            let params = TestParams::new(self.rate, self.config.duration_secs, self.device_id);
            let result = measure(params)?;

            info!(
                rate = self.rate,
                step = ?self.step,
                lost = result.lost_packets(),
                sent = result.sent_packets,
                "probe complete"
            );
            probes.push(Probe {
                packets_per_second: self.rate,
                step: self.step,
                result,
            });

            if self.transition(&result) {
                break;
            }
            self.rotate_device_id();
        }

        Ok(SearchOutcome {
            max_lossless_rate: self.last_lossless,
            probes,
        })
    }

    /// Pre-measurement rate adjustment for the current phase. Backoff happens
    /// in [`Self::transition`] instead, right after the lossy measurement.
    fn advance_rate(&mut self) {
        match self.step {
            SearchStep::DoublePackets => self.rate = self.rate.saturating_mul(2),
            SearchStep::AddOnePacket => self.rate = self.rate.saturating_add(1),
            SearchStep::LowerUntilNoLoss => {}
        }
    }

    /// Evaluate one result and move the state machine. Returns true when the
    /// search is finished.
    fn transition(&mut self, result: &TestResult) -> bool {
        if result.has_loss() {
            match self.step {
                SearchStep::DoublePackets | SearchStep::LowerUntilNoLoss => {
                    if self.step == SearchStep::LowerUntilNoLoss && self.rate == 1 {
                        // Nothing left to back off to.
                        return true;
                    }
                    thread::sleep(self.config.settle_delay);
                    self.back_off();
                    self.step = SearchStep::LowerUntilNoLoss;
                    false
                }
                SearchStep::AddOnePacket => true,
            }
        } else {
            self.last_lossless = Some(self.rate);
            if self.step == SearchStep::LowerUntilNoLoss {
                self.step = SearchStep::AddOnePacket;
            }
            false
        }
    }

    /// Reduce the rate by a quarter, always by at least one packet so small
    /// rates cannot stall the backoff phase.
    fn back_off(&mut self) {
        self.rate = self.rate.saturating_sub((self.rate / 4).max(1)).max(1);
    }

    fn rotate_device_id(&mut self) {
        let (low, high) = self.config.device_id_range;
        self.device_id = if self.device_id >= high {
            low
        } else {
            self.device_id + 1
        };
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;
    use proptest::prelude::*;

    fn quick_config() -> SearchConfig {
        SearchConfig {
            settle_delay: Duration::ZERO,
            ..SearchConfig::new(1)
        }
    }

    /// Measurement against a device that loses packets iff the rate exceeds
    /// `boundary`.
    fn lossy_above(boundary: u32) -> impl FnMut(TestParams) -> Result<TestResult, Infallible> {
        move |params| {
            let sent = params.total_packets();
            let received = if params.packets_per_second > boundary {
                sent.saturating_sub(1 + sent / 10)
            } else {
                sent
            };
            Ok(TestResult::new(sent, received))
        }
    }

    #[test]
    fn finds_exact_boundary_rate() {
        let outcome = AdaptiveSearch::new(quick_config())
            .run(lossy_above(16))
            .unwrap();

        assert_eq!(outcome.max_lossless_rate, Some(16));
    }

    #[test]
    fn phases_run_in_order() {
        let outcome = AdaptiveSearch::new(quick_config())
            .run(lossy_above(16))
            .unwrap();

        let mut phases: Vec<SearchStep> = Vec::new();
        for probe in &outcome.probes {
            if phases.last() != Some(&probe.step) {
                phases.push(probe.step);
            }
        }
        assert_eq!(
            phases,
            vec![
                SearchStep::DoublePackets,
                SearchStep::LowerUntilNoLoss,
                SearchStep::AddOnePacket,
            ]
        );

        // The final probe is the first lossy unit increment past the boundary.
        let last = outcome.probes.last().unwrap();
        assert_eq!(last.packets_per_second, 17);
        assert!(last.result.has_loss());
    }

    #[test]
    fn first_probe_doubles_to_two() {
        let outcome = AdaptiveSearch::new(quick_config())
            .run(lossy_above(1000))
            .unwrap();
        assert_eq!(outcome.probes[0].packets_per_second, 2);
        assert_eq!(outcome.probes[1].packets_per_second, 4);
    }

    #[test]
    fn hopeless_device_reports_no_sustainable_rate() {
        let outcome = AdaptiveSearch::new(quick_config())
            .run(lossy_above(0))
            .unwrap();

        assert_eq!(outcome.max_lossless_rate, None);
        assert!(outcome.probes.iter().all(|p| p.result.has_loss()));
    }

    #[test]
    fn device_ids_rotate_and_wrap() {
        let mut seen = Vec::new();
        let config = SearchConfig {
            device_id_range: (100, 102),
            ..quick_config()
        };
        let _ = AdaptiveSearch::new(config)
            .run(|params| {
                seen.push(params.device_id);
                lossy_above(16)(params)
            })
            .unwrap();

        assert!(seen.len() > 4);
        assert_eq!(&seen[..5], &[100, 101, 102, 100, 101]);
    }

    #[test]
    fn measurement_errors_abort_the_search() {
        let result = AdaptiveSearch::new(quick_config())
            .run(|_| Err::<TestResult, &str>("socket gone"));
        assert_eq!(result.unwrap_err(), "socket gone");
    }

    proptest! {
        #[test]
        fn converges_on_any_boundary(boundary in 1u32..300) {
            let outcome = AdaptiveSearch::new(quick_config())
                .run(lossy_above(boundary))
                .unwrap();
            prop_assert_eq!(outcome.max_lossless_rate, Some(boundary));
        }
    }
}
