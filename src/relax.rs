//! Cooperative CPU yielding between parsed rows.
//!
//! A long parse phase on a big result set can starve co-resident tasks on
//! the runtime. The relaxer yields every N rows; N is re-derived after each
//! update from the observed parse duration so the yield cadence lands at
//! roughly one yield per 2 ms of parsing.

use std::time::Duration;

/// Parse durations at or below this never trigger relaxing.
pub(crate) const RELAX_THRESHOLD: Duration = Duration::from_millis(10);

/// Target spacing between yields, in milliseconds of parse time.
pub(crate) const RELAX_INTERVAL_MS: f64 = 2.0;

/// Yields to the runtime every `iterations` calls; a no-op at 0.
#[derive(Debug)]
pub struct CpuRelax {
    iterations: usize,
    count: usize,
}

impl CpuRelax {
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            count: 0,
        }
    }

    /// Count one unit of work, yielding when the configured interval is
    /// reached. Phase timers keep charging the current phase across the
    /// yield.
    pub async fn relax(&mut self) {
        if self.iterations == 0 {
            return;
        }
        self.count += 1;
        if self.count >= self.iterations {
            self.count = 0;
            tokio::task::yield_now().await;
        }
    }
}

/// Iterations-per-yield derived from the last parse phase, or `None` when
/// the phase was too short to matter and the previous value should stick.
pub(crate) fn compute_relax_iterations(
    changes: usize,
    parse_elapsed: Duration,
) -> Option<usize> {
    if parse_elapsed <= RELAX_THRESHOLD {
        return None;
    }
    let elapsed_ms = parse_elapsed.as_secs_f64() * 1_000.0;
    Some((changes as f64 / (elapsed_ms / RELAX_INTERVAL_MS)) as usize)
}
