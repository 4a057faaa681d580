//! Outcome of one local benchmark run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Statistics of one node's benchmark run.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    /// Wall-clock time of the whole run in millisecs.
    pub time_ms: u64,

    pub num_gets: u64,
    pub num_puts: u64,

    /// Iterations whose call failed or timed out.
    pub num_failures: u64,

    pub num_invokers: u64,
}

impl RunResult {
    /// Total number of iterations performed.
    #[inline]
    pub fn num_calls(&self) -> u64 {
        self.num_gets + self.num_puts
    }

    /// Calls per second over the run.
    pub fn throughput(&self) -> f64 {
        if self.time_ms == 0 {
            return 0.0;
        }
        self.num_calls() as f64 * 1000.0 / self.time_ms as f64
    }

    /// Fraction of iterations that took the read path.
    pub fn read_fraction(&self) -> f64 {
        if self.num_calls() == 0 {
            return 0.0;
        }
        self.num_gets as f64 / self.num_calls() as f64
    }

    /// Combines per-node results: counts add up and the time is the
    /// slowest node's.
    pub fn aggregate<'a>(
        results: impl IntoIterator<Item = &'a RunResult>,
    ) -> Self {
        results.into_iter().fold(RunResult::default(), |acc, r| RunResult {
            time_ms: acc.time_ms.max(r.time_ms),
            num_gets: acc.num_gets + r.num_gets,
            num_puts: acc.num_puts + r.num_puts,
            num_failures: acc.num_failures + r.num_failures,
            num_invokers: acc.num_invokers + r.num_invokers,
        })
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} reqs ({} gets, {} puts, {} failed) by {} invokers in {} ms: \
             {:.2} reqs/sec",
            self.num_calls(),
            self.num_gets,
            self.num_puts,
            self.num_failures,
            self.num_invokers,
            self.time_ms,
            self.throughput()
        )
    }
}

#[cfg(test)]
mod results_tests {
    use super::*;

    #[test]
    fn throughput_calc() {
        let r = RunResult {
            time_ms: 2000,
            num_gets: 800,
            num_puts: 200,
            num_failures: 3,
            num_invokers: 2,
        };
        assert_eq!(r.num_calls(), 1000);
        assert!((r.throughput() - 500.0).abs() < 1e-9);
        assert!((r.read_fraction() - 0.8).abs() < 1e-9);
        assert_eq!(
            format!("{}", r),
            "1000 reqs (800 gets, 200 puts, 3 failed) by 2 invokers in \
             2000 ms: 500.00 reqs/sec"
        );
        assert_eq!(RunResult::default().throughput(), 0.0);
    }

    #[test]
    fn aggregate_nodes() {
        let a = RunResult {
            time_ms: 100,
            num_gets: 8,
            num_puts: 2,
            num_failures: 0,
            num_invokers: 1,
        };
        let b = RunResult {
            time_ms: 150,
            num_gets: 7,
            num_puts: 3,
            num_failures: 1,
            num_invokers: 1,
        };
        let total = RunResult::aggregate([&a, &b]);
        assert_eq!(total.time_ms, 150);
        assert_eq!(total.num_calls(), 20);
        assert_eq!(total.num_failures, 1);
        assert_eq!(total.num_invokers, 2);
    }
}
