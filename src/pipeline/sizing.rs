//! Adaptive batch sizing
//!
//! Two pure functions: one picks how many events a drain run requests given
//! the backlog, the other moves the persistent batch size after the run from
//! its observed latency. Both clamp to `[min, max]`.

use std::time::Duration;

/// Run slower than this shrinks the batch size
pub const SLOW_RUN: Duration = Duration::from_millis(2_000);
/// Run faster than this may grow the batch size
pub const FAST_RUN: Duration = Duration::from_millis(500);
/// Growth or shrink step applied after a run
pub const ADJUST_STEP: usize = 10;
/// Extra headroom requested when the backlog is moderately high
pub const PLAN_STEP: usize = 20;

/// Backlog thresholds used when planning a run
const BACKLOG_FLOOD: usize = 500;
const BACKLOG_HIGH: usize = 100;
const BACKLOG_STEADY: usize = 20;
/// Backlog after a run above which a fast full run grows the batch size
const BACKLOG_GROW: usize = 50;

/// Inclusive batch size limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBounds {
    pub min: usize,
    pub max: usize,
}

impl BatchBounds {
    pub fn new(min: usize, max: usize) -> Self {
        let min = min.max(1);
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn clamp(&self, size: usize) -> usize {
        size.clamp(self.min, self.max)
    }
}

/// What a finished drain run looked like
#[derive(Debug, Clone, Copy)]
pub struct RunObservation {
    /// Wall time of the bulk write
    pub duration: Duration,
    /// Events the run asked for
    pub requested: usize,
    /// Events the run actually took
    pub drained: usize,
    /// Queue depth right after the drain
    pub backlog_after: usize,
}

/// Number of events the next run should request
pub fn plan_batch(backlog: usize, current: usize, bounds: BatchBounds) -> usize {
    let planned = if backlog > BACKLOG_FLOOD {
        bounds.max
    } else if backlog > BACKLOG_HIGH {
        bounds.max.min(current + PLAN_STEP)
    } else if backlog > BACKLOG_STEADY {
        current
    } else {
        bounds.min.max(backlog.min(current))
    };
    bounds.clamp(planned)
}

/// New persistent batch size after a run
pub fn adjust_batch_size(current: usize, run: RunObservation, bounds: BatchBounds) -> usize {
    let next = if run.duration > SLOW_RUN {
        current.saturating_sub(ADJUST_STEP).max(bounds.min)
    } else if run.duration < FAST_RUN
        && run.drained == run.requested
        && run.backlog_after > BACKLOG_GROW
    {
        (current + ADJUST_STEP).min(bounds.max)
    } else {
        current
    };
    bounds.clamp(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: BatchBounds = BatchBounds { min: 10, max: 200 };

    fn run(ms: u64, requested: usize, drained: usize, backlog_after: usize) -> RunObservation {
        RunObservation {
            duration: Duration::from_millis(ms),
            requested,
            drained,
            backlog_after,
        }
    }

    #[test]
    fn test_plan_by_backlog() {
        assert_eq!(plan_batch(10_000, 50, BOUNDS), 200);
        assert_eq!(plan_batch(300, 50, BOUNDS), 70);
        assert_eq!(plan_batch(300, 195, BOUNDS), 200);
        assert_eq!(plan_batch(50, 50, BOUNDS), 50);
        assert_eq!(plan_batch(15, 50, BOUNDS), 15);
        assert_eq!(plan_batch(3, 50, BOUNDS), 10);
        assert_eq!(plan_batch(0, 50, BOUNDS), 10);
    }

    #[test]
    fn test_slow_run_shrinks() {
        assert_eq!(adjust_batch_size(50, run(2_500, 50, 50, 0), BOUNDS), 40);
        assert_eq!(adjust_batch_size(15, run(3_000, 15, 15, 0), BOUNDS), 10);
    }

    #[test]
    fn test_fast_full_run_with_backlog_grows() {
        assert_eq!(adjust_batch_size(50, run(100, 50, 50, 51), BOUNDS), 60);
        assert_eq!(adjust_batch_size(195, run(100, 200, 200, 1_000), BOUNDS), 200);
    }

    #[test]
    fn test_no_growth_without_pressure() {
        // partial drain
        assert_eq!(adjust_batch_size(50, run(100, 50, 30, 500), BOUNDS), 50);
        // backlog too small
        assert_eq!(adjust_batch_size(50, run(100, 50, 50, 50), BOUNDS), 50);
        // between thresholds
        assert_eq!(adjust_batch_size(50, run(1_000, 50, 50, 500), BOUNDS), 50);
    }

    #[test]
    fn test_sizes_stay_in_bounds() {
        let mut current = 50;
        for step in 0..500u64 {
            let backlog = ((step * 7_919) % 2_000) as usize;
            let requested = plan_batch(backlog, current, BOUNDS);
            assert!((10..=200).contains(&requested));
            let ms = (step * 131) % 3_000;
            current = adjust_batch_size(current, run(ms, requested, requested, backlog), BOUNDS);
            assert!((10..=200).contains(&current));
        }
    }
}
