use std::time::{Duration, Instant};

/// Wall-clock interval measurement on the monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    /// Start measuring now.
    pub fn start() -> Self {
        Stopwatch {
            started: Instant::now(),
        }
    }

    /// Time since `start`.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// The two measurements taken for one strategy invocation.
///
/// `bare_metal` is measured inside the job around the compute loop;
/// `dispatch` is measured by the caller from the first submission until every
/// constituent job has resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub bare_metal: Duration,
    pub dispatch: Duration,
}

impl Timing {
    /// Time spent outside the compute loop: queuing, transport, result
    /// retrieval.
    pub fn overhead(&self) -> Duration {
        self.dispatch.saturating_sub(self.bare_metal)
    }
}
