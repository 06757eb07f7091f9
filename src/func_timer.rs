use std::time::{Duration, Instant};
use log::trace;

/// Monotonic stopwatch around a single foreign invocation
pub struct FunctionTimer {
    name: &'static str,
    start: Instant,
}

impl FunctionTimer {
    pub fn start(name: &'static str) -> Self {
        FunctionTimer {
            name,
            start: Instant::now(),
        }
    }

    /// Stop the clock and hand back the elapsed time
    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();
        trace!("Function '{}' took: {:?}", self.name, duration);
        duration
    }
}

/// Run `f` and report how long it took
pub fn timed<T>(name: &'static str, f: impl FnOnce() -> T) -> (T, Duration) {
    let timer = FunctionTimer::start(name);
    let value = f();
    (value, timer.stop())
}
