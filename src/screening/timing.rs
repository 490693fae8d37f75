// Timing seams for the protocols: sleeping and inter-stimulus intervals

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Returns immediately; used by tests and offline runs
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSleeper;

impl Sleeper for NoopSleeper {
    fn sleep(&self, _duration: Duration) {}
}

/// Source of inter-stimulus intervals
pub trait IsiSource: Send + Sync {
    fn next_isi(&self, min_ms: u64, max_ms: u64) -> Duration;
}

/// Uniform integer milliseconds in `[min_ms, max_ms]`
pub struct RandomIsi {
    rng: Mutex<StdRng>,
}

impl RandomIsi {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomIsi {
    fn default() -> Self {
        Self::new()
    }
}

impl IsiSource for RandomIsi {
    fn next_isi(&self, min_ms: u64, max_ms: u64) -> Duration {
        let (lo, hi) = if min_ms <= max_ms {
            (min_ms, max_ms)
        } else {
            (max_ms, min_ms)
        };
        let ms = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(lo..=hi),
            Err(poisoned) => poisoned.into_inner().gen_range(lo..=hi),
        };
        Duration::from_millis(ms)
    }
}

/// Replays fixed intervals in order, then repeats the last one
pub struct SequenceIsi {
    queue: Mutex<VecDeque<u64>>,
    last: Mutex<u64>,
}

impl SequenceIsi {
    pub fn new(intervals_ms: impl IntoIterator<Item = u64>) -> Self {
        Self {
            queue: Mutex::new(intervals_ms.into_iter().collect()),
            last: Mutex::new(0),
        }
    }
}

impl IsiSource for SequenceIsi {
    fn next_isi(&self, _min_ms: u64, _max_ms: u64) -> Duration {
        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        let ms = match (next, self.last.lock()) {
            (Some(ms), Ok(mut last)) => {
                *last = ms;
                ms
            }
            (Some(ms), Err(_)) => ms,
            (None, Ok(last)) => *last,
            (None, Err(_)) => 0,
        };
        Duration::from_millis(ms)
    }
}
