use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};

/// Time source for idle expiry.
pub trait Ticker: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall-clock ticker backed by [`Instant::now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTicker;

impl Ticker for SystemTicker {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A ticker that only moves when told to.
pub struct ManualTicker {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTicker")
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

impl Ticker for ManualTicker {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}
