use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// Serializes outbound calls so that each one is followed by a full pacing
/// interval before the next may start. N calls through one pacer therefore
/// take at least N x interval.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits for the slot, runs `call`, then holds the slot for one interval.
    pub async fn run<F, T>(&self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut guard = self.next_slot.lock().await;
        if *guard > Instant::now() {
            sleep_until(*guard).await;
        }
        let out = call.await;
        if !self.interval.is_zero() {
            let until = Instant::now() + self.interval;
            *guard = until;
            sleep_until(until).await;
        }
        out
    }
}
