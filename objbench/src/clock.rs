use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use std::time::Instant;

/// Wall-clock timestamps that never go backwards within a run: the wall clock is read once, and every later reading is that epoch plus monotonic elapsed time.
#[derive(Clone, Copy, Debug)]
pub struct RunClock {
  epoch: DateTime<Utc>,
  origin: Instant,
}

impl RunClock {
  pub fn start() -> Self {
    Self {
      epoch: Utc::now(),
      origin: Instant::now(),
    }
  }

  pub fn now(&self) -> DateTime<Utc> {
    let elapsed = i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX);
    self.epoch + Duration::nanoseconds(elapsed)
  }
}

#[cfg(test)]
mod tests {
  use super::RunClock;

  #[test]
  fn test_run_clock_is_monotonic() {
    let clock = RunClock::start();
    let mut prev = clock.now();
    for _ in 0..10_000 {
      let now = clock.now();
      assert!(now >= prev);
      prev = now;
    }
  }
}
