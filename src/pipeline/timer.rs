/// 定时器 (fixed-interval tick)
///
/// Polled from the frame loop. Late polls coalesce into a single tick.
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct TickTimer {
    interval: Duration,
    next: Option<Instant>,
}

impl TickTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    /// First tick fires on the first poll at or after `now`.
    pub fn start(&mut self, now: Instant) {
        self.next = Some(now);
    }

    pub fn stop(&mut self) {
        self.next = None;
    }

    pub fn is_running(&self) -> bool {
        self.next.is_some()
    }

    /// True when a tick is due. Missed ticks are dropped, not replayed.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(next) = self.next else {
            return false;
        };
        if now < next {
            return false;
        }
        let mut following = next + self.interval;
        if following <= now {
            following = now + self.interval;
        }
        self.next = Some(following);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn fires_on_interval() {
        let t0 = Instant::now();
        let mut timer = TickTimer::new(33 * MS);
        timer.start(t0);
        assert!(timer.poll(t0));
        assert!(!timer.poll(t0 + 10 * MS));
        assert!(timer.poll(t0 + 33 * MS));
        assert!(!timer.poll(t0 + 40 * MS));
        assert!(timer.poll(t0 + 66 * MS));
    }

    #[test]
    fn late_polls_coalesce() {
        let t0 = Instant::now();
        let mut timer = TickTimer::new(33 * MS);
        timer.start(t0);
        assert!(timer.poll(t0));
        assert!(timer.poll(t0 + 500 * MS));
        assert!(!timer.poll(t0 + 510 * MS));
        assert!(timer.poll(t0 + 533 * MS));
    }

    #[test]
    fn stopped_timer_never_fires() {
        let t0 = Instant::now();
        let mut timer = TickTimer::new(33 * MS);
        assert!(!timer.poll(t0));
        timer.start(t0);
        timer.stop();
        assert!(!timer.is_running());
        assert!(!timer.poll(t0 + 100 * MS));
    }
}
