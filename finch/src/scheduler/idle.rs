use std::thread;
use std::time::Duration;

use crate::config::IdleStrategyConfig;
use crate::scheduler::worker::ThreadMessage;

/// Backoff of an actor thread without runnable tasks.
///
/// Spins first, then yields, then parks on the hand-off channel with an
/// exponentially growing timeout. A message arriving on the channel ends the
/// park immediately; the caller passes the time until the next timer so
/// timers are never fired late because of a park.
#[derive(Debug)]
pub(crate) struct IdleStrategy {
    config: IdleStrategyConfig,
    spins: u32,
    yields: u32,
    park: Duration,
}

impl IdleStrategy {
    pub(crate) fn new(config: IdleStrategyConfig) -> Self {
        let park = config.min_park;
        Self {
            config,
            spins: 0,
            yields: 0,
            park,
        }
    }

    /// Called whenever the thread found work.
    pub(crate) fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
        self.park = self.config.min_park;
    }

    /// One idle round. Returns a message if one arrived meanwhile.
    pub(crate) fn idle(
        &mut self,
        receiver: &flume::Receiver<ThreadMessage>,
        until_next_timer: Option<Duration>,
    ) -> Option<ThreadMessage> {
        if self.spins < self.config.max_spins {
            self.spins += 1;
            std::hint::spin_loop();
            return receiver.try_recv().ok();
        }
        if self.yields < self.config.max_yields {
            self.yields += 1;
            thread::yield_now();
            return receiver.try_recv().ok();
        }

        let park = until_next_timer.map_or(self.park, |limit| limit.min(self.park));
        self.park = (self.park * 2).min(self.config.max_park);
        receiver.recv_timeout(park).ok()
    }

    #[cfg(test)]
    fn current_park(&self) -> Duration {
        self.park
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IdleStrategyConfig {
        IdleStrategyConfig {
            max_spins: 2,
            max_yields: 1,
            min_park: Duration::from_micros(10),
            max_park: Duration::from_micros(40),
        }
    }

    #[test]
    fn park_doubles_up_to_max_and_resets() {
        let (_tx, rx) = flume::unbounded::<ThreadMessage>();
        let mut idle = IdleStrategy::new(config());

        // spins and yields don't touch the park duration
        for _ in 0..3 {
            assert!(idle.idle(&rx, None).is_none());
        }
        assert_eq!(idle.current_park(), Duration::from_micros(10));

        idle.idle(&rx, None);
        assert_eq!(idle.current_park(), Duration::from_micros(20));
        idle.idle(&rx, None);
        idle.idle(&rx, None);
        assert_eq!(idle.current_park(), Duration::from_micros(40));

        idle.reset();
        assert_eq!(idle.current_park(), Duration::from_micros(10));
    }

    #[test]
    fn pending_message_ends_idle_round() {
        let (tx, rx) = flume::unbounded();
        let mut idle = IdleStrategy::new(config());
        tx.send(ThreadMessage::Wake).unwrap();
        assert!(matches!(idle.idle(&rx, None), Some(ThreadMessage::Wake)));
    }
}
