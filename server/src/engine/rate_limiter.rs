use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Outcome of recording one message for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// The window is exactly full. The next message inside the window mutes.
    WarnThreshold,
    /// The user is muted. `mute_started` is true only on the check that
    /// tripped the mute.
    Block { mute_started: bool },
}

#[derive(Debug, Default)]
struct UserWindow {
    sent: VecDeque<Instant>,
    muted_until: Option<Instant>,
}

impl UserWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.sent.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-user sliding-window counter with a temporary mute.
///
/// State lives in a `DashMap` keyed by user id, so checks for different users
/// never contend on the same shard lock for long.
pub struct RateLimiter {
    users: DashMap<String, UserWindow>,
    max_messages: usize,
    window: Duration,
    mute: Duration,
}

impl RateLimiter {
    pub fn new(max_messages: usize, window: Duration, mute: Duration) -> Self {
        Self {
            users: DashMap::new(),
            max_messages,
            window,
            mute,
        }
    }

    pub fn mute_duration(&self) -> Duration {
        self.mute
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a message from `user_id` at `now` and decide whether it may pass.
    pub fn check(&self, user_id: &str, now: Instant) -> Verdict {
        let mut entry = self.users.entry(user_id.to_string()).or_default();
        let state = entry.value_mut();

        if let Some(deadline) = state.muted_until {
            if now < deadline {
                return Verdict::Block {
                    mute_started: false,
                };
            }
            state.muted_until = None;
        }

        state.prune(now, self.window);
        state.sent.push_back(now);

        let count = state.sent.len();
        if count > self.max_messages {
            state.sent.clear();
            state.muted_until = Some(now + self.mute);
            Verdict::Block { mute_started: true }
        } else if count == self.max_messages {
            Verdict::WarnThreshold
        } else {
            Verdict::Allow
        }
    }

    /// Remaining mute for `user_id`, if muted at `now`.
    pub fn mute_remaining(&self, user_id: &str, now: Instant) -> Option<Duration> {
        self.users
            .get(user_id)
            .and_then(|w| w.muted_until)
            .filter(|deadline| now < *deadline)
            .map(|deadline| deadline - now)
    }

    /// Prune stale timestamps and forget idle users. Returns how many users were dropped.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.users.len();
        self.users.retain(|_, state| {
            state.prune(now, self.window);
            if state.muted_until.is_some_and(|deadline| now >= deadline) {
                state.muted_until = None;
            }
            !state.sent.is_empty() || state.muted_until.is_some()
        });
        before.saturating_sub(self.users.len())
    }

    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(5, Duration::from_secs(10), Duration::from_secs(60))
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_fills_window_then_warns() {
        let limiter = limiter();
        let t0 = Instant::now();
        let verdicts: Vec<Verdict> = (0..5)
            .map(|i| limiter.check("user", t0 + secs(i)))
            .collect();
        assert_eq!(
            verdicts,
            vec![
                Verdict::Allow,
                Verdict::Allow,
                Verdict::Allow,
                Verdict::Allow,
                Verdict::WarnThreshold,
            ]
        );
    }

    #[test]
    fn test_sixth_message_mutes_and_clears_sequence() {
        let limiter = limiter();
        let t0 = Instant::now();
        for i in 0..5 {
            limiter.check("user", t0 + secs(i));
        }
        let now = t0 + secs(5);
        assert_eq!(
            limiter.check("user", now),
            Verdict::Block { mute_started: true }
        );
        assert_eq!(limiter.mute_remaining("user", now), Some(secs(60)));
        assert!(limiter.users.get("user").unwrap().sent.is_empty());
    }

    #[test]
    fn test_blocked_until_deadline_then_allowed() {
        let limiter = limiter();
        let t0 = Instant::now();
        for _ in 0..6 {
            limiter.check("user", t0);
        }

        assert_eq!(
            limiter.check("user", t0 + secs(30)),
            Verdict::Block {
                mute_started: false
            }
        );
        assert_eq!(
            limiter.check("user", t0 + secs(59)),
            Verdict::Block {
                mute_started: false
            }
        );
        assert_eq!(limiter.check("user", t0 + secs(60)), Verdict::Allow);
        assert_eq!(limiter.mute_remaining("user", t0 + secs(60)), None);
    }

    #[test]
    fn test_blocked_checks_are_not_counted() {
        let limiter = limiter();
        let t0 = Instant::now();
        for _ in 0..6 {
            limiter.check("user", t0);
        }
        for i in 1..20 {
            limiter.check("user", t0 + secs(i));
        }
        // only the post-mute message is in the window
        assert_eq!(limiter.check("user", t0 + secs(61)), Verdict::Allow);
        assert_eq!(limiter.users.get("user").unwrap().sent.len(), 1);
    }

    #[test]
    fn test_old_timestamps_fall_out_of_window() {
        let limiter = limiter();
        let t0 = Instant::now();
        for _ in 0..4 {
            limiter.check("user", t0);
        }
        // exactly one window later the first four are stale
        assert_eq!(limiter.check("user", t0 + secs(10)), Verdict::Allow);
        assert_eq!(limiter.users.get("user").unwrap().sent.len(), 1);
    }

    #[test]
    fn test_warn_repeats_while_window_stays_full() {
        let limiter = RateLimiter::new(2, secs(10), secs(60));
        let t0 = Instant::now();
        assert_eq!(limiter.check("u", t0), Verdict::Allow);
        assert_eq!(limiter.check("u", t0 + secs(1)), Verdict::WarnThreshold);
        // window slides, count stays at the limit
        assert_eq!(limiter.check("u", t0 + secs(10)), Verdict::WarnThreshold);
        assert_eq!(limiter.check("u", t0 + secs(25)), Verdict::Allow);
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = limiter();
        let t0 = Instant::now();
        for _ in 0..6 {
            limiter.check("noisy", t0);
        }
        assert_eq!(limiter.check("quiet", t0), Verdict::Allow);
        assert!(limiter.mute_remaining("quiet", t0).is_none());
    }

    #[test]
    fn test_sweep_drops_idle_users_keeps_muted() {
        let limiter = limiter();
        let t0 = Instant::now();
        limiter.check("idle", t0);
        for _ in 0..6 {
            limiter.check("muted", t0);
        }
        limiter.check("active", t0 + secs(15));

        let removed = limiter.sweep(t0 + secs(20));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_users(), 2);

        let removed = limiter.sweep(t0 + secs(120));
        assert_eq!(removed, 2);
        assert_eq!(limiter.tracked_users(), 0);
    }

    #[test]
    fn test_many_users() {
        let limiter = RateLimiter::new(1, secs(10), secs(60));
        let t0 = Instant::now();
        for i in 0..100 {
            let key = format!("user_{i}");
            assert_eq!(
                limiter.check(&key, t0),
                Verdict::WarnThreshold,
                "user_{i} should sit at the limit"
            );
        }
        for i in 0..100 {
            let key = format!("user_{i}");
            assert!(
                matches!(limiter.check(&key, t0), Verdict::Block { mute_started: true }),
                "user_{i} should be muted on second message"
            );
        }
    }
}
