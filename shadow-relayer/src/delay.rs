//! Activity-dependent release delays and hop counts.
//!
//! Larger anonymity sets release sooner; sparse pools wait longer.

use std::{fmt, time::Duration};

use rand::Rng;
use serde::Serialize;

const FAST_MIN_DEPOSITS: usize = 5;
const MEDIUM_MIN_DEPOSITS: usize = 2;

const FAST_RANGE_MS: (u64, u64) = (30_000, 60_000);
const MEDIUM_RANGE_MS: (u64, u64) = (45_000, 90_000);
const SLOW_RANGE_MS: (u64, u64) = (60_000, 120_000);

pub const MAX_HOPS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DelayReason {
    #[serde(rename = "fast withdrawal")]
    Fast,
    #[serde(rename = "medium delay")]
    Medium,
    #[serde(rename = "low activity - longer delay for privacy")]
    LowActivity,
}

impl DelayReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelayReason::Fast => "fast withdrawal",
            DelayReason::Medium => "medium delay",
            DelayReason::LowActivity => "low activity - longer delay for privacy",
        }
    }

    fn range_ms(&self) -> (u64, u64) {
        match self {
            DelayReason::Fast => FAST_RANGE_MS,
            DelayReason::Medium => MEDIUM_RANGE_MS,
            DelayReason::LowActivity => SLOW_RANGE_MS,
        }
    }
}

impl fmt::Display for DelayReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayDecision {
    pub delay: Duration,
    pub reason: DelayReason,
    pub deposit_count: usize,
}

/// Draws a delay for a pool holding `deposit_count` deposits.
pub fn schedule_delay<R: Rng + ?Sized>(deposit_count: usize, rng: &mut R) -> DelayDecision {
    let reason = if deposit_count >= FAST_MIN_DEPOSITS {
        DelayReason::Fast
    } else if deposit_count >= MEDIUM_MIN_DEPOSITS {
        DelayReason::Medium
    } else {
        DelayReason::LowActivity
    };
    let (low, high) = reason.range_ms();
    DelayDecision {
        delay: Duration::from_millis(rng.gen_range(low..high)),
        reason,
        deposit_count,
    }
}

/// `1m23s` for delays of a minute or more, `45s` otherwise.
pub fn format_delay(delay: Duration) -> String {
    let secs = delay.as_secs();
    if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Uniform over `1..=3`, capped so that hop relayers can always be drawn
/// without replacement from `relayer_count` identities.
pub fn draw_hop_count<R: Rng + ?Sized>(relayer_count: usize, rng: &mut R) -> usize {
    let hops = rng.gen_range(1..=MAX_HOPS);
    hops.min(relayer_count.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn assert_range(count: usize, low: u64, high: u64, reason: DelayReason) {
        let mut rng = ChaCha8Rng::seed_from_u64(count as u64);
        for _ in 0..500 {
            let decision = schedule_delay(count, &mut rng);
            let ms = decision.delay.as_millis() as u64;
            assert!(ms >= low && ms < high, "{} ms outside [{}, {})", ms, low, high);
            assert_eq!(decision.reason, reason);
            assert_eq!(decision.deposit_count, count);
        }
    }

    #[test]
    fn busy_pool_is_fast() {
        assert_range(6, 30_000, 60_000, DelayReason::Fast);
        assert_range(5, 30_000, 60_000, DelayReason::Fast);
    }

    #[test]
    fn medium_pool() {
        assert_range(3, 45_000, 90_000, DelayReason::Medium);
        assert_range(2, 45_000, 90_000, DelayReason::Medium);
    }

    #[test]
    fn sparse_pool_waits_longest() {
        assert_range(1, 60_000, 120_000, DelayReason::LowActivity);
        assert_range(0, 60_000, 120_000, DelayReason::LowActivity);
        assert!(DelayReason::LowActivity.as_str().contains("low activity"));
    }

    #[test]
    fn delay_formatting() {
        assert_eq!(format_delay(Duration::from_millis(45_999)), "45s");
        assert_eq!(format_delay(Duration::from_millis(60_000)), "1m0s");
        assert_eq!(format_delay(Duration::from_millis(119_500)), "1m59s");
    }

    #[test]
    fn hop_count_within_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut seen = [false; MAX_HOPS + 1];
        for _ in 0..300 {
            let hops = draw_hop_count(5, &mut rng);
            assert!((1..=MAX_HOPS).contains(&hops));
            seen[hops] = true;
        }
        assert!(seen[1] && seen[2] && seen[3]);

        for _ in 0..50 {
            assert!(draw_hop_count(2, &mut rng) <= 2);
            assert_eq!(draw_hop_count(1, &mut rng), 1);
        }
    }

    #[test]
    fn reason_serializes_as_text() {
        assert_eq!(
            serde_json::to_value(DelayReason::Medium).unwrap(),
            serde_json::json!("medium delay")
        );
    }
}
