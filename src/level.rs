use serde::{Deserialize, Serialize};

/// Points per level unit: level L starts at L² × 100.
pub const POINTS_PER_LEVEL_UNIT: u64 = 100;

/// floor(sqrt(balance / 100)), computed on integers so large balances stay exact.
pub fn level_for_balance(balance: u64) -> u64 {
    if balance < POINTS_PER_LEVEL_UNIT {
        return 0;
    }
    // floor(sqrt(x / 100)) == isqrt(floor(x / 100)) for x >= 0
    (balance / POINTS_PER_LEVEL_UNIT).isqrt()
}

pub fn threshold_for_level(level: u64) -> u128 {
    (level as u128) * (level as u128) * POINTS_PER_LEVEL_UNIT as u128
}

/// Position between the current and next threshold, in [0, 100).
pub fn progress_within_level(balance: u64) -> f64 {
    let level = level_for_balance(balance);
    let lo = threshold_for_level(level);
    let hi = threshold_for_level(level + 1);
    if hi == lo {
        return 100.0;
    }
    100.0 * (balance as u128 - lo) as f64 / (hi - lo) as f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub balance: u64,
    pub level: u64,
    pub progress: f64,
    pub current_threshold: u128,
    pub next_threshold: u128,
    pub points_to_next: u128,
}

impl LevelSummary {
    pub fn for_balance(balance: u64) -> Self {
        let level = level_for_balance(balance);
        let current_threshold = threshold_for_level(level);
        let next_threshold = threshold_for_level(level + 1);
        Self {
            balance,
            level,
            progress: progress_within_level(balance),
            current_threshold,
            next_threshold,
            points_to_next: next_threshold.saturating_sub(balance as u128),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_invert_levels() {
        for level in 0..50u64 {
            let t = threshold_for_level(level) as u64;
            assert_eq!(level_for_balance(t), level);
            if level > 0 {
                assert_eq!(level_for_balance(t - 1), level - 1);
            }
        }
    }

    #[test]
    fn reference_points() {
        assert_eq!(level_for_balance(0), 0);
        assert_eq!(progress_within_level(0), 0.0);
        assert_eq!(level_for_balance(99), 0);
        assert_eq!(level_for_balance(100), 1);
        assert_eq!(level_for_balance(400), 2);
        assert_eq!(level_for_balance(250), 1);
        assert_eq!(progress_within_level(250), 50.0);
    }

    #[test]
    fn progress_is_monotonic_within_a_level_and_resets() {
        let mut last = -1.0;
        for xp in 400..900 {
            let p = progress_within_level(xp);
            assert!(p >= last && p < 100.0);
            last = p;
        }
        assert_eq!(progress_within_level(900), 0.0);
        assert!(progress_within_level(899) > 99.0);
    }

    #[test]
    fn large_balances_stay_exact() {
        // well past 2^53 where float sqrt would round
        let level = 3_037_000_000u64 / 10;
        let t = threshold_for_level(level) as u64;
        assert_eq!(level_for_balance(t), level);
        assert_eq!(level_for_balance(t - 1), level - 1);
        assert_eq!(level_for_balance(u64::MAX), 429_496_729);
        let p = progress_within_level(u64::MAX);
        assert!((0.0..100.0).contains(&p));
    }

    #[test]
    fn summary() {
        let s = LevelSummary::for_balance(250);
        assert_eq!(s.level, 1);
        assert_eq!(s.current_threshold, 100);
        assert_eq!(s.next_threshold, 400);
        assert_eq!(s.points_to_next, 150);
        assert_eq!(s.progress, 50.0);
    }
}
