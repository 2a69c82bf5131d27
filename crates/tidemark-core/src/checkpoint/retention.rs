//! Retention planning for auto checkpoints.
//!
//! Pure policy: given the auto checkpoints that exist and the current time,
//! decide which ids to delete. Manual, branch, and rollback checkpoints are
//! never offered to this planner.

use crate::config::CheckpointConfig;

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Compute the auto-checkpoint ids to delete under the retention policy.
///
/// Rules, in order:
/// 1. anything older than `max_age_days` goes;
/// 2. everything within the last `keep_all_hours` stays;
/// 3. of the older remainder, only every Nth survives (oldest-first count);
/// 4. if the auto count still exceeds `max_auto_checkpoints`, the oldest
///    excess goes regardless of the rules above.
pub fn plan_deletions(
    auto_checkpoints: &[(String, i64)],
    now_ms: i64,
    config: &CheckpointConfig,
) -> Vec<String> {
    let mut sorted: Vec<(String, i64)> = auto_checkpoints.to_vec();
    sorted.sort_by_key(|(_, created_at)| *created_at);

    let old_cutoff = now_ms - config.max_age_days * DAY_MS;
    let recent_cutoff = now_ms - config.keep_all_hours * HOUR_MS;
    let keep_every_nth = config.keep_every_nth.max(1);

    let mut deletions: Vec<String> = Vec::new();

    for (i, (id, created_at)) in sorted.iter().enumerate() {
        if *created_at < old_cutoff {
            deletions.push(id.clone());
            continue;
        }
        if *created_at >= recent_cutoff {
            continue;
        }
        if i % keep_every_nth != 0 {
            deletions.push(id.clone());
        }
    }

    if sorted.len() > config.max_auto_checkpoints {
        let excess = sorted.len() - config.max_auto_checkpoints;
        for (id, _) in sorted.iter().take(excess) {
            if !deletions.contains(id) {
                deletions.push(id.clone());
            }
        }
    }

    deletions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        keep_all_hours: i64,
        keep_every_nth: usize,
        max_age_days: i64,
        max_auto_checkpoints: usize,
    ) -> CheckpointConfig {
        CheckpointConfig {
            keep_all_hours,
            keep_every_nth,
            max_age_days,
            max_auto_checkpoints,
            ..CheckpointConfig::default()
        }
    }

    fn checkpoints(ages_ms: &[i64], now: i64) -> Vec<(String, i64)> {
        ages_ms
            .iter()
            .enumerate()
            .map(|(i, age)| (format!("cp-{i}"), now - age))
            .collect()
    }

    #[test]
    fn test_recent_checkpoints_all_kept() {
        let now = 1_000_000_000_000;
        let cps = checkpoints(&[HOUR_MS / 2, HOUR_MS / 4, 0], now);
        let plan = plan_deletions(&cps, now, &config(24, 10, 30, 1000));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_ancient_checkpoints_deleted() {
        let now = 1_000_000_000_000;
        let cps = checkpoints(&[40 * DAY_MS, 35 * DAY_MS, HOUR_MS], now);
        let plan = plan_deletions(&cps, now, &config(24, 10, 30, 1000));
        assert_eq!(plan.len(), 2);
        assert!(plan.contains(&"cp-0".to_string()));
        assert!(plan.contains(&"cp-1".to_string()));
    }

    #[test]
    fn test_middle_band_keeps_every_nth() {
        let now = 1_000_000_000_000;
        // 10 checkpoints, all older than keep_all (1h) but younger than
        // max_age (30d); with nth=3 the oldest-first indexes 0,3,6,9 stay.
        let ages: Vec<i64> = (0..10).map(|i| (20 - i) * HOUR_MS).collect();
        let cps = checkpoints(&ages, now);
        let plan = plan_deletions(&cps, now, &config(1, 3, 30, 1000));
        assert_eq!(plan.len(), 6);
        for kept in ["cp-0", "cp-3", "cp-6", "cp-9"] {
            assert!(!plan.contains(&kept.to_string()));
        }
    }

    #[test]
    fn test_hard_cap_deletes_oldest_excess() {
        let now = 1_000_000_000_000;
        // 1200 auto checkpoints inside the keep-all window: the age rules
        // keep them all, the hard cap trims the 200 oldest.
        let ages: Vec<i64> = (0..1200).map(|i| i as i64 * 1000).collect();
        let cps = checkpoints(&ages, now);
        let plan = plan_deletions(&cps, now, &config(1, 10, 30, 1000));
        assert_eq!(plan.len(), 200);

        let survivors = cps.len() - plan.len();
        assert!(survivors <= 1000);
        // The newest checkpoint is untouched
        assert!(!plan.contains(&"cp-0".to_string()));
    }

    #[test]
    fn test_zero_nth_keeps_middle_band() {
        let now = 1_000_000_000_000;
        let cps = checkpoints(&[10 * HOUR_MS, 5 * HOUR_MS], now);
        // keep_every_nth = 0 would divide by zero; it clamps to "keep all"
        let plan = plan_deletions(&cps, now, &config(1, 0, 30, 1000));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_no_duplicate_deletions() {
        let now = 1_000_000_000_000;
        // Ancient checkpoints hit both the age rule and the hard cap
        let ages: Vec<i64> = (0..5).map(|i| (40 + i) * DAY_MS).collect();
        let cps = checkpoints(&ages, now);
        let plan = plan_deletions(&cps, now, &config(24, 10, 30, 2));
        let mut unique = plan.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(plan.len(), unique.len());
    }
}
