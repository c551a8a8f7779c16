use crate::models::attempt::SessionXpSummary;
use serde::{Deserialize, Serialize};

/// XP granted per answered item, correct or not.
pub const XP_PER_ANSWER: u64 = 2;
/// XP granted per item inside a correct run of length >= 2.
pub const STREAK_XP_PER_ITEM: u64 = 2;
/// XP granted per comeback (a correct answer directly after a miss).
pub const COMEBACK_XP: u64 = 3;
/// Flat bonus for finishing every item of the session.
pub const COMPLETION_XP: u64 = 10;

/// XP needed to go from `level` to `level + 1`.
pub fn xp_to_next_level(level: u32) -> u64 {
    100 + u64::from(level.saturating_sub(1)) * 50
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelProgress {
    pub level: u32,
    pub xp_into_level: u64,
    pub xp_for_next: u64,
}

/// Level reached with `xp` total XP, plus position inside the level.
/// Total over all inputs: negative XP clamps to zero.
pub fn compute_level_from_xp(xp: i64) -> LevelProgress {
    let mut remaining = u64::try_from(xp).unwrap_or(0);
    let mut level = 1u32;
    while remaining >= xp_to_next_level(level) {
        remaining -= xp_to_next_level(level);
        level += 1;
    }
    LevelProgress {
        level,
        xp_into_level: remaining,
        xp_for_next: xp_to_next_level(level),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct XpBreakdown {
    pub base: u64,
    pub streak_bonus: u64,
    pub comeback_bonus: u64,
    pub completion: u64,
}

impl XpBreakdown {
    pub fn total(&self) -> u64 {
        self.base + self.streak_bonus + self.comeback_bonus + self.completion
    }
}

/// Session XP from the answered-item summary: 2 per answer, 2 per item in
/// each correct run of length >= 2, 3 per comeback, 10 for completing the
/// whole session.
pub fn compute_session_xp(summary: &SessionXpSummary) -> XpBreakdown {
    let streak_bonus: u64 = summary
        .streaks
        .iter()
        .filter(|len| **len >= 2)
        .map(|len| STREAK_XP_PER_ITEM * u64::from(*len))
        .sum();
    XpBreakdown {
        base: XP_PER_ANSWER * u64::from(summary.answered),
        streak_bonus,
        comeback_bonus: COMEBACK_XP * u64::from(summary.comebacks),
        completion: if summary.completed { COMPLETION_XP } else { 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_level_cost_grows_by_fifty() {
        assert_eq!(xp_to_next_level(1), 100);
        assert_eq!(xp_to_next_level(2), 150);
        assert_eq!(xp_to_next_level(3), 200);
        assert_eq!(xp_to_next_level(10), 550);
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(compute_level_from_xp(0).level, 1);
        assert_eq!(compute_level_from_xp(99).level, 1);
        assert_eq!(compute_level_from_xp(100).level, 2);
        assert_eq!(compute_level_from_xp(249).level, 2);
        assert_eq!(compute_level_from_xp(250).level, 3);
        assert_eq!(compute_level_from_xp(449).level, 3);
        assert_eq!(compute_level_from_xp(450).level, 4);
    }

    #[test]
    fn progress_inside_level() {
        let p = compute_level_from_xp(100);
        assert_eq!(p.level, 2);
        assert_eq!(p.xp_into_level, 0);
        assert_eq!(p.xp_for_next, 150);

        let p = compute_level_from_xp(180);
        assert_eq!(p.level, 2);
        assert_eq!(p.xp_into_level, 80);
    }

    #[test]
    fn negative_xp_clamps_to_level_one() {
        let p = compute_level_from_xp(-50);
        assert_eq!(p.level, 1);
        assert_eq!(p.xp_into_level, 0);
        assert_eq!(p.xp_for_next, 100);
    }

    #[test]
    fn level_is_monotone_in_xp() {
        let mut last = 0;
        for xp in 0..2000i64 {
            let level = compute_level_from_xp(xp).level;
            assert!(level >= last, "level regressed at xp={}", xp);
            last = level;
        }
    }

    #[test]
    fn session_xp_reference_vector() {
        let summary = SessionXpSummary {
            answered: 3,
            correct: 3,
            streaks: vec![3],
            comebacks: 1,
            completed: true,
        };
        let breakdown = compute_session_xp(&summary);
        assert_eq!(breakdown.base, 6);
        assert_eq!(breakdown.streak_bonus, 6);
        assert_eq!(breakdown.comeback_bonus, 3);
        assert_eq!(breakdown.completion, 10);
        assert_eq!(breakdown.total(), 25);
    }

    #[test]
    fn completion_bonus_only_when_completed() {
        let summary = SessionXpSummary {
            answered: 3,
            correct: 3,
            streaks: vec![3],
            comebacks: 1,
            completed: false,
        };
        let breakdown = compute_session_xp(&summary);
        assert_eq!(breakdown.completion, 0);
        assert_eq!(breakdown.total(), 15);
    }

    #[test]
    fn short_runs_earn_no_streak_bonus() {
        let summary = SessionXpSummary {
            answered: 2,
            correct: 1,
            streaks: vec![1],
            comebacks: 0,
            completed: false,
        };
        assert_eq!(compute_session_xp(&summary).streak_bonus, 0);
    }
}
