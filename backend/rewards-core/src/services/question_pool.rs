use crate::content::{ContentStore, Exercise, Reading};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;

/// Share of the requested count that may be hard questions, as a divisor.
const HARD_SHARE_DIVISOR: usize = 5;

/// Samples questions for a rebuild-zone session: per-tag pools are shuffled
/// and drained round-robin so every tag with content contributes, duplicate
/// ids are kept once, and questions with difficulty above 2 are capped at
/// ceil(desired / 5) when `allow_harder` and excluded entirely otherwise.
/// Missing content degrades to a shorter (possibly empty) selection.
pub fn select_rebuild_zone_questions(
    content: &dyn ContentStore,
    zone_tags: &[String],
    desired_count: usize,
    allow_harder: bool,
    rng: &mut impl Rng,
) -> Vec<Exercise> {
    if desired_count == 0 || zone_tags.is_empty() {
        return Vec::new();
    }
    let hard_cap = if allow_harder {
        desired_count.div_ceil(HARD_SHARE_DIVISOR)
    } else {
        0
    };

    let mut pools: Vec<Vec<Exercise>> = zone_tags
        .iter()
        .map(|tag| {
            let mut pool = content.list_exercises_by_tag(tag);
            pool.shuffle(rng);
            pool
        })
        .collect();

    let mut selected: Vec<Exercise> = Vec::with_capacity(desired_count);
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut hard_used = 0usize;

    let mut sweep_contributed = true;
    while selected.len() < desired_count && sweep_contributed {
        sweep_contributed = false;
        for pool in pools.iter_mut() {
            if selected.len() >= desired_count {
                break;
            }
            while let Some(exercise) = pool.pop() {
                if seen.contains(&exercise.id) {
                    continue;
                }
                if exercise.difficulty > 2 && hard_used >= hard_cap {
                    continue;
                }
                seen.insert(exercise.id.clone());
                if exercise.difficulty > 2 {
                    hard_used += 1;
                }
                selected.push(exercise);
                sweep_contributed = true;
                break;
            }
        }
    }
    selected
}

/// Readings shown alongside a rebuild zone, random subset of the theme.
pub fn select_zone_readings(
    content: &dyn ContentStore,
    theme: &str,
    desired_count: usize,
    rng: &mut impl Rng,
) -> Vec<Reading> {
    let mut readings = content.list_readings(theme);
    readings.shuffle(rng);
    readings.truncate(desired_count);
    readings
}
