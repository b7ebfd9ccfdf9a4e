//! Leveling math
//!
//! `threshold(level)` is the experience needed to advance from `level` to
//! `level + 1`: `floor(100 * level^1.5)`, computed with integer arithmetic as
//! `isqrt(10_000 * level^3)` so every level gets an exact floor.

use serde::{Deserialize, Serialize};

use super::ProgressionRecord;

/// Level transition produced by a single grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub previous: u32,
    pub current: u32,
}

impl LevelChange {
    pub fn unchanged(level: u32) -> Self {
        Self {
            previous: level,
            current: level,
        }
    }

    pub fn leveled_up(&self) -> bool {
        self.current > self.previous
    }
}

/// Experience required to advance from `level`. Levels below 1 count as 1.
#[must_use]
pub fn threshold(level: u32) -> u64 {
    let l = u128::from(level.max(1));
    let radicand = 10_000 * l * l * l;
    // l <= u32::MAX keeps the root well inside u64
    isqrt(radicand) as u64
}

fn isqrt(n: u128) -> u128 {
    let mut root = (n as f64).sqrt() as u128;
    while root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    root
}

/// Add `amount` experience to `record` and level it up as far as it goes.
///
/// `xp` and `total_xp` both grow by `amount`; then while `xp` covers the
/// current threshold and the level is below `max_level`, the threshold is
/// paid and the level increments. At `max_level` the remainder is dropped.
/// The loop runs at most `max_level` times.
pub fn apply_experience(record: &mut ProgressionRecord, amount: u64, max_level: u32) -> LevelChange {
    let max_level = max_level.max(1);
    let previous = record.level;
    if amount == 0 {
        return LevelChange::unchanged(previous);
    }

    record.xp = record.xp.saturating_add(amount);
    record.total_xp = record.total_xp.saturating_add(amount);
    record.level = record.level.max(1);

    while record.level < max_level {
        let needed = threshold(record.level);
        if record.xp < needed {
            break;
        }
        record.xp -= needed;
        record.level += 1;
    }

    if record.level >= max_level {
        record.level = max_level;
        record.xp = 0;
    }

    LevelChange {
        previous,
        current: record.level,
    }
}
