// Copyright 2024-2026 DMW Rewrite Contributors.
// This file is part of dmw-engine.

// dmw-engine is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// dmw-engine is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
// You should have received a copy of the GNU General Public License
// along with dmw-engine.  If not, see <http://www.gnu.org/licenses/>.

//! XP/level math. Level is a pure function of total XP.

/// Total XP threshold required to be at a given level.
/// Sum of the arithmetic level-up steps 100, 150, 200, ...:
/// `threshold(level) = 25*level^2 + 75*level`.
pub fn xp_needed_for_level(level: u32) -> u64 {
	let level = u64::from(level);
	25 * level * level + 75 * level
}

/// Integer inverse of [`xp_needed_for_level`].
/// `level = floor((-75 + sqrt(5625 + 100*xp)) / 50)`, corrected by one step
/// up/down for integer sqrt rounding at the thresholds.
pub fn level_from_xp(total_xp: u64) -> u32 {
	let discriminant = 5625u128 + 100u128 * u128::from(total_xp);
	let root = int_sqrt(discriminant);
	let mut level = if root > 75 { ((root - 75) / 50) as u32 } else { 0 };

	while xp_needed_for_level(level + 1) <= total_xp {
		level += 1;
	}
	while level > 0 && xp_needed_for_level(level) > total_xp {
		level -= 1;
	}
	level
}

fn int_sqrt(value: u128) -> u128 {
	if value == 0 {
		return 0;
	}
	let mut x = (value as f64).sqrt() as u128;
	while (x + 1) * (x + 1) <= value {
		x += 1;
	}
	while x * x > value {
		x -= 1;
	}
	x
}

/// XP gained within the current level, the level's span, and the fill percent.
pub fn xp_progress(total_xp: u64, level: u32) -> (u64, u64, u8) {
	let start = xp_needed_for_level(level);
	let next = xp_needed_for_level(level + 1);
	let span = (next - start).max(1);
	let gained = total_xp.saturating_sub(start).min(span);
	let percent = (gained * 100 / span) as u8;
	(gained, span, percent)
}

/// Text progress bar for the id-card embed.
pub fn progress_bar(progress: u64, total: u64, width: usize) -> String {
	let total = total.max(1);
	let progress = progress.min(total);
	let width = width.max(8);
	let filled = ((progress as f64 / total as f64) * width as f64).round() as usize;
	let filled = filled.min(width);
	format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn thresholds_match_known_values() {
		assert_eq!(xp_needed_for_level(0), 0);
		assert_eq!(xp_needed_for_level(1), 100);
		assert_eq!(xp_needed_for_level(2), 250);
		assert_eq!(xp_needed_for_level(3), 450);
	}

	#[test]
	fn level_roundtrips_over_thresholds() {
		for level in 0..=200 {
			assert_eq!(level_from_xp(xp_needed_for_level(level)), level, "level {}", level);
			if level > 0 {
				assert_eq!(level_from_xp(xp_needed_for_level(level) - 1), level - 1);
			}
		}
	}

	#[test]
	fn level_is_monotone_in_xp() {
		let mut last = 0;
		for xp in (0..100_000).step_by(37) {
			let level = level_from_xp(xp);
			assert!(level >= last);
			last = level;
		}
	}

	#[test]
	fn progress_stats_stay_in_bounds() {
		let (gained, span, percent) = xp_progress(120, 1);
		assert_eq!(span, 150);
		assert_eq!(gained, 20);
		assert!(percent <= 100);
	}

	#[test]
	fn progress_bar_has_fixed_width() {
		let bar = progress_bar(5, 10, 16);
		assert_eq!(bar.len(), 18);
		assert!(bar.starts_with('['));
		assert!(bar.ends_with(']'));
		assert_eq!(progress_bar(0, 10, 16), format!("[{}]", "-".repeat(16)));
		assert_eq!(progress_bar(10, 10, 16), format!("[{}]", "#".repeat(16)));
	}
}
