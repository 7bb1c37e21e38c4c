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

//! Slot qualification and slot-start wall-clock math.
//!
//! A slot `(day, time)` is qualified iff the intersection of its day-voters
//! and time-voters reaches `max(1, min_players)`. Day labels are free-form
//! but dates parse as `YYYY-MM-DD` (anywhere in the label) or `DD.MM.YYYY`;
//! times as `HH:MM`. Slot starts are that wall-clock in Europe/Berlin.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{offset::LocalResult, DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Europe::Berlin;
use chrono_tz::Tz;

pub fn memberlist_threshold(min_players: u32) -> usize {
	if min_players > 0 {
		min_players as usize
	} else {
		1
	}
}

pub fn memberlist_target_label(min_players: u32) -> String {
	if min_players > 0 {
		min_players.to_string()
	} else {
		"1+".to_string()
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualifiedSlot {
	pub day: String,
	pub time: String,
	/// Sorted, deduplicated voter ids.
	pub users: Vec<u64>,
}

/// All qualified slots of a raid in days-by-times order, plus the union of
/// their voters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QualifiedSlots {
	pub slots: Vec<QualifiedSlot>,
	pub all_users: BTreeSet<u64>,
}

impl QualifiedSlots {
	pub fn len(&self) -> usize {
		self.slots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	pub fn contains(&self, day: &str, time: &str) -> bool {
		self.slots.iter().any(|slot| slot.day == day && slot.time == time)
	}

	pub fn get(&self, day: &str, time: &str) -> Option<&QualifiedSlot> {
		self.slots.iter().find(|slot| slot.day == day && slot.time == time)
	}
}

pub fn qualified_slot_users(
	days: &[String],
	times: &[String],
	day_users: &HashMap<String, HashSet<u64>>,
	time_users: &HashMap<String, HashSet<u64>>,
	threshold: usize,
) -> QualifiedSlots {
	let mut qualified = QualifiedSlots::default();
	let empty = HashSet::new();

	for day in days {
		let for_day = day_users.get(day).unwrap_or(&empty);
		for time in times {
			let for_time = time_users.get(time).unwrap_or(&empty);
			let mut users: Vec<u64> = for_day.intersection(for_time).copied().collect();
			if users.len() < threshold {
				continue;
			}
			users.sort_unstable();
			qualified.all_users.extend(users.iter().copied());
			qualified.slots.push(QualifiedSlot { day: day.clone(), time: time.clone(), users });
		}
	}

	qualified
}

/// Parse a date out of a day label. `2026-02-13 (Fr)` and `13.02.2026` both work.
pub fn parse_day_label(label: &str) -> Option<NaiveDate> {
	let text = label.trim();
	if let Some(date) = find_iso_date(text) {
		return Some(date);
	}
	find_dotted_date(text)
}

fn digits(bytes: &[u8]) -> Option<u32> {
	if bytes.iter().all(|b| b.is_ascii_digit()) {
		std::str::from_utf8(bytes).ok()?.parse().ok()
	} else {
		None
	}
}

fn find_iso_date(text: &str) -> Option<NaiveDate> {
	let bytes = text.as_bytes();
	if bytes.len() < 10 {
		return None;
	}
	for start in 0..=bytes.len() - 10 {
		let window = &bytes[start..start + 10];
		if window[4] != b'-' || window[7] != b'-' {
			continue;
		}
		let (year, month, day) = match (digits(&window[0..4]), digits(&window[5..7]), digits(&window[8..10])) {
			(Some(y), Some(m), Some(d)) => (y, m, d),
			_ => continue,
		};
		if let Some(date) = NaiveDate::from_ymd_opt(year as i32, month, day) {
			return Some(date);
		}
		return None;
	}
	None
}

fn find_dotted_date(text: &str) -> Option<NaiveDate> {
	let bytes = text.as_bytes();
	if bytes.len() < 10 {
		return None;
	}
	for start in 0..=bytes.len() - 10 {
		let window = &bytes[start..start + 10];
		if window[2] != b'.' || window[5] != b'.' {
			continue;
		}
		let (day, month, year) = match (digits(&window[0..2]), digits(&window[3..5]), digits(&window[6..10])) {
			(Some(d), Some(m), Some(y)) => (d, m, y),
			_ => continue,
		};
		if let Some(date) = NaiveDate::from_ymd_opt(year as i32, month, day) {
			return Some(date);
		}
		return None;
	}
	None
}

/// Parse `H:MM` / `HH:MM` (`.` also accepted as separator).
pub fn parse_time_label(label: &str) -> Option<(u32, u32)> {
	let text = label.trim();
	let separator = text.find(|c| c == ':' || c == '.')?;
	let (hour_text, minute_text) = text.split_at(separator);
	let minute_text = &minute_text[1..];
	if hour_text.is_empty() || hour_text.len() > 2 || minute_text.len() != 2 {
		return None;
	}
	let hour = digits(hour_text.as_bytes())?;
	let minute = digits(minute_text.as_bytes())?;
	if hour > 23 || minute > 59 {
		return None;
	}
	Some((hour, minute))
}

/// Slot start as a Berlin wall-clock instant. `None` when either label does
/// not parse or the wall-clock does not exist (DST gap).
pub fn slot_start_berlin(day_label: &str, time_label: &str) -> Option<DateTime<Tz>> {
	let date = parse_day_label(day_label)?;
	let (hour, minute) = parse_time_label(time_label)?;
	let naive = date.and_hms_opt(hour, minute, 0)?;
	match Berlin.from_local_datetime(&naive) {
		LocalResult::Single(start) => Some(start),
		LocalResult::Ambiguous(earliest, _) => Some(earliest),
		LocalResult::None => None,
	}
}

pub fn slot_start_utc(day_label: &str, time_label: &str) -> Option<DateTime<Utc>> {
	slot_start_berlin(day_label, time_label).map(|start| start.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Timelike;

	fn users(ids: &[u64]) -> HashSet<u64> {
		ids.iter().copied().collect()
	}

	#[test]
	fn threshold_floors_at_one() {
		assert_eq!(memberlist_threshold(0), 1);
		assert_eq!(memberlist_threshold(4), 4);
		assert_eq!(memberlist_target_label(0), "1+");
		assert_eq!(memberlist_target_label(3), "3");
	}

	#[test]
	fn qualification_requires_intersection_of_day_and_time() {
		let days = vec!["2026-02-13 (Fr)".to_string()];
		let times = vec!["20:00".to_string()];
		let mut day_users = HashMap::new();
		day_users.insert(days[0].clone(), users(&[1, 2, 3]));
		let mut time_users = HashMap::new();
		time_users.insert(times[0].clone(), users(&[2, 3, 4]));

		let qualified = qualified_slot_users(&days, &times, &day_users, &time_users, 2);
		assert_eq!(qualified.len(), 1);
		assert_eq!(qualified.slots[0].users, vec![2, 3]);
		assert!(qualified.contains("2026-02-13 (Fr)", "20:00"));

		let too_strict = qualified_slot_users(&days, &times, &day_users, &time_users, 3);
		assert!(too_strict.is_empty());
		assert!(too_strict.all_users.is_empty());
	}

	#[test]
	fn qualification_iterates_days_by_times() {
		let days = vec!["a".to_string(), "b".to_string()];
		let times = vec!["10:00".to_string(), "11:00".to_string()];
		let everyone = users(&[7]);
		let day_users: HashMap<_, _> = days.iter().map(|d| (d.clone(), everyone.clone())).collect();
		let time_users: HashMap<_, _> = times.iter().map(|t| (t.clone(), everyone.clone())).collect();

		let qualified = qualified_slot_users(&days, &times, &day_users, &time_users, 1);
		let order: Vec<(String, String)> =
			qualified.slots.iter().map(|slot| (slot.day.clone(), slot.time.clone())).collect();
		assert_eq!(
			order,
			vec![
				("a".into(), "10:00".into()),
				("a".into(), "11:00".into()),
				("b".into(), "10:00".into()),
				("b".into(), "11:00".into()),
			]
		);
	}

	#[test]
	fn day_labels_parse_iso_and_dotted() {
		let expected = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
		assert_eq!(parse_day_label("2026-02-13 (Fr)"), Some(expected));
		assert_eq!(parse_day_label("13.02.2026"), Some(expected));
		assert_eq!(parse_day_label("Freitag 13.02.2026 abends"), Some(expected));
		assert_eq!(parse_day_label("Freitag"), None);
		assert_eq!(parse_day_label("2026-13-40"), None);
	}

	#[test]
	fn time_labels_parse_hours_and_minutes() {
		assert_eq!(parse_time_label("20:00"), Some((20, 0)));
		assert_eq!(parse_time_label(" 8:30 "), Some((8, 30)));
		assert_eq!(parse_time_label("20.15"), Some((20, 15)));
		assert_eq!(parse_time_label("24:00"), None);
		assert_eq!(parse_time_label("20:0"), None);
		assert_eq!(parse_time_label("abends"), None);
	}

	#[test]
	fn slot_start_is_berlin_wall_clock() {
		let start = slot_start_utc("2026-02-13 (Fr)", "20:00").unwrap();
		// Berlin is UTC+1 in February.
		assert_eq!(start.hour(), 19);
		assert_eq!(start.minute(), 0);

		let summer = slot_start_utc("2026-07-13", "20:00").unwrap();
		assert_eq!(summer.hour(), 18);
	}
}
