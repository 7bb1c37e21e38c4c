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

//! Monthly raid calendar: a 5x7 day grid starting at the month's first day,
//! each cell annotated with its entry count, detail lines below.
//!
//! Entry collectors are pluggable; today the only source is open raids'
//! parseable day options inside the month.

use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, NaiveDate};

use crate::config::{CALENDAR_GRID_COLUMNS, CALENDAR_GRID_ROWS};
use crate::platform::{colors, Embed};
use crate::slots::parse_day_label;
use crate::store::Store;
use crate::types::CalendarEntry;
use crate::util::{clamp_field, sha256_hex};

const MONTH_NAMES_DE: [&str; 12] = [
	"Januar",
	"Februar",
	"Maerz",
	"April",
	"Mai",
	"Juni",
	"Juli",
	"August",
	"September",
	"Oktober",
	"November",
	"Dezember",
];

pub fn month_start(date: NaiveDate) -> NaiveDate {
	NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

pub fn month_end(start: NaiveDate) -> NaiveDate {
	let (year, month) = if start.month() == 12 { (start.year() + 1, 1) } else { (start.year(), start.month() + 1) };
	NaiveDate::from_ymd_opt(year, month, 1)
		.and_then(|next| next.pred_opt())
		.unwrap_or(start)
}

/// Open raids' day options within the month, deduped per raid per date.
pub fn collect_raid_entries(store: &Store, guild_id: u64, start: NaiveDate, end: NaiveDate) -> Vec<CalendarEntry> {
	let mut entries = Vec::new();
	for raid in store.list_open_raids(Some(guild_id)) {
		let (days, _times) = store.list_raid_options(raid.id);
		let mut seen: HashSet<NaiveDate> = HashSet::new();
		for label in days {
			let date = match parse_day_label(&label) {
				Some(date) => date,
				None => continue,
			};
			if date < start || date > end || !seen.insert(date) {
				continue;
			}
			entries.push(CalendarEntry {
				entry_date: date,
				label: format!("#{} {}", raid.display_id, raid.dungeon),
				source: "raid",
			});
		}
	}
	entries
}

pub struct CalendarArtefact {
	pub embed: Embed,
	pub payload_hash: String,
}

pub fn calendar_embed(guild_name: &str, start: NaiveDate, entries: &[CalendarEntry]) -> CalendarArtefact {
	let mut per_day: BTreeMap<u32, Vec<&CalendarEntry>> = BTreeMap::new();
	for entry in entries {
		per_day.entry(entry.entry_date.day()).or_default().push(entry);
	}

	let days_in_month = month_end(start).day();
	let mut grid_lines = Vec::with_capacity(CALENDAR_GRID_ROWS);
	for row in 0..CALENDAR_GRID_ROWS {
		let mut cells = Vec::with_capacity(CALENDAR_GRID_COLUMNS);
		for column in 0..CALENDAR_GRID_COLUMNS {
			let day = (row * CALENDAR_GRID_COLUMNS + column) as u32 + 1;
			if day > days_in_month {
				cells.push("    ".to_string());
				continue;
			}
			match per_day.get(&day).map(|list| list.len()).unwrap_or(0) {
				0 => cells.push(format!("{:>2} .", day)),
				count => cells.push(format!("{:>2}({})", day, count)),
			}
		}
		grid_lines.push(cells.join("  "));
	}

	let month_name = MONTH_NAMES_DE[start.month0() as usize];
	let mut embed = Embed::titled(format!("📆 Raid Kalender: {} {}", month_name, start.year()))
		.description(format!("Server: **{}**\n```\n{}\n```", guild_name, grid_lines.join("\n")))
		.color(colors::GOLD);

	let mut detail_lines = Vec::new();
	for (day, list) in &per_day {
		let labels = list.iter().map(|entry| entry.label.clone()).collect::<Vec<_>>().join(", ");
		detail_lines.push(format!("**{:02}.{:02}** — {}", day, start.month(), labels));
	}
	if !detail_lines.is_empty() {
		embed = embed.field("Termine", clamp_field(&detail_lines.join("\n"), super::EMBED_FIELD_LIMIT), false);
	}
	embed = embed.footer("Automatisch aktualisiert • DMW Bot");

	let mut payload_parts = vec![format!("month={}-{:02}", start.year(), start.month()), format!("name={}", guild_name)];
	for entry in entries {
		payload_parts.push(format!("{}|{}|{}", entry.entry_date, entry.source, entry.label));
	}
	payload_parts.sort();

	CalendarArtefact { embed, payload_hash: sha256_hex(&payload_parts.join("\n")) }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::OptionKind;
	use chrono::{TimeZone, Utc};

	#[test]
	fn month_bounds() {
		let start = month_start(NaiveDate::from_ymd_opt(2026, 2, 13).unwrap());
		assert_eq!(start, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
		assert_eq!(month_end(start), NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
		let december = month_start(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
		assert_eq!(month_end(december), NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
	}

	#[test]
	fn collects_only_parseable_in_month_days() {
		let mut store = Store::new();
		let raid = store.create_raid(1, 11, 100, "Nanos", 0, Utc.ymd(2026, 2, 1).and_hms(0, 0, 0));
		store.add_raid_options(raid.id, vec!["2026-02-13 (Fr)", "2026-03-01", "irgendwann", "2026-02-13"], vec!["20:00"]);
		store.toggle_vote(raid.id, OptionKind::Day, "2026-02-13 (Fr)", 1);

		let start = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
		let entries = collect_raid_entries(&store, 1, start, month_end(start));
		// the duplicate date and the out-of-month/unparseable labels drop out
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].label, "#1 Nanos");
	}

	#[test]
	fn grid_annotates_entry_counts() {
		let start = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
		let entries = vec![
			CalendarEntry { entry_date: NaiveDate::from_ymd_opt(2026, 2, 13).unwrap(), label: "#1 Nanos".into(), source: "raid" },
			CalendarEntry { entry_date: NaiveDate::from_ymd_opt(2026, 2, 13).unwrap(), label: "#2 Skull".into(), source: "raid" },
		];
		let artefact = calendar_embed("Testgilde", start, &entries);
		let description = artefact.embed.description.as_deref().unwrap();
		assert!(description.contains("13(2)"));
		let details = artefact.embed.fields.iter().find(|field| field.name == "Termine").unwrap();
		assert!(details.value.contains("**13.02** — #1 Nanos, #2 Skull"));
	}

	#[test]
	fn payload_hash_tracks_entries() {
		let start = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
		let empty = calendar_embed("Testgilde", start, &[]);
		let entry = CalendarEntry {
			entry_date: NaiveDate::from_ymd_opt(2026, 2, 13).unwrap(),
			label: "#1 Nanos".into(),
			source: "raid",
		};
		let filled = calendar_embed("Testgilde", start, &[entry]);
		assert_ne!(empty.payload_hash, filled.payload_hash);
	}
}
