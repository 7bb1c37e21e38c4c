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

//! The planner embed: per-option vote counts and the list of users who
//! voted both a day and a time.

use std::collections::{HashMap, HashSet};

use crate::platform::{colors, Embed};
use crate::store::Store;
use crate::types::Raid;

use super::plain_user_list;

fn count_lines(counts: &HashMap<String, usize>) -> String {
	if counts.is_empty() {
		return "—".to_string();
	}
	let mut entries: Vec<(&String, &usize)> = counts.iter().collect();
	entries.sort_by(|a, b| (-(*a.1 as i64), a.0.to_lowercase()).cmp(&(-(*b.1 as i64), b.0.to_lowercase())));
	entries.iter().map(|(label, count)| format!("• **{}** — `{}`", label, count)).collect::<Vec<_>>().join("\n")
}

/// Users that voted at least one day and at least one time.
pub fn complete_voters(store: &Store, raid_id: u64) -> Vec<u64> {
	let (day_users, time_users) = store.vote_user_sets(raid_id);
	let day_voters: HashSet<u64> = day_users.values().flatten().copied().collect();
	let time_voters: HashSet<u64> = time_users.values().flatten().copied().collect();
	let mut voters: Vec<u64> = day_voters.intersection(&time_voters).copied().collect();
	voters.sort_unstable();
	voters
}

pub fn planner_embed(store: &Store, raid: &Raid, names: &HashMap<u64, String>) -> Embed {
	let counts = store.vote_counts(raid.id);
	let voters = complete_voters(store, raid.id);

	Embed::titled(format!("🗓️ Raid Planer: {}", raid.dungeon))
		.description(format!("Raid ID: `{}`", raid.display_id))
		.color(colors::BLURPLE)
		.field("Min Spieler pro Slot", raid.min_players.to_string(), true)
		.field("📅 Tage Votes", count_lines(&counts.day), false)
		.field("🕒 Uhrzeiten Votes", count_lines(&counts.time), false)
		.field(
			"✅ Vollständig abgestimmt (Tag + Zeit)",
			plain_user_list(store, raid.guild_id, &voters, 30, names),
			false,
		)
		.footer("Wähle Tag und Uhrzeit. Namensliste ohne @-Mention.")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::OptionKind;
	use chrono::{TimeZone, Utc};

	fn seeded_store() -> (Store, Raid) {
		let mut store = Store::new();
		store.ensure_settings(1, Some("Testgilde"));
		let raid = store.create_raid(1, 11, 100, "Nanos", 1, Utc.ymd(2026, 2, 1).and_hms(12, 0, 0));
		store.add_raid_options(raid.id, vec!["2026-02-13 (Fr)"], vec!["20:00"]);
		(store, raid)
	}

	#[test]
	fn complete_voters_require_both_kinds() {
		let (mut store, raid) = seeded_store();
		store.toggle_vote(raid.id, OptionKind::Day, "2026-02-13 (Fr)", 200);
		assert!(complete_voters(&store, raid.id).is_empty());

		store.toggle_vote(raid.id, OptionKind::Time, "20:00", 200);
		assert_eq!(complete_voters(&store, raid.id), vec![200]);
	}

	#[test]
	fn planner_embed_lists_counts_and_complete_voters() {
		let (mut store, raid) = seeded_store();
		store.toggle_vote(raid.id, OptionKind::Day, "2026-02-13 (Fr)", 200);
		store.toggle_vote(raid.id, OptionKind::Time, "20:00", 200);
		store.get_or_create_user_level(1, 200, Some("Raider"));

		let raid = store.get_raid(raid.id).unwrap().clone();
		let embed = planner_embed(&store, &raid, &HashMap::new());

		assert_eq!(embed.title.as_deref(), Some("🗓️ Raid Planer: Nanos"));
		assert_eq!(embed.description.as_deref(), Some("Raid ID: `1`"));
		let complete = embed
			.fields
			.iter()
			.find(|field| field.name.contains("Vollständig abgestimmt"))
			.expect("complete-voter field");
		assert!(complete.value.contains("Raider"));
		let days = embed.fields.iter().find(|field| field.name.contains("Tage Votes")).unwrap();
		assert!(days.value.contains("`1`"));
	}

	#[test]
	fn count_lines_sort_by_count_then_label() {
		let mut counts = HashMap::new();
		counts.insert("Beta".to_string(), 1);
		counts.insert("alpha".to_string(), 1);
		counts.insert("Gamma".to_string(), 3);
		let lines = count_lines(&counts);
		let order: Vec<usize> =
			["Gamma", "alpha", "Beta"].iter().map(|label| lines.find(label).expect("label present")).collect();
		assert!(order[0] < order[1] && order[1] < order[2]);
	}
}
