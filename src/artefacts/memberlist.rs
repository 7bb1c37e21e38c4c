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

//! Participant-list embed for one qualified slot.

use std::collections::HashMap;

use crate::platform::{colors, Embed};
use crate::slots::memberlist_target_label;
use crate::store::Store;
use crate::types::Raid;
use crate::util::sha256_hex;

use super::plain_user_list;

pub fn memberlist_slot_embed(
	store: &Store,
	raid: &Raid,
	guild_name: &str,
	day_label: &str,
	time_label: &str,
	users: &[u64],
	names: &HashMap<u64, String>,
) -> Embed {
	let required_label = memberlist_target_label(raid.min_players);

	Embed::titled(format!("✅ Teilnehmerliste: {}", raid.dungeon))
		.description(format!("Server: **{}**\nRaid: `{}`", guild_name, raid.display_id))
		.color(colors::TEAL)
		.field("📅 Datum", format!("`{}`", day_label), true)
		.field("🕒 Uhrzeit", format!("`{}`", time_label), true)
		.field("👥 Teilnehmer", format!("`{} / {}`", users.len(), required_label), true)
		.field("Spielerliste", plain_user_list(store, raid.guild_id, users, 40, names), false)
		.footer("Automatisch aktualisiert durch DMW Bot")
}

/// Stable content hash of one slot's participant list, used to suppress
/// no-op edits of the posted message.
pub fn memberlist_payload_hash(raid: &Raid, day_label: &str, time_label: &str, users: &[u64]) -> String {
	let mut sorted = users.to_vec();
	sorted.sort_unstable();
	let user_list = sorted.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
	sha256_hex(&format!(
		"raid={}|display={}|min={}|day={}|time={}|users={}",
		raid.id, raid.display_id, raid.min_players, day_label, time_label, user_list
	))
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{TimeZone, Utc};

	fn raid() -> (Store, Raid) {
		let mut store = Store::new();
		store.ensure_settings(1, Some("Testgilde"));
		let raid = store.create_raid(1, 11, 100, "Skull", 0, Utc.ymd(2026, 2, 1).and_hms(12, 0, 0));
		(store, raid)
	}

	#[test]
	fn embed_shows_count_against_required_label() {
		let (store, raid) = raid();
		let embed =
			memberlist_slot_embed(&store, &raid, "Testgilde", "2026-02-13 (Fr)", "20:00", &[200, 201], &HashMap::new());
		let participants = embed.fields.iter().find(|field| field.name == "👥 Teilnehmer").unwrap();
		// min_players == 0 renders as the open-ended "1+"
		assert_eq!(participants.value, "`2 / 1+`");
		assert_eq!(embed.title.as_deref(), Some("✅ Teilnehmerliste: Skull"));
	}

	#[test]
	fn payload_hash_ignores_user_order() {
		let (_, raid) = raid();
		let a = memberlist_payload_hash(&raid, "2026-02-13", "20:00", &[1, 2, 3]);
		let b = memberlist_payload_hash(&raid, "2026-02-13", "20:00", &[3, 1, 2]);
		let c = memberlist_payload_hash(&raid, "2026-02-13", "20:00", &[1, 2]);
		assert_eq!(a, b);
		assert_ne!(a, c);
	}
}
