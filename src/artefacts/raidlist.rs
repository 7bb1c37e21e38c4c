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

//! The tenant-wide raidlist: one live overview message per guild showing up
//! to 25 open raids. The producer also returns a stable payload hash used
//! by the orchestrator to suppress no-op republishing.

use chrono::{DateTime, Utc};
use itertools::Itertools;

use crate::config::{DEFAULT_TIMEZONE_NAME, RAIDLIST_MAX_RAIDS};
use crate::platform::{colors, Embed};
use crate::slots::{memberlist_target_label, memberlist_threshold, qualified_slot_users, slot_start_utc};
use crate::store::Store;
use crate::util::{clamp_field, sha256_hex};

use super::planner::complete_voters;
use super::EMBED_FIELD_LIMIT;

pub struct RaidlistArtefact {
	pub embed: Embed,
	pub payload_hash: String,
	pub debug_lines: Vec<String>,
}

fn jump_url(guild_id: u64, channel_id: u64, message_id: Option<u64>) -> String {
	match message_id {
		Some(message_id) => {
			format!("https://discord.com/channels/{}/{}/{}", guild_id, channel_id, message_id)
		}
		None => "`(noch kein Link)`".to_string(),
	}
}

pub fn raidlist_embed(store: &Store, guild_id: u64, guild_name: &str, now: DateTime<Utc>) -> RaidlistArtefact {
	let raids = store.list_open_raids(Some(guild_id));
	let mut embed = Embed::titled("📋 Raidlist").color(colors::GOLD).timestamp(now);
	let mut debug_lines = Vec::new();
	let mut payload_parts = vec![format!("guild={}", guild_id), format!("name={}", guild_name)];

	if raids.is_empty() {
		embed.description = Some(format!("**Server:** {}\n**Status:** Keine offenen Raids", guild_name));
		embed = embed.footer("Automatisch aktualisiert • DMW Bot");
		payload_parts.push("empty=1".to_string());
		return RaidlistArtefact {
			embed,
			payload_hash: sha256_hex(&payload_parts.join("\n")),
			debug_lines: vec!["- Keine offenen Raids.".to_string()],
		};
	}

	embed = embed.field("ℹ️ Overview", format!("**Server:** {}", guild_name), false);

	let mut total_qualified_slots = 0;
	let mut global_next_start: Option<DateTime<Utc>> = None;
	let mut global_next_label = "—".to_string();

	for raid in raids.iter().take(RAIDLIST_MAX_RAIDS) {
		let (days, times) = store.list_raid_options(raid.id);
		let (day_users, time_users) = store.vote_user_sets(raid.id);
		let threshold = memberlist_threshold(raid.min_players);
		let qualified = qualified_slot_users(&days, &times, &day_users, &time_users, threshold);
		let complete = complete_voters(store, raid.id).len();

		let mut slot_starts: Vec<(DateTime<Utc>, &str, &str)> = qualified
			.slots
			.iter()
			.filter_map(|slot| {
				slot_start_utc(&slot.day, &slot.time).map(|start| (start, slot.day.as_str(), slot.time.as_str()))
			})
			.collect();
		slot_starts.sort_by_key(|(start, ..)| *start);

		let mut next_slot_text = "—".to_string();
		if !slot_starts.is_empty() {
			let chosen = slot_starts.iter().find(|(start, ..)| *start >= now).unwrap_or(&slot_starts[0]);
			let (start, day, time) = *chosen;
			let unix = start.timestamp();
			next_slot_text = format!("\n**{} {}** • <t:{}:f> (<t:{}:R>)", day, time, unix, unix);

			let replaces_global = match global_next_start {
				None => true,
				Some(current) => start >= now && (current < now || start < current),
			};
			if replaces_global {
				global_next_start = Some(start);
				global_next_label = format!("Raid `{}` {} {}", raid.display_id, day, time);
			}
		}

		total_qualified_slots += qualified.len();
		let url = jump_url(guild_id, raid.channel_id, raid.message_id);
		let required_label = memberlist_target_label(raid.min_players);

		let field_name = format!("🎮 Raid #{} — {}", raid.display_id, raid.dungeon);
		let field_value = format!(
			"**Minimum:** `{}`\n**Qualifizierte Slots:** `{}`\n**Abstimmungen:** `{}` vollständig\n**Zeitzone:** `{}`\n**Nächster Termin:** {}\n[Raid ansehen]({})",
			required_label,
			qualified.len(),
			complete,
			DEFAULT_TIMEZONE_NAME,
			next_slot_text,
			url,
		);
		embed = embed.field(clamp_field(&field_name, 256), clamp_field(&field_value, EMBED_FIELD_LIMIT), false);

		debug_lines.push(format!(
			"- Raid {} ({}) tz={} slots={} next={}",
			raid.display_id,
			raid.dungeon,
			DEFAULT_TIMEZONE_NAME,
			qualified.len(),
			next_slot_text,
		));
		payload_parts.push(
			[
				format!("raid={}", raid.id),
				format!("display={}", raid.display_id),
				format!("dungeon={}", raid.dungeon),
				format!("creator={}", raid.creator_id),
				format!("min={}", raid.min_players),
				format!("tz={}", DEFAULT_TIMEZONE_NAME),
				format!("days={}", days.iter().sorted().join(",")),
				format!("times={}", times.iter().sorted().join(",")),
				format!(
					"qualified={}",
					qualified.slots.iter().map(|slot| format!("{}@{}", slot.day, slot.time)).sorted().join(",")
				),
				format!("msg={}", raid.message_id.unwrap_or(0)),
			]
			.join("|"),
		);
	}

	let mut summary_parts = vec![
		format!("**Raids:** `{}`", raids.len()),
		format!("**Slots:** `{}`", total_qualified_slots),
		format!("**Zone:** `{}`", DEFAULT_TIMEZONE_NAME),
	];
	if global_next_start.is_some() {
		summary_parts.push(format!("🕐 Nächster Start: {}", global_next_label));
	}
	embed = embed.field("📊 Statistik", summary_parts.join(" | "), false).footer("Automatisch aktualisiert • DMW Bot");

	RaidlistArtefact { embed, payload_hash: sha256_hex(&payload_parts.join("\n")), debug_lines }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::OptionKind;
	use chrono::TimeZone;

	fn seeded() -> (Store, u64) {
		let mut store = Store::new();
		store.ensure_settings(1, Some("Testgilde"));
		let raid = store.create_raid(1, 11, 100, "Nanos", 1, Utc.ymd(2026, 2, 1).and_hms(12, 0, 0));
		store.add_raid_options(raid.id, vec!["2026-02-13 (Fr)"], vec!["20:00"]);
		store.toggle_vote(raid.id, OptionKind::Day, "2026-02-13 (Fr)", 200);
		store.toggle_vote(raid.id, OptionKind::Time, "20:00", 200);
		(store, raid.id)
	}

	fn now() -> DateTime<Utc> {
		Utc.ymd(2026, 2, 10).and_hms(12, 0, 0)
	}

	#[test]
	fn raidlist_shows_next_slot_and_counts() {
		let (store, _) = seeded();
		let artefact = raidlist_embed(&store, 1, "Testgilde", now());
		let raid_field = artefact.embed.fields.iter().find(|field| field.name.contains("Raid #1")).unwrap();
		assert!(raid_field.value.contains("**Nächster Termin:** \n**2026-02-13 (Fr) 20:00**"));
		assert!(raid_field.value.contains("**Qualifizierte Slots:** `1`"));
		assert!(raid_field.value.contains("`1` vollständig"));

		let stats = artefact.embed.fields.iter().find(|field| field.name.contains("Statistik")).unwrap();
		assert!(stats.value.contains("**Raids:** `1`"));
		assert!(stats.value.contains("**Slots:** `1`"));
	}

	#[test]
	fn payload_hash_is_stable_until_state_changes() {
		let (mut store, raid_id) = seeded();
		let first = raidlist_embed(&store, 1, "Testgilde", now());
		let second = raidlist_embed(&store, 1, "Testgilde", now());
		assert_eq!(first.payload_hash, second.payload_hash);

		store.toggle_vote(raid_id, OptionKind::Time, "20:00", 201);
		let third = raidlist_embed(&store, 1, "Testgilde", now());
		assert_ne!(first.payload_hash, third.payload_hash);
	}

	#[test]
	fn empty_guild_renders_placeholder() {
		let mut store = Store::new();
		store.ensure_settings(1, Some("Leer"));
		let artefact = raidlist_embed(&store, 1, "Leer", now());
		assert!(artefact.embed.description.as_deref().unwrap().contains("Keine offenen Raids"));
		assert_eq!(artefact.debug_lines, vec!["- Keine offenen Raids."]);
	}
}
