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

//! Canonical snapshot fingerprinting.
//!
//! Every row is serialized to a JSON object with sorted keys, the rows of a
//! table are sorted by their compact byte representation, and the SHA-256
//! of the whole table map becomes the flush fingerprint. Identical
//! in-memory state therefore always yields an identical digest, regardless
//! of map iteration order.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::store::Store;

/// FK-safe forward order of the persisted tables. Deletes run in exact
/// reverse; the fingerprint and the backup writer reuse the same order.
pub const TABLE_ORDER: [&str; 10] = [
	"guild_settings",
	"dungeons",
	"raids",
	"raid_options",
	"raid_votes",
	"raid_posted_slots",
	"raid_templates",
	"raid_attendance",
	"user_levels",
	"debug_mirror_cache",
];

fn rows_signature<T: Serialize>(rows: impl Iterator<Item = T>) -> Result<Vec<serde_json::Value>> {
	let mut encoded: Vec<(String, serde_json::Value)> = rows
		.map(|row| {
			let value = serde_json::to_value(row)?;
			let compact = serde_json::to_string(&value)?;
			Ok((compact, value))
		})
		.collect::<Result<_>>()?;
	encoded.sort_by(|a, b| a.0.cmp(&b.0));
	Ok(encoded.into_iter().map(|(_, value)| value).collect())
}

pub fn snapshot_fingerprint(store: &Store) -> Result<String> {
	let mut payload = serde_json::Map::new();
	payload.insert("guild_settings".into(), rows_signature(store.settings.values())?.into());
	payload.insert("dungeons".into(), rows_signature(store.dungeons.values())?.into());
	payload.insert("raids".into(), rows_signature(store.raids.values())?.into());
	payload.insert("raid_options".into(), rows_signature(store.raid_options.values())?.into());
	payload.insert("raid_votes".into(), rows_signature(store.raid_votes.values())?.into());
	payload.insert("raid_posted_slots".into(), rows_signature(store.raid_posted_slots.values())?.into());
	payload.insert("raid_templates".into(), rows_signature(store.raid_templates.values())?.into());
	payload.insert("raid_attendance".into(), rows_signature(store.raid_attendance.values())?.into());
	payload.insert("user_levels".into(), rows_signature(store.user_levels.values())?.into());
	payload.insert("debug_mirror_cache".into(), rows_signature(store.debug_cache.values())?.into());

	let encoded = serde_json::to_string(&serde_json::Value::Object(payload))?;
	let mut hasher = Sha256::new();
	hasher.update(encoded.as_bytes());
	Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::OptionKind;
	use chrono::{TimeZone, Utc};

	fn seeded() -> Store {
		let mut store = Store::new();
		store.ensure_settings(1, Some("Testgilde"));
		let raid = store.create_raid(1, 11, 100, "Nanos", 1, Utc.ymd(2026, 2, 1).and_hms(12, 0, 0));
		store.add_raid_options(raid.id, vec!["2026-02-13"], vec!["20:00"]);
		store.toggle_vote(raid.id, OptionKind::Day, "2026-02-13", 200);
		store
	}

	#[test]
	fn identical_state_has_identical_fingerprint() {
		let a = seeded();
		let b = seeded();
		assert_eq!(snapshot_fingerprint(&a).unwrap(), snapshot_fingerprint(&b).unwrap());
	}

	#[test]
	fn fingerprint_changes_on_any_mutation() {
		let mut store = seeded();
		let before = snapshot_fingerprint(&store).unwrap();

		store.toggle_vote(1, OptionKind::Time, "20:00", 200);
		let after_vote = snapshot_fingerprint(&store).unwrap();
		assert_ne!(before, after_vote);

		// toggling back restores the original digest
		store.toggle_vote(1, OptionKind::Time, "20:00", 200);
		assert_eq!(snapshot_fingerprint(&store).unwrap(), before);
	}

	#[test]
	fn fingerprint_ignores_insertion_order() {
		let mut forward = Store::new();
		forward.get_or_create_user_level(1, 1, Some("a"));
		forward.get_or_create_user_level(1, 2, Some("b"));

		let mut backward = Store::new();
		backward.get_or_create_user_level(1, 2, Some("b"));
		backward.get_or_create_user_level(1, 1, Some("a"));

		assert_eq!(snapshot_fingerprint(&forward).unwrap(), snapshot_fingerprint(&backward).unwrap());
	}
}
