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

//! Pure, deterministic synthesisers from store snapshots to rendered
//! artefacts. Nothing in here mutates state or talks to the platform; every
//! producer returns plain embed structures and, where a live message is
//! kept in sync, a stable content hash for no-op suppression.

pub mod calendar;
pub mod memberlist;
pub mod planner;
pub mod raidlist;

use std::collections::HashMap;

use crate::store::Store;
use crate::util::clamp_field;

pub(crate) const EMBED_FIELD_LIMIT: usize = 1024;

/// Resolve a display label for a user: platform cache first, then the
/// persisted username, then a bare id fallback.
pub(crate) fn user_label(store: &Store, guild_id: u64, user_id: u64, names: &HashMap<u64, String>) -> String {
	if let Some(name) = names.get(&user_id) {
		let trimmed = name.trim();
		if !trimmed.is_empty() {
			return trimmed.to_string();
		}
	}
	if let Some(row) = store.user_levels.get(&(guild_id, user_id)) {
		if let Some(username) = &row.username {
			let trimmed = username.trim();
			if !trimmed.is_empty() {
				return trimmed.to_string();
			}
		}
	}
	format!("User {}", user_id)
}

/// Bullet list of user names without mentions, capped at `limit` lines and
/// the embed field size.
pub(crate) fn plain_user_list(
	store: &Store,
	guild_id: u64,
	user_ids: &[u64],
	limit: usize,
	names: &HashMap<u64, String>,
) -> String {
	if user_ids.is_empty() {
		return "—".to_string();
	}

	let mut sorted_ids = user_ids.to_vec();
	sorted_ids.sort_unstable();
	let mut labels: Vec<String> =
		sorted_ids.iter().map(|user_id| user_label(store, guild_id, *user_id, names)).collect();
	labels.sort_by_key(|label| label.to_lowercase());
	labels.dedup();

	let mut text = labels.iter().take(limit).map(|label| format!("• {}", label)).collect::<Vec<_>>().join("\n");
	if labels.len() > limit {
		text.push_str(&format!("\n... +{} weitere", labels.len() - limit));
	}
	clamp_field(&text, EMBED_FIELD_LIMIT)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_label_prefers_platform_names() {
		let mut store = Store::new();
		store.get_or_create_user_level(1, 200, Some("Gespeichert"));
		let mut names = HashMap::new();
		names.insert(200u64, "Live".to_string());

		assert_eq!(user_label(&store, 1, 200, &names), "Live");
		assert_eq!(user_label(&store, 1, 200, &HashMap::new()), "Gespeichert");
		assert_eq!(user_label(&store, 1, 999, &HashMap::new()), "User 999");
	}

	#[test]
	fn plain_user_list_caps_and_dedupes() {
		let store = Store::new();
		let names = HashMap::new();
		assert_eq!(plain_user_list(&store, 1, &[], 30, &names), "—");

		let ids: Vec<u64> = (1..=35).collect();
		let text = plain_user_list(&store, 1, &ids, 30, &names);
		assert!(text.contains("... +5 weitere"));
		assert!(text.starts_with("• User 1"));
	}
}
