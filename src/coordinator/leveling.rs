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

//! Experience, levels, username upkeep, and attendance marking.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::USERNAME_SYNC_RESCAN_SECONDS;
use crate::error::Result;
use crate::leveling::{level_from_xp, progress_bar, xp_needed_for_level, xp_progress};
use crate::platform::{colors, Embed, Platform};
use crate::types::AttendanceStatus;

use super::Coordinator;

/// XP awarded per eligible message.
const MESSAGE_XP_AMOUNT: u64 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelUp {
	pub old_level: u32,
	pub new_level: u32,
	/// False when the levelup message is suppressed by the per-user cooldown
	/// or the guild's levelup-messages flag.
	pub announce: bool,
}

impl<P: Platform> Coordinator<P> {
	/// Award message XP, rate-limited per user by the guild's feature
	/// settings. The level table is only marked dirty; the XP-persist worker
	/// coalesces the flush.
	pub async fn award_message_xp(
		&self,
		guild_id: u64,
		user_id: u64,
		username: Option<&str>,
		now: DateTime<Utc>,
	) -> Result<Option<LevelUp>> {
		let mut store = self.lock_state().await;
		let features = self.feature_settings(&store, guild_id);
		if !features.leveling_enabled {
			return Ok(None);
		}

		let key = (guild_id, user_id);
		{
			let mut stamps = self.xp_stamps.lock();
			if let Some(last) = stamps.get(&key) {
				let elapsed = now.signed_duration_since(*last).num_seconds();
				if elapsed < i64::from(features.message_xp_interval_seconds) {
					return Ok(None);
				}
			}
			stamps.insert(key, now);
		}

		let row = store.get_or_create_user_level(guild_id, user_id, username);
		if let Some(name) = username {
			if row.username.as_deref() != Some(name) {
				row.username = Some(name.to_string());
			}
		}
		let old_level = row.level;
		row.xp += MESSAGE_XP_AMOUNT;
		row.level = level_from_xp(row.xp);
		let new_level = row.level;
		self.mark_level_state_dirty();

		if new_level <= old_level {
			return Ok(None);
		}

		let announce = features.levelup_messages_enabled && {
			let mut stamps = self.levelup_stamps.lock();
			let allowed = stamps
				.get(&key)
				.map(|last| {
					now.signed_duration_since(*last).num_seconds()
						>= i64::from(features.levelup_message_cooldown_seconds)
				})
				.unwrap_or(true);
			if allowed {
				stamps.insert(key, now);
			}
			allowed
		};

		Ok(Some(LevelUp { old_level, new_level, announce }))
	}

	/// Flush the level table when dirty and the persist interval elapsed.
	pub async fn flush_level_state_if_due(&self, force: bool) -> Result<bool> {
		{
			let flush = self.level_flush.lock();
			if !flush.dirty {
				return Ok(false);
			}
			if !force {
				let interval = Duration::from_secs(self.config().level_persist_interval_seconds);
				if let Some(last) = flush.last_persist {
					if last.elapsed() < interval {
						return Ok(false);
					}
				}
			}
		}

		let store = self.lock_state().await;
		let persisted = self.persist(&store, Some(&["user_levels"])).await;
		if persisted {
			let mut flush = self.level_flush.lock();
			flush.dirty = false;
			flush.last_persist = Some(Instant::now());
		}
		Ok(persisted)
	}

	/// The /id card: level, XP progress, and raid participation.
	pub async fn user_id_card(&self, guild_id: u64, user_id: u64) -> Embed {
		let store = self.lock_state().await;
		let guild_name = self.guild_display_name(&store, guild_id).await;
		let (xp, level, username) = store
			.user_levels
			.get(&(guild_id, user_id))
			.map(|row| (row.xp, row.level, row.username.clone()))
			.unwrap_or((0, 0, None));
		let participation = store.raid_participation_count(guild_id, user_id);

		let (gained, span, percent) = xp_progress(xp, level);
		let bar = progress_bar(gained, span, 16);
		let next_needed = xp_needed_for_level(level + 1);

		Embed::titled(format!("🪪 {}", username.unwrap_or_else(|| format!("User {}", user_id))))
			.description(format!("Server: **{}**", guild_name))
			.color(colors::TEAL)
			.field("Level", level.to_string(), true)
			.field("XP", format!("{} / {}", xp, next_needed), true)
			.field("Raids (anwesend)", participation.to_string(), true)
			.field("Fortschritt", format!("{} {}%", bar, percent), false)
	}

	/// Update the persisted username of an existing level row. Returns true
	/// when something changed.
	pub async fn upsert_member_username(&self, guild_id: u64, user_id: u64, username: &str) -> bool {
		let username = username.trim();
		if username.is_empty() {
			return false;
		}
		let mut store = self.lock_state().await;
		if let Some(row) = store.user_levels.get_mut(&(guild_id, user_id)) {
			if row.username.as_deref() != Some(username) {
				row.username = Some(username.to_string());
				self.mark_level_state_dirty();
				return true;
			}
		}
		false
	}

	/// Re-read every member display name of a guild. Per guild this runs at
	/// most once per rescan window unless forced. Returns
	/// `(updated, scanned)`; `(0, 0)` when the members intent is missing.
	pub async fn sync_guild_usernames(&self, guild_id: u64, force: bool) -> Result<(usize, usize)> {
		if !force {
			let synced = self.username_synced_at.lock();
			if let Some(last) = synced.get(&guild_id) {
				if last.elapsed() < Duration::from_secs(USERNAME_SYNC_RESCAN_SECONDS) {
					return Ok((0, 0));
				}
			}
		}

		let names = match self.platform().member_display_names(guild_id).await {
			Some(names) => names,
			None => {
				log::debug!("Members intent unavailable, skipping username sync for guild {}", guild_id);
				return Ok((0, 0));
			}
		};
		self.username_synced_at.lock().insert(guild_id, Instant::now());

		let mut store = self.lock_state().await;
		let mut updated = 0;
		for (user_id, name) in &names {
			let name = name.trim();
			if name.is_empty() {
				continue;
			}
			if let Some(row) = store.user_levels.get_mut(&(guild_id, *user_id)) {
				if row.username.as_deref() != Some(name) {
					row.username = Some(name.to_string());
					updated += 1;
				}
			}
		}
		if updated > 0 {
			self.mark_level_state_dirty();
		}
		Ok((updated, names.len()))
	}

	/// Attendance snapshot of one finished raid, sorted by status then user.
	pub async fn attendance_list(&self, guild_id: u64, raid_display_id: u32) -> Vec<crate::types::RaidAttendance> {
		let store = self.lock_state().await;
		store.list_attendance(guild_id, raid_display_id)
	}

	/// Change one attendance row through the mark API.
	pub async fn mark_attendance(
		&self,
		guild_id: u64,
		raid_display_id: u32,
		user_id: u64,
		status: AttendanceStatus,
		marked_by_user_id: u64,
	) -> Result<bool> {
		let mut store = self.lock_state().await;
		let changed = store.mark_attendance(guild_id, raid_display_id, user_id, status, marked_by_user_id);
		if changed {
			self.persist(&store, Some(&["raid_attendance"])).await;
		}
		Ok(changed)
	}
}
