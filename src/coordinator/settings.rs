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

//! Tenant lifecycle and per-guild configuration: channels, feature
//! settings, templates, the calendar channel, and purges.

use chrono::Utc;
use chrono_tz::Europe::Berlin;

use crate::artefacts::calendar::{calendar_embed, collect_raid_entries, month_end, month_start};
use crate::config::kinds;
use crate::error::{EngineError, Result};
use crate::platform::{colors, Embed, Platform};
use crate::store::{PurgeCounts, RemoteTargetError, Store};
use crate::types::{FeatureSettings, RaidTemplate};
use crate::util::{calendar_config_key, calendar_message_key, feature_settings_key, sha256_hex};

use super::Coordinator;

fn on_off(value: bool) -> &'static str {
	if value {
		"an"
	} else {
		"aus"
	}
}

fn channel_label(channel_id: Option<u64>) -> String {
	match channel_id {
		Some(channel_id) => format!("`{}`", channel_id),
		None => "nicht gesetzt".to_string(),
	}
}

impl<P: Platform> Coordinator<P> {
	/// First contact with a tenant: make sure its settings row exists.
	pub async fn handle_guild_join(&self, guild_id: u64, guild_name: &str) -> Result<()> {
		let mut store = self.lock_state().await;
		store.ensure_settings(guild_id, Some(guild_name));
		self.persist(&store, Some(&["guild_settings"])).await;
		log::info!("Guild {} ({}) joined", guild_name, guild_id);
		Ok(())
	}

	/// Tenant removal drops every row referencing the guild.
	pub async fn handle_guild_remove(&self, guild_id: u64) -> Result<PurgeCounts> {
		let mut store = self.lock_state().await;
		let counts = store.purge_guild_data(guild_id);
		self.feature_cache.lock().remove(&guild_id);
		self.raidlist_hash.lock().remove(&guild_id);
		self.persist(&store, None).await;
		log::info!("Guild {} removed, purged {:?}", guild_id, counts);
		Ok(counts)
	}

	/// Settings-save handler: write the channel trio and refresh artefacts.
	pub async fn configure_channels(
		&self,
		guild_id: u64,
		planner_channel_id: Option<u64>,
		participants_channel_id: Option<u64>,
		raidlist_channel_id: Option<u64>,
	) -> Result<()> {
		let mut store = self.lock_state().await;
		store.configure_channels(guild_id, planner_channel_id, participants_channel_id, raidlist_channel_id);
		if raidlist_channel_id.is_some() {
			self.refresh_raidlist_for_guild(&mut store, guild_id, true).await;
		}
		self.persist(&store, Some(&["guild_settings", "debug_mirror_cache"])).await;
		Ok(())
	}

	pub async fn set_default_min_players(&self, guild_id: u64, min_players: u32) -> Result<()> {
		let mut store = self.lock_state().await;
		store.ensure_settings(guild_id, None).default_min_players = min_players;
		self.persist(&store, Some(&["guild_settings"])).await;
		Ok(())
	}

	pub async fn set_templates_enabled(&self, guild_id: u64, enabled: bool) -> Result<()> {
		let mut store = self.lock_state().await;
		store.set_templates_enabled(guild_id, None, enabled);
		self.persist(&store, Some(&["guild_settings"])).await;
		Ok(())
	}

	// --- feature settings (bit-packed cache row) ---

	pub fn default_feature_settings(&self) -> FeatureSettings {
		FeatureSettings {
			leveling_enabled: true,
			levelup_messages_enabled: true,
			nanomon_reply_enabled: true,
			approved_reply_enabled: true,
			raid_reminder_enabled: false,
			auto_reminder_enabled: false,
			calendar_enabled: false,
			message_xp_interval_seconds: self.config().message_xp_interval_seconds.max(1) as u32,
			levelup_message_cooldown_seconds: self.config().levelup_message_cooldown_seconds.max(1) as u32,
		}
	}

	/// Decode the guild's feature settings from the cache row, memoised per
	/// guild until the next write.
	pub fn feature_settings(&self, store: &Store, guild_id: u64) -> FeatureSettings {
		if let Some(cached) = self.feature_cache.lock().get(&guild_id) {
			return *cached;
		}
		let defaults = self.default_feature_settings();
		let loaded = match store.get_debug_cache(&feature_settings_key(guild_id)) {
			Some(row) if row.kind == kinds::FEATURE_SETTINGS => FeatureSettings::unpack(row.message_id, &defaults),
			_ => defaults,
		};
		self.feature_cache.lock().insert(guild_id, loaded);
		loaded
	}

	pub async fn set_feature_settings(&self, guild_id: u64, settings: FeatureSettings) -> Result<FeatureSettings> {
		let defaults = self.default_feature_settings();
		let normalized = FeatureSettings::unpack(settings.pack(), &defaults);
		let packed = normalized.pack();

		let mut store = self.lock_state().await;
		store.upsert_debug_cache(
			&feature_settings_key(guild_id),
			kinds::FEATURE_SETTINGS,
			guild_id,
			None,
			packed,
			&sha256_hex(&normalized.payload_line()),
		);
		self.feature_cache.lock().insert(guild_id, normalized);
		self.persist(&store, Some(&["debug_mirror_cache"])).await;
		Ok(normalized)
	}

	// --- raid calendar (feature-gated artefact) ---

	pub fn calendar_channel_id(&self, store: &Store, guild_id: u64) -> Option<u64> {
		match store.get_debug_cache(&calendar_config_key(guild_id)) {
			Some(row) if row.kind == kinds::RAID_CALENDAR_CFG && row.message_id > 0 => Some(row.message_id),
			_ => None,
		}
	}

	pub async fn set_calendar_channel(&self, guild_id: u64, channel_id: Option<u64>) -> Result<()> {
		let mut store = self.lock_state().await;
		let config_key = calendar_config_key(guild_id);
		match channel_id {
			Some(channel_id) if channel_id > 0 => {
				store.upsert_debug_cache(
					&config_key,
					kinds::RAID_CALENDAR_CFG,
					guild_id,
					None,
					channel_id,
					&sha256_hex(&format!("channel={}", channel_id)),
				);
			}
			_ => {
				store.delete_debug_cache(&config_key);
				store.delete_debug_cache(&calendar_message_key(guild_id));
			}
		}
		self.persist(&store, Some(&["debug_mirror_cache"])).await;
		Ok(())
	}

	/// Publish the monthly calendar. Dormant unless the guild's
	/// `calendar_enabled` feature flag is on and a channel is configured.
	pub async fn refresh_calendar(&self, guild_id: u64) -> Result<bool> {
		let mut store = self.lock_state().await;
		if !self.feature_settings(&store, guild_id).calendar_enabled {
			return Ok(false);
		}
		let channel_id = match self.calendar_channel_id(&store, guild_id) {
			Some(channel_id) => channel_id,
			None => return Ok(false),
		};

		let today = Utc::now().with_timezone(&Berlin).date().naive_local();
		let start = month_start(today);
		let entries = collect_raid_entries(&store, guild_id, start, month_end(start));
		let guild_name = self.guild_display_name(&store, guild_id).await;
		let artefact = calendar_embed(&guild_name, start, &entries);

		let published = self
			.sync_cached_message(
				&mut store,
				&calendar_message_key(guild_id),
				kinds::RAID_CALENDAR_MSG,
				guild_id,
				None,
				channel_id,
				crate::platform::OutboundMessage::embed(artefact.embed),
				&artefact.payload_hash,
			)
			.await
			.is_some();
		self.persist(&store, Some(&["debug_mirror_cache"])).await;
		Ok(published)
	}

	// --- purges & remote ---

	/// Admin purge: remove all tenant data. Returns the before-counts.
	pub async fn purge_guild_data(&self, guild_id: u64) -> Result<PurgeCounts> {
		self.handle_guild_remove(guild_id).await
	}

	/// Delete the bot's own indexed messages in one channel.
	pub async fn purge_bot_messages(&self, guild_id: u64, channel_id: u64) -> Result<usize> {
		let mut store = self.lock_state().await;
		let channel_marker = format!(":{}:", channel_id);
		let rows: Vec<(String, u64)> = store
			.list_debug_cache(Some(kinds::BOT_MESSAGE), Some(guild_id), None)
			.into_iter()
			.filter(|row| row.cache_key.contains(&channel_marker))
			.map(|row| (row.cache_key, row.message_id))
			.collect();

		let mut deleted = 0;
		for (cache_key, message_id) in rows {
			if self
				.platform()
				.delete_message(crate::platform::MessageRef { channel_id, message_id })
				.await
			{
				deleted += 1;
			}
			store.delete_debug_cache(&cache_key);
		}
		self.persist(&store, Some(&["debug_mirror_cache"])).await;
		Ok(deleted)
	}

	/// Resolve a remote guild target by id, exact name, or unique substring.
	pub async fn resolve_remote_target(&self, raw_value: &str) -> Result<u64> {
		let store = self.lock_state().await;
		store.resolve_remote_target(raw_value).map_err(|e| match e {
			RemoteTargetError::Missing => EngineError::validation("Bitte eine Guild angeben."),
			RemoteTargetError::Ambiguous => EngineError::validation("Guild-Name ist nicht eindeutig."),
			RemoteTargetError::NotFound => EngineError::validation("Guild nicht gefunden."),
		})
	}

	/// `(guild_id, name, open_raids)` of every known tenant, for remote_guilds.
	pub async fn known_guilds(&self) -> Vec<(u64, String, usize)> {
		let store = self.lock_state().await;
		let mut rows: Vec<(u64, String, usize)> = store
			.settings
			.values()
			.map(|settings| {
				(
					settings.guild_id,
					settings.guild_name.clone().unwrap_or_else(|| format!("Guild {}", settings.guild_id)),
					store.list_open_raids(Some(settings.guild_id)).len(),
				)
			})
			.collect();
		rows.sort_by_key(|(guild_id, ..)| *guild_id);
		rows
	}

	// --- templates ---

	pub async fn save_template(
		&self,
		guild_id: u64,
		dungeon_name: &str,
		template_name: &str,
		template_data: &str,
	) -> Result<RaidTemplate> {
		if template_name.trim().is_empty() {
			return Err(EngineError::validation("Bitte einen Template-Namen angeben."));
		}
		let mut store = self.lock_state().await;
		if !store.ensure_settings(guild_id, None).templates_enabled {
			return Err(EngineError::precondition("Templates sind für diesen Server deaktiviert."));
		}
		let dungeon_id = match store.get_active_dungeon_by_name(dungeon_name) {
			Some(dungeon) => dungeon.id,
			None => return Err(EngineError::validation("Unbekannter Dungeon.")),
		};
		let row = store.upsert_template(guild_id, dungeon_id, template_name.trim(), template_data);
		self.persist(&store, Some(&["raid_templates"])).await;
		Ok(row)
	}

	pub async fn load_template(&self, guild_id: u64, dungeon_name: &str, template_name: &str) -> Result<RaidTemplate> {
		let store = self.lock_state().await;
		let dungeon_id = match store.get_active_dungeon_by_name(dungeon_name) {
			Some(dungeon) => dungeon.id,
			None => return Err(EngineError::validation("Unbekannter Dungeon.")),
		};
		store
			.get_template(guild_id, dungeon_id, template_name)
			.cloned()
			.ok_or_else(|| EngineError::precondition("Template nicht gefunden."))
	}

	/// Active dungeons in display order, for /dungeonlist.
	pub async fn dungeon_list(&self) -> Vec<crate::types::Dungeon> {
		let store = self.lock_state().await;
		store.list_active_dungeons()
	}

	// --- status surface ---

	/// The settings overview embed shown by /settings.
	pub async fn settings_overview(&self, guild_id: u64) -> Embed {
		let mut store = self.lock_state().await;
		let guild_name = self.guild_display_name(&store, guild_id).await;
		let features = self.feature_settings(&store, guild_id);
		let calendar_channel = self.calendar_channel_id(&store, guild_id);
		let settings = store.ensure_settings(guild_id, None).clone();

		Embed::titled(format!("Settings: {}", guild_name))
			.color(colors::BLURPLE)
			.field("Umfragen Channel", channel_label(settings.planner_channel_id), false)
			.field("Raid Teilnehmerlisten Channel", channel_label(settings.participants_channel_id), false)
			.field("Raidlist Channel", channel_label(settings.raidlist_channel_id), false)
			.field("Raid Kalender Channel", channel_label(calendar_channel), false)
			.field("Min Spieler (Default)", settings.default_min_players.to_string(), true)
			.field("Templates", on_off(settings.templates_enabled), true)
			.field("Levelsystem", on_off(features.leveling_enabled), true)
			.field("Levelup Nachrichten", on_off(features.levelup_messages_enabled), true)
			.field("Nanomon Reply", on_off(features.nanomon_reply_enabled), true)
			.field("Approved Reply", on_off(features.approved_reply_enabled), true)
			.field("Raid 10min Reminder", on_off(features.raid_reminder_enabled), true)
			.field("Auto Reminder", on_off(features.auto_reminder_enabled), true)
			.field("Message XP Intervall (s)", features.message_xp_interval_seconds.to_string(), true)
			.field("Levelup Cooldown (s)", features.levelup_message_cooldown_seconds.to_string(), true)
	}

	/// The /status embed: row counts and self-test health.
	pub async fn engine_status(&self) -> Embed {
		let store = self.lock_state().await;
		let self_test = self.self_test_state();
		let self_test_line = match (&self_test.last_error, &self_test.last_ok_at) {
			(Some(error), _) => format!("Fehler: {}", error),
			(None, Some(at)) => format!("OK ({})", at.format("%Y-%m-%d %H:%M:%S UTC")),
			(None, None) => "noch nicht gelaufen".to_string(),
		};

		Embed::titled("DMW Engine Status")
			.color(colors::BLURPLE)
			.field("Guilds", store.settings.len().to_string(), true)
			.field("Offene Raids", store.list_open_raids(None).len().to_string(), true)
			.field("Votes", store.raid_votes.len().to_string(), true)
			.field("Teilnehmerlisten", store.raid_posted_slots.len().to_string(), true)
			.field("User Levels", store.user_levels.len().to_string(), true)
			.field("Cache Rows", store.debug_cache.len().to_string(), true)
			.field("Self-Test", self_test_line, false)
	}
}
