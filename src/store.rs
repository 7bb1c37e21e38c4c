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

//! The in-memory domain store: typed tables keyed by id, deterministic id
//! counters, secondary indexes, and explicit bulk cascades.
//!
//! The orchestrator exclusively owns the store; every reader and writer goes
//! through it under the single state lock, so none of these methods need to
//! be re-entrant.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::types::{
	AttendanceStatus, DebugMirrorCache, Dungeon, GuildSettings, OptionKind, Raid, RaidAttendance, RaidOption,
	RaidPostedSlot, RaidStatus, RaidTemplate, RaidVote, UserLevel,
};

type VoteKey = (u64, OptionKind, String, u64);

/// Per-kind vote tallies of a single raid.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VoteCounts {
	pub day: HashMap<String, usize>,
	pub time: HashMap<String, usize>,
}

/// Row counts removed by [`Store::purge_guild_data`], taken before deletion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeCounts {
	pub raids: usize,
	pub user_levels: usize,
	pub guild_settings: usize,
}

/// Why a remote guild target could not be resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteTargetError {
	Missing,
	Ambiguous,
	NotFound,
}

#[derive(Debug, Default)]
pub struct Store {
	pub dungeons: HashMap<u32, Dungeon>,
	pub settings: HashMap<u64, GuildSettings>,
	pub raids: HashMap<u64, Raid>,
	pub raid_options: HashMap<u64, RaidOption>,
	pub raid_votes: HashMap<u64, RaidVote>,
	pub raid_posted_slots: HashMap<u64, RaidPostedSlot>,
	pub raid_templates: HashMap<u64, RaidTemplate>,
	pub raid_attendance: HashMap<u64, RaidAttendance>,
	pub user_levels: HashMap<(u64, u64), UserLevel>,
	pub debug_cache: HashMap<String, DebugMirrorCache>,

	vote_id_by_key: HashMap<VoteKey, u64>,
	debug_keys_by_kind: HashMap<String, BTreeSet<String>>,
	debug_keys_by_kind_guild: HashMap<(String, u64), BTreeSet<String>>,
	debug_keys_by_kind_guild_raid: HashMap<(String, u64, Option<u64>), BTreeSet<String>>,

	next_raid_id: u64,
	next_option_id: u64,
	next_vote_id: u64,
	next_slot_id: u64,
	next_template_id: u64,
	next_attendance_id: u64,
	display_id_by_guild: HashMap<u64, u32>,
}

impl Store {
	pub fn new() -> Self {
		let mut store = Self::default();
		store.reset();
		store
	}

	pub fn reset(&mut self) {
		self.dungeons.clear();
		self.settings.clear();
		self.raids.clear();
		self.raid_options.clear();
		self.raid_votes.clear();
		self.raid_posted_slots.clear();
		self.raid_templates.clear();
		self.raid_attendance.clear();
		self.user_levels.clear();
		self.debug_cache.clear();
		self.vote_id_by_key.clear();
		self.debug_keys_by_kind.clear();
		self.debug_keys_by_kind_guild.clear();
		self.debug_keys_by_kind_guild_raid.clear();

		self.next_raid_id = 1;
		self.next_option_id = 1;
		self.next_vote_id = 1;
		self.next_slot_id = 1;
		self.next_template_id = 1;
		self.next_attendance_id = 1;
		self.display_id_by_guild.clear();
	}

	/// Recompute every counter and secondary index from the primary tables.
	/// Called after a bulk load.
	pub fn recalculate_counters(&mut self) {
		self.next_raid_id = self.raids.keys().max().map_or(1, |id| id + 1);
		self.next_option_id = self.raid_options.keys().max().map_or(1, |id| id + 1);
		self.next_vote_id = self.raid_votes.keys().max().map_or(1, |id| id + 1);
		self.next_slot_id = self.raid_posted_slots.keys().max().map_or(1, |id| id + 1);
		self.next_template_id = self.raid_templates.keys().max().map_or(1, |id| id + 1);
		self.next_attendance_id = self.raid_attendance.keys().max().map_or(1, |id| id + 1);

		self.display_id_by_guild.clear();
		for raid in self.raids.values() {
			let highwater = self.display_id_by_guild.entry(raid.guild_id).or_insert(0);
			*highwater = (*highwater).max(raid.display_id);
		}

		self.rebuild_vote_index();
		self.rebuild_debug_cache_indexes();
	}

	fn vote_key(raid_id: u64, kind: OptionKind, option_label: &str, user_id: u64) -> VoteKey {
		(raid_id, kind, option_label.to_string(), user_id)
	}

	fn rebuild_vote_index(&mut self) {
		self.vote_id_by_key.clear();
		for (vote_id, row) in &self.raid_votes {
			self.vote_id_by_key.insert(Self::vote_key(row.raid_id, row.kind, &row.option_label, row.user_id), *vote_id);
		}
	}

	// --- dungeons ---

	pub fn add_dungeon(&mut self, name: &str, short_code: &str, is_active: bool, sort_order: i32) -> Dungeon {
		let id = self.dungeons.len() as u32 + 1;
		let row = Dungeon { id, name: name.to_string(), short_code: short_code.to_string(), is_active, sort_order };
		self.dungeons.insert(id, row.clone());
		row
	}

	pub fn list_active_dungeons(&self) -> Vec<Dungeon> {
		let mut rows: Vec<Dungeon> = self.dungeons.values().filter(|row| row.is_active).cloned().collect();
		rows.sort_by(|a, b| (a.sort_order, a.name.to_lowercase()).cmp(&(b.sort_order, b.name.to_lowercase())));
		rows
	}

	pub fn get_active_dungeon_by_name(&self, dungeon_name: &str) -> Option<&Dungeon> {
		let name = dungeon_name.trim().to_lowercase();
		self.dungeons.values().find(|row| row.is_active && row.name.to_lowercase() == name)
	}

	/// Seed the lookup table at bootstrap. No-op unless empty.
	pub fn seed_default_dungeons(&mut self) -> usize {
		if !self.dungeons.is_empty() {
			return 0;
		}
		self.add_dungeon("Nanos", "NAN", true, 1);
		self.add_dungeon("Skull", "SKL", true, 2);
		self.dungeons.len()
	}

	// --- guild settings ---

	/// Idempotent upsert; refreshes the display name when it changed.
	pub fn ensure_settings(&mut self, guild_id: u64, guild_name: Option<&str>) -> &mut GuildSettings {
		let row = self.settings.entry(guild_id).or_insert_with(|| {
			GuildSettings::new(guild_id, guild_name.map(str::to_string))
		});
		if let Some(name) = guild_name {
			if row.guild_name.as_deref() != Some(name) {
				row.guild_name = Some(name.to_string());
			}
		}
		row
	}

	/// Writes the three channel ids. Changing the raidlist channel invalidates
	/// the live raidlist message.
	pub fn configure_channels(
		&mut self,
		guild_id: u64,
		planner_channel_id: Option<u64>,
		participants_channel_id: Option<u64>,
		raidlist_channel_id: Option<u64>,
	) -> &mut GuildSettings {
		let row = self.ensure_settings(guild_id, None);
		row.planner_channel_id = planner_channel_id;
		row.participants_channel_id = participants_channel_id;
		if row.raidlist_channel_id != raidlist_channel_id {
			row.raidlist_channel_id = raidlist_channel_id;
			row.raidlist_message_id = None;
		}
		row
	}

	pub fn set_templates_enabled(&mut self, guild_id: u64, guild_name: Option<&str>, enabled: bool) -> &mut GuildSettings {
		let row = self.ensure_settings(guild_id, guild_name);
		row.templates_enabled = enabled;
		row
	}

	// --- raids ---

	/// Allocates the next surrogate id and the next per-guild display id.
	/// The display highwater is never decremented by deletes, so display ids
	/// are not reused within a process lifetime.
	pub fn create_raid(
		&mut self,
		guild_id: u64,
		planner_channel_id: u64,
		creator_id: u64,
		dungeon: &str,
		min_players: u32,
		created_at: DateTime<Utc>,
	) -> Raid {
		let next_display = self.display_id_by_guild.get(&guild_id).copied().unwrap_or(0) + 1;
		self.display_id_by_guild.insert(guild_id, next_display);

		let row = Raid {
			id: self.next_raid_id,
			display_id: next_display,
			guild_id,
			channel_id: planner_channel_id,
			creator_id,
			dungeon: dungeon.to_string(),
			status: RaidStatus::Open,
			created_at,
			message_id: None,
			min_players,
			participants_posted: false,
			temp_role_id: None,
			temp_role_created: false,
		};
		self.raids.insert(row.id, row.clone());
		self.next_raid_id += 1;
		row
	}

	pub fn get_raid(&self, raid_id: u64) -> Option<&Raid> {
		self.raids.get(&raid_id)
	}

	pub fn get_raid_mut(&mut self, raid_id: u64) -> Option<&mut Raid> {
		self.raids.get_mut(&raid_id)
	}

	pub fn set_raid_message_id(&mut self, raid_id: u64, message_id: u64) {
		if let Some(raid) = self.raids.get_mut(&raid_id) {
			raid.message_id = Some(message_id);
		}
	}

	pub fn list_open_raids(&self, guild_id: Option<u64>) -> Vec<Raid> {
		let mut rows: Vec<Raid> = self
			.raids
			.values()
			.filter(|raid| raid.status == RaidStatus::Open)
			.filter(|raid| guild_id.map_or(true, |guild| raid.guild_id == guild))
			.cloned()
			.collect();
		rows.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
		rows
	}

	pub fn list_open_raid_ids_by_guild(&self, guild_id: u64) -> Vec<u64> {
		self.list_open_raids(Some(guild_id)).into_iter().map(|raid| raid.id).collect()
	}

	// --- options & votes ---

	pub fn add_raid_options<'a>(
		&mut self,
		raid_id: u64,
		days: impl IntoIterator<Item = &'a str>,
		times: impl IntoIterator<Item = &'a str>,
	) {
		for label in days {
			let id = self.next_option_id;
			self.raid_options.insert(id, RaidOption { id, raid_id, kind: OptionKind::Day, label: label.to_string() });
			self.next_option_id += 1;
		}
		for label in times {
			let id = self.next_option_id;
			self.raid_options.insert(id, RaidOption { id, raid_id, kind: OptionKind::Time, label: label.to_string() });
			self.next_option_id += 1;
		}
	}

	/// Day and time labels of a raid in insertion order.
	pub fn list_raid_options(&self, raid_id: u64) -> (Vec<String>, Vec<String>) {
		let mut rows: Vec<&RaidOption> = self.raid_options.values().filter(|row| row.raid_id == raid_id).collect();
		rows.sort_by_key(|row| row.id);
		let days = rows.iter().filter(|row| row.kind == OptionKind::Day).map(|row| row.label.clone()).collect();
		let times = rows.iter().filter(|row| row.kind == OptionKind::Time).map(|row| row.label.clone()).collect();
		(days, times)
	}

	/// Insert the vote if absent, remove it if present. O(1) via the vote
	/// index. Returns true when the vote was added.
	pub fn toggle_vote(&mut self, raid_id: u64, kind: OptionKind, option_label: &str, user_id: u64) -> bool {
		let key = Self::vote_key(raid_id, kind, option_label, user_id);
		if let Some(existing_id) = self.vote_id_by_key.remove(&key) {
			self.raid_votes.remove(&existing_id);
			return false;
		}
		let id = self.next_vote_id;
		self.raid_votes.insert(
			id,
			RaidVote { id, raid_id, kind, option_label: option_label.to_string(), user_id },
		);
		self.vote_id_by_key.insert(key, id);
		self.next_vote_id += 1;
		true
	}

	pub fn vote_counts(&self, raid_id: u64) -> VoteCounts {
		let mut counts = VoteCounts::default();
		for row in self.raid_votes.values() {
			if row.raid_id != raid_id {
				continue;
			}
			let bucket = match row.kind {
				OptionKind::Day => &mut counts.day,
				OptionKind::Time => &mut counts.time,
			};
			*bucket.entry(row.option_label.clone()).or_insert(0) += 1;
		}
		counts
	}

	/// Voter sets per day label and per time label, materialised from `raid_votes`.
	pub fn vote_user_sets(&self, raid_id: u64) -> (HashMap<String, HashSet<u64>>, HashMap<String, HashSet<u64>>) {
		let mut day_users: HashMap<String, HashSet<u64>> = HashMap::new();
		let mut time_users: HashMap<String, HashSet<u64>> = HashMap::new();
		for row in self.raid_votes.values() {
			if row.raid_id != raid_id {
				continue;
			}
			let target = match row.kind {
				OptionKind::Day => &mut day_users,
				OptionKind::Time => &mut time_users,
			};
			target.entry(row.option_label.clone()).or_default().insert(row.user_id);
		}
		(day_users, time_users)
	}

	// --- posted slots ---

	pub fn list_posted_slots(&self, raid_id: u64) -> Vec<RaidPostedSlot> {
		let mut rows: Vec<RaidPostedSlot> =
			self.raid_posted_slots.values().filter(|row| row.raid_id == raid_id).cloned().collect();
		rows.sort_by_key(|row| row.id);
		rows
	}

	pub fn get_posted_slot(&self, raid_id: u64, day_label: &str, time_label: &str) -> Option<&RaidPostedSlot> {
		self.raid_posted_slots
			.values()
			.find(|row| row.raid_id == raid_id && row.day_label == day_label && row.time_label == time_label)
	}

	pub fn upsert_posted_slot(
		&mut self,
		raid_id: u64,
		day_label: &str,
		time_label: &str,
		channel_id: u64,
		message_id: u64,
	) -> RaidPostedSlot {
		if let Some(row) = self
			.raid_posted_slots
			.values_mut()
			.find(|row| row.raid_id == raid_id && row.day_label == day_label && row.time_label == time_label)
		{
			row.channel_id = Some(channel_id);
			row.message_id = Some(message_id);
			return row.clone();
		}

		let row = RaidPostedSlot {
			id: self.next_slot_id,
			raid_id,
			day_label: day_label.to_string(),
			time_label: time_label.to_string(),
			channel_id: Some(channel_id),
			message_id: Some(message_id),
		};
		self.raid_posted_slots.insert(row.id, row.clone());
		self.next_slot_id += 1;
		row
	}

	pub fn delete_posted_slot(&mut self, slot_id: u64) {
		self.raid_posted_slots.remove(&slot_id);
	}

	// --- templates ---

	pub fn upsert_template(
		&mut self,
		guild_id: u64,
		dungeon_id: u32,
		template_name: &str,
		template_data: &str,
	) -> RaidTemplate {
		if let Some(row) = self.raid_templates.values_mut().find(|row| {
			row.guild_id == guild_id && row.dungeon_id == dungeon_id && row.template_name == template_name
		}) {
			row.template_data = template_data.to_string();
			return row.clone();
		}
		let row = RaidTemplate {
			id: self.next_template_id,
			guild_id,
			dungeon_id,
			template_name: template_name.to_string(),
			template_data: template_data.to_string(),
		};
		self.raid_templates.insert(row.id, row.clone());
		self.next_template_id += 1;
		row
	}

	pub fn get_template(&self, guild_id: u64, dungeon_id: u32, template_name: &str) -> Option<&RaidTemplate> {
		self.raid_templates.values().find(|row| {
			row.guild_id == guild_id && row.dungeon_id == dungeon_id && row.template_name == template_name
		})
	}

	// --- attendance ---

	/// Write one `present` snapshot row per distinct qualifying user that has
	/// no row for this raid yet. Returns the number of new rows.
	pub fn create_attendance_snapshot(
		&mut self,
		guild_id: u64,
		raid_display_id: u32,
		dungeon: &str,
		user_ids: &BTreeSet<u64>,
	) -> usize {
		let existing: HashSet<u64> = self
			.raid_attendance
			.values()
			.filter(|row| row.guild_id == guild_id && row.raid_display_id == raid_display_id)
			.map(|row| row.user_id)
			.collect();

		let mut created = 0;
		for user_id in user_ids {
			if existing.contains(user_id) {
				continue;
			}
			let row = RaidAttendance {
				id: self.next_attendance_id,
				guild_id,
				raid_display_id,
				dungeon: dungeon.to_string(),
				user_id: *user_id,
				status: AttendanceStatus::Present,
				marked_by_user_id: None,
			};
			self.raid_attendance.insert(row.id, row);
			self.next_attendance_id += 1;
			created += 1;
		}
		created
	}

	pub fn list_attendance(&self, guild_id: u64, raid_display_id: u32) -> Vec<RaidAttendance> {
		let mut rows: Vec<RaidAttendance> = self
			.raid_attendance
			.values()
			.filter(|row| row.guild_id == guild_id && row.raid_display_id == raid_display_id)
			.cloned()
			.collect();
		rows.sort_by(|a, b| (a.status.as_str(), a.user_id).cmp(&(b.status.as_str(), b.user_id)));
		rows
	}

	pub fn mark_attendance(
		&mut self,
		guild_id: u64,
		raid_display_id: u32,
		user_id: u64,
		status: AttendanceStatus,
		marked_by_user_id: u64,
	) -> bool {
		for row in self.raid_attendance.values_mut() {
			if row.guild_id == guild_id && row.raid_display_id == raid_display_id && row.user_id == user_id {
				row.status = status;
				row.marked_by_user_id = Some(marked_by_user_id);
				return true;
			}
		}
		false
	}

	pub fn raid_participation_count(&self, guild_id: u64, user_id: u64) -> usize {
		self.raid_attendance
			.values()
			.filter(|row| {
				row.guild_id == guild_id && row.user_id == user_id && row.status == AttendanceStatus::Present
			})
			.count()
	}

	// --- cascades ---

	/// Single-pass bulk delete of raids and their option/vote/slot rows.
	/// Keeps the vote index consistent.
	fn delete_raids_cascade(&mut self, raid_ids: &HashSet<u64>) {
		if raid_ids.is_empty() {
			return;
		}

		for raid_id in raid_ids {
			self.raids.remove(raid_id);
		}
		self.raid_options.retain(|_, row| !raid_ids.contains(&row.raid_id));

		let removed_votes: Vec<u64> = self
			.raid_votes
			.iter()
			.filter(|(_, row)| raid_ids.contains(&row.raid_id))
			.map(|(id, _)| *id)
			.collect();
		for vote_id in removed_votes {
			if let Some(row) = self.raid_votes.remove(&vote_id) {
				self.vote_id_by_key.remove(&Self::vote_key(row.raid_id, row.kind, &row.option_label, row.user_id));
			}
		}

		self.raid_posted_slots.retain(|_, row| !raid_ids.contains(&row.raid_id));
	}

	pub fn delete_raid_cascade(&mut self, raid_id: u64) {
		let mut ids = HashSet::new();
		ids.insert(raid_id);
		self.delete_raids_cascade(&ids);
	}

	/// Bulk-cascade every open raid of a guild. Returns the number of raids removed.
	pub fn cancel_open_raids_for_guild(&mut self, guild_id: u64) -> usize {
		let raid_ids: HashSet<u64> = self.list_open_raid_ids_by_guild(guild_id).into_iter().collect();
		let count = raid_ids.len();
		self.delete_raids_cascade(&raid_ids);
		count
	}

	/// Remove every row referencing the guild. Returns before-counts.
	pub fn purge_guild_data(&mut self, guild_id: u64) -> PurgeCounts {
		let counts = PurgeCounts {
			raids: self.raids.values().filter(|row| row.guild_id == guild_id).count(),
			user_levels: self.user_levels.values().filter(|row| row.guild_id == guild_id).count(),
			guild_settings: usize::from(self.settings.contains_key(&guild_id)),
		};

		let raid_ids: HashSet<u64> =
			self.raids.values().filter(|row| row.guild_id == guild_id).map(|row| row.id).collect();
		self.delete_raids_cascade(&raid_ids);

		self.raid_attendance.retain(|_, row| row.guild_id != guild_id);
		self.raid_templates.retain(|_, row| row.guild_id != guild_id);
		self.user_levels.retain(|_, row| row.guild_id != guild_id);
		self.settings.remove(&guild_id);

		let purged_keys: Vec<String> = self
			.debug_cache
			.values()
			.filter(|row| row.guild_id == guild_id)
			.map(|row| row.cache_key.clone())
			.collect();
		for key in purged_keys {
			self.delete_debug_cache(&key);
		}

		counts
	}

	// --- remote target resolution ---

	/// Resolve a raw remote target: numeric ids pass through, then exact
	/// guild-name match, then unique substring match.
	pub fn resolve_remote_target(&self, raw_value: &str) -> Result<u64, RemoteTargetError> {
		let value = raw_value.trim();
		if value.is_empty() {
			return Err(RemoteTargetError::Missing);
		}
		if value.bytes().all(|b| b.is_ascii_digit()) {
			return value.parse().map_err(|_| RemoteTargetError::NotFound);
		}

		let needle = value.to_lowercase();
		let exact: Vec<u64> = self
			.settings
			.values()
			.filter(|row| row.guild_name.as_deref().map_or(false, |name| name.to_lowercase() == needle))
			.map(|row| row.guild_id)
			.collect();
		match exact.len() {
			1 => return Ok(exact[0]),
			n if n > 1 => return Err(RemoteTargetError::Ambiguous),
			_ => {}
		}

		let partial: Vec<u64> = self
			.settings
			.values()
			.filter(|row| row.guild_name.as_deref().map_or(false, |name| name.to_lowercase().contains(&needle)))
			.map(|row| row.guild_id)
			.collect();
		match partial.len() {
			1 => Ok(partial[0]),
			0 => Err(RemoteTargetError::NotFound),
			_ => Err(RemoteTargetError::Ambiguous),
		}
	}

	// --- user levels ---

	pub fn get_or_create_user_level(&mut self, guild_id: u64, user_id: u64, username: Option<&str>) -> &mut UserLevel {
		self.user_levels.entry((guild_id, user_id)).or_insert_with(|| UserLevel {
			guild_id,
			user_id,
			xp: 0,
			level: 0,
			username: username.map(str::to_string),
		})
	}

	// --- debug mirror cache ---

	fn debug_index_add(&mut self, row: &DebugMirrorCache) {
		self.debug_keys_by_kind.entry(row.kind.clone()).or_default().insert(row.cache_key.clone());
		self.debug_keys_by_kind_guild
			.entry((row.kind.clone(), row.guild_id))
			.or_default()
			.insert(row.cache_key.clone());
		self.debug_keys_by_kind_guild_raid
			.entry((row.kind.clone(), row.guild_id, row.raid_id))
			.or_default()
			.insert(row.cache_key.clone());
	}

	fn debug_index_remove(&mut self, row: &DebugMirrorCache) {
		if let Some(keys) = self.debug_keys_by_kind.get_mut(&row.kind) {
			keys.remove(&row.cache_key);
			if keys.is_empty() {
				self.debug_keys_by_kind.remove(&row.kind);
			}
		}
		let guild_key = (row.kind.clone(), row.guild_id);
		if let Some(keys) = self.debug_keys_by_kind_guild.get_mut(&guild_key) {
			keys.remove(&row.cache_key);
			if keys.is_empty() {
				self.debug_keys_by_kind_guild.remove(&guild_key);
			}
		}
		let raid_key = (row.kind.clone(), row.guild_id, row.raid_id);
		if let Some(keys) = self.debug_keys_by_kind_guild_raid.get_mut(&raid_key) {
			keys.remove(&row.cache_key);
			if keys.is_empty() {
				self.debug_keys_by_kind_guild_raid.remove(&raid_key);
			}
		}
	}

	fn rebuild_debug_cache_indexes(&mut self) {
		self.debug_keys_by_kind.clear();
		self.debug_keys_by_kind_guild.clear();
		self.debug_keys_by_kind_guild_raid.clear();
		let rows: Vec<DebugMirrorCache> = self.debug_cache.values().cloned().collect();
		for row in rows {
			self.debug_index_add(&row);
		}
	}

	pub fn upsert_debug_cache(
		&mut self,
		cache_key: &str,
		kind: &str,
		guild_id: u64,
		raid_id: Option<u64>,
		message_id: u64,
		payload_hash: &str,
	) -> DebugMirrorCache {
		if let Some(mut existing) = self.debug_cache.remove(cache_key) {
			if existing.kind != kind || existing.guild_id != guild_id || existing.raid_id != raid_id {
				self.debug_index_remove(&existing);
				existing.kind = kind.to_string();
				existing.guild_id = guild_id;
				existing.raid_id = raid_id;
				self.debug_index_add(&existing);
			}
			existing.message_id = message_id;
			existing.payload_hash = payload_hash.to_string();
			self.debug_cache.insert(cache_key.to_string(), existing.clone());
			return existing;
		}

		let row = DebugMirrorCache {
			cache_key: cache_key.to_string(),
			kind: kind.to_string(),
			guild_id,
			raid_id,
			message_id,
			payload_hash: payload_hash.to_string(),
		};
		self.debug_cache.insert(cache_key.to_string(), row.clone());
		self.debug_index_add(&row);
		row
	}

	pub fn get_debug_cache(&self, cache_key: &str) -> Option<&DebugMirrorCache> {
		self.debug_cache.get(cache_key)
	}

	/// List cache rows through the narrowest secondary index available.
	/// Ordering is deterministic (ascending cache key) — a contract the
	/// debug output and tests rely on.
	pub fn list_debug_cache(
		&self,
		kind: Option<&str>,
		guild_id: Option<u64>,
		raid_id: Option<u64>,
	) -> Vec<DebugMirrorCache> {
		let rows_from_keys = |keys: &BTreeSet<String>| -> Vec<DebugMirrorCache> {
			keys.iter().filter_map(|key| self.debug_cache.get(key)).cloned().collect()
		};

		if let (Some(kind), Some(guild)) = (kind, guild_id) {
			if let Some(raid) = raid_id {
				return self
					.debug_keys_by_kind_guild_raid
					.get(&(kind.to_string(), guild, Some(raid)))
					.map(rows_from_keys)
					.unwrap_or_default();
			}
			return self
				.debug_keys_by_kind_guild
				.get(&(kind.to_string(), guild))
				.map(rows_from_keys)
				.unwrap_or_default();
		}

		if let (Some(kind), None, None) = (kind, guild_id, raid_id) {
			return self.debug_keys_by_kind.get(kind).map(rows_from_keys).unwrap_or_default();
		}

		let mut keys: Vec<&String> = self
			.debug_cache
			.values()
			.filter(|row| kind.map_or(true, |k| row.kind == k))
			.filter(|row| guild_id.map_or(true, |g| row.guild_id == g))
			.filter(|row| raid_id.map_or(true, |r| row.raid_id == Some(r)))
			.map(|row| &row.cache_key)
			.collect();
		keys.sort();
		keys.into_iter().filter_map(|key| self.debug_cache.get(key)).cloned().collect()
	}

	pub fn delete_debug_cache(&mut self, cache_key: &str) {
		if let Some(row) = self.debug_cache.remove(cache_key) {
			self.debug_index_remove(&row);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn now() -> DateTime<Utc> {
		Utc.ymd(2026, 2, 1).and_hms(12, 0, 0)
	}

	fn store_with_raid() -> (Store, Raid) {
		let mut store = Store::new();
		store.ensure_settings(1, Some("Testgilde"));
		let raid = store.create_raid(1, 11, 100, "Nanos", 2, now());
		store.add_raid_options(raid.id, vec!["2026-02-13 (Fr)"], vec!["20:00"]);
		(store, raid)
	}

	#[test]
	fn display_ids_are_dense_per_guild() {
		let mut store = Store::new();
		let a1 = store.create_raid(1, 11, 100, "Nanos", 0, now());
		let a2 = store.create_raid(1, 11, 100, "Skull", 0, now());
		let b1 = store.create_raid(2, 21, 200, "Nanos", 0, now());
		assert_eq!((a1.display_id, a2.display_id, b1.display_id), (1, 2, 1));
		assert_ne!(a1.id, b1.id);
	}

	#[test]
	fn display_ids_are_not_reused_after_cascade() {
		let mut store = Store::new();
		let first = store.create_raid(1, 11, 100, "Nanos", 0, now());
		store.delete_raid_cascade(first.id);
		let second = store.create_raid(1, 11, 100, "Skull", 0, now());
		assert_eq!(second.display_id, 2);
	}

	#[test]
	fn recalculate_counters_restores_display_highwater() {
		let mut store = Store::new();
		store.create_raid(1, 11, 100, "Nanos", 0, now());
		let keep = store.create_raid(1, 11, 100, "Skull", 0, now());
		store.recalculate_counters();
		assert_eq!(store.create_raid(1, 11, 100, "Nanos", 0, now()).display_id, keep.display_id + 1);
	}

	#[test]
	fn toggle_vote_twice_is_identity() {
		let (mut store, raid) = store_with_raid();
		assert!(store.toggle_vote(raid.id, OptionKind::Day, "2026-02-13 (Fr)", 200));
		assert_eq!(store.raid_votes.len(), 1);
		assert!(!store.toggle_vote(raid.id, OptionKind::Day, "2026-02-13 (Fr)", 200));
		assert!(store.raid_votes.is_empty());
		assert!(store.vote_id_by_key.is_empty());
	}

	#[test]
	fn vote_user_sets_split_by_kind() {
		let (mut store, raid) = store_with_raid();
		store.toggle_vote(raid.id, OptionKind::Day, "2026-02-13 (Fr)", 200);
		store.toggle_vote(raid.id, OptionKind::Time, "20:00", 200);
		store.toggle_vote(raid.id, OptionKind::Time, "20:00", 201);

		let (day_users, time_users) = store.vote_user_sets(raid.id);
		assert_eq!(day_users["2026-02-13 (Fr)"].len(), 1);
		assert_eq!(time_users["20:00"].len(), 2);
	}

	#[test]
	fn cancel_open_raids_leaves_other_guilds_intact() {
		let mut store = Store::new();
		let g1a = store.create_raid(1, 11, 100, "Nanos", 0, now());
		let g1b = store.create_raid(1, 11, 100, "Skull", 0, now());
		let g2 = store.create_raid(2, 21, 200, "Nanos", 0, now());
		for raid in [g1a.id, g1b.id, g2.id].iter() {
			store.add_raid_options(*raid, vec!["2026-02-13"], vec!["20:00"]);
			store.toggle_vote(*raid, OptionKind::Day, "2026-02-13", 300);
			store.upsert_posted_slot(*raid, "2026-02-13", "20:00", 22, 9000 + raid);
		}

		assert_eq!(store.cancel_open_raids_for_guild(1), 2);
		assert!(store.raids.contains_key(&g2.id));
		assert_eq!(store.raid_votes.len(), 1);
		assert_eq!(store.raid_posted_slots.len(), 1);

		// vote index stays consistent: the survivor still toggles
		assert!(!store.toggle_vote(g2.id, OptionKind::Day, "2026-02-13", 300));
		assert!(store.toggle_vote(g2.id, OptionKind::Day, "2026-02-13", 300));
	}

	#[test]
	fn purge_guild_data_removes_every_reference() {
		let (mut store, raid) = store_with_raid();
		store.toggle_vote(raid.id, OptionKind::Day, "2026-02-13 (Fr)", 200);
		store.upsert_posted_slot(raid.id, "2026-02-13 (Fr)", "20:00", 22, 9001);
		store.get_or_create_user_level(1, 200, Some("Tester")).xp = 500;
		store.create_attendance_snapshot(1, raid.display_id, "Nanos", &[200u64].iter().copied().collect());
		store.upsert_debug_cache("raidlist:1:0", "raidlist", 1, None, 1, "hash");

		let counts = store.purge_guild_data(1);
		assert_eq!(counts, PurgeCounts { raids: 1, user_levels: 1, guild_settings: 1 });
		assert!(store.raids.is_empty());
		assert!(store.raid_options.is_empty());
		assert!(store.raid_votes.is_empty());
		assert!(store.raid_posted_slots.is_empty());
		assert!(store.raid_attendance.is_empty());
		assert!(store.user_levels.is_empty());
		assert!(store.settings.is_empty());
		assert!(store.debug_cache.is_empty());
		assert!(store.list_debug_cache(Some("raidlist"), Some(1), None).is_empty());
	}

	#[test]
	fn configure_channels_resets_raidlist_message_on_channel_change() {
		let mut store = Store::new();
		store.configure_channels(1, Some(11), Some(22), Some(33));
		store.ensure_settings(1, None).raidlist_message_id = Some(555);

		store.configure_channels(1, Some(11), Some(22), Some(33));
		assert_eq!(store.settings[&1].raidlist_message_id, Some(555));

		store.configure_channels(1, Some(11), Some(22), Some(44));
		assert_eq!(store.settings[&1].raidlist_message_id, None);
	}

	#[test]
	fn debug_cache_list_is_deterministic_and_indexed() {
		let mut store = Store::new();
		store.upsert_debug_cache("b", "raid_reminder", 1, Some(5), 2, "h2");
		store.upsert_debug_cache("a", "raid_reminder", 1, Some(5), 1, "h1");
		store.upsert_debug_cache("c", "raid_reminder", 2, None, 3, "h3");
		store.upsert_debug_cache("d", "slot_temp_role", 1, Some(5), 4, "h4");

		let keys: Vec<String> = store
			.list_debug_cache(Some("raid_reminder"), Some(1), Some(5))
			.into_iter()
			.map(|row| row.cache_key)
			.collect();
		assert_eq!(keys, vec!["a", "b"]);

		let all_kind: Vec<String> =
			store.list_debug_cache(Some("raid_reminder"), None, None).into_iter().map(|row| row.cache_key).collect();
		assert_eq!(all_kind, vec!["a", "b", "c"]);

		store.delete_debug_cache("a");
		assert_eq!(store.list_debug_cache(Some("raid_reminder"), Some(1), Some(5)).len(), 1);
	}

	#[test]
	fn debug_cache_reindexes_on_kind_change() {
		let mut store = Store::new();
		store.upsert_debug_cache("k", "raid_reminder", 1, Some(5), 1, "h1");
		store.upsert_debug_cache("k", "slot_temp_role", 2, None, 2, "h2");

		assert!(store.list_debug_cache(Some("raid_reminder"), Some(1), None).is_empty());
		let rows = store.list_debug_cache(Some("slot_temp_role"), Some(2), None);
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].message_id, 2);
	}

	#[test]
	fn attendance_snapshot_writes_once_per_user() {
		let (mut store, raid) = store_with_raid();
		let users: BTreeSet<u64> = [200u64, 201].iter().copied().collect();
		assert_eq!(store.create_attendance_snapshot(1, raid.display_id, "Nanos", &users), 2);
		assert_eq!(store.create_attendance_snapshot(1, raid.display_id, "Nanos", &users), 0);

		assert!(store.mark_attendance(1, raid.display_id, 200, AttendanceStatus::Absent, 999));
		assert_eq!(store.raid_participation_count(1, 200), 0);
		assert_eq!(store.raid_participation_count(1, 201), 1);
	}

	#[test]
	fn remote_target_resolution_orders_exact_before_partial() {
		let mut store = Store::new();
		store.ensure_settings(1, Some("Alpha"));
		store.ensure_settings(2, Some("Alpha Beta"));
		store.ensure_settings(3, Some("Gamma"));

		assert_eq!(store.resolve_remote_target("42"), Ok(42));
		assert_eq!(store.resolve_remote_target("alpha"), Ok(1));
		assert_eq!(store.resolve_remote_target("gam"), Ok(3));
		assert_eq!(store.resolve_remote_target("alph"), Err(RemoteTargetError::Ambiguous));
		assert_eq!(store.resolve_remote_target(""), Err(RemoteTargetError::Missing));
		assert_eq!(store.resolve_remote_target("delta"), Err(RemoteTargetError::NotFound));
	}

	#[test]
	fn seed_default_dungeons_is_idempotent() {
		let mut store = Store::new();
		assert_eq!(store.seed_default_dungeons(), 2);
		assert_eq!(store.seed_default_dungeons(), 0);
		let names: Vec<String> = store.list_active_dungeons().into_iter().map(|d| d.name).collect();
		assert_eq!(names, vec!["Nanos", "Skull"]);
	}
}
