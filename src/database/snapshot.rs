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

//! Load-all / flush-selected snapshot persistence.
//!
//! A flush replaces whole tables inside one transaction: delete in FK-safe
//! reverse order, insert the in-memory rows in forward order. Two
//! optimisations keep the round trips cheap: the canonical fingerprint
//! short-circuits identical flushes entirely, and callers may pass
//! dirty-table hints to narrow the replace to the tables they touched.
//! A failed flush is retried with exponential backoff; on exhaustion the
//! in-memory state is kept and the next successful flush reconciles.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgConnection, Row};

use crate::config::{PERSIST_FLUSH_MAX_ATTEMPTS, PERSIST_FLUSH_RETRY_BASE_MILLIS};
use crate::error::{EngineError, Result};
use crate::store::Store;
use crate::types::{
	AttendanceStatus, DebugMirrorCache, Dungeon, GuildSettings, OptionKind, Raid, RaidAttendance, RaidOption,
	RaidPostedSlot, RaidStatus, RaidTemplate, RaidVote, UserLevel,
};

use super::batch::Batch;
use super::fingerprint::{snapshot_fingerprint, TABLE_ORDER};
use super::Database;

pub struct Persistence {
	db: Database,
	last_fingerprint: parking_lot::Mutex<Option<String>>,
	flush_lock: futures::lock::Mutex<()>,
}

impl Persistence {
	pub fn new(db: Database) -> Self {
		Self { db, last_fingerprint: parking_lot::Mutex::new(None), flush_lock: futures::lock::Mutex::new(()) }
	}

	pub fn database(&self) -> &Database {
		&self.db
	}

	/// Select all rows of all tables, rebuild the store, and prime the
	/// fingerprint so an immediate flush is a no-op.
	pub async fn load(&self, store: &mut Store) -> Result<()> {
		let _guard = self.flush_lock.lock().await;
		let mut conn = self.db.conn().await?;
		store.reset();

		for row in sqlx::query("SELECT guild_id, guild_name, participants_channel_id, raidlist_channel_id, raidlist_message_id, planner_channel_id, default_min_players, templates_enabled, template_manager_role_id FROM \"guild_settings\"")
			.fetch_all(&mut conn)
			.await?
		{
			let record = GuildSettings {
				guild_id: row.try_get::<i64, _>("guild_id")? as u64,
				guild_name: row.try_get("guild_name")?,
				participants_channel_id: opt_u64(row.try_get("participants_channel_id")?),
				raidlist_channel_id: opt_u64(row.try_get("raidlist_channel_id")?),
				raidlist_message_id: opt_u64(row.try_get("raidlist_message_id")?),
				planner_channel_id: opt_u64(row.try_get("planner_channel_id")?),
				default_min_players: row.try_get::<i32, _>("default_min_players")?.max(0) as u32,
				templates_enabled: row.try_get("templates_enabled")?,
				template_manager_role_id: opt_u64(row.try_get("template_manager_role_id")?),
			};
			store.settings.insert(record.guild_id, record);
		}

		for row in sqlx::query("SELECT id, name, short_code, is_active, sort_order FROM \"dungeons\"")
			.fetch_all(&mut conn)
			.await?
		{
			let record = Dungeon {
				id: row.try_get::<i32, _>("id")?.max(0) as u32,
				name: row.try_get("name")?,
				short_code: row.try_get("short_code")?,
				is_active: row.try_get("is_active")?,
				sort_order: row.try_get("sort_order")?,
			};
			store.dungeons.insert(record.id, record);
		}

		for row in sqlx::query("SELECT id, display_id, guild_id, channel_id, creator_id, dungeon, status, created_at, message_id, min_players, participants_posted, temp_role_id, temp_role_created FROM \"raids\"")
			.fetch_all(&mut conn)
			.await?
		{
			let status: String = row.try_get("status")?;
			let record = Raid {
				id: row.try_get::<i32, _>("id")?.max(0) as u64,
				display_id: row.try_get::<Option<i32>, _>("display_id")?.unwrap_or(0).max(0) as u32,
				guild_id: row.try_get::<i64, _>("guild_id")? as u64,
				channel_id: row.try_get::<i64, _>("channel_id")? as u64,
				creator_id: row.try_get::<i64, _>("creator_id")? as u64,
				dungeon: row.try_get("dungeon")?,
				status: RaidStatus::parse(&status).unwrap_or(RaidStatus::Open),
				created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
				message_id: opt_u64(row.try_get("message_id")?),
				min_players: row.try_get::<i32, _>("min_players")?.max(0) as u32,
				participants_posted: row.try_get("participants_posted")?,
				temp_role_id: opt_u64(row.try_get("temp_role_id")?),
				temp_role_created: row.try_get("temp_role_created")?,
			};
			store.raids.insert(record.id, record);
		}

		for row in sqlx::query("SELECT id, raid_id, kind, label FROM \"raid_options\"").fetch_all(&mut conn).await? {
			let kind: String = row.try_get("kind")?;
			let kind = match OptionKind::parse(&kind) {
				Some(kind) => kind,
				None => {
					log::warn!("Skipping raid option with unknown kind {:?}", kind);
					continue;
				}
			};
			let record = RaidOption {
				id: row.try_get::<i32, _>("id")?.max(0) as u64,
				raid_id: row.try_get::<i32, _>("raid_id")?.max(0) as u64,
				kind,
				label: row.try_get("label")?,
			};
			store.raid_options.insert(record.id, record);
		}

		for row in sqlx::query("SELECT id, raid_id, kind, option_label, user_id FROM \"raid_votes\"")
			.fetch_all(&mut conn)
			.await?
		{
			let kind: String = row.try_get("kind")?;
			let kind = match OptionKind::parse(&kind) {
				Some(kind) => kind,
				None => {
					log::warn!("Skipping raid vote with unknown kind {:?}", kind);
					continue;
				}
			};
			let record = RaidVote {
				id: row.try_get::<i32, _>("id")?.max(0) as u64,
				raid_id: row.try_get::<i32, _>("raid_id")?.max(0) as u64,
				kind,
				option_label: row.try_get("option_label")?,
				user_id: row.try_get::<i64, _>("user_id")? as u64,
			};
			store.raid_votes.insert(record.id, record);
		}

		for row in sqlx::query("SELECT id, raid_id, day_label, time_label, channel_id, message_id FROM \"raid_posted_slots\"")
			.fetch_all(&mut conn)
			.await?
		{
			let record = RaidPostedSlot {
				id: row.try_get::<i64, _>("id")?.max(0) as u64,
				raid_id: row.try_get::<i64, _>("raid_id")?.max(0) as u64,
				day_label: row.try_get("day_label")?,
				time_label: row.try_get("time_label")?,
				channel_id: opt_u64(row.try_get("channel_id")?),
				message_id: opt_u64(row.try_get("message_id")?),
			};
			store.raid_posted_slots.insert(record.id, record);
		}

		for row in sqlx::query("SELECT id, guild_id, dungeon_id, template_name, template_data FROM \"raid_templates\"")
			.fetch_all(&mut conn)
			.await?
		{
			let record = RaidTemplate {
				id: row.try_get::<i32, _>("id")?.max(0) as u64,
				guild_id: row.try_get::<i64, _>("guild_id")? as u64,
				dungeon_id: row.try_get::<i32, _>("dungeon_id")?.max(0) as u32,
				template_name: row.try_get("template_name")?,
				template_data: row.try_get("template_data")?,
			};
			store.raid_templates.insert(record.id, record);
		}

		for row in sqlx::query("SELECT id, guild_id, raid_display_id, dungeon, user_id, status, marked_by_user_id FROM \"raid_attendance\"")
			.fetch_all(&mut conn)
			.await?
		{
			let status: String = row.try_get("status")?;
			let record = RaidAttendance {
				id: row.try_get::<i32, _>("id")?.max(0) as u64,
				guild_id: row.try_get::<i64, _>("guild_id")? as u64,
				raid_display_id: row.try_get::<i32, _>("raid_display_id")?.max(0) as u32,
				dungeon: row.try_get("dungeon")?,
				user_id: row.try_get::<i64, _>("user_id")? as u64,
				status: AttendanceStatus::parse(&status).unwrap_or(AttendanceStatus::Pending),
				marked_by_user_id: opt_u64(row.try_get("marked_by_user_id")?),
			};
			store.raid_attendance.insert(record.id, record);
		}

		for row in sqlx::query("SELECT guild_id, user_id, xp, level, username FROM \"user_levels\"")
			.fetch_all(&mut conn)
			.await?
		{
			let record = UserLevel {
				guild_id: row.try_get::<i64, _>("guild_id")? as u64,
				user_id: row.try_get::<i64, _>("user_id")? as u64,
				xp: row.try_get::<i64, _>("xp")?.max(0) as u64,
				level: row.try_get::<i64, _>("level")?.max(0) as u32,
				username: row.try_get("username")?,
			};
			store.user_levels.insert((record.guild_id, record.user_id), record);
		}

		for row in sqlx::query("SELECT cache_key, kind, guild_id, raid_id, message_id, payload_hash FROM \"debug_mirror_cache\"")
			.fetch_all(&mut conn)
			.await?
		{
			let record = DebugMirrorCache {
				cache_key: row.try_get("cache_key")?,
				kind: row.try_get("kind")?,
				guild_id: row.try_get::<i64, _>("guild_id")? as u64,
				raid_id: opt_u64(row.try_get("raid_id")?),
				message_id: row.try_get::<i64, _>("message_id")? as u64,
				payload_hash: row.try_get("payload_hash")?,
			};
			store.debug_cache.insert(record.cache_key.clone(), record);
		}

		store.recalculate_counters();
		*self.last_fingerprint.lock() = Some(snapshot_fingerprint(store)?);
		log::info!(
			"Loaded snapshot: {} guilds, {} raids, {} votes, {} cache rows",
			store.settings.len(),
			store.raids.len(),
			store.raid_votes.len(),
			store.debug_cache.len()
		);
		Ok(())
	}

	/// Flush the store. Returns false when the fingerprint matched and the
	/// round trip was skipped entirely.
	pub async fn flush(&self, store: &Store, dirty_tables: Option<&[&str]>) -> Result<bool> {
		let _guard = self.flush_lock.lock().await;

		let fingerprint = snapshot_fingerprint(store)?;
		if self.last_fingerprint.lock().as_ref() == Some(&fingerprint) {
			log::debug!("Flush skipped, fingerprint unchanged");
			return Ok(false);
		}

		let selected =
			|table: &str| dirty_tables.map_or(true, |tables| tables.iter().any(|dirty| *dirty == table));

		let mut last_error = String::new();
		for attempt in 1..=PERSIST_FLUSH_MAX_ATTEMPTS {
			match self.flush_once(store, &selected).await {
				Ok(()) => {
					*self.last_fingerprint.lock() = Some(fingerprint);
					return Ok(true);
				}
				Err(e) => {
					last_error = e.to_string();
					log::warn!("Flush attempt {}/{} failed: {}", attempt, PERSIST_FLUSH_MAX_ATTEMPTS, last_error);
					if attempt < PERSIST_FLUSH_MAX_ATTEMPTS {
						let backoff = PERSIST_FLUSH_RETRY_BASE_MILLIS * 2u64.pow(attempt - 1);
						smol::Timer::after(Duration::from_millis(backoff)).await;
					}
				}
			}
		}

		// In-memory state is intentionally kept; the next successful flush
		// reconciles the database.
		Err(EngineError::FlushExhausted { attempts: PERSIST_FLUSH_MAX_ATTEMPTS, last: last_error })
	}

	async fn flush_once(&self, store: &Store, selected: &dyn Fn(&str) -> bool) -> Result<()> {
		let mut tx = self.db.pool().begin().await?;

		for table in TABLE_ORDER.iter().rev() {
			if !selected(table) {
				continue;
			}
			sqlx::query(&format!("DELETE FROM \"{}\"", table)).execute(&mut tx).await?;
		}

		for table in TABLE_ORDER.iter() {
			if !selected(table) {
				continue;
			}
			match *table {
				"guild_settings" => insert_guild_settings(&mut tx, store).await?,
				"dungeons" => insert_dungeons(&mut tx, store).await?,
				"raids" => insert_raids(&mut tx, store).await?,
				"raid_options" => insert_raid_options(&mut tx, store).await?,
				"raid_votes" => insert_raid_votes(&mut tx, store).await?,
				"raid_posted_slots" => insert_raid_posted_slots(&mut tx, store).await?,
				"raid_templates" => insert_raid_templates(&mut tx, store).await?,
				"raid_attendance" => insert_raid_attendance(&mut tx, store).await?,
				"user_levels" => insert_user_levels(&mut tx, store).await?,
				"debug_mirror_cache" => insert_debug_cache(&mut tx, store).await?,
				other => {
					return Err(EngineError::Schema(format!("flush references unmapped table {}", other)));
				}
			}
		}

		tx.commit().await?;
		Ok(())
	}
}

fn opt_u64(value: Option<i64>) -> Option<u64> {
	value.map(|v| v as u64)
}

fn sorted_by_key<'a, K: Ord + Copy, V>(map: impl Iterator<Item = (&'a K, &'a V)>) -> Vec<&'a V>
where
	K: 'a,
	V: 'a,
{
	let mut rows: Vec<(&K, &V)> = map.collect();
	rows.sort_by_key(|(key, _)| **key);
	rows.into_iter().map(|(_, value)| value).collect()
}

async fn insert_guild_settings(conn: &mut PgConnection, store: &Store) -> Result<()> {
	let mut batch = Batch::new(
		"guild_settings",
		r#"INSERT INTO "guild_settings" (guild_id, guild_name, participants_channel_id, raidlist_channel_id, raidlist_message_id, planner_channel_id, default_min_players, templates_enabled, template_manager_role_id) VALUES "#,
		"",
	);
	for row in sorted_by_key(store.settings.iter()) {
		batch.reserve(9)?;
		if batch.current_num_arguments() > 0 {
			batch.append(",");
		}
		batch.append("(");
		batch.bind(row.guild_id as i64)?;
		batch.append(",");
		batch.bind(row.guild_name.clone())?;
		batch.append(",");
		batch.bind(row.participants_channel_id.map(|v| v as i64))?;
		batch.append(",");
		batch.bind(row.raidlist_channel_id.map(|v| v as i64))?;
		batch.append(",");
		batch.bind(row.raidlist_message_id.map(|v| v as i64))?;
		batch.append(",");
		batch.bind(row.planner_channel_id.map(|v| v as i64))?;
		batch.append(",");
		batch.bind(row.default_min_players as i32)?;
		batch.append(",");
		batch.bind(row.templates_enabled)?;
		batch.append(",");
		batch.bind(row.template_manager_role_id.map(|v| v as i64))?;
		batch.append(")");
	}
	batch.execute(conn).await?;
	Ok(())
}

async fn insert_dungeons(conn: &mut PgConnection, store: &Store) -> Result<()> {
	let mut batch = Batch::new(
		"dungeons",
		r#"INSERT INTO "dungeons" (id, name, short_code, is_active, sort_order) VALUES "#,
		"",
	);
	for row in sorted_by_key(store.dungeons.iter()) {
		batch.reserve(5)?;
		if batch.current_num_arguments() > 0 {
			batch.append(",");
		}
		batch.append("(");
		batch.bind(row.id as i32)?;
		batch.append(",");
		batch.bind(row.name.clone())?;
		batch.append(",");
		batch.bind(row.short_code.clone())?;
		batch.append(",");
		batch.bind(row.is_active)?;
		batch.append(",");
		batch.bind(row.sort_order)?;
		batch.append(")");
	}
	batch.execute(conn).await?;
	Ok(())
}

async fn insert_raids(conn: &mut PgConnection, store: &Store) -> Result<()> {
	let mut batch = Batch::new(
		"raids",
		r#"INSERT INTO "raids" (id, display_id, guild_id, channel_id, creator_id, dungeon, status, created_at, message_id, min_players, participants_posted, temp_role_id, temp_role_created) VALUES "#,
		"",
	);
	for row in sorted_by_key(store.raids.iter()) {
		batch.reserve(13)?;
		if batch.current_num_arguments() > 0 {
			batch.append(",");
		}
		batch.append("(");
		batch.bind(row.id as i32)?;
		batch.append(",");
		batch.bind(row.display_id as i32)?;
		batch.append(",");
		batch.bind(row.guild_id as i64)?;
		batch.append(",");
		batch.bind(row.channel_id as i64)?;
		batch.append(",");
		batch.bind(row.creator_id as i64)?;
		batch.append(",");
		batch.bind(row.dungeon.clone())?;
		batch.append(",");
		batch.bind(row.status.as_str())?;
		batch.append(",");
		batch.bind(row.created_at)?;
		batch.append(",");
		batch.bind(row.message_id.map(|v| v as i64))?;
		batch.append(",");
		batch.bind(row.min_players as i32)?;
		batch.append(",");
		batch.bind(row.participants_posted)?;
		batch.append(",");
		batch.bind(row.temp_role_id.map(|v| v as i64))?;
		batch.append(",");
		batch.bind(row.temp_role_created)?;
		batch.append(")");
	}
	batch.execute(conn).await?;
	Ok(())
}

async fn insert_raid_options(conn: &mut PgConnection, store: &Store) -> Result<()> {
	let mut batch = Batch::new(
		"raid_options",
		r#"INSERT INTO "raid_options" (id, raid_id, kind, label) VALUES "#,
		"",
	);
	for row in sorted_by_key(store.raid_options.iter()) {
		batch.reserve(4)?;
		if batch.current_num_arguments() > 0 {
			batch.append(",");
		}
		batch.append("(");
		batch.bind(row.id as i32)?;
		batch.append(",");
		batch.bind(row.raid_id as i32)?;
		batch.append(",");
		batch.bind(row.kind.as_str())?;
		batch.append(",");
		batch.bind(row.label.clone())?;
		batch.append(")");
	}
	batch.execute(conn).await?;
	Ok(())
}

async fn insert_raid_votes(conn: &mut PgConnection, store: &Store) -> Result<()> {
	let mut batch = Batch::new(
		"raid_votes",
		r#"INSERT INTO "raid_votes" (id, raid_id, kind, option_label, user_id) VALUES "#,
		"",
	);
	for row in sorted_by_key(store.raid_votes.iter()) {
		batch.reserve(5)?;
		if batch.current_num_arguments() > 0 {
			batch.append(",");
		}
		batch.append("(");
		batch.bind(row.id as i32)?;
		batch.append(",");
		batch.bind(row.raid_id as i32)?;
		batch.append(",");
		batch.bind(row.kind.as_str())?;
		batch.append(",");
		batch.bind(row.option_label.clone())?;
		batch.append(",");
		batch.bind(row.user_id as i64)?;
		batch.append(")");
	}
	batch.execute(conn).await?;
	Ok(())
}

async fn insert_raid_posted_slots(conn: &mut PgConnection, store: &Store) -> Result<()> {
	let mut batch = Batch::new(
		"raid_posted_slots",
		r#"INSERT INTO "raid_posted_slots" (id, raid_id, day_label, time_label, channel_id, message_id) VALUES "#,
		"",
	);
	for row in sorted_by_key(store.raid_posted_slots.iter()) {
		batch.reserve(6)?;
		if batch.current_num_arguments() > 0 {
			batch.append(",");
		}
		batch.append("(");
		batch.bind(row.id as i64)?;
		batch.append(",");
		batch.bind(row.raid_id as i64)?;
		batch.append(",");
		batch.bind(row.day_label.clone())?;
		batch.append(",");
		batch.bind(row.time_label.clone())?;
		batch.append(",");
		batch.bind(row.channel_id.map(|v| v as i64))?;
		batch.append(",");
		batch.bind(row.message_id.map(|v| v as i64))?;
		batch.append(")");
	}
	batch.execute(conn).await?;
	Ok(())
}

async fn insert_raid_templates(conn: &mut PgConnection, store: &Store) -> Result<()> {
	let mut batch = Batch::new(
		"raid_templates",
		r#"INSERT INTO "raid_templates" (id, guild_id, dungeon_id, template_name, template_data) VALUES "#,
		"",
	);
	for row in sorted_by_key(store.raid_templates.iter()) {
		batch.reserve(5)?;
		if batch.current_num_arguments() > 0 {
			batch.append(",");
		}
		batch.append("(");
		batch.bind(row.id as i32)?;
		batch.append(",");
		batch.bind(row.guild_id as i64)?;
		batch.append(",");
		batch.bind(row.dungeon_id as i32)?;
		batch.append(",");
		batch.bind(row.template_name.clone())?;
		batch.append(",");
		batch.bind(row.template_data.clone())?;
		batch.append(")");
	}
	batch.execute(conn).await?;
	Ok(())
}

async fn insert_raid_attendance(conn: &mut PgConnection, store: &Store) -> Result<()> {
	let mut batch = Batch::new(
		"raid_attendance",
		r#"INSERT INTO "raid_attendance" (id, guild_id, raid_display_id, dungeon, user_id, status, marked_by_user_id) VALUES "#,
		"",
	);
	for row in sorted_by_key(store.raid_attendance.iter()) {
		batch.reserve(7)?;
		if batch.current_num_arguments() > 0 {
			batch.append(",");
		}
		batch.append("(");
		batch.bind(row.id as i32)?;
		batch.append(",");
		batch.bind(row.guild_id as i64)?;
		batch.append(",");
		batch.bind(row.raid_display_id as i32)?;
		batch.append(",");
		batch.bind(row.dungeon.clone())?;
		batch.append(",");
		batch.bind(row.user_id as i64)?;
		batch.append(",");
		batch.bind(row.status.as_str())?;
		batch.append(",");
		batch.bind(row.marked_by_user_id.map(|v| v as i64))?;
		batch.append(")");
	}
	batch.execute(conn).await?;
	Ok(())
}

async fn insert_user_levels(conn: &mut PgConnection, store: &Store) -> Result<()> {
	let mut batch = Batch::new(
		"user_levels",
		r#"INSERT INTO "user_levels" (guild_id, user_id, xp, level, username) VALUES "#,
		"",
	);
	for row in sorted_by_key(store.user_levels.iter()) {
		batch.reserve(5)?;
		if batch.current_num_arguments() > 0 {
			batch.append(",");
		}
		batch.append("(");
		batch.bind(row.guild_id as i64)?;
		batch.append(",");
		batch.bind(row.user_id as i64)?;
		batch.append(",");
		batch.bind(row.xp as i64)?;
		batch.append(",");
		batch.bind(row.level as i64)?;
		batch.append(",");
		batch.bind(row.username.clone())?;
		batch.append(")");
	}
	batch.execute(conn).await?;
	Ok(())
}

async fn insert_debug_cache(conn: &mut PgConnection, store: &Store) -> Result<()> {
	let mut batch = Batch::new(
		"debug_mirror_cache",
		r#"INSERT INTO "debug_mirror_cache" (cache_key, kind, guild_id, raid_id, message_id, payload_hash) VALUES "#,
		"",
	);
	let mut rows: Vec<&DebugMirrorCache> = store.debug_cache.values().collect();
	rows.sort_by(|a, b| a.cache_key.cmp(&b.cache_key));
	for row in rows {
		batch.reserve(6)?;
		if batch.current_num_arguments() > 0 {
			batch.append(",");
		}
		batch.append("(");
		batch.bind(row.cache_key.clone())?;
		batch.append(",");
		batch.bind(row.kind.clone())?;
		batch.append(",");
		batch.bind(row.guild_id as i64)?;
		batch.append(",");
		batch.bind(row.raid_id.map(|v| v as i64))?;
		batch.append(",");
		batch.bind(row.message_id as i64)?;
		batch.append(",");
		batch.bind(row.payload_hash.clone())?;
		batch.append(")");
	}
	batch.execute(conn).await?;
	Ok(())
}
