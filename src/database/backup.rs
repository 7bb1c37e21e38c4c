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

//! SQL backup writer: snapshot every table into one UTF-8 `.sql` file with
//! ASCII-only DDL, one statement per line, written to a `.tmp` sibling and
//! atomically renamed into place. A process-wide mutex guards the write
//! critical section.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use chrono_tz::Europe::Berlin;
use once_cell::sync::Lazy;

use crate::error::Result;
use crate::store::Store;

pub const DEFAULT_BACKUP_PATH: &str = "backups/db_backup.sql";

static BACKUP_WRITE_LOCK: Lazy<parking_lot::Mutex<()>> = Lazy::new(|| parking_lot::Mutex::new(()));

enum Literal<'a> {
	Null,
	Bool(bool),
	Int(i64),
	Text(&'a str),
	Timestamp(DateTime<Utc>),
}

fn sql_literal(value: Literal) -> String {
	match value {
		Literal::Null => "NULL".to_string(),
		Literal::Bool(true) => "TRUE".to_string(),
		Literal::Bool(false) => "FALSE".to_string(),
		Literal::Int(value) => value.to_string(),
		Literal::Text(text) => format!("'{}'", text.replace('\'', "''")),
		Literal::Timestamp(at) => format!("'{}'", at.to_rfc3339()),
	}
}

fn opt_int(value: Option<u64>) -> Literal<'static> {
	match value {
		Some(value) => Literal::Int(value as i64),
		None => Literal::Null,
	}
}

fn opt_text(value: &Option<String>) -> Literal<'_> {
	match value {
		Some(text) => Literal::Text(text),
		None => Literal::Null,
	}
}

fn insert_line(table: &str, columns: &[&str], values: Vec<String>) -> String {
	let cols = columns.iter().map(|name| format!("\"{}\"", name)).collect::<Vec<_>>().join(", ");
	format!("INSERT INTO \"{}\" ({}) VALUES ({});", table, cols, values.join(", "))
}

/// Render the store into backup SQL. Pure; the worker stamps `generated_at`.
pub fn render_backup_sql(store: &Store, generated_at: DateTime<Utc>) -> String {
	let mut lines: Vec<String> = vec![
		"-- DMW Rewrite SQL Backup".to_string(),
		format!("-- generated_at_berlin: {}", generated_at.with_timezone(&Berlin).to_rfc3339()),
		"BEGIN;".to_string(),
		String::new(),
	];

	for table in super::fingerprint::TABLE_ORDER.iter().rev() {
		lines.push(format!("DELETE FROM \"{}\";", table));
	}
	lines.push(String::new());

	let mut settings = store.settings.values().collect::<Vec<_>>();
	settings.sort_by_key(|row| row.guild_id);
	for row in settings {
		lines.push(insert_line(
			"guild_settings",
			&[
				"guild_id",
				"guild_name",
				"participants_channel_id",
				"raidlist_channel_id",
				"raidlist_message_id",
				"planner_channel_id",
				"default_min_players",
				"templates_enabled",
				"template_manager_role_id",
			],
			vec![
				sql_literal(Literal::Int(row.guild_id as i64)),
				sql_literal(opt_text(&row.guild_name)),
				sql_literal(opt_int(row.participants_channel_id)),
				sql_literal(opt_int(row.raidlist_channel_id)),
				sql_literal(opt_int(row.raidlist_message_id)),
				sql_literal(opt_int(row.planner_channel_id)),
				sql_literal(Literal::Int(i64::from(row.default_min_players))),
				sql_literal(Literal::Bool(row.templates_enabled)),
				sql_literal(opt_int(row.template_manager_role_id)),
			],
		));
	}

	let mut dungeons = store.dungeons.values().collect::<Vec<_>>();
	dungeons.sort_by_key(|row| row.id);
	for row in dungeons {
		lines.push(insert_line(
			"dungeons",
			&["id", "name", "short_code", "is_active", "sort_order"],
			vec![
				sql_literal(Literal::Int(i64::from(row.id))),
				sql_literal(Literal::Text(&row.name)),
				sql_literal(Literal::Text(&row.short_code)),
				sql_literal(Literal::Bool(row.is_active)),
				sql_literal(Literal::Int(i64::from(row.sort_order))),
			],
		));
	}

	let mut raids = store.raids.values().collect::<Vec<_>>();
	raids.sort_by_key(|row| row.id);
	for row in raids {
		lines.push(insert_line(
			"raids",
			&[
				"id",
				"display_id",
				"guild_id",
				"channel_id",
				"creator_id",
				"dungeon",
				"status",
				"created_at",
				"message_id",
				"min_players",
				"participants_posted",
				"temp_role_id",
				"temp_role_created",
			],
			vec![
				sql_literal(Literal::Int(row.id as i64)),
				sql_literal(Literal::Int(i64::from(row.display_id))),
				sql_literal(Literal::Int(row.guild_id as i64)),
				sql_literal(Literal::Int(row.channel_id as i64)),
				sql_literal(Literal::Int(row.creator_id as i64)),
				sql_literal(Literal::Text(&row.dungeon)),
				sql_literal(Literal::Text(row.status.as_str())),
				sql_literal(Literal::Timestamp(row.created_at)),
				sql_literal(opt_int(row.message_id)),
				sql_literal(Literal::Int(i64::from(row.min_players))),
				sql_literal(Literal::Bool(row.participants_posted)),
				sql_literal(opt_int(row.temp_role_id)),
				sql_literal(Literal::Bool(row.temp_role_created)),
			],
		));
	}

	let mut options = store.raid_options.values().collect::<Vec<_>>();
	options.sort_by_key(|row| row.id);
	for row in options {
		lines.push(insert_line(
			"raid_options",
			&["id", "raid_id", "kind", "label"],
			vec![
				sql_literal(Literal::Int(row.id as i64)),
				sql_literal(Literal::Int(row.raid_id as i64)),
				sql_literal(Literal::Text(row.kind.as_str())),
				sql_literal(Literal::Text(&row.label)),
			],
		));
	}

	let mut votes = store.raid_votes.values().collect::<Vec<_>>();
	votes.sort_by_key(|row| row.id);
	for row in votes {
		lines.push(insert_line(
			"raid_votes",
			&["id", "raid_id", "kind", "option_label", "user_id"],
			vec![
				sql_literal(Literal::Int(row.id as i64)),
				sql_literal(Literal::Int(row.raid_id as i64)),
				sql_literal(Literal::Text(row.kind.as_str())),
				sql_literal(Literal::Text(&row.option_label)),
				sql_literal(Literal::Int(row.user_id as i64)),
			],
		));
	}

	let mut slots = store.raid_posted_slots.values().collect::<Vec<_>>();
	slots.sort_by_key(|row| row.id);
	for row in slots {
		lines.push(insert_line(
			"raid_posted_slots",
			&["id", "raid_id", "day_label", "time_label", "channel_id", "message_id"],
			vec![
				sql_literal(Literal::Int(row.id as i64)),
				sql_literal(Literal::Int(row.raid_id as i64)),
				sql_literal(Literal::Text(&row.day_label)),
				sql_literal(Literal::Text(&row.time_label)),
				sql_literal(opt_int(row.channel_id)),
				sql_literal(opt_int(row.message_id)),
			],
		));
	}

	let mut templates = store.raid_templates.values().collect::<Vec<_>>();
	templates.sort_by_key(|row| row.id);
	for row in templates {
		lines.push(insert_line(
			"raid_templates",
			&["id", "guild_id", "dungeon_id", "template_name", "template_data"],
			vec![
				sql_literal(Literal::Int(row.id as i64)),
				sql_literal(Literal::Int(row.guild_id as i64)),
				sql_literal(Literal::Int(i64::from(row.dungeon_id))),
				sql_literal(Literal::Text(&row.template_name)),
				sql_literal(Literal::Text(&row.template_data)),
			],
		));
	}

	let mut attendance = store.raid_attendance.values().collect::<Vec<_>>();
	attendance.sort_by_key(|row| row.id);
	for row in attendance {
		lines.push(insert_line(
			"raid_attendance",
			&["id", "guild_id", "raid_display_id", "dungeon", "user_id", "status", "marked_by_user_id"],
			vec![
				sql_literal(Literal::Int(row.id as i64)),
				sql_literal(Literal::Int(row.guild_id as i64)),
				sql_literal(Literal::Int(i64::from(row.raid_display_id))),
				sql_literal(Literal::Text(&row.dungeon)),
				sql_literal(Literal::Int(row.user_id as i64)),
				sql_literal(Literal::Text(row.status.as_str())),
				sql_literal(opt_int(row.marked_by_user_id)),
			],
		));
	}

	let mut levels = store.user_levels.values().collect::<Vec<_>>();
	levels.sort_by_key(|row| (row.guild_id, row.user_id));
	for row in levels {
		lines.push(insert_line(
			"user_levels",
			&["guild_id", "user_id", "xp", "level", "username"],
			vec![
				sql_literal(Literal::Int(row.guild_id as i64)),
				sql_literal(Literal::Int(row.user_id as i64)),
				sql_literal(Literal::Int(row.xp as i64)),
				sql_literal(Literal::Int(i64::from(row.level))),
				sql_literal(opt_text(&row.username)),
			],
		));
	}

	let mut cache = store.debug_cache.values().collect::<Vec<_>>();
	cache.sort_by(|a, b| a.cache_key.cmp(&b.cache_key));
	for row in cache {
		lines.push(insert_line(
			"debug_mirror_cache",
			&["cache_key", "kind", "guild_id", "raid_id", "message_id", "payload_hash"],
			vec![
				sql_literal(Literal::Text(&row.cache_key)),
				sql_literal(Literal::Text(&row.kind)),
				sql_literal(Literal::Int(row.guild_id as i64)),
				sql_literal(opt_int(row.raid_id)),
				sql_literal(Literal::Int(row.message_id as i64)),
				sql_literal(Literal::Text(&row.payload_hash)),
			],
		));
	}

	lines.push(String::new());
	lines.push("COMMIT;".to_string());
	lines.join("\n") + "\n"
}

/// Write the backup to `output_path` (parent directories are created).
pub fn export_to_sql(store: &Store, output_path: &Path, generated_at: DateTime<Utc>) -> Result<PathBuf> {
	let _guard = BACKUP_WRITE_LOCK.lock();

	if let Some(parent) = output_path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)?;
		}
	}

	let payload = render_backup_sql(store, generated_at);
	let file_name = output_path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
	let temp_path = output_path.with_file_name(format!(".{}.tmp", file_name));
	fs::write(&temp_path, payload)?;
	fs::rename(&temp_path, output_path)?;
	Ok(output_path.to_path_buf())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::OptionKind;
	use chrono::TimeZone;

	fn seeded() -> Store {
		let mut store = Store::new();
		store.ensure_settings(1, Some("Test'gilde"));
		let raid = store.create_raid(1, 11, 100, "Nanos", 2, Utc.ymd(2026, 2, 1).and_hms(12, 0, 0));
		store.add_raid_options(raid.id, vec!["2026-02-13"], vec!["20:00"]);
		store.toggle_vote(raid.id, OptionKind::Day, "2026-02-13", 200);
		store
	}

	fn generated_at() -> DateTime<Utc> {
		Utc.ymd(2026, 2, 10).and_hms(9, 30, 0)
	}

	#[test]
	fn backup_has_header_transaction_and_fk_safe_order() {
		let sql = render_backup_sql(&seeded(), generated_at());
		let lines: Vec<&str> = sql.lines().collect();
		assert_eq!(lines[0], "-- DMW Rewrite SQL Backup");
		assert!(lines[1].starts_with("-- generated_at_berlin: "));
		assert_eq!(lines[2], "BEGIN;");
		assert_eq!(lines.last(), Some(&"COMMIT;"));

		let delete_cache = sql.find("DELETE FROM \"debug_mirror_cache\";").unwrap();
		let delete_settings = sql.find("DELETE FROM \"guild_settings\";").unwrap();
		assert!(delete_cache < delete_settings, "deletes run in reverse FK order");

		let insert_settings = sql.find("INSERT INTO \"guild_settings\"").unwrap();
		let insert_votes = sql.find("INSERT INTO \"raid_votes\"").unwrap();
		assert!(insert_settings < insert_votes, "inserts run in forward FK order");
	}

	#[test]
	fn literals_follow_the_contract() {
		let sql = render_backup_sql(&seeded(), generated_at());
		// quote doubling
		assert!(sql.contains("'Test''gilde'"));
		// booleans upper-case, nulls bare
		assert!(sql.contains("TRUE"));
		assert!(sql.contains("NULL"));
		// timestamps single-quoted ISO-8601
		assert!(sql.contains("'2026-02-01T12:00:00+00:00'"));
	}

	#[test]
	fn export_writes_atomically() {
		let dir = tempfile::tempdir().unwrap();
		let target = dir.path().join("db_backup.sql");
		let written = export_to_sql(&seeded(), &target, generated_at()).unwrap();
		assert_eq!(written, target);
		let content = fs::read_to_string(&target).unwrap();
		assert!(content.starts_with("-- DMW Rewrite SQL Backup"));
		assert!(!dir.path().join(".db_backup.sql.tmp").exists());
	}
}
