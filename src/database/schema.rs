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

//! Boot-time schema guard: discover the relational schema through
//! `information_schema` and align it with the declarative model — create
//! missing tables, add missing columns, widen narrow integers, enforce the
//! critical unique indexes, and enable row-level security. Every step is
//! idempotent. The validation pass re-checks everything and fails loudly
//! with one aggregated error.

use std::collections::{HashMap, HashSet};

use sqlx::{postgres::PgConnection, Row};

use crate::error::{EngineError, Result};

#[derive(Clone, Copy, Debug)]
pub struct ColumnDef {
	pub name: &'static str,
	pub sql_type: &'static str,
	pub nullable: bool,
	pub default: Option<&'static str>,
}

#[derive(Clone, Copy, Debug)]
pub struct TableDef {
	pub name: &'static str,
	pub columns: &'static [ColumnDef],
	pub primary_key: &'static [&'static str],
}

const fn col(name: &'static str, sql_type: &'static str) -> ColumnDef {
	ColumnDef { name, sql_type, nullable: false, default: None }
}

const fn col_null(name: &'static str, sql_type: &'static str) -> ColumnDef {
	ColumnDef { name, sql_type, nullable: true, default: None }
}

const fn col_default(name: &'static str, sql_type: &'static str, default: &'static str) -> ColumnDef {
	ColumnDef { name, sql_type, nullable: false, default: Some(default) }
}

/// The declarative model, in FK-safe forward order.
pub const MODEL: &[TableDef] = &[
	TableDef {
		name: "guild_settings",
		columns: &[
			col("guild_id", "BIGINT"),
			col_null("participants_channel_id", "BIGINT"),
			col_null("raidlist_channel_id", "BIGINT"),
			col_null("raidlist_message_id", "BIGINT"),
			col_default("created_at", "TIMESTAMPTZ", "now()"),
			col_default("updated_at", "TIMESTAMPTZ", "now()"),
			col_null("planner_channel_id", "BIGINT"),
			col_null("guild_name", "TEXT"),
			col_default("default_min_players", "INTEGER", "0"),
			col_default("templates_enabled", "BOOLEAN", "true"),
			col_null("template_manager_role_id", "BIGINT"),
		],
		primary_key: &["guild_id"],
	},
	TableDef {
		name: "dungeons",
		columns: &[
			col("id", "INTEGER"),
			col("name", "TEXT"),
			col("short_code", "TEXT"),
			col_default("is_active", "BOOLEAN", "true"),
			col_default("sort_order", "INTEGER", "0"),
			col_default("created_at", "TIMESTAMPTZ", "now()"),
		],
		primary_key: &["id"],
	},
	TableDef {
		name: "raids",
		columns: &[
			col("id", "INTEGER"),
			col("guild_id", "BIGINT"),
			col("channel_id", "BIGINT"),
			col("creator_id", "BIGINT"),
			col("dungeon", "TEXT"),
			col_default("status", "TEXT", "'open'"),
			col_default("created_at", "TIMESTAMPTZ", "now()"),
			col_null("message_id", "BIGINT"),
			col_default("min_players", "INTEGER", "4"),
			col_default("participants_posted", "BOOLEAN", "false"),
			col_null("temp_role_id", "BIGINT"),
			col_default("temp_role_created", "BOOLEAN", "false"),
			col_null("display_id", "INTEGER"),
		],
		primary_key: &["id"],
	},
	TableDef {
		name: "raid_options",
		columns: &[
			col("id", "INTEGER"),
			col("raid_id", "INTEGER"),
			col("kind", "TEXT"),
			col("label", "TEXT"),
			col_default("created_at", "TIMESTAMPTZ", "now()"),
		],
		primary_key: &["id"],
	},
	TableDef {
		name: "raid_votes",
		columns: &[
			col("id", "INTEGER"),
			col("raid_id", "INTEGER"),
			col("kind", "TEXT"),
			col("option_label", "TEXT"),
			col("user_id", "BIGINT"),
			col_default("created_at", "TIMESTAMPTZ", "now()"),
		],
		primary_key: &["id"],
	},
	TableDef {
		name: "raid_posted_slots",
		columns: &[
			col("id", "BIGINT"),
			col("raid_id", "BIGINT"),
			col("day_label", "TEXT"),
			col("time_label", "TEXT"),
			col_null("channel_id", "BIGINT"),
			col_null("message_id", "BIGINT"),
			col_default("posted_at", "TIMESTAMPTZ", "now()"),
			col_default("updated_at", "TIMESTAMPTZ", "now()"),
		],
		primary_key: &["id"],
	},
	TableDef {
		name: "raid_templates",
		columns: &[
			col("id", "INTEGER"),
			col("guild_id", "BIGINT"),
			col("dungeon_id", "INTEGER"),
			col("template_name", "VARCHAR(80)"),
			col("template_data", "TEXT"),
			col_default("created_at", "TIMESTAMPTZ", "now()"),
			col_default("updated_at", "TIMESTAMPTZ", "now()"),
		],
		primary_key: &["id"],
	},
	TableDef {
		name: "raid_attendance",
		columns: &[
			col("id", "INTEGER"),
			col("guild_id", "BIGINT"),
			col("raid_display_id", "INTEGER"),
			col("dungeon", "TEXT"),
			col("user_id", "BIGINT"),
			col_default("status", "VARCHAR(16)", "'pending'"),
			col_null("marked_by_user_id", "BIGINT"),
			col_default("created_at", "TIMESTAMPTZ", "now()"),
			col_default("updated_at", "TIMESTAMPTZ", "now()"),
		],
		primary_key: &["id"],
	},
	TableDef {
		name: "user_levels",
		columns: &[
			col("guild_id", "BIGINT"),
			col("user_id", "BIGINT"),
			col_default("xp", "BIGINT", "0"),
			col_default("level", "BIGINT", "0"),
			col_default("updated_at", "TIMESTAMPTZ", "now()"),
			col_null("username", "TEXT"),
		],
		primary_key: &["guild_id", "user_id"],
	},
	TableDef {
		name: "debug_mirror_cache",
		columns: &[
			col("cache_key", "VARCHAR(96)"),
			col("kind", "VARCHAR(32)"),
			col("guild_id", "BIGINT"),
			col_null("raid_id", "BIGINT"),
			col("message_id", "BIGINT"),
			col("payload_hash", "VARCHAR(64)"),
			col_default("updated_at", "TIMESTAMPTZ", "now()"),
		],
		primary_key: &["cache_key"],
	},
];

/// `(table, column)` pairs that must be wide integers.
pub const REQUIRED_BIGINT_COLUMNS: &[(&str, &str)] = &[("user_levels", "xp"), ("user_levels", "level")];

const BIGINT_COLUMN_UDT_NAMES: &[&str] = &["int8", "bigint"];

pub const CRITICAL_INDEX_DDLS: &[&str] = &[
	"CREATE UNIQUE INDEX IF NOT EXISTS ix_raids_guild_display_id_unique ON public.raids (guild_id, display_id)",
	"CREATE UNIQUE INDEX IF NOT EXISTS ix_raid_attendance_unique_user ON public.raid_attendance (guild_id, raid_display_id, user_id)",
	"CREATE UNIQUE INDEX IF NOT EXISTS uq_raid_votes_unique ON public.raid_votes (raid_id, kind, option_label, user_id)",
	"CREATE UNIQUE INDEX IF NOT EXISTS uq_raid_options_raid_kind_label ON public.raid_options (raid_id, kind, label)",
];

/// Full column DDL used inside CREATE TABLE.
fn create_column_sql(column: &ColumnDef) -> String {
	let mut sql = format!("\"{}\" {}", column.name, column.sql_type);
	if let Some(default) = column.default {
		sql.push_str(&format!(" DEFAULT {}", default));
	}
	if !column.nullable {
		sql.push_str(" NOT NULL");
	}
	sql
}

pub fn build_create_table_sql(table: &TableDef) -> String {
	let mut parts: Vec<String> = table.columns.iter().map(create_column_sql).collect();
	if !table.primary_key.is_empty() {
		let key = table.primary_key.iter().map(|name| format!("\"{}\"", name)).collect::<Vec<_>>().join(", ");
		parts.push(format!("PRIMARY KEY ({})", key));
	}
	format!("CREATE TABLE IF NOT EXISTS public.\"{}\" ({})", table.name, parts.join(", "))
}

/// Guarded ADD COLUMN. A column is declared NOT NULL only when a usable
/// default exists; otherwise it is added nullable to stay safe for existing
/// rows.
pub fn build_add_column_sql(table_name: &str, column: &ColumnDef) -> String {
	let default_clause = column.default.map(|default| format!(" DEFAULT {}", default)).unwrap_or_default();
	let not_null_clause = if !column.nullable && column.default.is_some() { " NOT NULL" } else { "" };
	format!(
		"ALTER TABLE public.\"{}\" ADD COLUMN IF NOT EXISTS \"{}\" {}{}{}",
		table_name, column.name, column.sql_type, default_clause, not_null_clause
	)
}

pub fn build_alter_column_bigint_sql(table_name: &str, column_name: &str) -> String {
	format!(
		"ALTER TABLE public.\"{}\" ALTER COLUMN \"{}\" TYPE BIGINT USING \"{}\"::BIGINT",
		table_name, column_name, column_name
	)
}

async fn fetch_public_tables(conn: &mut PgConnection) -> Result<HashSet<String>> {
	let rows = sqlx::query("SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'")
		.fetch_all(&mut *conn)
		.await?;
	rows.into_iter().map(|row| row.try_get::<String, _>("table_name").map_err(Into::into)).collect()
}

async fn fetch_public_columns(conn: &mut PgConnection) -> Result<HashMap<String, HashSet<String>>> {
	let rows = sqlx::query(
		"SELECT table_name, column_name FROM information_schema.columns WHERE table_schema = 'public'",
	)
	.fetch_all(&mut *conn)
	.await?;
	let mut columns_by_table: HashMap<String, HashSet<String>> = HashMap::new();
	for row in rows {
		let table: String = row.try_get("table_name")?;
		let column: String = row.try_get("column_name")?;
		columns_by_table.entry(table).or_default().insert(column);
	}
	Ok(columns_by_table)
}

async fn fetch_public_column_udt_names(conn: &mut PgConnection) -> Result<HashMap<(String, String), String>> {
	let rows = sqlx::query(
		"SELECT table_name, column_name, udt_name FROM information_schema.columns WHERE table_schema = 'public'",
	)
	.fetch_all(&mut *conn)
	.await?;
	let mut udt_names = HashMap::new();
	for row in rows {
		let table: String = row.try_get("table_name")?;
		let column: String = row.try_get("column_name")?;
		let udt: Option<String> = row.try_get("udt_name")?;
		udt_names.insert((table, column), udt.unwrap_or_default().to_lowercase());
	}
	Ok(udt_names)
}

async fn fetch_rls_enabled_tables(conn: &mut PgConnection) -> Result<HashSet<String>> {
	let rows = sqlx::query(
		"SELECT cls.relname FROM pg_class AS cls \
		 JOIN pg_namespace AS ns ON ns.oid = cls.relnamespace \
		 WHERE ns.nspname = 'public' AND cls.relkind = 'r' AND cls.relrowsecurity = true",
	)
	.fetch_all(&mut *conn)
	.await?;
	rows.into_iter().map(|row| row.try_get::<String, _>("relname").map_err(Into::into)).collect()
}

/// Align the live schema with the model. Returns a change log, one entry per
/// DDL actually issued.
pub async fn ensure_schema(conn: &mut PgConnection) -> Result<Vec<String>> {
	let mut changes = Vec::new();

	let existing_tables = fetch_public_tables(conn).await?;
	for table in MODEL {
		if existing_tables.contains(table.name) {
			continue;
		}
		sqlx::query(&build_create_table_sql(table)).execute(&mut *conn).await?;
		changes.push(format!("create_table:{}", table.name));
	}

	let existing_columns = fetch_public_columns(conn).await?;
	for table in MODEL {
		let known = existing_columns.get(table.name);
		for column in table.columns {
			if known.map_or(false, |names| names.contains(column.name)) {
				continue;
			}
			// freshly created tables already carry every column
			if !existing_tables.contains(table.name) {
				continue;
			}
			sqlx::query(&build_add_column_sql(table.name, column)).execute(&mut *conn).await?;
			changes.push(format!("add_column:{}.{}", table.name, column.name));
		}
	}

	let udt_names = fetch_public_column_udt_names(conn).await?;
	for (table_name, column_name) in REQUIRED_BIGINT_COLUMNS {
		let udt = match udt_names.get(&(table_name.to_string(), column_name.to_string())) {
			Some(udt) => udt.as_str(),
			None => continue,
		};
		if BIGINT_COLUMN_UDT_NAMES.contains(&udt) {
			continue;
		}
		sqlx::query(&build_alter_column_bigint_sql(table_name, column_name)).execute(&mut *conn).await?;
		changes.push(format!("alter_column_type:{}.{}:bigint", table_name, column_name));
	}

	for ddl in CRITICAL_INDEX_DDLS {
		sqlx::query(ddl).execute(&mut *conn).await?;
	}

	let rls_enabled = fetch_rls_enabled_tables(conn).await?;
	for table in MODEL {
		if rls_enabled.contains(table.name) {
			continue;
		}
		sqlx::query(&format!("ALTER TABLE public.\"{}\" ENABLE ROW LEVEL SECURITY", table.name))
			.execute(&mut *conn)
			.await?;
		changes.push(format!("enable_rls:{}", table.name));
	}

	if !changes.is_empty() {
		log::info!("Schema guard applied {} change(s): {}", changes.len(), changes.join(", "));
	}
	Ok(changes)
}

/// Re-check tables, columns, and integer widths. Aggregates everything that
/// is still wrong into one fatal error.
pub async fn validate_schema(conn: &mut PgConnection) -> Result<()> {
	let mut problems = Vec::new();

	let existing_tables = fetch_public_tables(conn).await?;
	let mut missing_tables: Vec<&str> =
		MODEL.iter().map(|table| table.name).filter(|name| !existing_tables.contains(*name)).collect();
	missing_tables.sort_unstable();
	if !missing_tables.is_empty() {
		problems.push(format!("missing tables: {}", missing_tables.join(", ")));
	}

	let existing_columns = fetch_public_columns(conn).await?;
	let mut missing_columns = Vec::new();
	for table in MODEL {
		let known = existing_columns.get(table.name);
		let mut missing: Vec<&str> = table
			.columns
			.iter()
			.map(|column| column.name)
			.filter(|name| !known.map_or(false, |names| names.contains(*name)))
			.collect();
		missing.sort_unstable();
		if !missing.is_empty() && existing_tables.contains(table.name) {
			missing_columns.push(format!("{}({})", table.name, missing.join(", ")));
		}
	}
	if !missing_columns.is_empty() {
		problems.push(format!("missing columns: {}", missing_columns.join("; ")));
	}

	let udt_names = fetch_public_column_udt_names(conn).await?;
	let mut invalid_types = Vec::new();
	for (table_name, column_name) in REQUIRED_BIGINT_COLUMNS {
		if let Some(udt) = udt_names.get(&(table_name.to_string(), column_name.to_string())) {
			if !BIGINT_COLUMN_UDT_NAMES.contains(&udt.as_str()) {
				invalid_types.push(format!("{}.{}={}", table_name, column_name, udt));
			}
		}
	}
	if !invalid_types.is_empty() {
		problems.push(format!("invalid column types: {}", invalid_types.join(", ")));
	}

	if problems.is_empty() {
		Ok(())
	} else {
		Err(EngineError::Schema(problems.join("; ")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn table_def(name: &str) -> Option<&'static TableDef> {
		MODEL.iter().find(|table| table.name == name)
	}

	#[test]
	fn model_is_in_fk_safe_forward_order() {
		let names: Vec<&str> = MODEL.iter().map(|table| table.name).collect();
		assert_eq!(
			names,
			vec![
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
			]
		);
	}

	#[test]
	fn add_column_ddl_matches_expected_form() {
		let table = table_def("raids").unwrap();
		let display_id = table.columns.iter().find(|column| column.name == "display_id").unwrap();
		assert_eq!(
			build_add_column_sql("raids", display_id),
			"ALTER TABLE public.\"raids\" ADD COLUMN IF NOT EXISTS \"display_id\" INTEGER"
		);

		let min_players = table.columns.iter().find(|column| column.name == "min_players").unwrap();
		assert_eq!(
			build_add_column_sql("raids", min_players),
			"ALTER TABLE public.\"raids\" ADD COLUMN IF NOT EXISTS \"min_players\" INTEGER DEFAULT 4 NOT NULL"
		);

		// NOT NULL without a usable default is added nullable
		let dungeon = table.columns.iter().find(|column| column.name == "dungeon").unwrap();
		assert_eq!(
			build_add_column_sql("raids", dungeon),
			"ALTER TABLE public.\"raids\" ADD COLUMN IF NOT EXISTS \"dungeon\" TEXT"
		);
	}

	#[test]
	fn widen_ddl_casts_in_place() {
		assert_eq!(
			build_alter_column_bigint_sql("user_levels", "xp"),
			"ALTER TABLE public.\"user_levels\" ALTER COLUMN \"xp\" TYPE BIGINT USING \"xp\"::BIGINT"
		);
	}

	#[test]
	fn create_table_ddl_carries_primary_key() {
		let table = table_def("user_levels").unwrap();
		let ddl = build_create_table_sql(table);
		assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS public.\"user_levels\""));
		assert!(ddl.contains("PRIMARY KEY (\"guild_id\", \"user_id\")"));
		assert!(ddl.contains("\"xp\" BIGINT DEFAULT 0 NOT NULL"));
	}

	#[test]
	fn critical_indexes_cover_the_spec_invariants() {
		assert!(CRITICAL_INDEX_DDLS.iter().any(|ddl| ddl.contains("raids (guild_id, display_id)")));
		assert!(CRITICAL_INDEX_DDLS
			.iter()
			.any(|ddl| ddl.contains("raid_votes (raid_id, kind, option_label, user_id)")));
	}
}
