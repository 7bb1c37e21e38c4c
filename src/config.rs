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

//! Engine configuration loaded from the process environment, plus the fixed
//! scheduling constants and artefact-cache kind tags of the coordination engine.

use std::env;

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// The engine renders and schedules everything in this zone.
pub const DEFAULT_TIMEZONE_NAME: &str = "Europe/Berlin";

/// Key for the database advisory lock that enforces one engine per database.
pub const ADVISORY_LOCK_KEY: i64 = 0x444D_5752;

pub const STALE_RAID_HOURS: i64 = 7 * 24;
pub const STALE_RAID_CHECK_SECONDS: u64 = 15 * 60;
pub const RAID_REMINDER_ADVANCE_SECONDS: i64 = 10 * 60;
pub const RAID_REMINDER_WORKER_SLEEP_SECONDS: u64 = 30;
pub const RAID_START_TOLERANCE_SECONDS: i64 = 60;
pub const AUTO_REMINDER_ADVANCE_SECONDS: i64 = 2 * 60 * 60;
pub const AUTO_REMINDER_MIN_FILL_PERCENT: u32 = 50;
pub const INTEGRITY_CLEANUP_SLEEP_SECONDS: u64 = 15 * 60;
pub const LEVEL_PERSIST_WORKER_POLL_SECONDS: u64 = 5;
pub const USERNAME_SYNC_WORKER_SLEEP_SECONDS: u64 = 10 * 60;
pub const USERNAME_SYNC_RESCAN_SECONDS: u64 = 12 * 60 * 60;
pub const LOG_FORWARD_QUEUE_MAX_SIZE: usize = 1000;
pub const LOG_FORWARD_BATCH_INTERVAL_SECONDS: u64 = 5;
pub const PERSIST_FLUSH_MAX_ATTEMPTS: u32 = 3;
pub const PERSIST_FLUSH_RETRY_BASE_MILLIS: u64 = 100;
pub const INTERACTION_ACK_SET_MAX: usize = 20_000;
pub const BOT_MESSAGE_INDEX_MAX_PER_CHANNEL: usize = 400;
pub const RAIDLIST_MAX_RAIDS: usize = 25;
pub const RAIDLIST_DEBOUNCE_MILLIS: u64 = 1500;
pub const RAIDLIST_COOLDOWN_MILLIS: u64 = 800;
pub const SELF_TEST_MIN_INTERVAL_SECONDS: u64 = 30;
pub const BACKUP_MIN_INTERVAL_SECONDS: u64 = 300;
pub const CALENDAR_GRID_ROWS: usize = 5;
pub const CALENDAR_GRID_COLUMNS: usize = 7;

/// Ephemeral per-slot roles are named `DMW Raid <display_id> <day> <time>`;
/// the integrity sweep matches orphans by this prefix.
pub const SLOT_ROLE_NAME_PREFIX: &str = "DMW Raid ";

/// Kind tags of the artefact-cache keyspace.
pub mod kinds {
	pub const FEATURE_SETTINGS: &str = "feature_settings";
	pub const BOT_MESSAGE: &str = "bot_message";
	pub const SLOT_TEMP_ROLE: &str = "slot_temp_role";
	pub const RAID_REMINDER: &str = "raid_reminder";
	pub const AUTO_REMINDER: &str = "auto_reminder";
	pub const RAID_START: &str = "raid_start";
	pub const RAID_CALENDAR_CFG: &str = "raid_calendar_cfg";
	pub const RAID_CALENDAR_MSG: &str = "raid_calendar_msg";
	pub const RAIDLIST: &str = "raidlist";
	pub const MEMBERLIST: &str = "memberlist";
}

/// The slash-command set the self-test worker expects to find registered.
pub const EXPECTED_COMMANDS: &[&str] = &[
	"settings",
	"status",
	"help",
	"help2",
	"restart",
	"raidplan",
	"raid_finish",
	"raidlist",
	"dungeonlist",
	"cancel_all_raids",
	"purge",
	"purgebot",
	"remote_guilds",
	"remote_cancel_all_raids",
	"remote_raidlist",
	"remote_rebuild_memberlists",
	"template_config",
	"backup_db",
	"meme",
	"id",
];

const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];
const TRUTHY_VALUES: &[&str] = &["1", "true", "yes", "on"];

fn env_bool(name: &str, default: bool) -> bool {
	match env::var(name) {
		Ok(raw) => TRUTHY_VALUES.contains(&raw.trim().to_ascii_lowercase().as_str()),
		Err(_) => default,
	}
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
	let raw = match env::var(name) {
		Ok(raw) => raw,
		Err(_) => return Ok(default),
	};
	let text = raw.trim();
	if text.is_empty() {
		return Ok(default);
	}
	text.parse::<u64>().map_err(|_| EngineError::Config(format!("Invalid integer env {}={:?}", name, raw)))
}

/// Provides parameters that are passed in from the environment.
/// Provides context that every worker and handler may use.
#[derive(Clone, Debug, Deserialize)]
pub struct EngineConfig {
	/// Bot gateway credential. Consumed by the external platform client.
	pub discord_token: String,
	/// Async Postgres DSN.
	pub database_url: String,
	/// Superuser allowed to run the remote/backup command family.
	pub privileged_user_id: u64,
	/// Echo SQL statements at debug level.
	pub db_echo: bool,
	pub enable_message_content_intent: bool,
	pub level_persist_interval_seconds: u64,
	pub message_xp_interval_seconds: u64,
	pub levelup_message_cooldown_seconds: u64,
	pub log_guild_id: u64,
	pub log_channel_id: u64,
	pub self_test_interval_seconds: u64,
	pub backup_interval_seconds: u64,
	pub raidlist_debug_channel_id: u64,
	pub memberlist_debug_channel_id: u64,
	pub discord_log_level: String,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			discord_token: String::new(),
			database_url: String::new(),
			privileged_user_id: 0,
			db_echo: false,
			enable_message_content_intent: true,
			level_persist_interval_seconds: 120,
			message_xp_interval_seconds: 15,
			levelup_message_cooldown_seconds: 20,
			log_guild_id: 0,
			log_channel_id: 0,
			self_test_interval_seconds: 900,
			backup_interval_seconds: 21_600,
			raidlist_debug_channel_id: 0,
			memberlist_debug_channel_id: 0,
			discord_log_level: "INFO".into(),
		}
	}
}

impl EngineConfig {
	/// Read the configuration from the environment and validate it.
	/// Invalid values fail fast with a human-readable reason.
	pub fn from_env() -> Result<Self> {
		let defaults = Self::default();
		let config = Self {
			discord_token: env::var("DISCORD_TOKEN").unwrap_or_default(),
			database_url: env::var("DATABASE_URL").unwrap_or_default(),
			privileged_user_id: env_u64("PRIVILEGED_USER_ID", defaults.privileged_user_id)?,
			db_echo: env_bool("DB_ECHO", defaults.db_echo),
			enable_message_content_intent: env_bool(
				"ENABLE_MESSAGE_CONTENT_INTENT",
				defaults.enable_message_content_intent,
			),
			level_persist_interval_seconds: env_u64(
				"LEVEL_PERSIST_INTERVAL_SECONDS",
				defaults.level_persist_interval_seconds,
			)?,
			message_xp_interval_seconds: env_u64("MESSAGE_XP_INTERVAL_SECONDS", defaults.message_xp_interval_seconds)?,
			levelup_message_cooldown_seconds: env_u64(
				"LEVELUP_MESSAGE_COOLDOWN_SECONDS",
				defaults.levelup_message_cooldown_seconds,
			)?,
			log_guild_id: env_u64("LOG_GUILD_ID", defaults.log_guild_id)?,
			log_channel_id: env_u64("LOG_CHANNEL_ID", defaults.log_channel_id)?,
			self_test_interval_seconds: env_u64("SELF_TEST_INTERVAL_SECONDS", defaults.self_test_interval_seconds)?,
			backup_interval_seconds: env_u64("BACKUP_INTERVAL_SECONDS", defaults.backup_interval_seconds)?,
			raidlist_debug_channel_id: env_u64("RAIDLIST_DEBUG_CHANNEL_ID", defaults.raidlist_debug_channel_id)?,
			memberlist_debug_channel_id: env_u64("MEMBERLIST_DEBUG_CHANNEL_ID", defaults.memberlist_debug_channel_id)?,
			discord_log_level: env::var("DISCORD_LOG_LEVEL")
				.unwrap_or_else(|_| defaults.discord_log_level.clone())
				.trim()
				.to_ascii_uppercase(),
		};
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if self.database_url.is_empty() {
			return Err(EngineError::Config("DATABASE_URL must be set".into()));
		}
		if self.privileged_user_id == 0 {
			return Err(EngineError::Config("PRIVILEGED_USER_ID must be > 0".into()));
		}
		if self.level_persist_interval_seconds < 5 {
			return Err(EngineError::Config("LEVEL_PERSIST_INTERVAL_SECONDS must be >= 5".into()));
		}
		if self.message_xp_interval_seconds < 1 {
			return Err(EngineError::Config("MESSAGE_XP_INTERVAL_SECONDS must be >= 1".into()));
		}
		if self.levelup_message_cooldown_seconds < 1 {
			return Err(EngineError::Config("LEVELUP_MESSAGE_COOLDOWN_SECONDS must be >= 1".into()));
		}
		if self.self_test_interval_seconds < SELF_TEST_MIN_INTERVAL_SECONDS {
			return Err(EngineError::Config("SELF_TEST_INTERVAL_SECONDS must be >= 30".into()));
		}
		if self.backup_interval_seconds < BACKUP_MIN_INTERVAL_SECONDS {
			return Err(EngineError::Config("BACKUP_INTERVAL_SECONDS must be >= 300".into()));
		}
		if !VALID_LOG_LEVELS.contains(&self.discord_log_level.as_str()) {
			return Err(EngineError::Config(format!(
				"DISCORD_LOG_LEVEL must be one of: {}",
				VALID_LOG_LEVELS.join(", ")
			)));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn valid_config() -> EngineConfig {
		EngineConfig {
			discord_token: "token".into(),
			database_url: "postgres://localhost/dmw".into(),
			privileged_user_id: 42,
			..EngineConfig::default()
		}
	}

	#[test]
	fn validate_accepts_defaults_with_required_fields() {
		assert!(valid_config().validate().is_ok());
	}

	#[test]
	fn validate_rejects_missing_database_url() {
		let config = EngineConfig { database_url: String::new(), ..valid_config() };
		assert!(config.validate().is_err());
	}

	#[test]
	fn validate_rejects_interval_bounds() {
		let config = EngineConfig { level_persist_interval_seconds: 4, ..valid_config() };
		assert!(config.validate().is_err());
		let config = EngineConfig { backup_interval_seconds: 299, ..valid_config() };
		assert!(config.validate().is_err());
		let config = EngineConfig { self_test_interval_seconds: 29, ..valid_config() };
		assert!(config.validate().is_err());
	}

	#[test]
	fn validate_rejects_unknown_log_level() {
		let config = EngineConfig { discord_log_level: "LOUD".into(), ..valid_config() };
		assert!(config.validate().is_err());
	}
}
