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

//! Hashing and artefact-cache key derivation

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

pub fn sha256_hex(payload: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(payload.as_bytes());
	hex::encode(hasher.finalize())
}

/// The slot suffix keys reminder/role cache rows per `(day, time)` pair
/// without leaking free-form labels into the key column.
pub fn slot_cache_suffix(day_label: &str, time_label: &str) -> String {
	let payload = format!("{}|{}", day_label.trim().to_lowercase(), time_label.trim().to_lowercase());
	sha256_hex(&payload)[..24].to_string()
}

pub fn slot_temp_role_key(raid_id: u64, day_label: &str, time_label: &str) -> String {
	format!("slotrole:{}:{}", raid_id, slot_cache_suffix(day_label, time_label))
}

pub fn raid_reminder_key(raid_id: u64, day_label: &str, time_label: &str) -> String {
	format!("raidrem:{}:{}", raid_id, slot_cache_suffix(day_label, time_label))
}

pub fn raid_start_key(raid_id: u64, day_label: &str, time_label: &str) -> String {
	format!("raidstart:{}:{}", raid_id, slot_cache_suffix(day_label, time_label))
}

pub fn auto_reminder_key(raid_id: u64, day_label: &str, time_label: &str) -> String {
	format!("autorem:{}:{}", raid_id, slot_cache_suffix(day_label, time_label))
}

pub fn feature_settings_key(guild_id: u64) -> String {
	format!("feature_settings:{}", guild_id)
}

pub fn calendar_config_key(guild_id: u64) -> String {
	format!("raid_calendar_cfg:{}", guild_id)
}

pub fn calendar_message_key(guild_id: u64) -> String {
	format!("raid_calendar_msg:{}", guild_id)
}

pub fn raidlist_key(guild_id: u64) -> String {
	format!("raidlist:{}:0", guild_id)
}

pub fn memberlist_key(raid_id: u64, day_label: &str, time_label: &str) -> String {
	format!("memberlist:{}:{}", raid_id, slot_cache_suffix(day_label, time_label))
}

pub fn bot_message_key(guild_id: u64, channel_id: u64, bot_user_id: u64, message_id: u64) -> String {
	format!("botmsg:{}:{}:{}:{}", guild_id, channel_id, bot_user_id, message_id)
}

/// Clamp embed field text to the platform's 1024-byte limit on a char boundary.
pub fn clamp_field(text: &str, limit: usize) -> String {
	if text.len() <= limit {
		return text.to_string();
	}
	let mut end = limit.saturating_sub(3);
	while end > 0 && !text.is_char_boundary(end) {
		end -= 1;
	}
	format!("{}...", &text[..end])
}

/// Data directory used for the log file sink.
/// Linux | $XDG_DATA_HOME or $HOME/.local/share/dmw_engine | /home/alice/.local/share/dmw_engine/
pub fn engine_dir() -> std::io::Result<PathBuf> {
	if let Some(base_dirs) = dirs::BaseDirs::new() {
		let mut path = base_dirs.data_local_dir().to_path_buf();
		path.push("dmw_engine");
		Ok(path)
	} else {
		Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no valid home directory path"))
	}
}

/// Create an arbitrary directory on disk.
pub fn create_dir(path: &Path) -> std::io::Result<()> {
	match std::fs::create_dir_all(path) {
		Err(e) if e.kind() != std::io::ErrorKind::AlreadyExists => Err(e),
		_ => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sha256_matches_known_vector() {
		assert_eq!(sha256_hex(""), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
	}

	#[test]
	fn slot_suffix_is_case_and_whitespace_insensitive() {
		let a = slot_cache_suffix("2026-02-13 (Fr)", "20:00");
		let b = slot_cache_suffix("  2026-02-13 (FR) ", " 20:00 ");
		assert_eq!(a, b);
		assert_eq!(a.len(), 24);
	}

	#[test]
	fn cache_keys_carry_raid_id() {
		let key = raid_reminder_key(17, "2026-02-13", "20:00");
		assert!(key.starts_with("raidrem:17:"));
		assert_eq!(key.len(), "raidrem:17:".len() + 24);
	}

	#[test]
	fn clamp_field_preserves_short_text() {
		assert_eq!(clamp_field("kurz", 1024), "kurz");
		let long = "x".repeat(2000);
		let clamped = clamp_field(&long, 1024);
		assert_eq!(clamped.len(), 1024);
		assert!(clamped.ends_with("..."));
	}
}
