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

//! Domain records held by the in-memory store. Relations are carried as ids
//! only; cascades are explicit bulk operations on the tables, never pointer
//! traversals.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RaidStatus {
	Open,
	Finalized,
	Canceled,
}

impl RaidStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			RaidStatus::Open => "open",
			RaidStatus::Finalized => "finalized",
			RaidStatus::Canceled => "canceled",
		}
	}

	pub fn parse(text: &str) -> Option<Self> {
		match text {
			"open" => Some(RaidStatus::Open),
			"finalized" => Some(RaidStatus::Finalized),
			"canceled" => Some(RaidStatus::Canceled),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
	Day,
	Time,
}

impl OptionKind {
	pub fn as_str(self) -> &'static str {
		match self {
			OptionKind::Day => "day",
			OptionKind::Time => "time",
		}
	}

	pub fn parse(text: &str) -> Option<Self> {
		match text {
			"day" => Some(OptionKind::Day),
			"time" => Some(OptionKind::Time),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
	Present,
	Absent,
	Pending,
}

impl AttendanceStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			AttendanceStatus::Present => "present",
			AttendanceStatus::Absent => "absent",
			AttendanceStatus::Pending => "pending",
		}
	}

	pub fn parse(text: &str) -> Option<Self> {
		match text {
			"present" => Some(AttendanceStatus::Present),
			"absent" => Some(AttendanceStatus::Absent),
			"pending" => Some(AttendanceStatus::Pending),
			_ => None,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GuildSettings {
	pub guild_id: u64,
	pub guild_name: Option<String>,
	pub participants_channel_id: Option<u64>,
	pub raidlist_channel_id: Option<u64>,
	pub raidlist_message_id: Option<u64>,
	pub planner_channel_id: Option<u64>,
	pub default_min_players: u32,
	pub templates_enabled: bool,
	pub template_manager_role_id: Option<u64>,
}

impl GuildSettings {
	pub fn new(guild_id: u64, guild_name: Option<String>) -> Self {
		Self {
			guild_id,
			guild_name,
			participants_channel_id: None,
			raidlist_channel_id: None,
			raidlist_message_id: None,
			planner_channel_id: None,
			default_min_players: 0,
			templates_enabled: true,
			template_manager_role_id: None,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dungeon {
	pub id: u32,
	pub name: String,
	pub short_code: String,
	pub is_active: bool,
	pub sort_order: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Raid {
	pub id: u64,
	/// Densely allocated 1..N per guild; `(guild_id, display_id)` is unique.
	pub display_id: u32,
	pub guild_id: u64,
	pub channel_id: u64,
	pub creator_id: u64,
	pub dungeon: String,
	pub status: RaidStatus,
	pub created_at: DateTime<Utc>,
	pub message_id: Option<u64>,
	pub min_players: u32,
	pub participants_posted: bool,
	pub temp_role_id: Option<u64>,
	pub temp_role_created: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RaidOption {
	pub id: u64,
	pub raid_id: u64,
	pub kind: OptionKind,
	pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RaidVote {
	pub id: u64,
	pub raid_id: u64,
	pub kind: OptionKind,
	pub option_label: String,
	pub user_id: u64,
}

/// Artefact record of a posted participant-list message for a qualified slot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RaidPostedSlot {
	pub id: u64,
	pub raid_id: u64,
	pub day_label: String,
	pub time_label: String,
	pub channel_id: Option<u64>,
	pub message_id: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RaidTemplate {
	pub id: u64,
	pub guild_id: u64,
	pub dungeon_id: u32,
	pub template_name: String,
	/// JSON blob of days/times/min-players as entered by the template manager.
	pub template_data: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RaidAttendance {
	pub id: u64,
	pub guild_id: u64,
	pub raid_display_id: u32,
	pub dungeon: String,
	pub user_id: u64,
	pub status: AttendanceStatus,
	pub marked_by_user_id: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserLevel {
	pub guild_id: u64,
	pub user_id: u64,
	pub xp: u64,
	pub level: u32,
	pub username: Option<String>,
}

/// Generic keyed content-addressed row backing the artefact cache.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DebugMirrorCache {
	pub cache_key: String,
	pub kind: String,
	pub guild_id: u64,
	pub raid_id: Option<u64>,
	pub message_id: u64,
	pub payload_hash: String,
}

const FEATURE_FLAG_LEVELING: u64 = 1 << 0;
const FEATURE_FLAG_LEVELUP_MESSAGES: u64 = 1 << 1;
const FEATURE_FLAG_NANOMON_REPLY: u64 = 1 << 2;
const FEATURE_FLAG_APPROVED_REPLY: u64 = 1 << 3;
const FEATURE_FLAG_RAID_REMINDER: u64 = 1 << 4;
const FEATURE_FLAG_AUTO_REMINDER: u64 = 1 << 5;
const FEATURE_FLAG_CALENDAR: u64 = 1 << 6;
const FEATURE_FLAG_MASK: u64 = 0xFF;
const FEATURE_MESSAGE_XP_SHIFT: u64 = 8;
const FEATURE_LEVELUP_COOLDOWN_SHIFT: u64 = 24;
const FEATURE_INTERVAL_MASK: u64 = 0xFFFF;

/// Per-guild feature toggles and message-XP intervals.
///
/// The on-disk encoding is a single integer stored in the feature-settings
/// cache row: boolean flags in `bits[0..7]`, the message-XP interval in
/// `bits[8..23]`, the levelup cooldown in `bits[24..39]`. The layout is a
/// stable contract with existing SQL backups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureSettings {
	pub leveling_enabled: bool,
	pub levelup_messages_enabled: bool,
	pub nanomon_reply_enabled: bool,
	pub approved_reply_enabled: bool,
	pub raid_reminder_enabled: bool,
	pub auto_reminder_enabled: bool,
	pub calendar_enabled: bool,
	pub message_xp_interval_seconds: u32,
	pub levelup_message_cooldown_seconds: u32,
}

impl FeatureSettings {
	pub fn pack(&self) -> u64 {
		let mut flags = 0;
		if self.leveling_enabled {
			flags |= FEATURE_FLAG_LEVELING;
		}
		if self.levelup_messages_enabled {
			flags |= FEATURE_FLAG_LEVELUP_MESSAGES;
		}
		if self.nanomon_reply_enabled {
			flags |= FEATURE_FLAG_NANOMON_REPLY;
		}
		if self.approved_reply_enabled {
			flags |= FEATURE_FLAG_APPROVED_REPLY;
		}
		if self.raid_reminder_enabled {
			flags |= FEATURE_FLAG_RAID_REMINDER;
		}
		if self.auto_reminder_enabled {
			flags |= FEATURE_FLAG_AUTO_REMINDER;
		}
		if self.calendar_enabled {
			flags |= FEATURE_FLAG_CALENDAR;
		}

		let message_interval = u64::from(self.message_xp_interval_seconds).max(1).min(FEATURE_INTERVAL_MASK);
		let levelup_cooldown = u64::from(self.levelup_message_cooldown_seconds).max(1).min(FEATURE_INTERVAL_MASK);

		(flags & FEATURE_FLAG_MASK)
			| (message_interval << FEATURE_MESSAGE_XP_SHIFT)
			| (levelup_cooldown << FEATURE_LEVELUP_COOLDOWN_SHIFT)
	}

	/// Decode a packed value; zero intervals fall back to `defaults`.
	pub fn unpack(packed: u64, defaults: &FeatureSettings) -> Self {
		let flags = packed & FEATURE_FLAG_MASK;
		let raw_message_interval = (packed >> FEATURE_MESSAGE_XP_SHIFT) & FEATURE_INTERVAL_MASK;
		let raw_levelup_cooldown = (packed >> FEATURE_LEVELUP_COOLDOWN_SHIFT) & FEATURE_INTERVAL_MASK;

		let message_interval = if raw_message_interval > 0 {
			raw_message_interval as u32
		} else {
			defaults.message_xp_interval_seconds
		};
		let levelup_cooldown = if raw_levelup_cooldown > 0 {
			raw_levelup_cooldown as u32
		} else {
			defaults.levelup_message_cooldown_seconds
		};

		Self {
			leveling_enabled: flags & FEATURE_FLAG_LEVELING != 0,
			levelup_messages_enabled: flags & FEATURE_FLAG_LEVELUP_MESSAGES != 0,
			nanomon_reply_enabled: flags & FEATURE_FLAG_NANOMON_REPLY != 0,
			approved_reply_enabled: flags & FEATURE_FLAG_APPROVED_REPLY != 0,
			raid_reminder_enabled: flags & FEATURE_FLAG_RAID_REMINDER != 0,
			auto_reminder_enabled: flags & FEATURE_FLAG_AUTO_REMINDER != 0,
			calendar_enabled: flags & FEATURE_FLAG_CALENDAR != 0,
			message_xp_interval_seconds: message_interval.max(1),
			levelup_message_cooldown_seconds: levelup_cooldown.max(1),
		}
	}

	/// Canonical line hashed into the cache row's `payload_hash`.
	pub fn payload_line(&self) -> String {
		format!(
			"leveling={}|levelup_messages={}|nanomon={}|approved={}|raid_reminder={}|auto_reminder={}|calendar={}|xp_interval={}|levelup_cooldown={}",
			self.leveling_enabled as u8,
			self.levelup_messages_enabled as u8,
			self.nanomon_reply_enabled as u8,
			self.approved_reply_enabled as u8,
			self.raid_reminder_enabled as u8,
			self.auto_reminder_enabled as u8,
			self.calendar_enabled as u8,
			self.message_xp_interval_seconds,
			self.levelup_message_cooldown_seconds,
		)
	}
}

/// One entry in the monthly calendar grid. Today's only collector is the
/// open-raid day options; further sources hook in through the same type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarEntry {
	pub entry_date: NaiveDate,
	pub label: String,
	pub source: &'static str,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn defaults() -> FeatureSettings {
		FeatureSettings {
			leveling_enabled: true,
			levelup_messages_enabled: true,
			nanomon_reply_enabled: true,
			approved_reply_enabled: true,
			raid_reminder_enabled: false,
			auto_reminder_enabled: false,
			calendar_enabled: false,
			message_xp_interval_seconds: 15,
			levelup_message_cooldown_seconds: 20,
		}
	}

	#[test]
	fn feature_settings_roundtrip() {
		let settings = FeatureSettings {
			raid_reminder_enabled: true,
			auto_reminder_enabled: true,
			message_xp_interval_seconds: 33,
			levelup_message_cooldown_seconds: 44,
			..defaults()
		};
		let packed = settings.pack();
		assert_eq!(FeatureSettings::unpack(packed, &defaults()), settings);
	}

	#[test]
	fn feature_settings_bit_layout_is_stable() {
		let settings = FeatureSettings {
			leveling_enabled: true,
			levelup_messages_enabled: false,
			nanomon_reply_enabled: false,
			approved_reply_enabled: false,
			raid_reminder_enabled: false,
			auto_reminder_enabled: false,
			calendar_enabled: false,
			message_xp_interval_seconds: 2,
			levelup_message_cooldown_seconds: 3,
		};
		assert_eq!(settings.pack(), 1 | (2 << 8) | (3 << 24));
	}

	#[test]
	fn feature_settings_zero_intervals_fall_back_to_defaults() {
		let unpacked = FeatureSettings::unpack(0b1_1111, &defaults());
		assert_eq!(unpacked.message_xp_interval_seconds, 15);
		assert_eq!(unpacked.levelup_message_cooldown_seconds, 20);
		assert!(unpacked.raid_reminder_enabled);
	}

	#[test]
	fn status_parse_roundtrip() {
		for status in [RaidStatus::Open, RaidStatus::Finalized, RaidStatus::Canceled].iter() {
			assert_eq!(RaidStatus::parse(status.as_str()), Some(*status));
		}
		assert_eq!(RaidStatus::parse("closed"), None);
	}
}
