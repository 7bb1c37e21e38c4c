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

//! Raid lifecycle: creation, planner-message upkeep, finish, cancel, and
//! the stale-raid sweep.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::artefacts::planner::planner_embed;
use crate::config::STALE_RAID_HOURS;
use crate::error::{EngineError, Result};
use crate::platform::{colors, Embed, MessageRef, OutboundMessage, Platform};
use crate::store::Store;
use crate::types::{Raid, RaidStatus};

use super::Coordinator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RaidSummary {
	pub raid_id: u64,
	pub display_id: u32,
	pub message_id: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FinishSummary {
	pub display_id: u32,
	pub attendance_rows: usize,
}

impl<P: Platform> Coordinator<P> {
	/// Create a planning poll and post its planner message.
	pub async fn create_raid(
		&self,
		guild_id: u64,
		creator_id: u64,
		dungeon: &str,
		days: Vec<String>,
		times: Vec<String>,
		min_players: Option<u32>,
	) -> Result<RaidSummary> {
		if dungeon.trim().is_empty() {
			return Err(EngineError::validation("Bitte einen Dungeon angeben."));
		}
		if days.iter().all(|label| label.trim().is_empty()) {
			return Err(EngineError::validation("Bitte mindestens einen Tag angeben."));
		}
		if times.iter().all(|label| label.trim().is_empty()) {
			return Err(EngineError::validation("Bitte mindestens eine Uhrzeit angeben."));
		}

		let mut store = self.lock_state().await;
		let settings = store.ensure_settings(guild_id, None);
		let planner_channel = match settings.planner_channel_id {
			Some(channel) => channel,
			None => {
				return Err(EngineError::precondition(
					"Bitte zuerst /settings konfigurieren (Umfragen Channel fehlt).",
				))
			}
		};
		let min_players = min_players.unwrap_or(settings.default_min_players);

		let raid = store.create_raid(guild_id, planner_channel, creator_id, dungeon.trim(), min_players, Utc::now());
		let days: Vec<&str> = days.iter().map(|label| label.trim()).filter(|label| !label.is_empty()).collect();
		let times: Vec<&str> = times.iter().map(|label| label.trim()).filter(|label| !label.is_empty()).collect();
		store.add_raid_options(raid.id, days, times);

		let posted = self.refresh_planner_message(&mut store, raid.id).await;
		self.schedule_raidlist_refresh(guild_id);
		self.persist(&store, Some(&["raids", "raid_options", "guild_settings", "debug_mirror_cache"])).await;

		log::info!("Created raid {} (display {}) for guild {}", raid.id, raid.display_id, guild_id);
		Ok(RaidSummary { raid_id: raid.id, display_id: raid.display_id, message_id: posted.map(|m| m.message_id) })
	}

	/// Post or edit the planner message of an open raid. Returns the live
	/// message on success.
	pub(crate) async fn refresh_planner_message(&self, store: &mut Store, raid_id: u64) -> Option<MessageRef> {
		let raid = match store.get_raid(raid_id) {
			Some(raid) if raid.status == RaidStatus::Open => raid.clone(),
			_ => return None,
		};
		let (days, times) = store.list_raid_options(raid.id);
		if days.is_empty() || times.is_empty() {
			return None;
		}

		let names = self.member_names(raid.guild_id).await;
		let embed = planner_embed(store, &raid, &names);
		let payload =
			OutboundMessage::embed(embed).with_view(format!("raid_vote:{}", raid.id));

		if let Some(message_id) = raid.message_id {
			let message = MessageRef { channel_id: raid.channel_id, message_id };
			if self.platform().edit_message(message, payload.clone()).await {
				return Some(message);
			}
		}

		let posted = self.platform().send_message(raid.channel_id, payload).await?;
		store.set_raid_message_id(raid.id, posted.message_id);
		Some(posted)
	}

	/// Replace the planner embed with a terminal "closed" card and strip the
	/// vote controls.
	pub(crate) async fn close_planner_message(
		&self,
		store: &Store,
		guild_id: u64,
		channel_id: u64,
		message_id: Option<u64>,
		reason: &str,
		attendance_rows: Option<usize>,
	) {
		let message_id = match message_id {
			Some(message_id) => message_id,
			None => return,
		};
		let guild_name = self.guild_display_name(store, guild_id).await;
		let mut description = format!("Guild `{}`", guild_name);
		if let Some(rows) = attendance_rows {
			description.push_str(&format!("\nAttendance Rows: `{}`", rows));
		}
		let embed = Embed::titled(format!("Raid geschlossen: {}", reason))
			.description(description)
			.color(colors::RED);
		let message = MessageRef { channel_id, message_id };
		self.platform().edit_message(message, OutboundMessage::embed(embed).without_view()).await;
	}

	/// Shared teardown of a raid's visible artefacts: planner closed, slot
	/// messages deleted, slot roles removed, reminder cache keys cleared.
	/// The raid row itself is still present when this runs.
	pub(crate) async fn teardown_raid(
		&self,
		store: &mut Store,
		raid: &Raid,
		reason: &str,
		attendance_rows: Option<usize>,
	) {
		self.close_planner_message(store, raid.guild_id, raid.channel_id, raid.message_id, reason, attendance_rows)
			.await;

		for slot in store.list_posted_slots(raid.id) {
			self.delete_slot_message(&slot).await;
		}
		self.cleanup_slot_roles_for_raid(store, raid).await;
		self.clear_reminder_cache(store, raid.id);
	}

	/// Finish an open raid: only the creator may do this. Snapshots the
	/// attendance of every qualifying user, then removes the raid.
	pub async fn finish_raid(&self, raid_id: u64, by_user_id: u64) -> Result<FinishSummary> {
		let mut store = self.lock_state().await;
		let raid = match store.get_raid(raid_id) {
			Some(raid) => raid.clone(),
			None => return Err(EngineError::precondition("Raid existiert nicht mehr.")),
		};
		if raid.status != RaidStatus::Open {
			return Err(EngineError::precondition("Raid ist nicht mehr offen."));
		}
		if raid.creator_id != by_user_id {
			return Err(EngineError::precondition("Nur der Ersteller kann den Raid abschließen."));
		}

		let qualified = self.qualified_slots_for(&store, &raid);
		let attendance_rows =
			store.create_attendance_snapshot(raid.guild_id, raid.display_id, &raid.dungeon, &qualified.all_users);

		self.teardown_raid(&mut store, &raid, "Abgeschlossen", Some(attendance_rows)).await;
		store.delete_raid_cascade(raid.id);

		self.refresh_raidlist_for_guild(&mut store, raid.guild_id, true).await;
		self.persist(&store, None).await;

		log::info!("Finished raid {} (display {}), {} attendance rows", raid.id, raid.display_id, attendance_rows);
		Ok(FinishSummary { display_id: raid.display_id, attendance_rows })
	}

	/// Cancel every open raid of a guild. No attendance snapshot is taken.
	pub async fn cancel_raids_for_guild(&self, guild_id: u64, reason: &str) -> Result<usize> {
		let mut store = self.lock_state().await;
		let raids = store.list_open_raids(Some(guild_id));
		for raid in &raids {
			self.teardown_raid(&mut store, raid, reason, None).await;
		}
		let count = store.cancel_open_raids_for_guild(guild_id);

		self.refresh_raidlist_for_guild(&mut store, guild_id, true).await;
		self.persist(&store, None).await;
		log::info!("Canceled {} open raid(s) for guild {}", count, guild_id);
		Ok(count)
	}

	/// Cancel raids older than the stale cutoff. Returns how many were removed.
	pub async fn cleanup_stale_raids_once(&self, now: DateTime<Utc>) -> Result<usize> {
		let cutoff = ChronoDuration::hours(STALE_RAID_HOURS);
		let mut store = self.lock_state().await;

		let stale: Vec<Raid> = store
			.list_open_raids(None)
			.into_iter()
			.filter(|raid| now.signed_duration_since(raid.created_at) >= cutoff)
			.collect();
		if stale.is_empty() {
			return Ok(0);
		}

		let mut touched_guilds: Vec<u64> = Vec::new();
		for raid in &stale {
			self.teardown_raid(&mut store, raid, "Automatisch geschlossen (älter als 7 Tage)", None).await;
			store.delete_raid_cascade(raid.id);
			if !touched_guilds.contains(&raid.guild_id) {
				touched_guilds.push(raid.guild_id);
			}
		}
		for guild_id in touched_guilds {
			self.refresh_raidlist_for_guild(&mut store, guild_id, true).await;
		}
		self.persist(&store, None).await;

		log::info!("Stale-raid sweep removed {} raid(s)", stale.len());
		Ok(stale.len())
	}
}
