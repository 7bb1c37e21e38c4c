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

//! Vote handling and the per-slot artefacts derived from votes: the
//! participant-list messages and the ephemeral slot roles.

use crate::artefacts::memberlist::{memberlist_payload_hash, memberlist_slot_embed};
use crate::config::kinds;
use crate::error::{EngineError, Result};
use crate::platform::{MessageRef, OutboundMessage, Platform};
use crate::slots::{memberlist_threshold, qualified_slot_users, QualifiedSlots};
use crate::store::Store;
use crate::types::{OptionKind, Raid, RaidPostedSlot, RaidStatus};
use crate::util::{clamp_field, memberlist_key, slot_temp_role_key};

use super::Coordinator;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemberlistRebuildStats {
	pub raids: usize,
	pub cleared_slot_rows: usize,
	pub deleted_slot_messages: usize,
	pub created: usize,
}

/// Ephemeral per-slot role name; clamped to the platform's 100-char limit.
pub(crate) fn slot_role_name(display_id: u32, day_label: &str, time_label: &str) -> String {
	clamp_field(&format!("DMW Raid {} {} {}", display_id, day_label, time_label), 100)
}

impl<P: Platform> Coordinator<P> {
	/// Toggle a vote and resynchronise every artefact derived from it.
	/// Returns true when the vote was added, false when it was removed.
	pub async fn toggle_vote(&self, raid_id: u64, kind: OptionKind, option_label: &str, user_id: u64) -> Result<bool> {
		let mut store = self.lock_state().await;
		let raid = match store.get_raid(raid_id) {
			Some(raid) if raid.status == RaidStatus::Open => raid.clone(),
			Some(_) | None => return Err(EngineError::precondition("Raid ist nicht mehr offen.")),
		};

		let added = store.toggle_vote(raid_id, kind, option_label, user_id);

		self.refresh_planner_message(&mut store, raid_id).await;
		self.sync_memberlist_messages_for_raid(&mut store, raid_id).await;
		self.schedule_raidlist_refresh(raid.guild_id);
		self.persist(
			&store,
			Some(&["raids", "raid_votes", "raid_posted_slots", "guild_settings", "debug_mirror_cache"]),
		)
		.await;

		log::debug!(
			"Vote {} {}={} by {} on raid {}",
			if added { "added" } else { "removed" },
			kind.as_str(),
			option_label,
			user_id,
			raid_id
		);
		Ok(added)
	}

	pub(crate) fn qualified_slots_for(&self, store: &Store, raid: &Raid) -> QualifiedSlots {
		let (days, times) = store.list_raid_options(raid.id);
		let (day_users, time_users) = store.vote_user_sets(raid.id);
		qualified_slot_users(&days, &times, &day_users, &time_users, memberlist_threshold(raid.min_players))
	}

	/// Bring the posted participant-list messages in line with the current
	/// qualified slots: create missing, edit changed, delete disqualified.
	pub(crate) async fn sync_memberlist_messages_for_raid(&self, store: &mut Store, raid_id: u64) {
		let raid = match store.get_raid(raid_id) {
			Some(raid) if raid.status == RaidStatus::Open => raid.clone(),
			_ => return,
		};
		let participants_channel = match store.ensure_settings(raid.guild_id, None).participants_channel_id {
			Some(channel) => channel,
			None => return,
		};

		let qualified = self.qualified_slots_for(store, &raid);
		let guild_name = self.guild_display_name(store, raid.guild_id).await;
		let names = self.member_names(raid.guild_id).await;

		for slot in &qualified.slots {
			let embed =
				memberlist_slot_embed(store, &raid, &guild_name, &slot.day, &slot.time, &slot.users, &names);
			let payload_hash = memberlist_payload_hash(&raid, &slot.day, &slot.time, &slot.users);
			let cache_key = memberlist_key(raid.id, &slot.day, &slot.time);

			let up_to_date = store
				.get_debug_cache(&cache_key)
				.map(|row| row.payload_hash == payload_hash)
				.unwrap_or(false);

			let existing = store.get_posted_slot(raid.id, &slot.day, &slot.time).cloned();
			let mut live_message = None;
			if let Some(row) = &existing {
				if let (Some(channel_id), Some(message_id)) = (row.channel_id, row.message_id) {
					let message = MessageRef { channel_id, message_id };
					if up_to_date && self.platform().message_exists(message).await {
						live_message = Some(message);
					} else if self.platform().edit_message(message, OutboundMessage::embed(embed.clone())).await {
						live_message = Some(message);
					}
				}
			}

			let message = match live_message {
				Some(message) => message,
				None => {
					match self.platform().send_message(participants_channel, OutboundMessage::embed(embed)).await {
						Some(posted) => posted,
						None => continue,
					}
				}
			};

			store.upsert_posted_slot(raid.id, &slot.day, &slot.time, message.channel_id, message.message_id);
			store.upsert_debug_cache(
				&cache_key,
				kinds::MEMBERLIST,
				raid.guild_id,
				Some(raid.id),
				message.message_id,
				&payload_hash,
			);

			if let Some(role_id) = self.ensure_slot_temp_role(store, &raid, &slot.day, &slot.time).await {
				self.sync_slot_role_members(raid.guild_id, role_id, &slot.users).await;
			}
		}

		// disqualified slots lose their message, role, and cache rows
		for slot in store.list_posted_slots(raid.id) {
			if qualified.contains(&slot.day_label, &slot.time_label) {
				continue;
			}
			self.delete_slot_message(&slot).await;
			self.cleanup_slot_temp_role(store, &raid, &slot.day_label, &slot.time_label).await;
			store.delete_debug_cache(&memberlist_key(raid.id, &slot.day_label, &slot.time_label));
			store.delete_posted_slot(slot.id);
		}

		let debug_lines: Vec<String> = qualified
			.slots
			.iter()
			.map(|slot| format!("- {} {}: {} Teilnehmer", slot.day, slot.time, slot.users.len()))
			.collect();
		let debug_payload = format!(
			"Memberlist Debug\nRaid {} ({})\nQualifizierte Slots: {}\n{}",
			raid.display_id,
			raid.dungeon,
			qualified.len(),
			if debug_lines.is_empty() { "- Keine qualifizierten Slots.".to_string() } else { debug_lines.join("\n") },
		);
		let debug_channel = self.config().memberlist_debug_channel_id;
		self.mirror_debug_payload(
			store,
			debug_channel,
			&format!("memberlist:{}:0", raid.id),
			kinds::MEMBERLIST,
			raid.guild_id,
			Some(raid.id),
			debug_payload,
		)
		.await;
	}

	pub(crate) async fn delete_slot_message(&self, slot: &RaidPostedSlot) -> bool {
		if let (Some(channel_id), Some(message_id)) = (slot.channel_id, slot.message_id) {
			return self.platform().delete_message(MessageRef { channel_id, message_id }).await;
		}
		false
	}

	/// Get or create the mentionable per-slot role; its id lives in the
	/// artefact cache under the `slot_temp_role` kind.
	pub(crate) async fn ensure_slot_temp_role(
		&self,
		store: &mut Store,
		raid: &Raid,
		day_label: &str,
		time_label: &str,
	) -> Option<u64> {
		let cache_key = slot_temp_role_key(raid.id, day_label, time_label);
		if let Some(row) = store.get_debug_cache(&cache_key) {
			return Some(row.message_id);
		}

		let role_name = slot_role_name(raid.display_id, day_label, time_label);
		let role_id = self.platform().create_role(raid.guild_id, &role_name, true, "DMW Raid slot role").await?;
		store.upsert_debug_cache(
			&cache_key,
			kinds::SLOT_TEMP_ROLE,
			raid.guild_id,
			Some(raid.id),
			role_id,
			&crate::util::sha256_hex(&role_name),
		);
		Some(role_id)
	}

	/// Reconcile role membership with the slot's voters.
	pub(crate) async fn sync_slot_role_members(&self, guild_id: u64, role_id: u64, user_ids: &[u64]) {
		let current = self.platform().role_member_ids(guild_id, role_id).await;
		for user_id in user_ids {
			if !current.contains(user_id) {
				self.platform().add_member_role(guild_id, *user_id, role_id, "DMW Raid slot vote").await;
			}
		}
		for member in current {
			if !user_ids.contains(&member) {
				self.platform().remove_member_role(guild_id, member, role_id, "DMW Raid slot vote removed").await;
			}
		}
	}

	pub(crate) async fn cleanup_slot_temp_role(
		&self,
		store: &mut Store,
		raid: &Raid,
		day_label: &str,
		time_label: &str,
	) {
		let cache_key = slot_temp_role_key(raid.id, day_label, time_label);
		if let Some(row) = store.get_debug_cache(&cache_key).cloned() {
			self.platform().delete_role(raid.guild_id, row.message_id, "DMW Raid slot closed").await;
			store.delete_debug_cache(&cache_key);
		}
	}

	/// Remove every slot role of a raid, including roles that only survive
	/// on the platform under the raid's name prefix.
	pub(crate) async fn cleanup_slot_roles_for_raid(&self, store: &mut Store, raid: &Raid) {
		for row in store.list_debug_cache(Some(kinds::SLOT_TEMP_ROLE), Some(raid.guild_id), Some(raid.id)) {
			self.platform().delete_role(raid.guild_id, row.message_id, "DMW Raid finished").await;
			store.delete_debug_cache(&row.cache_key);
		}

		let prefix = format!("DMW Raid {} ", raid.display_id);
		for (role_id, name) in self.platform().role_names(raid.guild_id).await {
			if name.starts_with(&prefix) {
				self.platform().delete_role(raid.guild_id, role_id, "DMW Raid finished").await;
			}
		}
	}

	/// Drop the reminder/start/nudge cache keys of a raid so a re-created
	/// raid with the same id cannot be suppressed by stale rows.
	pub(crate) fn clear_reminder_cache(&self, store: &mut Store, raid_id: u64) {
		for kind in [kinds::RAID_REMINDER, kinds::RAID_START, kinds::AUTO_REMINDER, kinds::MEMBERLIST].iter() {
			let rows: Vec<String> = store
				.list_debug_cache(Some(*kind), None, None)
				.into_iter()
				.filter(|row| row.raid_id == Some(raid_id))
				.map(|row| row.cache_key)
				.collect();
			for cache_key in rows {
				store.delete_debug_cache(&cache_key);
			}
		}
	}

	/// Tear down and rebuild every participant list of a guild from the
	/// current votes.
	pub async fn rebuild_memberlists_for_guild(&self, guild_id: u64) -> Result<MemberlistRebuildStats> {
		let mut store = self.lock_state().await;
		let mut stats = MemberlistRebuildStats::default();

		let raids = store.list_open_raids(Some(guild_id));
		stats.raids = raids.len();
		for raid in &raids {
			for slot in store.list_posted_slots(raid.id) {
				if self.delete_slot_message(&slot).await {
					stats.deleted_slot_messages += 1;
				}
				store.delete_debug_cache(&memberlist_key(raid.id, &slot.day_label, &slot.time_label));
				store.delete_posted_slot(slot.id);
				stats.cleared_slot_rows += 1;
			}
		}
		for raid in &raids {
			self.sync_memberlist_messages_for_raid(&mut store, raid.id).await;
			stats.created += store.list_posted_slots(raid.id).len();
		}

		self.persist(&store, Some(&["raid_posted_slots", "debug_mirror_cache"])).await;
		Ok(stats)
	}
}
