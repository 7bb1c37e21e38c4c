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

//! Upkeep of the per-tenant raidlist message.

use chrono::Utc;

use crate::artefacts::raidlist::raidlist_embed;
use crate::config::kinds;
use crate::platform::{MessageRef, OutboundMessage, Platform};
use crate::store::Store;
use crate::util::raidlist_key;

use super::Coordinator;

impl<P: Platform> Coordinator<P> {
	/// Refresh the raidlist message of one guild. Without `force`, a payload
	/// identical to the last published one suppresses the send/edit.
	/// Returns true when a message was actually posted or edited.
	pub(crate) async fn refresh_raidlist_for_guild(&self, store: &mut Store, guild_id: u64, force: bool) -> bool {
		let settings = store.ensure_settings(guild_id, None).clone();
		let channel_id = match settings.raidlist_channel_id {
			Some(channel_id) => channel_id,
			None => return false,
		};

		let guild_name = self.guild_display_name(store, guild_id).await;
		let artefact = raidlist_embed(store, guild_id, &guild_name, Utc::now());

		let debug_payload = format!(
			"Raidlist Debug\nGuild: {} ({})\nOpen Raids: {}\nPayload Hash: {}\n{}",
			guild_name,
			guild_id,
			store.list_open_raids(Some(guild_id)).len(),
			&artefact.payload_hash[..16],
			artefact.debug_lines.join("\n"),
		);

		let unchanged =
			self.raidlist_hash.lock().get(&guild_id).map(|hash| *hash == artefact.payload_hash).unwrap_or(false);
		if !force && unchanged {
			self.mirror_raidlist_debug(store, guild_id, debug_payload).await;
			return false;
		}

		let payload = OutboundMessage::embed(artefact.embed);
		let mut published = None;
		if let Some(message_id) = settings.raidlist_message_id {
			let message = MessageRef { channel_id, message_id };
			if self.platform().edit_message(message, payload.clone()).await {
				published = Some(message_id);
			}
		}
		if published.is_none() {
			match self.platform().send_message(channel_id, payload).await {
				Some(posted) => {
					store.ensure_settings(guild_id, None).raidlist_message_id = Some(posted.message_id);
					published = Some(posted.message_id);
				}
				None => return false,
			}
		}

		self.raidlist_hash.lock().insert(guild_id, artefact.payload_hash);
		self.mirror_raidlist_debug(store, guild_id, debug_payload).await;
		published.is_some()
	}

	async fn mirror_raidlist_debug(&self, store: &mut Store, guild_id: u64, payload: String) {
		let debug_channel_id = self.config().raidlist_debug_channel_id;
		self.mirror_debug_payload(
			store,
			debug_channel_id,
			&raidlist_key(guild_id),
			kinds::RAIDLIST,
			guild_id,
			None,
			payload,
		)
		.await;
	}

	/// Debounced-refresh entry point used by the guild updater.
	pub(crate) async fn refresh_raidlist_persisted(&self, guild_id: u64) {
		let mut store = self.lock_state().await;
		self.refresh_raidlist_for_guild(&mut store, guild_id, false).await;
		if !self.persist(&store, Some(&["guild_settings", "debug_mirror_cache"])).await {
			log::warn!("Debounced raidlist refresh persisted failed for guild {}", guild_id);
		}
	}

	/// Force-refresh one guild's raidlist under the state lock and persist.
	pub async fn force_raidlist_refresh(&self, guild_id: u64) -> bool {
		let mut store = self.lock_state().await;
		let published = self.refresh_raidlist_for_guild(&mut store, guild_id, true).await;
		self.persist(&store, Some(&["guild_settings", "debug_mirror_cache"])).await;
		published
	}

	/// Refresh every guild that has a raidlist channel or open raids.
	pub async fn refresh_all_raidlists(&self, force: bool) {
		let mut store = self.lock_state().await;
		let mut guild_ids: Vec<u64> = store.settings.keys().copied().collect();
		for raid in store.list_open_raids(None) {
			if !guild_ids.contains(&raid.guild_id) {
				guild_ids.push(raid.guild_id);
			}
		}
		guild_ids.sort_unstable();
		for guild_id in guild_ids {
			self.refresh_raidlist_for_guild(&mut store, guild_id, force).await;
		}
		self.persist(&store, Some(&["guild_settings", "debug_mirror_cache"])).await;
	}
}
