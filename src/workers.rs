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

//! Long-running workers and the registry that keeps each of them singular.
//!
//! Every loop wraps its body, logs failures, sleeps, and continues — one
//! failing iteration never kills a loop. On shutdown the registry cancels
//! and awaits all tasks.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{
	kinds, AUTO_REMINDER_ADVANCE_SECONDS, AUTO_REMINDER_MIN_FILL_PERCENT, DEFAULT_TIMEZONE_NAME,
	INTEGRITY_CLEANUP_SLEEP_SECONDS, LEVEL_PERSIST_WORKER_POLL_SECONDS, LOG_FORWARD_BATCH_INTERVAL_SECONDS,
	RAID_REMINDER_ADVANCE_SECONDS, RAID_REMINDER_WORKER_SLEEP_SECONDS, RAID_START_TOLERANCE_SECONDS,
	SLOT_ROLE_NAME_PREFIX, STALE_RAID_CHECK_SECONDS, USERNAME_SYNC_WORKER_SLEEP_SECONDS,
};
use crate::coordinator::Coordinator;
use crate::database::backup::{export_to_sql, DEFAULT_BACKUP_PATH};
use crate::error::Result;
use crate::platform::{AllowedMentions, Embed, MessageRef, OutboundMessage, Platform};
use crate::slots::{memberlist_threshold, qualified_slot_users, slot_start_utc};
use crate::util::{auto_reminder_key, raid_reminder_key, raid_start_key};

/// Guarantees one live instance per named loop. Starting a name twice is a
/// no-op while the first task is alive.
#[derive(Default)]
pub struct SingletonTaskRegistry {
	tasks: parking_lot::Mutex<HashMap<&'static str, smol::Task<()>>>,
}

impl SingletonTaskRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Spawn `future` under `name` unless that loop is already registered.
	/// Returns true when a new task was spawned.
	pub fn start_once(&self, name: &'static str, future: impl Future<Output = ()> + Send + 'static) -> bool {
		let mut tasks = self.tasks.lock();
		if tasks.contains_key(name) {
			return false;
		}
		tasks.insert(name, smol::Task::spawn(future));
		true
	}

	pub fn running_names(&self) -> Vec<&'static str> {
		let mut names: Vec<&'static str> = self.tasks.lock().keys().copied().collect();
		names.sort_unstable();
		names
	}

	/// Cancel every task and await their termination.
	pub async fn cancel_all(&self) {
		let tasks: Vec<(&'static str, smol::Task<()>)> = self.tasks.lock().drain().collect();
		for (name, task) in tasks {
			log::debug!("Cancelling worker {}", name);
			task.cancel().await;
		}
	}
}

impl<P: Platform> Coordinator<P> {
	/// One pass of the reminder rule: for every qualified slot of every open
	/// raid, post the 10-minute reminder inside `[now, now+10min]` and the
	/// "starting now" message inside `[-tolerance, 0]`, each at most once
	/// via its cache key. Returns the number of messages sent.
	pub async fn run_raid_reminders_once(&self, now: DateTime<Utc>) -> Result<usize> {
		let mut store = self.lock_state().await;
		let mut sent = 0;

		for raid in store.list_open_raids(None) {
			let features = self.feature_settings(&store, raid.guild_id);
			if !features.raid_reminder_enabled {
				continue;
			}
			let participants_channel = match store.ensure_settings(raid.guild_id, None).participants_channel_id {
				Some(channel) => channel,
				None => continue,
			};

			let qualified = self.qualified_slots_for(&store, &raid);
			for slot in &qualified.slots {
				let start = match slot_start_utc(&slot.day, &slot.time) {
					Some(start) => start,
					None => continue,
				};
				let delta_seconds = start.signed_duration_since(now).num_seconds();

				if (0..=RAID_REMINDER_ADVANCE_SECONDS).contains(&delta_seconds) {
					let cache_key = raid_reminder_key(raid.id, &slot.day, &slot.time);
					if store.get_debug_cache(&cache_key).is_some() {
						continue;
					}
					let role_id = match self.ensure_slot_temp_role(&mut store, &raid, &slot.day, &slot.time).await {
						Some(role_id) => role_id,
						None => continue,
					};
					self.sync_slot_role_members(raid.guild_id, role_id, &slot.users).await;

					let content = format!(
						"⏰ Raid-Erinnerung: **{}** startet in ca. 10 Minuten.\n🆔 Raid `{}`\n📅 {}\n🕒 {} ({})\n<@&{}>",
						raid.dungeon, raid.display_id, slot.day, slot.time, DEFAULT_TIMEZONE_NAME, role_id
					);
					let posted = self
						.platform()
						.send_message(
							participants_channel,
							OutboundMessage::text(content.clone())
								.with_mentions(AllowedMentions { roles: true, users: true }),
						)
						.await;
					if let Some(message) = posted {
						store.upsert_debug_cache(
							&cache_key,
							kinds::RAID_REMINDER,
							raid.guild_id,
							Some(raid.id),
							message.message_id,
							&crate::util::sha256_hex(&content),
						);
						sent += 1;
					}
				} else if (-RAID_START_TOLERANCE_SECONDS..0).contains(&delta_seconds) {
					let cache_key = raid_start_key(raid.id, &slot.day, &slot.time);
					if store.get_debug_cache(&cache_key).is_some() {
						continue;
					}
					let role_id = match self.ensure_slot_temp_role(&mut store, &raid, &slot.day, &slot.time).await {
						Some(role_id) => role_id,
						None => continue,
					};

					let content = format!(
						"🚀 **{}** startet JETZT!\n🆔 Raid `{}`\n📅 {}\n🕒 {} ({})\n<@&{}>",
						raid.dungeon, raid.display_id, slot.day, slot.time, DEFAULT_TIMEZONE_NAME, role_id
					);
					let posted = self
						.platform()
						.send_message(
							participants_channel,
							OutboundMessage::text(content.clone())
								.with_mentions(AllowedMentions { roles: true, users: true }),
						)
						.await;
					if let Some(message) = posted {
						store.upsert_debug_cache(
							&cache_key,
							kinds::RAID_START,
							raid.guild_id,
							Some(raid.id),
							message.message_id,
							&crate::util::sha256_hex(&content),
						);
						sent += 1;
					}
				}
			}
		}

		if sent > 0 {
			self.persist(&store, Some(&["debug_mirror_cache"])).await;
		}
		Ok(sent)
	}

	/// One pass of the auto-fill nudge: two hours before an under-filled
	/// slot starts, link the planner so people can still vote. A slot counts
	/// as under-filled while the voter intersection is below half of
	/// `min_players`.
	pub async fn run_auto_reminders_once(&self, now: DateTime<Utc>) -> Result<usize> {
		let mut store = self.lock_state().await;
		let mut sent = 0;

		for raid in store.list_open_raids(None) {
			let features = self.feature_settings(&store, raid.guild_id);
			if !features.auto_reminder_enabled {
				continue;
			}
			let participants_channel = match store.ensure_settings(raid.guild_id, None).participants_channel_id {
				Some(channel) => channel,
				None => continue,
			};

			// fill is judged against min_players, so slots are collected with
			// the floor threshold of one voter
			let (days, times) = store.list_raid_options(raid.id);
			let (day_users, time_users) = store.vote_user_sets(raid.id);
			let slots = qualified_slot_users(&days, &times, &day_users, &time_users, 1);
			let required = memberlist_threshold(raid.min_players);

			for slot in &slots.slots {
				let start = match slot_start_utc(&slot.day, &slot.time) {
					Some(start) => start,
					None => continue,
				};
				let delta_seconds = start.signed_duration_since(now).num_seconds();
				if !(0..=AUTO_REMINDER_ADVANCE_SECONDS).contains(&delta_seconds) {
					continue;
				}

				let fill_percent = (slot.users.len() * 100 / required) as u32;
				if fill_percent >= AUTO_REMINDER_MIN_FILL_PERCENT {
					continue;
				}
				let cache_key = auto_reminder_key(raid.id, &slot.day, &slot.time);
				if store.get_debug_cache(&cache_key).is_some() {
					continue;
				}

				let jump = match raid.message_id {
					Some(message_id) => format!(
						"https://discord.com/channels/{}/{}/{}",
						raid.guild_id, raid.channel_id, message_id
					),
					None => String::new(),
				};
				let content = format!(
					"📣 **{}** startet in ca. 2 Stunden und ist erst zu {}% belegt.\n🆔 Raid `{}`\n📅 {}\n🕒 {} ({})\n👥 Belegt: {}/{}\n{}",
					raid.dungeon,
					fill_percent,
					raid.display_id,
					slot.day,
					slot.time,
					DEFAULT_TIMEZONE_NAME,
					slot.users.len(),
					required,
					jump
				);
				let posted =
					self.platform().send_message(participants_channel, OutboundMessage::text(content.clone())).await;
				if let Some(message) = posted {
					store.upsert_debug_cache(
						&cache_key,
						kinds::AUTO_REMINDER,
						raid.guild_id,
						Some(raid.id),
						message.message_id,
						&crate::util::sha256_hex(&content),
					);
					sent += 1;
				}
			}
		}

		if sent > 0 {
			self.persist(&store, Some(&["debug_mirror_cache"])).await;
		}
		Ok(sent)
	}

	/// Self-healing sweep: drop cache rows whose raid is gone and delete
	/// orphaned slot roles that still carry a dead raid's name prefix.
	pub async fn run_integrity_cleanup_once(&self) -> Result<usize> {
		let mut store = self.lock_state().await;
		let mut removed = 0;

		for kind in [kinds::RAID_REMINDER, kinds::SLOT_TEMP_ROLE, kinds::AUTO_REMINDER, kinds::RAID_START].iter() {
			let orphans: Vec<String> = store
				.list_debug_cache(Some(*kind), None, None)
				.into_iter()
				.filter(|row| match row.raid_id {
					Some(raid_id) => store.get_raid(raid_id).is_none(),
					None => true,
				})
				.map(|row| row.cache_key)
				.collect();
			for cache_key in orphans {
				log::debug!("Integrity sweep removes orphan cache row {}", cache_key);
				store.delete_debug_cache(&cache_key);
				removed += 1;
			}
		}

		for guild_id in self.platform().guild_ids().await {
			let live_display_ids: Vec<u32> = store
				.raids
				.values()
				.filter(|raid| raid.guild_id == guild_id)
				.map(|raid| raid.display_id)
				.collect();
			for (role_id, name) in self.platform().role_names(guild_id).await {
				let rest = match name.strip_prefix(SLOT_ROLE_NAME_PREFIX) {
					Some(rest) => rest,
					None => continue,
				};
				let display_id: u32 = match rest.split_whitespace().next().and_then(|id| id.parse().ok()) {
					Some(display_id) => display_id,
					None => continue,
				};
				if live_display_ids.contains(&display_id) {
					continue;
				}
				log::debug!("Integrity sweep deletes orphan role {} ({})", name, role_id);
				self.platform().delete_role(guild_id, role_id, "DMW Raid integrity sweep").await;
				removed += 1;
			}
		}

		if removed > 0 {
			self.persist(&store, Some(&["debug_mirror_cache"])).await;
		}
		Ok(removed)
	}

	/// Snapshot every table into the backup file.
	pub async fn run_backup_once(&self, output_path: &std::path::Path) -> Result<PathBuf> {
		let store = self.lock_state().await;
		let path = export_to_sql(&store, output_path, Utc::now())?;
		log::info!("Backup written to {}", path.display());
		Ok(path)
	}

	/// Compare the registered command set against the expected one.
	pub async fn run_self_test_once(&self) -> Result<()> {
		let registered = self.platform().registered_commands().await;
		match self.verify_commands(&registered, Utc::now()) {
			Ok(()) => Ok(()),
			Err(error) => {
				log::error!("Self-test failed: {}", error);
				Ok(())
			}
		}
	}

	/// Drain the log queue and keep one terminal-style message per tenant
	/// log channel up to date.
	pub(crate) async fn flush_log_batch(&self, batch: Vec<String>, last_message: &mut Option<MessageRef>) {
		if batch.is_empty() {
			return;
		}
		let channel_id = self.config().log_channel_id;
		if channel_id == 0 {
			return;
		}

		let mut tail: Vec<String> = batch.into_iter().rev().take(20).collect();
		tail.reverse();
		let body = tail.join("\n");
		let embed = Embed::titled("DMW Log")
			.description(format!("```\n{}\n```", crate::util::clamp_field(&body, 3800)))
			.timestamp(Utc::now());

		if let Some(message) = *last_message {
			if self.platform().edit_message(message, OutboundMessage::embed(embed.clone())).await {
				return;
			}
		}
		if let Some(posted) = self.platform().send_message(channel_id, OutboundMessage::embed(embed)).await {
			*last_message = Some(posted);
		}
	}
}

/// Register every engine worker. Restarting a named loop is a no-op while
/// it is still running.
pub fn spawn_workers<P: Platform>(coordinator: &Arc<Coordinator<P>>, registry: &SingletonTaskRegistry) {
	let c = Arc::clone(coordinator);
	registry.start_once("stale_raids", async move {
		loop {
			if let Err(e) = c.cleanup_stale_raids_once(Utc::now()).await {
				log::error!("Stale-raid worker iteration failed: {}", e);
			}
			smol::Timer::after(Duration::from_secs(STALE_RAID_CHECK_SECONDS)).await;
		}
	});

	let c = Arc::clone(coordinator);
	registry.start_once("raid_reminders", async move {
		loop {
			if let Err(e) = c.run_raid_reminders_once(Utc::now()).await {
				log::error!("Reminder worker iteration failed: {}", e);
			}
			if let Err(e) = c.run_auto_reminders_once(Utc::now()).await {
				log::error!("Auto-reminder worker iteration failed: {}", e);
			}
			smol::Timer::after(Duration::from_secs(RAID_REMINDER_WORKER_SLEEP_SECONDS)).await;
		}
	});

	let c = Arc::clone(coordinator);
	registry.start_once("integrity_cleanup", async move {
		loop {
			if let Err(e) = c.run_integrity_cleanup_once().await {
				log::error!("Integrity sweep iteration failed: {}", e);
			}
			smol::Timer::after(Duration::from_secs(INTEGRITY_CLEANUP_SLEEP_SECONDS)).await;
		}
	});

	let c = Arc::clone(coordinator);
	registry.start_once("level_persist", async move {
		loop {
			if let Err(e) = c.flush_level_state_if_due(false).await {
				log::error!("Level-persist worker iteration failed: {}", e);
			}
			smol::Timer::after(Duration::from_secs(LEVEL_PERSIST_WORKER_POLL_SECONDS)).await;
		}
	});

	let c = Arc::clone(coordinator);
	registry.start_once("username_sync", async move {
		loop {
			for guild_id in c.platform().guild_ids().await {
				match c.sync_guild_usernames(guild_id, false).await {
					Ok((updated, scanned)) if updated > 0 => {
						log::info!("Username sync guild {}: {}/{} updated", guild_id, updated, scanned);
					}
					Ok(_) => {}
					Err(e) => log::error!("Username sync failed for guild {}: {}", guild_id, e),
				}
			}
			smol::Timer::after(Duration::from_secs(USERNAME_SYNC_WORKER_SLEEP_SECONDS)).await;
		}
	});

	let backup_interval = coordinator.config().backup_interval_seconds;
	let c = Arc::clone(coordinator);
	registry.start_once("backup", async move {
		let path = PathBuf::from(DEFAULT_BACKUP_PATH);
		loop {
			smol::Timer::after(Duration::from_secs(backup_interval)).await;
			if let Err(e) = c.run_backup_once(&path).await {
				log::error!("Backup worker iteration failed: {}", e);
			}
		}
	});

	let self_test_interval = coordinator.config().self_test_interval_seconds;
	let c = Arc::clone(coordinator);
	registry.start_once("self_test", async move {
		loop {
			if let Err(e) = c.run_self_test_once().await {
				log::error!("Self-test worker iteration failed: {}", e);
			}
			smol::Timer::after(Duration::from_secs(self_test_interval)).await;
		}
	});

	let c = Arc::clone(coordinator);
	registry.start_once("log_forwarder", async move {
		let receiver = c.log_receiver();
		let mut last_message: Option<MessageRef> = None;
		loop {
			// batch whatever arrived within one interval
			smol::Timer::after(Duration::from_secs(LOG_FORWARD_BATCH_INTERVAL_SECONDS)).await;
			let mut batch = Vec::new();
			while let Ok(line) = receiver.try_recv() {
				batch.push(line);
			}
			c.flush_log_batch(batch, &mut last_message).await;
		}
	});
}
