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

//! The reactive orchestrator: single gatekeeper of all domain mutations.
//!
//! Every handler follows the same template: take the state lock, validate
//! preconditions, mutate the store, recompute the affected artefacts, push
//! side effects through the platform, update the artefact caches, schedule
//! the raidlist refresh, and request a flush with dirty-table hints. The
//! lock is held end-to-end, so store invariants cannot interleave; platform
//! calls inside the lock are suspension points and state is re-checked
//! after them where it matters.

mod leveling;
mod raidlist;
mod raids;
mod settings;
mod votes;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::lock::{Mutex as AsyncMutex, MutexGuard};
use futures::FutureExt;
use once_cell::sync::OnceCell;

use crate::config::{
	kinds, EngineConfig, EXPECTED_COMMANDS, INTERACTION_ACK_SET_MAX, LOG_FORWARD_QUEUE_MAX_SIZE,
	RAIDLIST_COOLDOWN_MILLIS, RAIDLIST_DEBOUNCE_MILLIS,
};
use crate::database::Persistence;
use crate::error::Result;
use crate::platform::{MessageRef, OutboundMessage, Platform};
use crate::store::Store;
use crate::types::FeatureSettings;
use crate::updater::{GuildUpdater, UpdateFn};

pub use self::leveling::LevelUp;
pub use self::raids::{FinishSummary, RaidSummary};
pub use self::votes::MemberlistRebuildStats;

#[derive(Default)]
struct LevelFlushState {
	dirty: bool,
	last_persist: Option<Instant>,
}

#[derive(Clone, Debug, Default)]
pub struct SelfTestState {
	pub last_ok_at: Option<DateTime<Utc>>,
	pub last_error: Option<String>,
}

pub struct Coordinator<P: Platform> {
	config: EngineConfig,
	platform: P,
	state: AsyncMutex<Store>,
	persistence: Option<Persistence>,
	updater: OnceCell<Arc<GuildUpdater>>,

	acks: parking_lot::Mutex<hashbrown::HashSet<u64>>,
	level_flush: parking_lot::Mutex<LevelFlushState>,
	feature_cache: parking_lot::Mutex<HashMap<u64, FeatureSettings>>,
	raidlist_hash: parking_lot::Mutex<HashMap<u64, String>>,
	xp_stamps: parking_lot::Mutex<HashMap<(u64, u64), DateTime<Utc>>>,
	levelup_stamps: parking_lot::Mutex<HashMap<(u64, u64), DateTime<Utc>>>,
	username_synced_at: parking_lot::Mutex<HashMap<u64, Instant>>,
	self_test: parking_lot::Mutex<SelfTestState>,

	log_tx: flume::Sender<String>,
	log_rx: flume::Receiver<String>,
}

impl<P: Platform> Coordinator<P> {
	/// Build the coordinator. `persistence` is `None` in store-only tests;
	/// flushes then succeed trivially.
	pub fn new(config: EngineConfig, platform: P, persistence: Option<Persistence>) -> Arc<Self> {
		let (log_tx, log_rx) = flume::bounded(LOG_FORWARD_QUEUE_MAX_SIZE);
		Arc::new(Self {
			config,
			platform,
			state: AsyncMutex::new(Store::new()),
			persistence,
			updater: OnceCell::new(),
			acks: parking_lot::Mutex::new(hashbrown::HashSet::new()),
			level_flush: parking_lot::Mutex::new(LevelFlushState::default()),
			feature_cache: parking_lot::Mutex::new(HashMap::new()),
			raidlist_hash: parking_lot::Mutex::new(HashMap::new()),
			xp_stamps: parking_lot::Mutex::new(HashMap::new()),
			levelup_stamps: parking_lot::Mutex::new(HashMap::new()),
			username_synced_at: parking_lot::Mutex::new(HashMap::new()),
			self_test: parking_lot::Mutex::new(SelfTestState::default()),
			log_tx,
			log_rx,
		})
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn platform(&self) -> &P {
		&self.platform
	}

	/// The single state lock. Handlers hold the guard end-to-end.
	pub async fn lock_state(&self) -> MutexGuard<'_, Store> {
		self.state.lock().await
	}

	/// Wire the debounced raidlist updater. Called once at engine start.
	pub fn attach_updater(coordinator: &Arc<Self>) {
		let weak = Arc::downgrade(coordinator);
		let update_fn: UpdateFn = Arc::new(move |guild_id| {
			let weak = weak.clone();
			async move {
				if let Some(coordinator) = weak.upgrade() {
					coordinator.refresh_raidlist_persisted(guild_id).await;
				}
			}
			.boxed()
		});
		let updater = GuildUpdater::new(
			update_fn,
			Duration::from_millis(RAIDLIST_DEBOUNCE_MILLIS),
			Duration::from_millis(RAIDLIST_COOLDOWN_MILLIS),
		);
		let _ = coordinator.updater.set(updater);
	}

	pub(crate) fn schedule_raidlist_refresh(&self, guild_id: u64) {
		if let Some(updater) = self.updater.get() {
			updater.mark_dirty(guild_id);
		}
	}

	/// Load the snapshot and seed bootstrap data.
	pub async fn load_snapshot(&self) -> Result<()> {
		let mut store = self.state.lock().await;
		if let Some(persistence) = &self.persistence {
			persistence.load(&mut store).await?;
		}
		if store.seed_default_dungeons() > 0 {
			log::info!("Seeded default dungeon list");
			self.persist(&store, Some(&["dungeons"])).await;
		}
		Ok(())
	}

	/// Request a flush with dirty-table hints. Failures are logged and
	/// swallowed; in-memory state stays authoritative and the caller keeps
	/// going (the reply layer reports "state persisted failed" on `false`).
	pub(crate) async fn persist(&self, store: &Store, dirty_tables: Option<&[&str]>) -> bool {
		let persistence = match &self.persistence {
			Some(persistence) => persistence,
			None => return true,
		};
		match persistence.flush(store, dirty_tables).await {
			Ok(_) => true,
			Err(e) => {
				log::warn!("State flush failed, keeping in-memory state: {}", e);
				false
			}
		}
	}

	/// Final flush on shutdown, without hints.
	pub async fn final_flush(&self) -> bool {
		let store = self.state.lock().await;
		self.persist(&store, None).await
	}

	/// At-most-once acknowledgement guard for inbound interaction ids.
	/// The set is bounded; on overflow it is cleared rather than grown.
	pub fn acknowledge_once(&self, interaction_id: u64) -> bool {
		let mut acks = self.acks.lock();
		if acks.len() >= INTERACTION_ACK_SET_MAX {
			log::warn!("Interaction ack set overflow, resetting {} entries", acks.len());
			acks.clear();
		}
		acks.insert(interaction_id)
	}

	pub(crate) fn mark_level_state_dirty(&self) {
		self.level_flush.lock().dirty = true;
	}

	/// Queue a line for the log-forwarder worker, dropping the oldest entry
	/// when the queue is full.
	pub fn enqueue_log(&self, message: impl Into<String>) {
		let mut message = message.into();
		loop {
			match self.log_tx.try_send(message) {
				Ok(()) => return,
				Err(flume::TrySendError::Full(returned)) => {
					let _ = self.log_rx.try_recv();
					message = returned;
				}
				Err(flume::TrySendError::Disconnected(_)) => return,
			}
		}
	}

	pub(crate) fn log_receiver(&self) -> flume::Receiver<String> {
		self.log_rx.clone()
	}

	pub fn self_test_state(&self) -> SelfTestState {
		self.self_test.lock().clone()
	}

	/// Compare the registered command set against the expected one; records
	/// the outcome for the status surface.
	pub fn verify_commands(&self, registered: &[String], now: DateTime<Utc>) -> std::result::Result<(), String> {
		let registered: hashbrown::HashSet<&str> = registered.iter().map(String::as_str).collect();
		let expected: hashbrown::HashSet<&str> = EXPECTED_COMMANDS.iter().copied().collect();

		let mut missing: Vec<&str> = expected.difference(&registered).copied().collect();
		let mut unexpected: Vec<&str> = registered.difference(&expected).copied().collect();
		missing.sort_unstable();
		unexpected.sort_unstable();

		let mut state = self.self_test.lock();
		if missing.is_empty() && unexpected.is_empty() {
			state.last_ok_at = Some(now);
			state.last_error = None;
			return Ok(());
		}
		let mut parts = Vec::new();
		if !missing.is_empty() {
			parts.push(format!("missing: {}", missing.join(", ")));
		}
		if !unexpected.is_empty() {
			parts.push(format!("unexpected: {}", unexpected.join(", ")));
		}
		let error = parts.join("; ");
		state.last_error = Some(error.clone());
		Err(error)
	}

	/// Tenant display name, preferring the platform cache.
	pub(crate) async fn guild_display_name(&self, store: &Store, guild_id: u64) -> String {
		if let Some(name) = self.platform.guild_name(guild_id).await {
			return name;
		}
		store
			.settings
			.get(&guild_id)
			.and_then(|row| row.guild_name.clone())
			.unwrap_or_else(|| format!("Guild {}", guild_id))
	}

	pub(crate) async fn member_names(&self, guild_id: u64) -> HashMap<u64, String> {
		self.platform.member_display_names(guild_id).await.unwrap_or_default()
	}

	/// The artefact-cache rule: before posting or editing a derived message,
	/// compare the payload hash. Unchanged and still present -> no-op.
	/// Changed -> edit in place; if the edit fails, post fresh, delete the
	/// stale message, and move the cache key over.
	pub(crate) async fn sync_cached_message(
		&self,
		store: &mut Store,
		cache_key: &str,
		kind: &str,
		guild_id: u64,
		raid_id: Option<u64>,
		channel_id: u64,
		payload: OutboundMessage,
		payload_hash: &str,
	) -> Option<u64> {
		let cached = store.get_debug_cache(cache_key).cloned();

		if let Some(row) = &cached {
			let message = MessageRef { channel_id, message_id: row.message_id };
			if row.payload_hash == payload_hash && self.platform.message_exists(message).await {
				return Some(row.message_id);
			}
			if self.platform.edit_message(message, payload.clone()).await {
				store.upsert_debug_cache(cache_key, kind, guild_id, raid_id, row.message_id, payload_hash);
				return Some(row.message_id);
			}
		}

		let posted = self.platform.send_message(channel_id, payload).await?;
		if let Some(row) = &cached {
			if row.message_id != posted.message_id {
				let stale = MessageRef { channel_id, message_id: row.message_id };
				self.platform.delete_message(stale).await;
			}
		}
		store.upsert_debug_cache(cache_key, kind, guild_id, raid_id, posted.message_id, payload_hash);
		Some(posted.message_id)
	}

	/// Mirror a debug report into the configured debug channel, deduplicated
	/// through the artefact cache.
	pub(crate) async fn mirror_debug_payload(
		&self,
		store: &mut Store,
		debug_channel_id: u64,
		cache_key: &str,
		kind: &str,
		guild_id: u64,
		raid_id: Option<u64>,
		content: String,
	) {
		if debug_channel_id == 0 {
			return;
		}
		let payload_hash = crate::util::sha256_hex(&content);
		self.sync_cached_message(
			store,
			cache_key,
			kind,
			guild_id,
			raid_id,
			debug_channel_id,
			OutboundMessage::text(content),
			&payload_hash,
		)
		.await;
	}

	/// Index an outbound bot message so purgebot can find it later. The
	/// per-channel index is capped; oldest entries fall out first.
	pub async fn track_bot_message(&self, guild_id: u64, channel_id: u64, bot_user_id: u64, message_id: u64) {
		let mut store = self.state.lock().await;
		let cache_key = crate::util::bot_message_key(guild_id, channel_id, bot_user_id, message_id);
		store.upsert_debug_cache(&cache_key, kinds::BOT_MESSAGE, guild_id, None, message_id, "-");

		let channel_marker = format!(":{}:", channel_id);
		let mut indexed: Vec<(u64, String)> = store
			.list_debug_cache(Some(kinds::BOT_MESSAGE), Some(guild_id), None)
			.into_iter()
			.filter(|row| row.cache_key.contains(&channel_marker))
			.map(|row| (row.message_id, row.cache_key))
			.collect();
		if indexed.len() > crate::config::BOT_MESSAGE_INDEX_MAX_PER_CHANNEL {
			indexed.sort();
			let overflow = indexed.len() - crate::config::BOT_MESSAGE_INDEX_MAX_PER_CHANNEL;
			for (_, cache_key) in indexed.into_iter().take(overflow) {
				store.delete_debug_cache(&cache_key);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_util::RecordingPlatform;
	use crate::types::OptionKind;
	use crate::util::raid_reminder_key;
	use chrono::TimeZone;

	fn test_config() -> EngineConfig {
		EngineConfig {
			discord_token: "token".into(),
			database_url: "postgres://localhost/test".into(),
			privileged_user_id: 9,
			..EngineConfig::default()
		}
	}

	async fn coordinator_with_guild() -> Arc<Coordinator<RecordingPlatform>> {
		let platform = RecordingPlatform::new().with_guild(1, "Testgilde").with_member(1, 200, "Raider");
		let coordinator = Coordinator::new(test_config(), platform, None);
		coordinator.configure_channels(1, Some(11), Some(22), Some(33)).await.expect("configure channels");
		coordinator
	}

	#[test]
	fn planner_happy_path_posts_slot_and_raidlist() {
		smol::run(async {
			let coordinator = coordinator_with_guild().await;
			let summary = coordinator
				.create_raid(1, 100, "Nanos", vec!["2026-02-13 (Fr)".into()], vec!["20:00".into()], Some(1))
				.await
				.expect("create raid");
			assert_eq!(summary.display_id, 1);
			let planner_id = summary.message_id.expect("planner posted");

			coordinator.toggle_vote(summary.raid_id, OptionKind::Day, "2026-02-13 (Fr)", 200).await.unwrap();
			coordinator.toggle_vote(summary.raid_id, OptionKind::Time, "20:00", 200).await.unwrap();

			{
				let store = coordinator.lock_state().await;
				let slots = store.list_posted_slots(summary.raid_id);
				assert_eq!(slots.len(), 1);
				assert_eq!(slots[0].day_label, "2026-02-13 (Fr)");
				assert_eq!(slots[0].time_label, "20:00");
				assert_eq!(slots[0].channel_id, Some(22));
			}

			let planner = coordinator.platform().live_message(planner_id).expect("planner live");
			let embed = planner.payload.embed.expect("planner embed");
			let complete = embed.fields.iter().find(|field| field.name.contains("Vollständig abgestimmt")).unwrap();
			assert!(complete.value.contains("Raider"));

			coordinator.force_raidlist_refresh(1).await;
			let raidlist_id = {
				let store = coordinator.lock_state().await;
				store.settings[&1].raidlist_message_id.expect("raidlist posted")
			};
			let raidlist = coordinator.platform().live_message(raidlist_id).unwrap();
			let embed = raidlist.payload.embed.unwrap();
			let raid_field = embed.fields.iter().find(|field| field.name.contains("Raid #1")).unwrap();
			assert!(raid_field.value.contains("**Nächster Termin:** \n**2026-02-13 (Fr) 20:00**"));
			assert!(raid_field.value.contains("**Qualifizierte Slots:** `1`"));
		});
	}

	#[test]
	fn untoggling_the_vote_removes_the_posted_slot() {
		smol::run(async {
			let coordinator = coordinator_with_guild().await;
			let summary = coordinator
				.create_raid(1, 100, "Nanos", vec!["2026-02-13 (Fr)".into()], vec!["20:00".into()], Some(1))
				.await
				.unwrap();
			coordinator.toggle_vote(summary.raid_id, OptionKind::Day, "2026-02-13 (Fr)", 200).await.unwrap();
			coordinator.toggle_vote(summary.raid_id, OptionKind::Time, "20:00", 200).await.unwrap();
			// second day toggle disqualifies the slot again
			coordinator.toggle_vote(summary.raid_id, OptionKind::Day, "2026-02-13 (Fr)", 200).await.unwrap();

			let store = coordinator.lock_state().await;
			assert!(store.list_posted_slots(summary.raid_id).is_empty());
			assert!(!coordinator.platform().deleted_messages().is_empty());
		});
	}

	#[test]
	fn vote_on_missing_raid_is_a_precondition_failure() {
		smol::run(async {
			let coordinator = coordinator_with_guild().await;
			let err = coordinator.toggle_vote(777, OptionKind::Day, "2026-02-13", 200).await.unwrap_err();
			assert!(err.is_user_facing());
		});
	}

	#[test]
	fn finish_raid_snapshots_attendance_and_cascades() {
		smol::run(async {
			let coordinator = coordinator_with_guild().await;
			let summary = coordinator
				.create_raid(1, 100, "Nanos", vec!["2026-02-13 (Fr)".into()], vec!["20:00".into()], Some(1))
				.await
				.unwrap();
			coordinator.toggle_vote(summary.raid_id, OptionKind::Day, "2026-02-13 (Fr)", 200).await.unwrap();
			coordinator.toggle_vote(summary.raid_id, OptionKind::Time, "20:00", 200).await.unwrap();

			// only the creator may finish
			let err = coordinator.finish_raid(summary.raid_id, 999).await.unwrap_err();
			assert!(err.is_user_facing());

			let finish = coordinator.finish_raid(summary.raid_id, 100).await.unwrap();
			assert_eq!(finish.attendance_rows, 1);

			let store = coordinator.lock_state().await;
			assert!(store.get_raid(summary.raid_id).is_none());
			assert!(store.raid_votes.is_empty());
			assert!(store.raid_posted_slots.is_empty());
			assert_eq!(store.raid_participation_count(1, 200), 1);
		});
	}

	#[test]
	fn cancel_tears_down_messages_and_roles() {
		smol::run(async {
			let coordinator = coordinator_with_guild().await;
			let summary = coordinator
				.create_raid(1, 100, "Nanos", vec!["2026-02-13 (Fr)".into()], vec!["20:00".into()], Some(1))
				.await
				.unwrap();
			coordinator.toggle_vote(summary.raid_id, OptionKind::Day, "2026-02-13 (Fr)", 200).await.unwrap();
			coordinator.toggle_vote(summary.raid_id, OptionKind::Time, "20:00", 200).await.unwrap();

			let count = coordinator.cancel_raids_for_guild(1, "Abgebrochen").await.unwrap();
			assert_eq!(count, 1);

			let store = coordinator.lock_state().await;
			assert!(store.list_open_raids(Some(1)).is_empty());
			assert!(store.raid_attendance.is_empty(), "cancel takes no attendance snapshot");
			assert!(!coordinator.platform().deleted_roles().is_empty());
		});
	}

	#[test]
	fn reminder_fires_once_per_slot() {
		smol::run(async {
			let coordinator = coordinator_with_guild().await;
			let features = crate::types::FeatureSettings {
				raid_reminder_enabled: true,
				..coordinator.default_feature_settings()
			};
			coordinator.set_feature_settings(1, features).await.unwrap();

			let summary = coordinator
				.create_raid(1, 100, "Nanos", vec!["2026-02-13 (Fr)".into()], vec!["20:00".into()], Some(1))
				.await
				.unwrap();
			coordinator.toggle_vote(summary.raid_id, OptionKind::Day, "2026-02-13 (Fr)", 200).await.unwrap();
			coordinator.toggle_vote(summary.raid_id, OptionKind::Time, "20:00", 200).await.unwrap();

			// 19:50 Europe/Berlin on raid day
			let now = Utc.ymd(2026, 2, 13).and_hms(18, 50, 0);
			assert_eq!(coordinator.run_raid_reminders_once(now).await.unwrap(), 1);
			assert_eq!(coordinator.run_raid_reminders_once(now).await.unwrap(), 0);

			let store = coordinator.lock_state().await;
			let cache_key = raid_reminder_key(summary.raid_id, "2026-02-13 (Fr)", "20:00");
			assert!(store.get_debug_cache(&cache_key).is_some());

			let reminder = coordinator
				.platform()
				.sends()
				.into_iter()
				.find(|message| {
					message.payload.content.as_deref().map_or(false, |content| content.contains("Raid-Erinnerung"))
				})
				.expect("reminder sent");
			assert_eq!(reminder.channel_id, 22);
		});
	}

	#[test]
	fn identical_raidlist_payload_is_not_republished() {
		smol::run(async {
			let coordinator = coordinator_with_guild().await;
			coordinator
				.create_raid(1, 100, "Nanos", vec!["2026-02-13 (Fr)".into()], vec!["20:00".into()], Some(1))
				.await
				.unwrap();

			coordinator.force_raidlist_refresh(1).await;
			let edits_before = coordinator.platform().edits().len();
			let sends_before = coordinator.platform().sends().len();

			// unchanged payload, non-forced refresh: no send, no edit
			coordinator.refresh_raidlist_persisted(1).await;
			assert_eq!(coordinator.platform().edits().len(), edits_before);
			assert_eq!(coordinator.platform().sends().len(), sends_before);
		});
	}

	#[test]
	fn cached_message_edit_failure_reposts_and_drops_stale() {
		smol::run(async {
			let coordinator = coordinator_with_guild().await;
			let mut store = coordinator.lock_state().await;

			let first = coordinator
				.sync_cached_message(&mut store, "probe:1", "raidlist", 1, None, 55, OutboundMessage::text("a"), "hash-a")
				.await
				.unwrap();

			// same hash, message alive: untouched
			let again = coordinator
				.sync_cached_message(&mut store, "probe:1", "raidlist", 1, None, 55, OutboundMessage::text("a"), "hash-a")
				.await
				.unwrap();
			assert_eq!(first, again);

			// new hash with edits failing: repost, delete stale, move the key
			coordinator.platform().fail_edits(true);
			let reposted = coordinator
				.sync_cached_message(&mut store, "probe:1", "raidlist", 1, None, 55, OutboundMessage::text("b"), "hash-b")
				.await
				.unwrap();
			assert_ne!(first, reposted);
			assert!(coordinator.platform().deleted_messages().contains(&first));
			assert_eq!(store.get_debug_cache("probe:1").unwrap().message_id, reposted);
		});
	}

	#[test]
	fn acknowledgements_are_at_most_once() {
		let coordinator = Coordinator::new(test_config(), RecordingPlatform::new(), None);
		assert!(coordinator.acknowledge_once(42));
		assert!(!coordinator.acknowledge_once(42));
		assert!(coordinator.acknowledge_once(43));
	}

	#[test]
	fn verify_commands_tracks_missing_and_unexpected() {
		let coordinator = Coordinator::new(test_config(), RecordingPlatform::new(), None);
		let now = Utc.ymd(2026, 2, 13).and_hms(12, 0, 0);

		let full: Vec<String> = EXPECTED_COMMANDS.iter().map(|name| name.to_string()).collect();
		assert!(coordinator.verify_commands(&full, now).is_ok());
		assert!(coordinator.self_test_state().last_ok_at.is_some());

		let mut broken = full.clone();
		broken.pop();
		broken.push("rogue".to_string());
		let error = coordinator.verify_commands(&broken, now).unwrap_err();
		assert!(error.contains("missing"));
		assert!(error.contains("rogue"));
		assert!(coordinator.self_test_state().last_error.is_some());
	}

	#[test]
	fn guild_remove_purges_memoised_state() {
		smol::run(async {
			let coordinator = coordinator_with_guild().await;
			coordinator
				.create_raid(1, 100, "Nanos", vec!["2026-02-13 (Fr)".into()], vec!["20:00".into()], Some(1))
				.await
				.unwrap();

			let counts = coordinator.handle_guild_remove(1).await.unwrap();
			assert_eq!(counts.raids, 1);
			assert_eq!(counts.guild_settings, 1);

			let store = coordinator.lock_state().await;
			assert!(store.settings.is_empty());
			assert!(store.debug_cache.is_empty());
		});
	}

	#[test]
	fn message_xp_awards_and_announces_levelups() {
		smol::run(async {
			let coordinator = coordinator_with_guild().await;
			let start = Utc.ymd(2026, 2, 13).and_hms(12, 0, 0);

			// interval gating: a second message right away earns nothing
			let first = coordinator.award_message_xp(1, 200, Some("Raider"), start).await.unwrap();
			assert!(first.is_none());
			let blocked = coordinator.award_message_xp(1, 200, Some("Raider"), start).await.unwrap();
			assert!(blocked.is_none());

			// grind to the first levelup (needs 100 xp at 15 per message)
			let mut at = start;
			let mut levelup = None;
			for _ in 0..10 {
				at = at + chrono::Duration::seconds(3600);
				if let Some(up) = coordinator.award_message_xp(1, 200, Some("Raider"), at).await.unwrap() {
					levelup = Some(up);
					break;
				}
			}
			let levelup = levelup.expect("levelup reached");
			assert_eq!(levelup.new_level, 1);
			assert!(levelup.announce);

			let store = coordinator.lock_state().await;
			assert_eq!(store.user_levels[&(1, 200)].level, 1);
		});
	}
}
