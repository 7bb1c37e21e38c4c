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

//! Per-tenant debounce+cooldown scheduler.
//!
//! A burst of `mark_dirty` calls within the debounce window collapses into
//! one refresh; a mark arriving while a refresh is mid-flight produces
//! exactly one more refresh afterwards. Per guild there is at most one live
//! task; its state advances `Idle -> WaitingDebounce -> Cooldown -> Idle`.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;

/// The refresh callback. Must not panic; errors are its own concern.
pub type UpdateFn = Arc<dyn Fn(u64) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct GuildFlags {
	dirty: bool,
	generation: u64,
	running: bool,
}

struct GuildState {
	flags: parking_lot::Mutex<GuildFlags>,
	last_run: parking_lot::Mutex<Option<Instant>>,
	run_lock: futures::lock::Mutex<()>,
}

impl GuildState {
	fn new() -> Self {
		Self {
			flags: parking_lot::Mutex::new(GuildFlags::default()),
			last_run: parking_lot::Mutex::new(None),
			run_lock: futures::lock::Mutex::new(()),
		}
	}
}

enum RunOutcome {
	/// Nothing dirty when the lock was finally held.
	Idle,
	/// Ran the update; `gen_seen` is the generation consumed by the run.
	Done { gen_seen: u64 },
	/// Ran, but marks arrived mid-flight; caller keeps waiting on `newest`.
	Rerun { newest: u64 },
}

pub struct GuildUpdater {
	update_fn: UpdateFn,
	debounce: Duration,
	cooldown: Duration,
	guilds: parking_lot::Mutex<HashMap<u64, Arc<GuildState>>>,
	/// Handle back to ourselves for spawning the per-guild tasks.
	weak: Weak<GuildUpdater>,
}

impl GuildUpdater {
	pub fn new(update_fn: UpdateFn, debounce: Duration, cooldown: Duration) -> Arc<Self> {
		Arc::new_cyclic(|weak| Self {
			update_fn,
			debounce,
			cooldown,
			guilds: parking_lot::Mutex::new(HashMap::new()),
			weak: weak.clone(),
		})
	}

	fn state(&self, guild_id: u64) -> Arc<GuildState> {
		self.guilds.lock().entry(guild_id).or_insert_with(|| Arc::new(GuildState::new())).clone()
	}

	fn spawn_debounced(&self, guild_id: u64, state: Arc<GuildState>, generation: u64) {
		let updater = match self.weak.upgrade() {
			Some(updater) => updater,
			None => return,
		};
		smol::Task::spawn(async move {
			updater.debounce_loop(guild_id, state, generation).await;
		})
		.detach();
	}

	/// Coalesce a refresh request. Spawns the debounced task unless one is
	/// already waiting or running for this guild.
	pub fn mark_dirty(&self, guild_id: u64) {
		let state = self.state(guild_id);
		let generation = {
			let mut flags = state.flags.lock();
			flags.dirty = true;
			flags.generation += 1;
			if flags.running {
				return;
			}
			flags.running = true;
			flags.generation
		};

		self.spawn_debounced(guild_id, state, generation);
	}

	/// Bypass the debounce window; still honors the cooldown spacing.
	pub async fn force_update(&self, guild_id: u64) {
		let state = self.state(guild_id);
		state.flags.lock().dirty = true;
		match self.run(guild_id, &state).await {
			RunOutcome::Rerun { newest } => {
				let spawn = {
					let mut flags = state.flags.lock();
					if flags.running {
						false
					} else {
						flags.running = true;
						true
					}
				};
				if spawn {
					self.spawn_debounced(guild_id, state, newest);
				}
			}
			RunOutcome::Idle | RunOutcome::Done { .. } => {}
		}
	}

	async fn debounce_loop(self: Arc<Self>, guild_id: u64, state: Arc<GuildState>, mut generation: u64) {
		loop {
			smol::Timer::after(self.debounce).await;

			{
				let flags = state.flags.lock();
				if flags.generation != generation {
					generation = flags.generation;
					continue;
				}
			}

			match self.run(guild_id, &state).await {
				RunOutcome::Rerun { newest } => {
					generation = newest;
					continue;
				}
				RunOutcome::Done { gen_seen } => {
					generation = gen_seen;
				}
				RunOutcome::Idle => {}
			}

			let mut flags = state.flags.lock();
			if flags.generation != generation {
				generation = flags.generation;
				continue;
			}
			flags.running = false;
			return;
		}
	}

	async fn run(&self, guild_id: u64, state: &GuildState) -> RunOutcome {
		let _guard = state.run_lock.lock().await;

		let elapsed = (*state.last_run.lock()).map(|at| at.elapsed());
		if let Some(elapsed) = elapsed {
			if elapsed < self.cooldown {
				smol::Timer::after(self.cooldown - elapsed).await;
			}
		}

		let gen_seen = {
			let mut flags = state.flags.lock();
			if !flags.dirty {
				return RunOutcome::Idle;
			}
			flags.dirty = false;
			flags.generation
		};

		(self.update_fn)(guild_id).await;
		*state.last_run.lock() = Some(Instant::now());

		let newest = state.flags.lock().generation;
		if newest != gen_seen {
			RunOutcome::Rerun { newest }
		} else {
			RunOutcome::Done { gen_seen }
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn counting_updater(
		debounce: Duration,
		cooldown: Duration,
		delay: Duration,
	) -> (Arc<GuildUpdater>, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));
		let counted = Arc::clone(&calls);
		let update_fn: UpdateFn = Arc::new(move |_guild_id| {
			let counted = Arc::clone(&counted);
			Box::pin(async move {
				if delay > Duration::from_millis(0) {
					smol::Timer::after(delay).await;
				}
				counted.fetch_add(1, Ordering::SeqCst);
			})
		});
		(GuildUpdater::new(update_fn, debounce, cooldown), calls)
	}

	#[test]
	fn burst_collapses_to_one_refresh() {
		smol::run(async {
			let (updater, calls) =
				counting_updater(Duration::from_millis(100), Duration::from_millis(0), Duration::from_millis(0));
			for _ in 0..5 {
				updater.mark_dirty(1);
				smol::Timer::after(Duration::from_millis(10)).await;
			}
			smol::Timer::after(Duration::from_millis(400)).await;
			assert_eq!(calls.load(Ordering::SeqCst), 1);
		});
	}

	#[test]
	fn mark_during_flight_runs_exactly_once_more() {
		smol::run(async {
			let (updater, calls) =
				counting_updater(Duration::from_millis(50), Duration::from_millis(0), Duration::from_millis(150));
			updater.mark_dirty(1);
			// let the debounce elapse and the slow update begin
			smol::Timer::after(Duration::from_millis(100)).await;
			updater.mark_dirty(1);
			smol::Timer::after(Duration::from_millis(600)).await;
			assert_eq!(calls.load(Ordering::SeqCst), 2);
		});
	}

	#[test]
	fn guilds_are_independent() {
		smol::run(async {
			let (updater, calls) =
				counting_updater(Duration::from_millis(30), Duration::from_millis(0), Duration::from_millis(0));
			updater.mark_dirty(1);
			updater.mark_dirty(2);
			smol::Timer::after(Duration::from_millis(200)).await;
			assert_eq!(calls.load(Ordering::SeqCst), 2);
		});
	}

	#[test]
	fn force_update_bypasses_debounce() {
		smol::run(async {
			let (updater, calls) =
				counting_updater(Duration::from_secs(60), Duration::from_millis(0), Duration::from_millis(0));
			updater.force_update(1).await;
			assert_eq!(calls.load(Ordering::SeqCst), 1);
		});
	}
}
