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

//! Engine lifecycle: boot sequence, worker supervision, shutdown.
//!
//! Boot order: connect the pool, take the advisory lock (exactly one engine
//! per database), align and validate the schema, load the snapshot, seed
//! bootstrap data, then hand the coordinator to the worker loops. The main
//! loop runs on its own thread and waits for the kill signal; shutdown
//! cancels all workers, flushes once more, and releases the lock.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::database::{schema, Database, Persistence, SingletonLock};
use crate::error::Result;
use crate::platform::Platform;
use crate::workers::{spawn_workers, SingletonTaskRegistry};

pub struct EngineBuilder<P: Platform> {
	config: EngineConfig,
	platform: P,
}

impl<P: Platform> EngineBuilder<P> {
	pub fn new(config: EngineConfig, platform: P) -> Self {
		Self { config, platform }
	}

	/// Boot the engine. Fails with `SingletonLost` when another instance
	/// already owns the database, and with `Schema` when validation finds
	/// the relational schema still misaligned after the guard ran.
	pub fn build(self) -> Result<System<P>> {
		self.config.validate()?;

		let database = smol::block_on(Database::new(self.config.database_url.clone()))?;
		let lock = smol::block_on(database.acquire_singleton_lock())?;

		smol::block_on(async {
			let mut conn = database.conn().await?;
			schema::ensure_schema(&mut conn).await?;
			schema::validate_schema(&mut conn).await
		})?;

		let coordinator = Coordinator::new(self.config, self.platform, Some(Persistence::new(database)));
		smol::block_on(coordinator.load_snapshot())?;

		System::start(coordinator, lock)
	}
}

/// Control the execution of the coordination engine. Holds the advisory
/// lock for the lifetime of the process.
pub struct System<P: Platform> {
	coordinator: Arc<Coordinator<P>>,
	registry: Arc<SingletonTaskRegistry>,
	kill_tx: flume::Sender<()>,
	/// handle to the thread driving the async executor
	handle: jod_thread::JoinHandle<Result<()>>,
	_lock: SingletonLock,
}

impl<P: Platform> System<P> {
	/// Spawn the worker loops and the executor thread.
	pub fn start(coordinator: Arc<Coordinator<P>>, lock: SingletonLock) -> Result<Self> {
		let (kill_tx, kill_rx) = flume::bounded(1);
		let registry = Arc::new(SingletonTaskRegistry::new());

		let thread_coordinator = Arc::clone(&coordinator);
		let thread_registry = Arc::clone(&registry);
		let handle = jod_thread::spawn(move || -> Result<()> {
			smol::run(async move {
				Coordinator::attach_updater(&thread_coordinator);
				spawn_workers(&thread_coordinator, &thread_registry);
				log::info!("Engine started with workers: {}", thread_registry.running_names().join(", "));

				let _ = kill_rx.recv_async().await;

				thread_registry.cancel_all().await;
				thread_coordinator.final_flush().await;
				log::info!("Engine stopped");
				Ok(())
			})
		});

		Ok(Self { coordinator, registry, kill_tx, handle, _lock: lock })
	}

	pub fn coordinator(&self) -> &Arc<Coordinator<P>> {
		&self.coordinator
	}

	pub fn worker_names(&self) -> Vec<&'static str> {
		self.registry.running_names()
	}

	/// Signal the main loop and wait for the final flush. The advisory lock
	/// is released when the `System` is dropped.
	pub fn shutdown(self) -> Result<()> {
		let _ = self.kill_tx.send(());
		self.handle.join()
	}
}
