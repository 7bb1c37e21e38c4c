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

//! IO for the PostgreSQL database backing the coordination engine.

mod batch;
pub mod backup;
pub mod fingerprint;
pub mod schema;
pub mod snapshot;

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use sqlx::{
	pool::PoolConnection,
	postgres::{PgPool, PgPoolOptions, Postgres},
	Row,
};

use crate::config::ADVISORY_LOCK_KEY;
use crate::error::{EngineError, Result};

pub use self::snapshot::Persistence;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DatabaseConfig {
	/// PostgreSQL url.
	pub url: String,
}

impl fmt::Display for DatabaseConfig {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.url)
	}
}

pub type DbConn = PoolConnection<Postgres>;

#[derive(Clone)]
pub struct Database {
	/// pool of database connections
	pool: PgPool,
	url: String,
}

impl Database {
	/// Connect to the database.
	pub async fn new(url: String) -> Result<Self> {
		let pool = PgPoolOptions::new()
			.min_connections(2)
			.max_connections(8)
			.idle_timeout(Duration::from_secs(60))
			.connect(url.as_str())
			.await?;
		Ok(Self { pool, url })
	}

	/// Start the database with a pre-defined pool.
	pub fn with_pool(url: String, pool: PgPool) -> Self {
		Self { pool, url }
	}

	pub async fn conn(&self) -> Result<DbConn> {
		self.pool.acquire().await.map_err(Into::into)
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	pub fn url(&self) -> &str {
		self.url.as_str()
	}

	/// Take the engine's advisory lock on a dedicated connection.
	///
	/// The lock is session-scoped: it is held for as long as the returned
	/// guard (and with it the connection) is alive, which enforces exactly
	/// one coordination engine per database.
	pub async fn acquire_singleton_lock(&self) -> Result<SingletonLock> {
		let mut conn = self.conn().await?;
		let row = sqlx::query("SELECT pg_try_advisory_lock($1) AS locked")
			.bind(ADVISORY_LOCK_KEY)
			.fetch_one(&mut conn)
			.await?;
		let locked: bool = row.try_get("locked")?;
		if !locked {
			return Err(EngineError::SingletonLost(ADVISORY_LOCK_KEY));
		}
		log::info!("Advisory lock {} acquired, this engine owns the database", ADVISORY_LOCK_KEY);
		Ok(SingletonLock { _conn: conn })
	}
}

/// Holds the advisory-lock connection open. Dropping it releases the lock.
pub struct SingletonLock {
	_conn: DbConn,
}
