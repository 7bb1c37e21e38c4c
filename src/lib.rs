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

//! Multi-tenant raid-coordination engine.
//!
//! The engine keeps all domain state in an in-memory store owned by a
//! single orchestrator, derives every visible artefact (planner embed,
//! participant lists, raidlist, calendar) from that store, and mirrors the
//! state into PostgreSQL with fingerprint-deduplicated snapshot flushes.
//! The chat platform itself stays outside: the engine is generic over the
//! [`platform::Platform`] capability trait.

#![forbid(unsafe_code)]

pub mod artefacts;
pub mod config;
pub mod coordinator;
pub mod database;
mod error;
pub mod leveling;
mod logger;
pub mod platform;
pub mod slots;
pub mod store;
pub mod types;
pub mod updater;
pub mod util;
pub mod workers;

mod engine;

pub use self::config::EngineConfig;
pub use self::coordinator::Coordinator;
pub use self::database::{Database, DatabaseConfig, Persistence};
pub use self::engine::{EngineBuilder, System};
pub use self::error::{EngineError, Result};
pub use self::logger::init as init_logger;
pub use self::platform::Platform;
pub use self::store::Store;

#[cfg(test)]
pub(crate) mod test_util;
