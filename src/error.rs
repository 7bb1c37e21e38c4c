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

use std::{env, fmt, io, num};
use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// DMW Engine Error Enum
#[derive(Debug, Error)]
pub enum EngineError {
	// Rust std io error
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Env(#[from] env::VarError),
	#[error(transparent)]
	Conversion(#[from] num::TryFromIntError),

	// encoding error
	#[error(transparent)]
	Serialization(#[from] serde_json::Error),

	// database error
	#[error(transparent)]
	Fmt(#[from] fmt::Error),
	#[error("sqlx error: {0}")]
	Sql(#[from] sqlx::Error),

	// channel error
	#[error("Sending on a disconnected channel")]
	Channel,

	/// Another engine already holds the advisory lock for this database.
	#[error("advisory lock {0} is held by another engine instance")]
	SingletonLost(i64),

	/// The relational schema disagrees with the declarative model after alignment. Fatal.
	#[error("schema guard: {0}")]
	Schema(String),

	/// Missing configuration or a raid that is no longer open.
	/// The payload is an actionable, user-facing message; no state was changed.
	#[error("{0}")]
	Precondition(String),

	/// Bad user input, surfaced verbatim; no state was changed.
	#[error("{0}")]
	Validation(String),

	#[error("configuration: {0}")]
	Config(String),

	/// A flush exhausted its retry budget. In-memory state is kept as-is.
	#[error("state flush failed after {attempts} attempts: {last}")]
	FlushExhausted { attempts: u32, last: String },

	#[error("{0}")]
	Shutdown(String),
}

impl EngineError {
	pub fn precondition(msg: impl Into<String>) -> Self {
		EngineError::Precondition(msg.into())
	}

	pub fn validation(msg: impl Into<String>) -> Self {
		EngineError::Validation(msg.into())
	}

	/// True for errors whose message is meant to be relayed to the invoking user.
	pub fn is_user_facing(&self) -> bool {
		matches!(self, EngineError::Precondition(_) | EngineError::Validation(_))
	}
}

impl<T> From<flume::SendError<T>> for EngineError {
	fn from(_: flume::SendError<T>) -> Self {
		Self::Channel
	}
}
