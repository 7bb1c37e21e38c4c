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

//! The capability surface the engine consumes from the chat platform.
//!
//! Every method is the "safe" variant: transport failures are logged by the
//! implementation at debug level and surface as `false`/`None`/empty, never
//! as an error. The orchestrator re-checks state after each call and takes
//! the compensating path (e.g. re-post instead of edit) on failure.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Locator of a message the engine posted or intends to edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
	pub channel_id: u64,
	pub message_id: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmbedField {
	pub name: String,
	pub value: String,
	pub inline: bool,
}

/// Renderer-agnostic embed payload. The external binding translates this
/// into the platform's native embed type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Embed {
	pub title: Option<String>,
	pub description: Option<String>,
	pub color: Option<u32>,
	pub fields: Vec<EmbedField>,
	pub footer: Option<String>,
	pub timestamp: Option<DateTime<Utc>>,
}

impl Embed {
	pub fn titled(title: impl Into<String>) -> Self {
		Self { title: Some(title.into()), ..Self::default() }
	}

	pub fn description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}

	pub fn color(mut self, color: u32) -> Self {
		self.color = Some(color);
		self
	}

	pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
		self.fields.push(EmbedField { name: name.into(), value: value.into(), inline });
		self
	}

	pub fn footer(mut self, footer: impl Into<String>) -> Self {
		self.footer = Some(footer.into());
		self
	}

	pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
		self.timestamp = Some(timestamp);
		self
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllowedMentions {
	pub roles: bool,
	pub users: bool,
}

/// Outbound message payload for send and edit alike. `view_tag` names the
/// interactive component set the binding should attach (e.g.
/// `raid_vote:<raid_id>`); `clear_view` asks it to strip components instead
/// (used when closing a planner).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutboundMessage {
	pub content: Option<String>,
	pub embed: Option<Embed>,
	pub allowed_mentions: Option<AllowedMentions>,
	pub view_tag: Option<String>,
	pub clear_view: bool,
}

impl OutboundMessage {
	pub fn text(content: impl Into<String>) -> Self {
		Self { content: Some(content.into()), ..Self::default() }
	}

	pub fn embed(embed: Embed) -> Self {
		Self { embed: Some(embed), ..Self::default() }
	}

	pub fn with_mentions(mut self, mentions: AllowedMentions) -> Self {
		self.allowed_mentions = Some(mentions);
		self
	}

	pub fn with_view(mut self, view_tag: impl Into<String>) -> Self {
		self.view_tag = Some(view_tag.into());
		self
	}

	pub fn without_view(mut self) -> Self {
		self.clear_view = true;
		self
	}
}

/// Colors used by the engine's embeds.
pub mod colors {
	pub const BLURPLE: u32 = 0x5865_F2;
	pub const TEAL: u32 = 0x1ABC_9C;
	pub const GOLD: u32 = 0xF1C4_0F;
	pub const RED: u32 = 0xED42_45;
}

#[async_trait]
pub trait Platform: Send + Sync + 'static {
	/// Send a message. `None` on transport failure.
	async fn send_message(&self, channel_id: u64, message: OutboundMessage) -> Option<MessageRef>;

	/// Edit a message in place. `false` on transport failure or when the
	/// message is gone; the caller re-posts in that case.
	async fn edit_message(&self, message: MessageRef, payload: OutboundMessage) -> bool;

	async fn delete_message(&self, message: MessageRef) -> bool;

	/// Probe whether a previously posted message still exists.
	async fn message_exists(&self, message: MessageRef) -> bool;

	async fn guild_name(&self, guild_id: u64) -> Option<String>;

	async fn guild_ids(&self) -> Vec<u64>;

	/// Display name of a single member from the platform's sync cache.
	async fn member_display_name(&self, guild_id: u64, user_id: u64) -> Option<String>;

	/// All member display names of a guild. `None` when the members intent
	/// is unavailable; callers degrade gracefully.
	async fn member_display_names(&self, guild_id: u64) -> Option<HashMap<u64, String>>;

	/// Create a mentionable role; returns the new role id.
	async fn create_role(&self, guild_id: u64, name: &str, mentionable: bool, reason: &str) -> Option<u64>;

	async fn delete_role(&self, guild_id: u64, role_id: u64, reason: &str) -> bool;

	/// `(role_id, name)` pairs of the guild, for orphan sweeps.
	async fn role_names(&self, guild_id: u64) -> Vec<(u64, String)>;

	async fn role_member_ids(&self, guild_id: u64, role_id: u64) -> Vec<u64>;

	async fn add_member_role(&self, guild_id: u64, user_id: u64, role_id: u64, reason: &str) -> bool;

	async fn remove_member_role(&self, guild_id: u64, user_id: u64, role_id: u64, reason: &str) -> bool;

	/// Names of the slash commands currently registered for this application.
	async fn registered_commands(&self) -> Vec<String>;
}
