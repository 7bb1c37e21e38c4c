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

//! Test doubles: a recording platform stub that answers every capability
//! from in-memory state and notes each outbound side effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::platform::{MessageRef, OutboundMessage, Platform};

#[derive(Clone, Debug)]
pub struct SentMessage {
	pub channel_id: u64,
	pub message_id: u64,
	pub payload: OutboundMessage,
}

#[derive(Default)]
struct RecordingState {
	messages: HashMap<u64, SentMessage>,
	guild_names: HashMap<u64, String>,
	member_names: HashMap<u64, HashMap<u64, String>>,
	roles: HashMap<u64, HashMap<u64, String>>,
	role_members: HashMap<u64, Vec<u64>>,
	commands: Vec<String>,
	sends: Vec<SentMessage>,
	edits: Vec<SentMessage>,
	deleted_messages: Vec<u64>,
	deleted_roles: Vec<u64>,
	fail_edits: bool,
}

/// A platform whose every call succeeds against in-memory state.
#[derive(Default)]
pub struct RecordingPlatform {
	state: parking_lot::Mutex<RecordingState>,
	next_id: AtomicU64,
}

impl RecordingPlatform {
	pub fn new() -> Self {
		let platform = Self::default();
		platform.next_id.store(1000, Ordering::SeqCst);
		platform
	}

	fn next_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::SeqCst)
	}

	pub fn with_guild(self, guild_id: u64, name: &str) -> Self {
		self.state.lock().guild_names.insert(guild_id, name.to_string());
		self
	}

	pub fn with_member(self, guild_id: u64, user_id: u64, name: &str) -> Self {
		self.state.lock().member_names.entry(guild_id).or_default().insert(user_id, name.to_string());
		self
	}

	pub fn with_commands(self, commands: &[&str]) -> Self {
		self.state.lock().commands = commands.iter().map(|name| name.to_string()).collect();
		self
	}

	pub fn fail_edits(&self, fail: bool) {
		self.state.lock().fail_edits = fail;
	}

	pub fn sends(&self) -> Vec<SentMessage> {
		self.state.lock().sends.clone()
	}

	pub fn edits(&self) -> Vec<SentMessage> {
		self.state.lock().edits.clone()
	}

	pub fn deleted_messages(&self) -> Vec<u64> {
		self.state.lock().deleted_messages.clone()
	}

	pub fn deleted_roles(&self) -> Vec<u64> {
		self.state.lock().deleted_roles.clone()
	}

	pub fn live_message(&self, message_id: u64) -> Option<SentMessage> {
		self.state.lock().messages.get(&message_id).cloned()
	}

	pub fn role_name(&self, guild_id: u64, role_id: u64) -> Option<String> {
		self.state.lock().roles.get(&guild_id).and_then(|roles| roles.get(&role_id).cloned())
	}

	pub fn members_of_role(&self, role_id: u64) -> Vec<u64> {
		self.state.lock().role_members.get(&role_id).cloned().unwrap_or_default()
	}
}

#[async_trait]
impl Platform for RecordingPlatform {
	async fn send_message(&self, channel_id: u64, message: OutboundMessage) -> Option<MessageRef> {
		let message_id = self.next_id();
		let sent = SentMessage { channel_id, message_id, payload: message };
		let mut state = self.state.lock();
		state.messages.insert(message_id, sent.clone());
		state.sends.push(sent);
		Some(MessageRef { channel_id, message_id })
	}

	async fn edit_message(&self, message: MessageRef, payload: OutboundMessage) -> bool {
		let mut state = self.state.lock();
		if state.fail_edits || !state.messages.contains_key(&message.message_id) {
			return false;
		}
		let edited =
			SentMessage { channel_id: message.channel_id, message_id: message.message_id, payload };
		state.messages.insert(message.message_id, edited.clone());
		state.edits.push(edited);
		true
	}

	async fn delete_message(&self, message: MessageRef) -> bool {
		let mut state = self.state.lock();
		state.deleted_messages.push(message.message_id);
		state.messages.remove(&message.message_id).is_some()
	}

	async fn message_exists(&self, message: MessageRef) -> bool {
		self.state.lock().messages.contains_key(&message.message_id)
	}

	async fn guild_name(&self, guild_id: u64) -> Option<String> {
		self.state.lock().guild_names.get(&guild_id).cloned()
	}

	async fn guild_ids(&self) -> Vec<u64> {
		let mut ids: Vec<u64> = self.state.lock().guild_names.keys().copied().collect();
		ids.sort_unstable();
		ids
	}

	async fn member_display_name(&self, guild_id: u64, user_id: u64) -> Option<String> {
		self.state.lock().member_names.get(&guild_id).and_then(|names| names.get(&user_id).cloned())
	}

	async fn member_display_names(&self, guild_id: u64) -> Option<HashMap<u64, String>> {
		self.state.lock().member_names.get(&guild_id).cloned()
	}

	async fn create_role(&self, guild_id: u64, name: &str, _mentionable: bool, _reason: &str) -> Option<u64> {
		let role_id = self.next_id();
		self.state.lock().roles.entry(guild_id).or_default().insert(role_id, name.to_string());
		Some(role_id)
	}

	async fn delete_role(&self, guild_id: u64, role_id: u64, _reason: &str) -> bool {
		let mut state = self.state.lock();
		state.deleted_roles.push(role_id);
		state.role_members.remove(&role_id);
		state.roles.get_mut(&guild_id).map(|roles| roles.remove(&role_id).is_some()).unwrap_or(false)
	}

	async fn role_names(&self, guild_id: u64) -> Vec<(u64, String)> {
		let state = self.state.lock();
		let mut names: Vec<(u64, String)> = state
			.roles
			.get(&guild_id)
			.map(|roles| roles.iter().map(|(id, name)| (*id, name.clone())).collect())
			.unwrap_or_default();
		names.sort();
		names
	}

	async fn role_member_ids(&self, _guild_id: u64, role_id: u64) -> Vec<u64> {
		self.state.lock().role_members.get(&role_id).cloned().unwrap_or_default()
	}

	async fn add_member_role(&self, _guild_id: u64, user_id: u64, role_id: u64, _reason: &str) -> bool {
		let mut state = self.state.lock();
		let members = state.role_members.entry(role_id).or_default();
		if !members.contains(&user_id) {
			members.push(user_id);
		}
		true
	}

	async fn remove_member_role(&self, _guild_id: u64, user_id: u64, role_id: u64, _reason: &str) -> bool {
		let mut state = self.state.lock();
		if let Some(members) = state.role_members.get_mut(&role_id) {
			members.retain(|member| *member != user_id);
		}
		true
	}

	async fn registered_commands(&self) -> Vec<String> {
		self.state.lock().commands.clone()
	}
}
