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

//! The restart loop: fork-exec the bot, watch uptime, back off on failures.

use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cli_opts::CliOpts;

/// Grace period between SIGTERM and SIGKILL when stopping the child.
const TERMINATE_GRACE_SECONDS: u64 = 25;

pub struct BotRunner {
	opts: CliOpts,
	stop_requested: Arc<AtomicBool>,
	child: Option<Child>,
}

impl BotRunner {
	pub fn new(opts: CliOpts, stop_requested: Arc<AtomicBool>) -> Self {
		Self { opts, stop_requested, child: None }
	}

	fn stop_requested(&self) -> bool {
		self.stop_requested.load(Ordering::SeqCst)
	}

	#[cfg(unix)]
	fn signal_term(child: &Child) {
		// SAFETY: pid is the one returned by our own spawn
		unsafe {
			libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
		}
	}

	#[cfg(not(unix))]
	fn signal_term(_child: &Child) {}

	fn terminate_child(&mut self) {
		let child = match self.child.as_mut() {
			Some(child) => child,
			None => return,
		};
		if let Ok(Some(_)) = child.try_wait() {
			return;
		}

		log::info!("Stopping child process pid={}", child.id());
		Self::signal_term(child);
		let deadline = Instant::now() + Duration::from_secs(TERMINATE_GRACE_SECONDS);
		while Instant::now() < deadline {
			match child.try_wait() {
				Ok(Some(_)) => return,
				Ok(None) => std::thread::sleep(Duration::from_millis(250)),
				Err(e) => {
					log::warn!("Waiting for child failed: {}", e);
					return;
				}
			}
		}

		log::warn!("Child did not stop in time, killing pid={}", child.id());
		let _ = child.kill();
		let _ = child.wait();
	}

	/// Run until clean exit, stop request, runtime cap, or too many quick
	/// failures. Returns the process exit code.
	pub fn run(&mut self) -> i32 {
		let started_at = Instant::now();
		let mut backoff_seconds = self.opts.restart_delay_seconds;
		let mut quick_failures: u32 = 0;

		while !self.stop_requested() {
			if self.runtime_exceeded(started_at) {
				log::info!("Max runtime reached ({}s).", self.opts.max_runtime_seconds);
				self.terminate_child();
				return 0;
			}

			log::info!("Starting child bot process: {}", self.opts.target);
			let child_started_at = Instant::now();
			let child = match Command::new(&self.opts.target).spawn() {
				Ok(child) => child,
				Err(e) => {
					log::error!("Failed to spawn {}: {}", self.opts.target, e);
					return 1;
				}
			};
			self.child = Some(child);

			let exit_code = self.wait_for_child_or_timeout(started_at);
			let uptime = child_started_at.elapsed().as_secs();

			if self.stop_requested() {
				return 0;
			}

			if exit_code == 0 {
				log::info!("Child exited cleanly (code=0).");
			} else {
				log::error!("Child exited with code={} after {}s", exit_code, uptime);
			}

			if uptime < self.opts.min_uptime_seconds {
				quick_failures += 1;
				log::warn!(
					"Quick failure detected ({}/{}, uptime={}s < {}s).",
					quick_failures,
					self.opts.max_quick_failures,
					uptime,
					self.opts.min_uptime_seconds
				);
			} else {
				quick_failures = 0;
				backoff_seconds = self.opts.restart_delay_seconds;
			}

			if quick_failures > self.opts.max_quick_failures {
				log::error!("Too many quick failures, aborting runner.");
				return if exit_code != 0 { exit_code } else { 1 };
			}

			log::info!("Restarting child in {}s", backoff_seconds);
			std::thread::sleep(Duration::from_secs(backoff_seconds));
			backoff_seconds = (backoff_seconds * 2).min(self.opts.max_backoff_seconds);
		}

		self.terminate_child();
		0
	}

	fn runtime_exceeded(&self, started_at: Instant) -> bool {
		self.opts.max_runtime_seconds > 0 && started_at.elapsed().as_secs() >= self.opts.max_runtime_seconds
	}

	fn wait_for_child_or_timeout(&mut self, started_at: Instant) -> i32 {
		loop {
			if self.stop_requested() {
				self.terminate_child();
				return 0;
			}
			if self.runtime_exceeded(started_at) {
				self.terminate_child();
				return 0;
			}

			let child = match self.child.as_mut() {
				Some(child) => child,
				None => return 0,
			};
			match child.try_wait() {
				Ok(Some(status)) => return status.code().unwrap_or(1),
				Ok(None) => std::thread::sleep(Duration::from_secs(1)),
				Err(e) => {
					log::error!("Waiting for child failed: {}", e);
					return 1;
				}
			}
		}
	}
}
