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

use clap::{App, Arg};

#[derive(Debug, Clone)]
pub struct CliOpts {
	pub target: String,
	pub max_runtime_seconds: u64,
	pub restart_delay_seconds: u64,
	pub max_backoff_seconds: u64,
	pub min_uptime_seconds: u64,
	pub max_quick_failures: u32,
	pub log_level: log::LevelFilter,
}

fn u64_arg(matches: &clap::ArgMatches, name: &str, default: u64) -> u64 {
	matches.value_of(name).and_then(|raw| raw.parse().ok()).unwrap_or(default)
}

impl CliOpts {
	pub fn parse() -> Self {
		let matches = App::new("dmw-runner")
			.about("DMW engine supervisor with auto-restart")
			.arg(Arg::with_name("target").long("target").takes_value(true).help("Command to execute as the bot process"))
			.arg(
				Arg::with_name("max-runtime-seconds")
					.long("max-runtime-seconds")
					.takes_value(true)
					.help("Maximum runner lifetime before graceful stop (0 disables)"),
			)
			.arg(
				Arg::with_name("restart-delay-seconds")
					.long("restart-delay-seconds")
					.takes_value(true)
					.help("Initial restart delay after a child failure"),
			)
			.arg(
				Arg::with_name("max-backoff-seconds")
					.long("max-backoff-seconds")
					.takes_value(true)
					.help("Maximum exponential backoff between restarts"),
			)
			.arg(
				Arg::with_name("min-uptime-seconds")
					.long("min-uptime-seconds")
					.takes_value(true)
					.help("Child uptime threshold for quick-failure detection"),
			)
			.arg(
				Arg::with_name("max-quick-failures")
					.long("max-quick-failures")
					.takes_value(true)
					.help("Abort after this many consecutive quick failures"),
			)
			.arg(Arg::with_name("log-level").long("log-level").takes_value(true).help("Runner log level"))
			.get_matches();

		let log_level = match matches.value_of("log-level").unwrap_or("info").to_ascii_lowercase().as_str() {
			"trace" => log::LevelFilter::Trace,
			"debug" => log::LevelFilter::Debug,
			"warn" => log::LevelFilter::Warn,
			"error" => log::LevelFilter::Error,
			_ => log::LevelFilter::Info,
		};

		CliOpts {
			target: matches.value_of("target").unwrap_or("dmw-bot").to_string(),
			max_runtime_seconds: u64_arg(&matches, "max-runtime-seconds", 21_420),
			restart_delay_seconds: u64_arg(&matches, "restart-delay-seconds", 5).max(1),
			max_backoff_seconds: u64_arg(&matches, "max-backoff-seconds", 120).max(1),
			min_uptime_seconds: u64_arg(&matches, "min-uptime-seconds", 20).max(1),
			max_quick_failures: u64_arg(&matches, "max-quick-failures", 6) as u32,
			log_level,
		}
	}
}
