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

mod cli_opts;
mod runner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::cli_opts::CliOpts;
use crate::runner::BotRunner;

fn init_logger(level: log::LevelFilter) -> Result<()> {
	fern::Dispatch::new()
		.level(level)
		.format(move |out, message, record| {
			out.finish(format_args!(
				"[{}] {} [dmw-runner] {}",
				chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
				record.level(),
				message,
			))
		})
		.chain(std::io::stdout())
		.apply()?;
	Ok(())
}

pub fn main() -> Result<()> {
	let opts = CliOpts::parse();
	init_logger(opts.log_level)?;

	let stop_requested = Arc::new(AtomicBool::new(false));
	let handler_flag = Arc::clone(&stop_requested);
	ctrlc::set_handler(move || {
		handler_flag.store(true, Ordering::SeqCst);
	})
	.expect("Error setting Ctrl-C handler");

	let mut runner = BotRunner::new(opts, stop_requested);
	std::process::exit(runner.run());
}
