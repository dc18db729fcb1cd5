// Copyright (c) 2026 Release Engineering and/or applicable contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `device-supervisor`: keeps one remote mobile test device and its
//! co-located build-agent alive.
//!
//! See `config::cli` for the supported flags and `manager::run` for the
//! main loop. Exit code is `0` on a clean `terminate`, `1` on any
//! configuration or startup failure (§6).

mod child;
mod config;
mod daemon;
mod dialback;
mod error;
mod events;
mod flag;
mod heartbeat;
mod manager;
mod reboot;
mod signals;

use std::fs;
use std::process;

fn main() {
    let matches = config::cli().get_matches();

    let mode = match config::resolve(&matches) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("device-supervisor: {}", e);
            process::exit(1);
        }
    };

    match mode {
        config::Mode::Stop { pidpath } => {
            env_logger::Builder::from_default_env().init();
            if let Err(e) = daemon::stop(&pidpath) {
                eprintln!("device-supervisor: {}", e);
                process::exit(1);
            }
        }
        config::Mode::Run(config) => run(*config),
    }
}

fn run(config: config::Config) {
    init_logging(config.debug, &config.logpath);

    signals::init();

    if config.background {
        #[cfg(unix)]
        daemon::daemonize();
    }

    log::info!(
        "device-supervisor starting for {} ({}), bbpath={}",
        config.device,
        config.device_ip,
        config.bbpath.display()
    );

    if let Err(e) = manager::run(config) {
        log::error!("fatal: {}", e);
        process::exit(1);
    }
}

/// Routes logging through `<logpath>/device-supervisor.log` rather than
/// stderr, so output survives `--background` redirecting stdio to
/// `/dev/null`. Falls back to stderr if the file can't be opened.
fn init_logging(debug: bool, logpath: &std::path::Path) {
    let mut builder = env_logger::Builder::from_default_env();
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }

    let log_file = logpath.join("device-supervisor.log");
    match fs::OpenOptions::new().create(true).append(true).open(&log_file) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(e) => {
            eprintln!(
                "device-supervisor: could not open log file {}: {} (logging to stderr)",
                log_file.display(),
                e
            );
        }
    }
    builder.init();
}
