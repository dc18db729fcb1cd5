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

//! The supervisor state machine (§4.G).
//!
//! Owns every piece of mutable supervisor state and is the sole consumer
//! of the event queue. Nothing else in this crate touches `hbFails`,
//! `sleepFails`, the recovery ladder, or the heartbeat socket directly.

pub mod ladder;

use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use crate::child;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{Event, EventKind, EventQueue, EventSender};
use crate::flag::ErrorFlag;
use crate::heartbeat::{HeartbeatClient, Reading};
use crate::reboot;
use crate::signals;
use crate::{dialback, daemon};

use self::ladder::{LadderAction, RecoveryLadder};

const MAX_FAILS: u32 = 50;
const HANG_CHECK_INTERVAL: Duration = Duration::from_secs(300);
const INITIAL_SLEEP_FAILS: u64 = 5;
const MAX_SLEEP_FAILS: u64 = 300;
const SLEEP_FAILS_STEP: u64 = 5;
const VERIFY_SCRIPT: &str = "/builds/sut_tools/verify.py";
const GENERIC_VERIFY_FAILURE_REASON: &str =
    "Remote Device Error: verify did not complete without errors.";

pub struct Supervisor {
    config: Config,
    flag: ErrorFlag,
    events: EventQueue,
    event_tx: EventSender,
    heartbeat: HeartbeatClient,
    ladder: RecoveryLadder,

    device_active: bool,
    bb_active: bool,
    hb_fails: u32,
    sleep_fails: u64,
    last_hang_check: Instant,
    last_named_event: Option<EventKind>,

    // Kept alive for the duration of the run; dropping it closes the
    // listening socket.
    _dialback_listener: std::net::TcpListener,
}

impl Supervisor {
    pub fn new(config: Config) -> Result<Supervisor> {
        let flag = ErrorFlag::new(config.bbpath.join("error.flg"));
        let (event_tx, events) = EventQueue::new();
        let heartbeat = HeartbeatClient::new(config.data_addr());

        let listener = dialback::spawn(config.dialback_port, event_tx.clone())
            .map_err(|e| Error::Io(std::path::PathBuf::from("dialback listener"), e))?;

        Ok(Supervisor {
            config,
            flag,
            events,
            event_tx,
            heartbeat,
            ladder: RecoveryLadder::new(),
            device_active: false,
            bb_active: false,
            hb_fails: 0,
            sleep_fails: INITIAL_SLEEP_FAILS,
            last_hang_check: Instant::now(),
            last_named_event: None,
            _dialback_listener: listener,
        })
    }

    /// Runs the main loop until a `terminate` event is drained.
    pub fn run(&mut self) -> Result<()> {
        log::info!(
            "monitoring started for device {} at {} (pid {})",
            self.config.device,
            self.config.device_ip,
            std::process::id()
        );

        loop {
            if signals::check_for_termination() {
                self.event_tx.post(Event::Terminate);
            }

            self.reconnect_heartbeat();

            let event = self.events.try_pop();
            let event = self.poll_heartbeat_if_idle(event);

            if let Some(event) = event {
                let kind = event.kind();
                log::debug!(
                    "event {:?} hbFails {}/{}",
                    kind,
                    self.hb_fails,
                    MAX_FAILS
                );
                self.dispatch(event)?;
                self.last_named_event = Some(kind);
                if kind == EventKind::Terminate {
                    break;
                }
            }

            self.tail_checks();
        }

        log::info!("monitor stopped");
        Ok(())
    }

    fn reconnect_heartbeat(&mut self) {
        if self.heartbeat.is_connected() {
            return;
        }
        if self.heartbeat.connect().is_err() {
            self.hb_fails += 1;
            log::info!(
                "error connecting to data port - sleeping for {} seconds",
                self.sleep_fails
            );
            thread::sleep(Duration::from_secs(self.sleep_fails));
        }
    }

    /// If no event is already pending, performs one bounded heartbeat
    /// `recv` and turns the classification into a freshly posted event
    /// (mirroring §4.D: the classification is queued, not acted on
    /// within the same tick).
    fn poll_heartbeat_if_idle(&mut self, event: Option<Event>) -> Option<Event> {
        if event.is_some() || !self.heartbeat.is_connected() {
            return event;
        }
        match self.heartbeat.recv() {
            Reading::Active => {
                self.hb_fails = 0;
                self.event_tx.post(Event::Active);
            }
            Reading::Reboot => {
                self.event_tx.post(Event::Reboot);
            }
            Reading::Failure => {
                self.hb_fails += 1;
            }
        }
        None
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Reboot => {
                self.device_active = false;
            }
            Event::Stop => {
                self.stop_child();
            }
            Event::Offline => {
                self.stop_child();
                self.heartbeat.close();
            }
            Event::Active => {
                self.device_active = true;
                self.advance_or_verify();
            }
            Event::Dialback(ip) => {
                log::info!("dialback from {}", ip);
                self.device_active = true;
                self.ladder.reset();
                self.advance_or_verify();
            }
            Event::Verify => {
                if matches!(
                    self.last_named_event,
                    Some(EventKind::Verify) | Some(EventKind::Start)
                ) {
                    log::debug!("verify re-entered immediately, skipping");
                } else {
                    self.run_verify();
                }
            }
            Event::Start => {
                self.start_child();
            }
            Event::Terminate => {
                self.stop_child();
            }
        }
        Ok(())
    }

    /// Shared tail of `active`/`dialback` handling: advance the soft/hard
    /// ladder if the device is in error, otherwise kick off verification.
    fn advance_or_verify(&mut self) {
        if self.bb_active {
            return;
        }
        if self.flag.is_set() {
            log::warn!(
                "device active but error flag set [{}/{}]",
                self.ladder.soft_count,
                self.ladder.soft_resets
            );
            match self.ladder.advance() {
                LadderAction::Continue => {}
                LadderAction::ClearFlag => {
                    log::warn!("removing error flag to see if device comes back");
                    if let Err(e) = self.flag.clear() {
                        log::warn!("failed to clear error flag: {}", e);
                    }
                }
                LadderAction::SendReboot => {
                    log::warn!("hard reset threshold hit [{} hard resets]", self.ladder.hard_resets);
                    reboot::send_reboot(self.config.data_addr());
                }
                LadderAction::GiveUp => {
                    self.event_tx.post(Event::Offline);
                }
            }
        } else {
            self.event_tx.post(Event::Verify);
        }
    }

    fn run_verify(&mut self) {
        log::info!("running verify code");
        let result = Command::new("python")
            .arg(VERIFY_SCRIPT)
            .arg(&self.config.device)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("HOME", std::env::var("HOME").unwrap_or_default())
            .env("SUT_NAME", &self.config.device)
            .env("SUT_IP", self.config.device_ip.to_string())
            .output();

        match result {
            Ok(output) if output.status.success() => {
                for line in String::from_utf8_lossy(&output.stdout).lines() {
                    log::debug!("verify: {}", line);
                }
                log::info!("verify has run without issues");
                self.event_tx.post(Event::Start);
            }
            Ok(output) => {
                for line in String::from_utf8_lossy(&output.stderr).lines() {
                    log::warn!("verify: {}", line);
                }
                log::warn!("verify returned with errors");
                self.flag_verify_failure_if_unflagged();
            }
            Err(e) => {
                log::warn!("{}", Error::VerifySpawn(e));
                self.flag_verify_failure_if_unflagged();
            }
        }
    }

    fn flag_verify_failure_if_unflagged(&mut self) {
        if !self.flag.is_set() {
            log::warn!("verify did not set the error flag as expected, setting a generic one");
            if let Err(e) = self.flag.set(GENERIC_VERIFY_FAILURE_REASON) {
                log::error!("failed to set error flag: {}", e);
            }
        }
    }

    fn start_child(&mut self) {
        if !(self.device_active && !self.bb_active) {
            // Precondition unmet; matches §8's idempotence requirement.
            return;
        }
        log::debug!("starting build-agent in {}", self.config.bbpath.display());
        match child::start(
            &self.config.bbpath,
            &self.config.device,
            &self.config.device_ip.to_string(),
        ) {
            Ok(true) => {
                log::debug!("pidfile found, setting bbActive to true");
                self.bb_active = true;
            }
            Ok(false) => {
                self.bb_active = false;
            }
            Err(e) => {
                log::error!("failed to start build-agent: {}", e);
            }
        }
    }

    fn stop_child(&mut self) {
        child::stop(&self.config.bbpath);
        self.bb_active = false;
    }

    fn tail_checks(&mut self) {
        if self.hb_fails > MAX_FAILS {
            self.hb_fails = 0;
            self.sleep_fails = (self.sleep_fails + SLEEP_FAILS_STEP).min(MAX_SLEEP_FAILS);
            self.event_tx.post(Event::Offline);
            self.heartbeat.close();
        }

        log::debug!(
            "bbActive {} deviceActive {}",
            self.bb_active,
            self.device_active
        );

        if self.flag.is_set() && self.bb_active {
            log::error!("errorFile detected - sending stop request");
            self.event_tx.post(Event::Stop);
        }

        let pidfile = child::pid_file_path(&self.config.bbpath);
        if self.bb_active {
            if pidfile.is_file() {
                if !child::is_alive(&self.config.bbpath) {
                    log::warn!("build-agent should be active but pid is not alive");
                    self.maybe_check_for_hang();
                }
            } else {
                log::warn!("build-agent should be active but pidfile not found, marking as offline");
                self.event_tx.post(Event::Offline);
            }
        } else if pidfile.is_file() {
            if child::is_alive(&self.config.bbpath) {
                log::error!("build-agent should NOT be active but pidfile found, stopping it");
                self.event_tx.post(Event::Stop);
            } else {
                log::warn!("build-agent not active but pidfile found, removing pidfile");
                if let Err(e) = std::fs::remove_file(&pidfile) {
                    log::debug!("error removing stale pidfile, continuing: {}", e);
                }
            }
        }
    }

    fn maybe_check_for_hang(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_hang_check) <= HANG_CHECK_INTERVAL {
            return;
        }
        self.last_hang_check = now;
        let idle = child::last_activity(&self.config.bbpath);
        if idle > Duration::from_secs(self.config.hangtime) {
            log::error!(
                "last activity was {:?} ago - marking as hung build-agent",
                idle
            );
            self.event_tx.post(Event::Offline);
        }
    }
}

/// Entry point used by `main`: builds the supervisor, writes its own
/// pid-file when daemonized, runs until termination, and cleans up
/// either way.
pub fn run(config: Config) -> Result<()> {
    let background = config.background;
    let pidfile = config.supervisor_pid_file();
    if background {
        daemon::write_pid_file(&pidfile)?;
    }

    let result = Supervisor::new(config).and_then(|mut sup| sup.run());

    if background {
        daemon::remove_pid_file(&pidfile);
    }
    result
}
