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

//! The child-process controller (§4.B).
//!
//! Starts, stops, and observes liveness of the local build-agent. The
//! build-agent is tracked entirely through its pid-file: we never hold a
//! `std::process::Child` across ticks, because the supervisor itself may
//! be restarted while the build-agent keeps running underneath it.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};

const PID_FILE_NAME: &str = "twistd.pid";
const ACTIVITY_LOG_NAME: &str = "twistd.log";
/// How many times `start` polls for the pid-file to appear.
const START_POLL_ATTEMPTS: u32 = 20;
/// Delay between pid-file polls.
const START_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub fn pid_file_path(rundir: &Path) -> PathBuf {
    rundir.join(PID_FILE_NAME)
}

fn activity_log_path(rundir: &Path) -> PathBuf {
    rundir.join(ACTIVITY_LOG_NAME)
}

/// Spawns the build-agent, then polls for its pid-file to appear.
///
/// Returns `Ok(true)` once the pid-file is observed, `Ok(false)` if it
/// never appears within the poll window (not treated as a hard failure;
/// see the open question in the design notes). Only a failure to spawn
/// the child at all is an `Err`.
pub fn start(rundir: &Path, device_name: &str, device_ip: &str) -> Result<bool> {
    let pidfile = pid_file_path(rundir);
    let mut env: HashMap<String, String> = HashMap::new();
    if let Ok(path) = std::env::var("PATH") {
        env.insert("PATH".to_string(), path);
    }
    if let Ok(home) = std::env::var("HOME") {
        env.insert("HOME".to_string(), home);
    }
    env.insert("SUT_NAME".to_string(), device_name.to_string());
    env.insert("SUT_IP".to_string(), device_ip.to_string());

    let mut cmd = Command::new("twistd");
    cmd.arg("--no_save")
        .arg(format!("--rundir={}", rundir.display()))
        .arg(format!("--pidfile={}", pidfile.display()))
        .arg(format!(
            "--python={}",
            rundir.join("buildbot.tac").display()
        ))
        .env_clear()
        .envs(&env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .current_dir(rundir);

    let mut child = cmd.spawn().map_err(Error::ChildSpawn)?;

    for attempt in 1..=START_POLL_ATTEMPTS {
        if pidfile.is_file() {
            log::debug!("pidfile found on attempt {}, build-agent is up", attempt);
            return Ok(true);
        }
        std::thread::sleep(START_POLL_INTERVAL);
    }

    log::warn!(
        "no build-agent pidfile found after {} attempts, as expected in some cold-start races",
        START_POLL_ATTEMPTS
    );
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines().flatten() {
            log::info!("build-agent stdout: {}", line);
        }
    }
    if let Some(stderr) = child.stderr.take() {
        for line in BufReader::new(stderr).lines().flatten() {
            log::warn!("build-agent stderr: {}", line);
        }
    }
    Ok(false)
}

/// True when the pid-file names a process that is currently alive.
pub fn is_alive(rundir: &Path) -> bool {
    let pidfile = pid_file_path(rundir);
    match read_pid(&pidfile) {
        Ok(pid) => process_alive(pid),
        Err(_) => false,
    }
}

/// Duration since the build-agent last showed external signs of life
/// (the mtime of its activity log). Used only for hang detection.
pub fn last_activity(rundir: &Path) -> Duration {
    let log_path = activity_log_path(rundir);
    match fs::metadata(&log_path).and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default(),
        Err(_) => Duration::from_secs(0),
    }
}

/// Signals the build-agent to terminate and waits for its pid-file to
/// disappear.
pub fn stop(rundir: &Path) {
    let pidfile = pid_file_path(rundir);
    if let Ok(pid) = read_pid(&pidfile) {
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        for _ in 0..20 {
            if !pidfile.is_file() {
                break;
            }
            std::thread::sleep(Duration::from_millis(500));
        }
    }
    match fs::remove_file(&pidfile) {
        Ok(()) => log::debug!("removed build-agent pidfile"),
        Err(e) => log::debug!("error removing build-agent pidfile, continuing: {}", e),
    }
}

fn read_pid(pidfile: &Path) -> Result<libc::pid_t> {
    let contents =
        fs::read_to_string(pidfile).map_err(|e| Error::Io(pidfile.to_path_buf(), e))?;
    contents
        .trim()
        .parse::<libc::pid_t>()
        .map_err(|_| Error::PidFileCorrupt(pidfile.to_path_buf()))
}

#[cfg(unix)]
fn process_alive(pid: libc::pid_t) -> bool {
    // kill(pid, 0) performs no signal delivery, only existence/permission
    // checks.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn is_alive_false_when_no_pidfile() {
        let dir = tempdir().unwrap();
        assert!(!is_alive(dir.path()));
    }

    #[test]
    fn is_alive_true_for_our_own_pid() {
        let dir = tempdir().unwrap();
        fs::write(pid_file_path(dir.path()), format!("{}", std::process::id())).unwrap();
        assert!(is_alive(dir.path()));
    }

    #[test]
    fn is_alive_false_for_corrupt_pidfile() {
        let dir = tempdir().unwrap();
        fs::write(pid_file_path(dir.path()), "not-a-pid").unwrap();
        assert!(!is_alive(dir.path()));
    }

    #[test]
    fn last_activity_zero_when_log_missing() {
        let dir = tempdir().unwrap();
        assert_eq!(last_activity(dir.path()), Duration::from_secs(0));
    }

    #[test]
    fn last_activity_reflects_log_mtime() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(ACTIVITY_LOG_NAME), b"hello").unwrap();
        let activity = last_activity(dir.path());
        assert!(activity < Duration::from_secs(5));
    }
}
