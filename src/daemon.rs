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

//! Daemonization and the supervisor pid-file (§10.E).
//!
//! Forking and signal handlers that mutate shared queues are a
//! portability trap; this module keeps the trap contained to one place
//! and exposes two plain functions the rest of the crate can treat as
//! opaque: [`daemonize`] and [`stop`].

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::config::SUPERVISOR_PID_FILE_NAME;
use crate::error::{Error, Result};

/// Double-forks and detaches from the controlling terminal, in the style
/// of a classic Unix daemon. Only called when `--background` is given.
/// Must run before any other thread exists in the process.
#[cfg(unix)]
pub fn daemonize() {
    unsafe {
        match libc::fork() {
            n if n < 0 => {
                eprintln!("failed to fork from parent");
                std::process::exit(1);
            }
            0 => {}
            _ => std::process::exit(0),
        }

        libc::setsid();

        match libc::fork() {
            n if n < 0 => {
                eprintln!("failed to fork from parent #2");
                std::process::exit(1);
            }
            0 => {}
            _ => std::process::exit(0),
        }

        let dev_null_read = std::ffi::CString::new("/dev/null").unwrap();
        let fd = libc::open(dev_null_read.as_ptr(), libc::O_RDWR);
        if fd >= 0 {
            libc::dup2(fd, libc::STDIN_FILENO);
            libc::dup2(fd, libc::STDOUT_FILENO);
            libc::dup2(fd, libc::STDERR_FILENO);
        }
    }
}

/// Writes our own pid to `<pidpath>/device-supervisor.pid`.
pub fn write_pid_file(path: &Path) -> Result<()> {
    let mut f = fs::File::create(path).map_err(|e| Error::Io(path.to_path_buf(), e))?;
    write!(f, "{}", std::process::id()).map_err(|e| Error::Io(path.to_path_buf(), e))?;
    Ok(())
}

/// Removes our own pid-file. Never fails loudly; called on every
/// termination path, including after a partially-failed startup.
pub fn remove_pid_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::debug!("error removing supervisor pidfile: {}", e),
    }
}

/// Implements the bare `stop` subcommand: read the pid out of the
/// supervisor pid-file at `pidpath` and send it `SIGTERM`.
pub fn stop(pidpath: &Path) -> Result<()> {
    let pidfile = pidpath.join(SUPERVISOR_PID_FILE_NAME);
    let contents =
        fs::read_to_string(&pidfile).map_err(|e| Error::Io(pidfile.clone(), e))?;
    let pid: libc::pid_t = contents
        .trim()
        .parse()
        .map_err(|_| Error::PidFileCorrupt(pidfile.clone()))?;
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_remove_pid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device-supervisor.pid");
        write_pid_file(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{}", std::process::id()));

        remove_pid_file(&path);
        assert!(!path.exists());
    }

    #[test]
    fn remove_pid_file_on_missing_file_is_a_no_op() {
        let dir = tempdir().unwrap();
        remove_pid_file(&dir.path().join("does-not-exist.pid"));
    }

    #[test]
    fn stop_with_corrupt_pid_file_reports_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("device-supervisor.pid"), "not-a-pid").unwrap();
        assert!(stop(dir.path()).is_err());
    }
}
