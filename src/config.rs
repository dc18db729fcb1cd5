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

//! Typed process configuration (§10.C).
//!
//! Assembled once, at startup, from CLI flags via `clap`. Everything the
//! rest of the crate needs to run lives here as already-resolved,
//! concretely-typed fields; nothing downstream re-parses strings or
//! re-reads the environment.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::PathBuf;

use clap::{clap_app, App, ArgMatches};

use crate::error::{Error, Result};

pub const DATA_PORT: u16 = 20700;
pub const DIALBACK_BASE_PORT: u16 = 42000;
const DEFAULT_HANGTIME_SECS: u64 = 1200;

/// Shared between `Config::supervisor_pid_file` and the bare `stop`
/// subcommand, which only has a `pidpath` and no full `Config`.
pub const SUPERVISOR_PID_FILE_NAME: &str = "device-supervisor.pid";

pub struct Config {
    pub bbpath: PathBuf,
    pub device: String,
    pub device_ip: IpAddr,
    pub debug: bool,
    pub background: bool,
    pub logpath: PathBuf,
    pub pidpath: PathBuf,
    pub hangtime: u64,
    pub dialback_port: u16,
}

impl Config {
    pub fn data_addr(&self) -> SocketAddr {
        SocketAddr::new(self.device_ip, DATA_PORT)
    }

    pub fn supervisor_pid_file(&self) -> PathBuf {
        self.pidpath.join(SUPERVISOR_PID_FILE_NAME)
    }
}

/// What the user asked us to do, once CLI parsing and config resolution
/// have both happened.
pub enum Mode {
    /// Run the supervisor loop.
    Run(Box<Config>),
    /// `stop`: signal a running instance and exit; doesn't need a full
    /// `Config` since it only touches the supervisor pid-file.
    Stop { pidpath: PathBuf },
}

pub fn cli() -> App<'static, 'static> {
    clap_app!(("device-supervisor") =>
        (about: "Keeps one remote mobile test device and its build-agent alive")
        (@arg bbpath: --bbpath +takes_value
            "Parent directory where the build-agent to control is located")
        (@arg device: --device +takes_value
            "Device to manage; inferred from cwd if not given")
        (@arg device_ip: --("device-ip") +takes_value
            "IP address of the device; resolved via DNS if not given")
        (@arg debug: -d --debug "Enable debug logging")
        (@arg background: -b --background "Fork to a daemon process")
        (@arg logpath: --logpath +takes_value "Path where log file output is written")
        (@arg pidpath: --pidpath +takes_value "Path where the supervisor pid file is written")
        (@arg hangtime: --hangtime +takes_value
            "Seconds a build-agent can be idle before it's marked hung")
        (@subcommand stop =>
            (about: "Stop a running supervisor")
        )
    )
}

pub fn resolve(matches: &ArgMatches) -> Result<Mode> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    if let Some(stop_matches) = matches.subcommand_matches("stop") {
        let pidpath = stop_matches
            .value_of("pidpath")
            .or_else(|| matches.value_of("pidpath"))
            .map(PathBuf::from)
            .unwrap_or_else(|| cwd.clone());
        return Ok(Mode::Stop { pidpath });
    }

    let bbpath = matches
        .value_of("bbpath")
        .map(PathBuf::from)
        .unwrap_or_else(|| cwd.clone());
    let logpath = matches
        .value_of("logpath")
        .map(PathBuf::from)
        .unwrap_or_else(|| cwd.clone());
    let pidpath = matches
        .value_of("pidpath")
        .map(PathBuf::from)
        .unwrap_or_else(|| cwd.clone());
    let hangtime = matches
        .value_of("hangtime")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_HANGTIME_SECS);

    let device = match matches.value_of("device") {
        Some(d) => d.to_string(),
        None => infer_device_from_cwd(&cwd).ok_or(Error::NoDevice)?,
    };

    let device_ip = match matches.value_of("device_ip") {
        Some(ip) => ip.parse()?,
        None => resolve_device_ip(&device)?,
    };

    let dialback_port = DIALBACK_BASE_PORT + device_suffix(&device);

    if local_ip().is_none() {
        return Err(Error::NoLocalIp);
    }

    Ok(Mode::Run(Box::new(Config {
        bbpath,
        device,
        device_ip,
        debug: matches.is_present("debug"),
        background: matches.is_present("background"),
        logpath,
        pidpath,
        hangtime,
        dialback_port,
    })))
}

/// The device name's trailing integer, used to offset the dialback port.
/// Absent or non-numeric suffixes default to 0, matching the original
/// tool's fallback.
fn device_suffix(device: &str) -> u16 {
    device
        .rsplit('-')
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0)
}

/// Infers a device name from the current directory if it contains one of
/// the recognized device-family prefixes.
fn infer_device_from_cwd(cwd: &std::path::Path) -> Option<String> {
    let name = cwd.file_name()?.to_str()?;
    let lower = name.to_lowercase();
    if lower.contains("tegra-") || lower.contains("panda-") {
        Some(name.to_string())
    } else {
        None
    }
}

fn resolve_device_ip(device: &str) -> Result<IpAddr> {
    (device, 0u16)
        .to_socket_addrs()
        .map_err(|_| Error::DeviceLookup(device.to_string()))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::DeviceLookup(device.to_string()))
}

/// Best-effort local-IP discovery, used only to log which interface we're
/// reachable on; a UDP "connect" never actually sends a packet, it just
/// asks the kernel to pick a route.
pub fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_suffix_parses_trailing_integer() {
        assert_eq!(device_suffix("tegra-042"), 42);
        assert_eq!(device_suffix("panda-7"), 7);
    }

    #[test]
    fn device_suffix_defaults_to_zero_when_absent_or_invalid() {
        assert_eq!(device_suffix("tegra"), 0);
        assert_eq!(device_suffix("tegra-abc"), 0);
    }

    #[test]
    fn infer_device_from_cwd_matches_known_prefixes() {
        assert_eq!(
            infer_device_from_cwd(std::path::Path::new("/builds/tegra-042")),
            Some("tegra-042".to_string())
        );
        assert_eq!(
            infer_device_from_cwd(std::path::Path::new("/builds/panda-007")),
            Some("panda-007".to_string())
        );
        assert_eq!(
            infer_device_from_cwd(std::path::Path::new("/builds/unrelated")),
            None
        );
    }

    #[test]
    fn stop_subcommand_is_recognized() {
        let matches = cli().get_matches_from(vec!["device-supervisor", "stop"]);
        match resolve(&matches) {
            Ok(Mode::Stop { .. }) => {}
            _ => panic!("expected Mode::Stop"),
        }
    }
}
