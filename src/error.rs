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

//! Crate-wide error type.
//!
//! Every fallible operation in this crate returns [`Result`]. Recoverable
//! conditions (a dropped heartbeat connection, a missing pid-file) are
//! turned into `Event`s by the caller rather than propagated as `Error`;
//! this type exists for conditions a caller has no reasonable way to
//! absorb into the event loop.

use std::fmt;
use std::io;
use std::net::AddrParseError;
use std::path::PathBuf;
use std::result;

#[derive(Debug)]
pub enum Error {
    /// The local machine's IP address could not be determined.
    NoLocalIp,
    /// No device name was given and none could be inferred from the cwd.
    NoDevice,
    /// The device's IP address could not be resolved via DNS.
    DeviceLookup(String),
    /// A pid-file existed but its contents were not a valid pid.
    PidFileCorrupt(PathBuf),
    /// Failed to spawn the build-agent child process.
    ChildSpawn(io::Error),
    /// Failed to spawn the verification subprocess.
    VerifySpawn(io::Error),
    /// Generic I/O failure manipulating a file this crate owns.
    Io(PathBuf, io::Error),
    AddrParse(AddrParseError),
}

pub type Result<T> = result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::NoLocalIp => write!(f, "could not determine our own IP address"),
            Error::NoDevice => write!(
                f,
                "no device name given, and none could be inferred from the current directory"
            ),
            Error::DeviceLookup(ref name) => {
                write!(f, "could not resolve IP address for device '{}'", name)
            }
            Error::PidFileCorrupt(ref path) => {
                write!(f, "pid file {} did not contain a valid pid", path.display())
            }
            Error::ChildSpawn(ref err) => write!(f, "failed to spawn build-agent: {}", err),
            Error::VerifySpawn(ref err) => write!(f, "failed to spawn verify: {}", err),
            Error::Io(ref path, ref err) => write!(f, "I/O error on {}: {}", path.display(), err),
            Error::AddrParse(ref err) => write!(f, "invalid address: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Error {
        Error::AddrParse(err)
    }
}
