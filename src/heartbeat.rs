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

//! The heartbeat client (§4.D).
//!
//! Maintains at most one TCP connection to the device's data port and
//! classifies inbound bytes into `active`/`reboot` outcomes. Owned
//! entirely by the state machine thread; no locking needed.

use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

const RECV_TIMEOUT: Duration = Duration::from_secs(120);
const REBOOT_MARKER: &str = "ebooting ...";
const READ_BUF_LEN: usize = 4096;

#[derive(Debug, PartialEq, Eq)]
pub enum Reading {
    Active,
    Reboot,
    /// Empty read, socket error, or a single stray byte.
    Failure,
}

/// Classifies a single inbound payload per §8's reboot-substring-exactness
/// property: `Reboot` iff the payload contains `ebooting ...`; else
/// `Active` iff `len > 1`; else `Failure`.
pub fn classify(buf: &[u8]) -> Reading {
    if buf.is_empty() {
        return Reading::Failure;
    }
    if contains_subslice(buf, REBOOT_MARKER.as_bytes()) {
        return Reading::Reboot;
    }
    if buf.len() > 1 {
        Reading::Active
    } else {
        Reading::Failure
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

pub struct HeartbeatClient {
    addr: SocketAddr,
    stream: Option<TcpStream>,
}

impl HeartbeatClient {
    pub fn new(addr: SocketAddr) -> Self {
        HeartbeatClient { addr, stream: None }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Attempts to establish the connection. Idempotent: a no-op if
    /// already connected.
    pub fn connect(&mut self) -> std::io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect_timeout(&self.addr, RECV_TIMEOUT)?;
        stream.set_read_timeout(Some(RECV_TIMEOUT))?;
        self.stream = Some(stream);
        Ok(())
    }

    pub fn close(&mut self) {
        self.stream = None;
    }

    /// Performs one bounded `recv` on the open connection, classifying
    /// the result. A `Failure` outcome drops the connection so the next
    /// iteration reconnects.
    pub fn recv(&mut self) -> Reading {
        let reading = match self.stream.as_mut() {
            Some(stream) => {
                let mut buf = [0u8; READ_BUF_LEN];
                match stream.read(&mut buf) {
                    Ok(n) => classify(&buf[..n]),
                    Err(_) => Reading::Failure,
                }
            }
            None => Reading::Failure,
        };
        match reading {
            Reading::Reboot | Reading::Failure => self.close(),
            Reading::Active => {}
        }
        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_reboot_substring_exactness() {
        assert_eq!(classify(b"device is rebooting ... now"), Reading::Reboot);
        assert_eq!(classify(b"rebooting ..."), Reading::Reboot);
    }

    #[test]
    fn classify_active_for_ordinary_multi_byte_payload() {
        assert_eq!(classify(b"ok"), Reading::Active);
        assert_eq!(classify(b"heartbeat-pulse"), Reading::Active);
    }

    #[test]
    fn classify_failure_for_empty_or_single_byte() {
        assert_eq!(classify(b""), Reading::Failure);
        assert_eq!(classify(b"a"), Reading::Failure);
    }

    #[test]
    fn classify_does_not_false_positive_on_partial_marker() {
        assert_eq!(classify(b"ebooting"), Reading::Active);
        assert_eq!(classify(b"ebooting .."), Reading::Active);
    }

    #[test]
    fn new_client_starts_disconnected() {
        let client = HeartbeatClient::new("127.0.0.1:0".parse().unwrap());
        assert!(!client.is_connected());
    }
}
