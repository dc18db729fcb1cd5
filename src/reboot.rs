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

//! The reboot sender (§4.E).
//!
//! Fire-and-forget: opens a fresh connection to the device's data port,
//! asks it to reboot, and discards whatever comes back. Used only by the
//! hard-reset rung of the recovery ladder; errors are logged, never
//! raised, since there is no successor action to take if this fails.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

const REBOOT_TIMEOUT: Duration = Duration::from_secs(120);
const REBOOT_COMMAND: &[u8] = b"rebt\n";
const DRAIN_BUF_LEN: usize = 4096;

pub fn send_reboot(addr: SocketAddr) {
    log::warn!("sending rebt to device at {}", addr);
    if let Err(err) = try_send_reboot(addr) {
        log::debug!("error sending reboot to {}: {}", addr, err);
    }
}

fn try_send_reboot(addr: SocketAddr) -> std::io::Result<()> {
    let mut stream = TcpStream::connect_timeout(&addr, REBOOT_TIMEOUT)?;
    stream.set_read_timeout(Some(REBOOT_TIMEOUT))?;
    stream.set_write_timeout(Some(REBOOT_TIMEOUT))?;
    stream.write_all(REBOOT_COMMAND)?;
    let mut buf = [0u8; DRAIN_BUF_LEN];
    // Best-effort drain; a timeout or early EOF here is not an error from
    // the caller's point of view.
    let _ = stream.read(&mut buf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn writes_rebt_and_drains_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, REBOOT_COMMAND);
        });

        send_reboot(addr);
        server.join().unwrap();
    }
}
