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

//! The dialback listener (§4.C).
//!
//! A TCP server the device connects to, unsolicited, to announce that it
//! has booted and is ready. Runs on its own thread so it can block on
//! `accept`/`read` without ever stalling the state machine.

use std::io::{Read, Write};
use std::net::{IpAddr, TcpListener, TcpStream};
use std::thread;

use crate::events::{Event, EventSender};

const REGISTER_PREFIX: &[u8] = b"register ";
const READ_BUF_LEN: usize = 1024;

/// Binds `0.0.0.0:<port>` and spawns the accept loop on a dedicated
/// thread. Returns the bound listener so the caller can `shutdown` it (by
/// dropping it / closing the socket) during termination.
pub fn spawn(port: u16, events: EventSender) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    // A cloned handle for the accept thread; the original is returned to
    // the caller so termination can close the listening socket.
    let accept_handle = listener.try_clone()?;
    log::info!("dialback listener bound to 0.0.0.0:{}", port);

    thread::Builder::new()
        .name("dialback".to_string())
        .spawn(move || accept_loop(accept_handle, events))
        .expect("unable to start dialback thread");

    Ok(listener)
}

fn accept_loop(listener: TcpListener, events: EventSender) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let events = events.clone();
                thread::Builder::new()
                    .name("dialback-conn".to_string())
                    .spawn(move || handle_connection(stream, events))
                    .ok();
            }
            Err(err) => {
                // A closed listener (during shutdown) surfaces here too;
                // there's nothing more to accept once that happens.
                log::debug!("dialback accept loop ending: {}", err);
                break;
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, events: EventSender) {
    let peer_ip = match stream.peer_addr() {
        Ok(addr) => addr.ip(),
        Err(err) => {
            log::debug!("dialback connection with no peer address: {}", err);
            return;
        }
    };

    let mut buf = [0u8; READ_BUF_LEN];
    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(err) => {
            log::debug!("dialback read error from {}: {}", peer_ip, err);
            return;
        }
    };

    if n >= REGISTER_PREFIX.len() && &buf[..REGISTER_PREFIX.len()] == REGISTER_PREFIX {
        if stream.write_all(b"OK\n").is_err() {
            log::debug!("failed to ack dialback from {}", peer_ip);
        }
        log::info!("dialback registration from {}", peer_ip);
        emit_dialback(&events, peer_ip);
    } else {
        log::debug!("ignoring non-register dialback payload from {}", peer_ip);
    }
}

fn emit_dialback(events: &EventSender, ip: IpAddr) {
    events.post(Event::Dialback(ip));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventQueue;
    use std::net::TcpStream as ClientStream;
    use std::time::Duration;

    #[test]
    fn register_message_gets_ok_and_emits_dialback() {
        let (tx, rx) = EventQueue::new();
        let listener = spawn(0, tx).expect("bind");
        let addr = listener.local_addr().unwrap();

        let mut client = ClientStream::connect(addr).expect("connect");
        client.write_all(b"register anything").unwrap();

        let mut resp = [0u8; 3];
        client.read_exact(&mut resp).unwrap();
        assert_eq!(&resp, b"OK\n");

        let event = wait_for_event(&rx);
        match event {
            Event::Dialback(_) => {}
            other => panic!("expected Dialback, got {:?}", other),
        }
    }

    #[test]
    fn non_register_message_is_ignored() {
        let (tx, rx) = EventQueue::new();
        let listener = spawn(0, tx).expect("bind");
        let addr = listener.local_addr().unwrap();

        let mut client = ClientStream::connect(addr).expect("connect");
        client.write_all(b"hello there").unwrap();
        drop(client);

        thread::sleep(Duration::from_millis(200));
        assert_eq!(rx.try_pop(), None);
    }

    fn wait_for_event(rx: &EventQueue) -> Event {
        for _ in 0..50 {
            if let Some(event) = rx.try_pop() {
                return event;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("timed out waiting for event");
    }
}
