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

//! The event queue (§4.F).
//!
//! A thread-safe FIFO of tagged [`Event`]s. Producers are the dialback
//! listener, the heartbeat client, and the state machine itself
//! (self-posting `verify`/`start`/`offline`/`stop`). The state machine is
//! the sole consumer and always drains non-blockingly.

use std::net::IpAddr;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Dialback(IpAddr),
    Active,
    Reboot,
    Stop,
    Offline,
    Verify,
    Start,
    Terminate,
}

/// A cheap, shallow tag used to collapse immediate re-entrancy of
/// `verify`/`start` (see `lastNamedEvent` in the state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Dialback,
    Active,
    Reboot,
    Stop,
    Offline,
    Verify,
    Start,
    Terminate,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match *self {
            Event::Dialback(_) => EventKind::Dialback,
            Event::Active => EventKind::Active,
            Event::Reboot => EventKind::Reboot,
            Event::Stop => EventKind::Stop,
            Event::Offline => EventKind::Offline,
            Event::Verify => EventKind::Verify,
            Event::Start => EventKind::Start,
            Event::Terminate => EventKind::Terminate,
        }
    }
}

/// The producer handle. Cheap to clone; one is handed to every thread
/// that needs to post events.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    /// Posts an event. The only failure mode is the consumer having been
    /// dropped, which only happens after the supervisor has already
    /// exited, so we log and move on rather than panicking a background
    /// thread.
    pub fn post(&self, event: Event) {
        if self.tx.send(event).is_err() {
            log::debug!("event queue consumer gone, dropping event");
        }
    }
}

/// The consumer half, owned exclusively by the state machine.
pub struct EventQueue {
    rx: Receiver<Event>,
}

impl EventQueue {
    pub fn new() -> (EventSender, EventQueue) {
        let (tx, rx) = channel();
        (EventSender { tx }, EventQueue { rx })
    }

    /// Non-blocking pop. Returns `None` when the queue is currently
    /// empty; never blocks the state machine.
    pub fn try_pop(&self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let (tx, rx) = EventQueue::new();
        tx.post(Event::Active);
        tx.post(Event::Verify);
        tx.post(Event::Start);

        assert_eq!(rx.try_pop(), Some(Event::Active));
        assert_eq!(rx.try_pop(), Some(Event::Verify));
        assert_eq!(rx.try_pop(), Some(Event::Start));
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn try_pop_on_empty_queue_does_not_block() {
        let (_tx, rx) = EventQueue::new();
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn duplicate_events_are_tolerated() {
        let (tx, rx) = EventQueue::new();
        tx.post(Event::Offline);
        tx.post(Event::Offline);
        assert_eq!(rx.try_pop(), Some(Event::Offline));
        assert_eq!(rx.try_pop(), Some(Event::Offline));
        assert_eq!(rx.try_pop(), None);
    }
}
