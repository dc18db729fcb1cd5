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

//! Signal / lifecycle glue (§4.H).
//!
//! Maps `SIGTERM`/`SIGINT` to a graceful `terminate` event. The handler
//! itself does nothing but flip an atomic flag — no allocation, logging,
//! or queue access happens in signal context; the main loop polls
//! [`check_for_termination`] once per iteration and posts the event from
//! ordinary code.

use std::sync::atomic::{AtomicBool, Ordering};

static TERMINATE_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_term(_signum: libc::c_int) {
    TERMINATE_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs handlers for `SIGTERM` and `SIGINT`. Must be called once,
/// early in `main`, before any other thread is spawned.
pub fn init() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_term as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
    }
}

/// Polled once per main-loop iteration. Returns `true` exactly once per
/// received signal (the flag is cleared on read) so repeated calls don't
/// re-trigger termination handling.
pub fn check_for_termination() -> bool {
    TERMINATE_REQUESTED.swap(false, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_clears_after_being_read() {
        TERMINATE_REQUESTED.store(true, Ordering::SeqCst);
        assert!(check_for_termination());
        assert!(!check_for_termination());
    }
}
