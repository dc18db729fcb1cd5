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

//! The soft/hard recovery ladder (§4.G).
//!
//! Pulled out of the state machine proper because its counter arithmetic
//! is the part of this crate most worth testing in isolation: it's easy
//! to get the "escalate, but only after N tries" logic subtly wrong.

const SOFT_COUNT_MAX: u32 = 5;
const SOFT_RESET_MAX: u32 = 5;
const HARD_RESETS_MAX: u32 = 3;

#[derive(Debug, Default)]
pub struct RecoveryLadder {
    pub soft_count: u32,
    pub soft_resets: u32,
    pub hard_resets: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LadderAction {
    /// Still counting up to the next soft-reset attempt.
    Continue,
    /// Clear the error flag and hope the device recovers on its own.
    ClearFlag,
    /// Send the device a hard reboot command.
    SendReboot,
    /// Exhausted every rung; post `offline` for out-of-band intervention.
    GiveUp,
}

impl RecoveryLadder {
    pub fn new() -> Self {
        RecoveryLadder::default()
    }

    /// Zeroes every counter. Only a `dialback` event is allowed to call
    /// this (§3 invariant 5).
    pub fn reset(&mut self) {
        self.soft_count = 0;
        self.soft_resets = 0;
        self.hard_resets = 0;
    }

    pub fn is_reset(&self) -> bool {
        self.soft_count == 0 && self.soft_resets == 0 && self.hard_resets == 0
    }

    /// One `active` tick while the error flag is set and the build-agent
    /// is down.
    pub fn advance(&mut self) -> LadderAction {
        self.soft_count += 1;
        if self.soft_count <= SOFT_COUNT_MAX {
            return LadderAction::Continue;
        }

        self.soft_count = 0;
        if self.soft_resets < SOFT_RESET_MAX {
            self.soft_resets += 1;
            LadderAction::ClearFlag
        } else {
            self.hard_resets += 1;
            if self.hard_resets < HARD_RESETS_MAX {
                LadderAction::SendReboot
            } else {
                LadderAction::GiveUp
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_actives_triggers_first_soft_reset() {
        let mut ladder = RecoveryLadder::new();
        for _ in 0..5 {
            assert_eq!(ladder.advance(), LadderAction::Continue);
        }
        assert_eq!(ladder.advance(), LadderAction::ClearFlag);
        assert_eq!(ladder.soft_resets, 1);
        assert_eq!(ladder.soft_count, 0);
    }

    #[test]
    fn escalates_to_hard_reboot_after_five_soft_resets() {
        let mut ladder = RecoveryLadder::new();
        for _ in 0..5 {
            for _ in 0..5 {
                assert_eq!(ladder.advance(), LadderAction::Continue);
            }
            assert_eq!(ladder.advance(), LadderAction::ClearFlag);
        }
        assert_eq!(ladder.soft_resets, 5);

        for _ in 0..5 {
            assert_eq!(ladder.advance(), LadderAction::Continue);
        }
        assert_eq!(ladder.advance(), LadderAction::SendReboot);
        assert_eq!(ladder.hard_resets, 1);
    }

    #[test]
    fn gives_up_after_three_hard_resets() {
        let mut ladder = RecoveryLadder {
            soft_count: 0,
            soft_resets: SOFT_RESET_MAX,
            hard_resets: 0,
        };

        for expected_hard in 1..=2 {
            for _ in 0..5 {
                assert_eq!(ladder.advance(), LadderAction::Continue);
            }
            assert_eq!(ladder.advance(), LadderAction::SendReboot);
            assert_eq!(ladder.hard_resets, expected_hard);
        }

        for _ in 0..5 {
            assert_eq!(ladder.advance(), LadderAction::Continue);
        }
        assert_eq!(ladder.advance(), LadderAction::GiveUp);
        assert_eq!(ladder.hard_resets, 3);
    }

    #[test]
    fn reset_zeroes_every_counter() {
        let mut ladder = RecoveryLadder {
            soft_count: 3,
            soft_resets: 2,
            hard_resets: 1,
        };
        ladder.reset();
        assert!(ladder.is_reset());
    }

    #[test]
    fn counters_never_decrease_between_resets() {
        let mut ladder = RecoveryLadder::new();
        let mut last_soft_resets = 0;
        let mut last_hard_resets = 0;
        for _ in 0..40 {
            match ladder.advance() {
                LadderAction::ClearFlag | LadderAction::SendReboot | LadderAction::GiveUp => {
                    assert!(ladder.soft_resets >= last_soft_resets);
                    assert!(ladder.hard_resets >= last_hard_resets);
                    last_soft_resets = ladder.soft_resets;
                    last_hard_resets = ladder.hard_resets;
                }
                LadderAction::Continue => {}
            }
        }
    }
}
