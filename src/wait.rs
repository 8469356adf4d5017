// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Waiting on hardware.
//!
//! Every hardware wait in the storage driver is a busy-poll on a status
//! register. On the board those polls are unbounded: the controller either
//! sets the bit or the boot hangs, and there's nothing useful we could do
//! with a timeout anyway. Tests need a way out, so the poll loop is behind
//! the `Wait` trait and tests plug in `Bounded`.

/// A poll gave up before its condition came true.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimedOut;

/// Strategy for polling a hardware condition to completion.
pub trait Wait {
    /// Calls `done` until it returns `true`.
    fn until(&mut self, done: impl FnMut() -> bool) -> Result<(), TimedOut>;
}

/// Spins forever. This is what the hardware contract calls for.
#[derive(Copy, Clone, Debug, Default)]
pub struct Spin;

impl Wait for Spin {
    fn until(&mut self, mut done: impl FnMut() -> bool) -> Result<(), TimedOut> {
        while !done() {
            core::hint::spin_loop();
        }
        Ok(())
    }
}

/// Gives up after a fixed number of polls per wait.
#[derive(Copy, Clone, Debug)]
pub struct Bounded(pub u32);

impl Wait for Bounded {
    fn until(&mut self, mut done: impl FnMut() -> bool) -> Result<(), TimedOut> {
        for _ in 0..self.0 {
            if done() {
                return Ok(());
            }
        }
        Err(TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_gives_up() {
        let mut polls = 0;
        let result = Bounded(5).until(|| {
            polls += 1;
            false
        });
        assert_eq!(result, Err(TimedOut));
        assert_eq!(polls, 5);
    }

    #[test]
    fn bounded_stops_on_success() {
        let mut polls = 0;
        let result = Bounded(5).until(|| {
            polls += 1;
            polls == 3
        });
        assert_eq!(result, Ok(()));
        assert_eq!(polls, 3);
    }

    #[test]
    fn spin_returns_once_done() {
        let mut polls = 0;
        assert_eq!(
            Spin.until(|| {
                polls += 1;
                polls > 10
            }),
            Ok(())
        );
    }
}
