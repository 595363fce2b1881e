/*
 *  pacer.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */
use std::time::{Duration, Instant};

/// Fixed frame budget for the render loop.
#[derive(Debug, Clone)]
pub struct Pacer {
    frame: Duration,
    overruns: u64,
}

impl Pacer {
    pub fn new(target_fps: u32) -> Self {
        Self { frame: Self::budget(target_fps), overruns: 0 }
    }

    fn budget(fps: u32) -> Duration {
        Duration::from_micros(1_000_000u64 / fps.max(1) as u64)
    }

    #[inline]
    pub fn set_fps(&mut self, fps: u32) {
        self.frame = Self::budget(fps);
    }

    pub fn frame(&self) -> Duration {
        self.frame
    }

    /// Time left in the iteration that began at `started`.
    ///
    /// `None` when the budget is already spent; the caller moves straight
    /// on to the next iteration and the overrun is counted.
    pub fn remaining(&mut self, started: Instant, now: Instant) -> Option<Duration> {
        let spent = now.saturating_duration_since(started);
        match self.frame.checked_sub(spent) {
            Some(left) if !left.is_zero() => Some(left),
            _ => {
                self.overruns += 1;
                None
            }
        }
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}
