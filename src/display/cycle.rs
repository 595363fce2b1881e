/*
 *  display/cycle.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Timed rotation through the configured plugin list
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

use crate::config::PluginCycle;

/// Where the rotation stands. Timing runs on the monotonic clock so wall
/// clock jumps never trigger or stall a rotation.
#[derive(Debug, Clone)]
pub struct CycleState {
    cursor: usize,
    last_switch: Instant,
}

impl CycleState {
    pub fn new(now: Instant) -> Self {
        Self { cursor: 0, last_switch: now }
    }

    /// Restart the dwell timer, after a manual switch or a cycle change.
    pub fn reset(&mut self, now: Instant) {
        self.last_switch = now;
    }

    pub fn last_switch(&self) -> Instant {
        self.last_switch
    }

    /// Whether the active plugin has been on screen for a full period.
    pub fn due(&self, cycle: &PluginCycle, now: Instant) -> bool {
        cycle.enabled
            && !cycle.plugins.is_empty()
            && now.saturating_duration_since(self.last_switch) >= Duration::from_secs(cycle.duration)
    }

    /// Next plugin to rotate to. Starts after `active` when it is in the
    /// list, otherwise at the cursor. Entries `usable` rejects are skipped;
    /// `None` when nothing in the list is usable.
    pub fn next<F>(&mut self, cycle: &PluginCycle, active: &str, usable: F) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        let n = cycle.plugins.len();
        if n == 0 {
            return None;
        }
        let start = match cycle.plugins.iter().position(|p| p == active) {
            Some(i) => i + 1,
            None => self.cursor,
        };
        for step in 0..n {
            let i = (start + step) % n;
            let name = &cycle.plugins[i];
            if usable(name) {
                self.cursor = (i + 1) % n;
                return Some(name.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(plugins: &[&str]) -> PluginCycle {
        PluginCycle {
            enabled: true,
            plugins: plugins.iter().map(|s| s.to_string()).collect(),
            duration: 30,
            last_switch: 0,
        }
    }

    #[test]
    fn test_due_after_duration() {
        let t0 = Instant::now();
        let c = cycle(&["clock", "moon"]);
        let state = CycleState::new(t0);
        assert!(!state.due(&c, t0 + Duration::from_secs(29)));
        assert!(state.due(&c, t0 + Duration::from_secs(30)));

        let mut off = c.clone();
        off.enabled = false;
        assert!(!state.due(&off, t0 + Duration::from_secs(300)));
    }

    #[test]
    fn test_next_wraps() {
        let c = cycle(&["clock", "weather", "moon"]);
        let mut state = CycleState::new(Instant::now());
        assert_eq!(state.next(&c, "clock", |_| true).as_deref(), Some("weather"));
        assert_eq!(state.next(&c, "moon", |_| true).as_deref(), Some("clock"));
    }

    #[test]
    fn test_next_from_outside_list_uses_cursor() {
        let c = cycle(&["clock", "weather", "moon"]);
        let mut state = CycleState::new(Instant::now());
        assert_eq!(state.next(&c, "clock", |_| true).as_deref(), Some("weather"));
        // manual switch to a plugin not in the list
        assert_eq!(state.next(&c, "gif", |_| true).as_deref(), Some("moon"));
    }

    #[test]
    fn test_next_skips_unusable() {
        let c = cycle(&["clock", "weather", "moon"]);
        let mut state = CycleState::new(Instant::now());
        assert_eq!(state.next(&c, "clock", |p| p != "weather").as_deref(), Some("moon"));
        assert_eq!(state.next(&c, "clock", |_| false), None);
    }
}
