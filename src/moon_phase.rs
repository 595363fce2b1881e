/*
 *  moon_phase.rs
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
//! Lunar phase from the mean synodic month, counted from a known new moon.
//! Good to within about a day, plenty for a 32 pixel disc.

use chrono::{DateTime, TimeZone, Utc};

pub const SYNODIC_MONTH_DAYS: f64 = 29.530_588_67;

/// Eight named phases, in order through the cycle.
pub const PHASE_NAMES: [&str; 8] = [
    "New Moon",
    "Waxing Crescent",
    "First Quarter",
    "Waxing Gibbous",
    "Full Moon",
    "Waning Gibbous",
    "Last Quarter",
    "Waning Crescent",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoonPhase {
    /// Days since the last new moon, 0..SYNODIC_MONTH_DAYS
    pub age_days: f64,
    /// Position through the cycle, 0.0..1.0 (0.5 is full)
    pub fraction: f64,
    /// Lit fraction of the disc, 0.0..=1.0
    pub illumination: f64,
    /// Index into [`PHASE_NAMES`]
    pub index: usize,
}

impl MoonPhase {
    pub fn name(&self) -> &'static str {
        PHASE_NAMES[self.index]
    }

    pub fn waxing(&self) -> bool {
        self.fraction < 0.5
    }
}

/// 2000-01-06 18:14 UTC
fn reference_new_moon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 6, 18, 14, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub fn phase_at(when: DateTime<Utc>) -> MoonPhase {
    let days = (when - reference_new_moon()).num_seconds() as f64 / 86_400.0;
    let age = days.rem_euclid(SYNODIC_MONTH_DAYS);
    let fraction = age / SYNODIC_MONTH_DAYS;
    let illumination = (1.0 - (2.0 * std::f64::consts::PI * fraction).cos()) / 2.0;
    // each named phase is centered on its eighth of the cycle
    let index = ((fraction * 8.0 + 0.5).floor() as usize) % 8;
    MoonPhase { age_days: age, fraction, illumination, index }
}
