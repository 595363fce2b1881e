/*
 *  fetch/aladhan.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Daily prayer timetable from the Aladhan API
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

use chrono::{Local, NaiveDate, NaiveTime};
use log::info;
use serde_json::Value;

use super::HttpFetcher;
use crate::errors::FetchError;

pub const BASE_URL: &str = "http://api.aladhan.com/v1/timings";

/// (API key, short display name)
pub const PRAYERS: [(&str, &str); 5] = [
    ("Fajr", "Fajr"),
    ("Dhuhr", "Zuhr"),
    ("Asr", "Asr"),
    ("Maghrib", "Magh"),
    ("Isha", "Isha"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct PrayerTimes {
    pub date: NaiveDate,
    /// In day order, short names
    pub times: Vec<(&'static str, NaiveTime)>,
}

impl PrayerTimes {
    /// Index of the next prayer after `now` and whether it falls tomorrow.
    pub fn next_after(&self, now: NaiveTime) -> Option<(usize, bool)> {
        if self.times.is_empty() {
            return None;
        }
        match self.times.iter().position(|(_, t)| *t > now) {
            Some(i) => Some((i, false)),
            None => Some((0, true)),
        }
    }

    /// Minutes from `now` until the next prayer.
    pub fn minutes_until_next(&self, now: NaiveTime) -> Option<i64> {
        let (i, tomorrow) = self.next_after(now)?;
        let mut mins = (self.times[i].1 - now).num_minutes();
        if tomorrow {
            mins += 24 * 60;
        }
        Some(mins)
    }
}

pub async fn fetch_timings(
    fetcher: &HttpFetcher,
    latitude: f64,
    longitude: f64,
    method: u64,
) -> Result<PrayerTimes, FetchError> {
    let today = Local::now().date_naive();
    let params = [
        ("latitude", latitude.to_string()),
        ("longitude", longitude.to_string()),
        ("method", method.to_string()),
        // keeps a cached timetable from outliving its day
        ("date", today.format("%d-%m-%Y").to_string()),
    ];
    let json = fetcher.get_json(BASE_URL, &params, &[]).await?;
    let times = parse_timings(&json, today)?;
    info!("Prayer times for {} loaded", times.date);
    Ok(times)
}

/// "05:12" or "05:12 (EDT)"
fn parse_clock(s: &str) -> Option<NaiveTime> {
    let hhmm = s.split_whitespace().next()?;
    NaiveTime::parse_from_str(hhmm, "%H:%M").ok()
}

pub fn parse_timings(v: &Value, date: NaiveDate) -> Result<PrayerTimes, FetchError> {
    let timings = v
        .get("data")
        .and_then(|d| d.get("timings"))
        .ok_or_else(|| FetchError::Malformed("missing data.timings".into()))?;
    let mut times = Vec::with_capacity(PRAYERS.len());
    for (key, short) in PRAYERS {
        let raw = timings[key]
            .as_str()
            .ok_or_else(|| FetchError::Malformed(format!("missing {key}")))?;
        let t = parse_clock(raw)
            .ok_or_else(|| FetchError::Malformed(format!("bad time for {key}: {raw}")))?;
        times.push((short, t));
    }
    Ok(PrayerTimes { date, times })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> PrayerTimes {
        let v = json!({
            "code": 200,
            "data": { "timings": {
                "Fajr": "05:12", "Sunrise": "06:40", "Dhuhr": "13:02 (EDT)",
                "Asr": "16:38", "Maghrib": "19:24", "Isha": "20:47"
            }}
        });
        parse_timings(&v, NaiveDate::from_ymd_opt(2026, 4, 2).unwrap()).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_parse_timings() {
        let p = sample();
        assert_eq!(p.times.len(), 5);
        assert_eq!(p.times[1], ("Zuhr", t(13, 2)));
        assert_eq!(p.times[3].0, "Magh");
    }

    #[test]
    fn test_next_prayer() {
        let p = sample();
        assert_eq!(p.next_after(t(4, 0)), Some((0, false)));
        assert_eq!(p.next_after(t(13, 2)), Some((2, false)));
        assert_eq!(p.minutes_until_next(t(16, 0)), Some(38));
        // after Isha the next one is tomorrow's Fajr
        assert_eq!(p.next_after(t(22, 0)), Some((0, true)));
        assert_eq!(p.minutes_until_next(t(23, 12)), Some(6 * 60));
    }

    #[test]
    fn test_missing_timings() {
        let v = json!({ "code": 400, "data": "Invalid latitude" });
        assert!(parse_timings(&v, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()).is_err());
    }
}
