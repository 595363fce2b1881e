/*
 *  plugins/wmata.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  DC Metro arrival board for one or two stations
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

use embedded_graphics::mono_font::ascii::FONT_4X6;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use std::time::Duration;

use super::{Cached, DisplayPlugin, FetchPayload, FetchTask, PluginDescriptor};
use crate::config::{PluginSettings, SettingsExt, is_station_code};
use crate::display::Frame;
use crate::draw::{self, ORANGE, RED, WHITE, YELLOW};
use crate::errors::{ConfigError, FetchError, RenderError};
use crate::fetch::HttpFetcher;
use crate::fetch::wmata::{self, Arrival, StationBoard};

const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "wmata",
    description: "WMATA train arrivals",
    needs_network: true,
};

const ROW: i32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// One station at a time
    Alternating,
    /// Every station on one screen
    Combined,
}

#[derive(Debug, Clone, PartialEq)]
struct WmataSettings {
    api_key: String,
    stations: Vec<String>,
    update_interval: Duration,
    max_trains: usize,
    mode: DisplayMode,
    station_duration: Duration,
}

impl WmataSettings {
    fn parse(s: &PluginSettings) -> Result<Self, ConfigError> {
        let api_key = s.api_key().ok_or_else(|| ConfigError::missing("wmata", "api_key"))?;
        let stations: Vec<String> = s
            .str_list("stations")
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if stations.is_empty() {
            return Err(ConfigError::missing("wmata", "stations"));
        }
        if stations.len() > 2 {
            return Err(ConfigError::invalid("wmata", "stations", "at most two stations"));
        }
        if let Some(bad) = stations.iter().find(|c| !is_station_code(c)) {
            return Err(ConfigError::invalid("wmata", "stations", format!("bad code '{bad}'")));
        }
        let mode = match s.str_or("display_mode", "alternating").as_str() {
            "alternating" => DisplayMode::Alternating,
            "combined" => DisplayMode::Combined,
            other => {
                return Err(ConfigError::invalid("wmata", "display_mode", format!("unknown mode '{other}'")));
            }
        };
        Ok(Self {
            api_key,
            stations,
            update_interval: Duration::from_secs(s.u64_or("update_interval", 30)),
            max_trains: s.u64_or("max_trains", 3).clamp(1, 10) as usize,
            mode,
            station_duration: Duration::from_secs(s.u64_or("station_duration", 5).max(1)),
        })
    }
}

pub struct WmataPlugin {
    width: u32,
    height: u32,
    fetcher: HttpFetcher,
    settings: Option<WmataSettings>,
    cache: Cached<Vec<StationBoard>>,
}

impl WmataPlugin {
    pub fn new(width: u32, height: u32) -> Result<Self, FetchError> {
        Ok(Self {
            width,
            height,
            fetcher: HttpFetcher::new("wmata", Duration::from_secs(20))?,
            settings: None,
            cache: Cached::default(),
        })
    }

    pub fn boards(&self) -> Option<&Vec<StationBoard>> {
        self.cache.data()
    }

    fn draw_arrival(&self, a: &Arrival, y: i32, frame: &mut Frame) -> Result<(), RenderError> {
        let font = &FONT_4X6;
        let (r, g, b) = wmata::line_color(&a.line);
        Rectangle::new(Point::new(0, y + 1), Size::new(3, 4))
            .into_styled(PrimitiveStyle::with_fill(Rgb888::new(r, g, b)))
            .draw(frame)?;
        let label = if a.label.chars().all(|c| c.is_ascii_digit()) { format!("{}m", a.label) } else { a.label.clone() };
        let label_w = draw::text_width(&label, font);
        let label_x = self.width as i32 - label_w as i32;
        let dest_room = (label_x - 5).max(0) as u32;
        draw::draw_text(frame, &draw::fit_text(&a.destination, font, dest_room), 4, y, font, WHITE)?;
        let color = if a.minutes == 0 { RED } else { ORANGE };
        draw::draw_text(frame, &label, label_x, y, font, color)?;
        Ok(())
    }

    /// Header plus at most `rows` arrivals; returns the next free row.
    fn draw_board(&self, board: &StationBoard, y: i32, rows: usize, frame: &mut Frame) -> Result<i32, RenderError> {
        let font = &FONT_4X6;
        draw::draw_text(frame, &draw::fit_text(&board.name, font, self.width), 0, y, font, YELLOW)?;
        let mut y = y + ROW;
        if board.arrivals.is_empty() {
            draw::draw_text(frame, "No trains", 4, y, font, WHITE)?;
            return Ok(y + ROW);
        }
        for a in board.arrivals.iter().take(rows) {
            self.draw_arrival(a, y, frame)?;
            y += ROW;
        }
        Ok(y)
    }
}

/// Board shown `elapsed` after activation in alternating mode.
pub fn board_index(boards: usize, elapsed: Duration, every: Duration) -> usize {
    if boards == 0 {
        return 0;
    }
    (elapsed.as_secs() / every.as_secs().max(1)) as usize % boards
}

impl DisplayPlugin for WmataPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn activate(&mut self, settings: &PluginSettings) -> Result<(), ConfigError> {
        let parsed = WmataSettings::parse(settings)?;
        if self.settings.as_ref().is_some_and(|old| old.stations != parsed.stations) {
            self.cache.clear();
        }
        self.settings = Some(parsed);
        Ok(())
    }

    fn refresh_interval(&self) -> Option<Duration> {
        self.settings.as_ref().map(|s| s.update_interval)
    }

    fn refresh(&self) -> Option<FetchTask> {
        let s = self.settings.clone()?;
        let fetcher = self.fetcher.clone();
        Some(Box::pin(async move {
            wmata::fetch_boards(&fetcher, &s.api_key, &s.stations, s.max_trains)
                .await
                .map(FetchPayload::Trains)
        }))
    }

    fn apply_refresh(&mut self, result: Result<FetchPayload, FetchError>) {
        self.cache.apply(DESCRIPTOR.name, result, |p| match p {
            FetchPayload::Trains(b) => Some(b),
            _ => None,
        });
    }

    fn render_frame(&self, elapsed: Duration, frame: &mut Frame) -> Result<(), RenderError> {
        let font = &FONT_4X6;
        let (Some(settings), Some(boards)) = (self.settings.as_ref(), self.cache.data()) else {
            return if self.cache.last_error().is_some() {
                Ok(draw::draw_placeholder(frame, "WMATA API", "Error", font, RED)?)
            } else {
                Ok(draw::draw_placeholder(frame, "Loading", "train data", font, WHITE)?)
            };
        };
        if boards.is_empty() {
            return Ok(draw::draw_placeholder(frame, "WMATA", "No stations", font, RED)?);
        }
        let total_rows = (self.height as i32 / ROW).max(1) as usize;
        match settings.mode {
            DisplayMode::Alternating => {
                let board = &boards[board_index(boards.len(), elapsed, settings.station_duration)];
                self.draw_board(board, 0, total_rows.saturating_sub(1), frame)?;
            }
            DisplayMode::Combined => {
                let per_board = (total_rows / boards.len()).saturating_sub(1).max(1);
                let mut y = 0;
                for board in boards {
                    if y >= self.height as i32 {
                        break;
                    }
                    y = self.draw_board(board, y, per_board, frame)?;
                }
            }
        }
        Ok(())
    }

    fn last_error(&self) -> Option<String> {
        self.cache.last_error().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn arrival(line: &str, dest: &str, min: &str) -> Arrival {
        Arrival {
            line: line.into(),
            destination: dest.into(),
            minutes: min.parse().unwrap_or(0),
            label: min.into(),
            cars: "8".into(),
        }
    }

    fn boards() -> Vec<StationBoard> {
        vec![
            StationBoard {
                code: "K04".into(),
                name: "Vienna".into(),
                arrivals: vec![arrival("OR", "NewCrltn", "BRD"), arrival("OR", "NewCrltn", "12")],
            },
            StationBoard {
                code: "C01".into(),
                name: "Metro Center".into(),
                arrivals: vec![arrival("BL", "Largo", "4")],
            },
        ]
    }

    fn active(mode: &str) -> WmataPlugin {
        let mut p = WmataPlugin::new(64, 32).unwrap();
        let s = json!({ "api_key": "k", "stations": ["K04", "C01"], "display_mode": mode });
        p.activate(s.as_object().unwrap()).unwrap();
        p
    }

    #[test]
    fn test_station_validation() {
        let mut p = WmataPlugin::new(64, 32).unwrap();
        let cases = [
            json!({ "api_key": "k" }),
            json!({ "api_key": "k", "stations": ["K04", "C01", "A01"] }),
            json!({ "api_key": "k", "stations": ["vienna"] }),
            json!({ "api_key": "k", "stations": ["K04"], "display_mode": "sideways" }),
            json!({ "stations": ["K04"] }),
        ];
        for c in cases {
            assert!(p.activate(c.as_object().unwrap()).is_err(), "{c}");
        }
        assert!(p.activate(json!({ "api_key": "k", "stations": "k04" }).as_object().unwrap()).is_ok());
    }

    #[test]
    fn test_alternates_between_stations() {
        assert_eq!(board_index(2, Duration::from_secs(0), Duration::from_secs(5)), 0);
        assert_eq!(board_index(2, Duration::from_secs(5), Duration::from_secs(5)), 1);
        assert_eq!(board_index(2, Duration::from_secs(10), Duration::from_secs(5)), 0);

        let mut p = active("alternating");
        p.apply_refresh(Ok(FetchPayload::Trains(boards())));
        let mut frame = Frame::new(64, 32, Rgb888::BLACK);
        p.render_frame(Duration::ZERO, &mut frame).unwrap();
        // orange line square and a boarding label at Vienna
        assert!(frame.as_slice().contains(&Rgb888::new(255, 165, 0)));
        assert!(frame.as_slice().contains(&RED));

        let mut frame = Frame::new(64, 32, Rgb888::BLACK);
        p.render_frame(Duration::from_secs(5), &mut frame).unwrap();
        assert!(frame.as_slice().contains(&Rgb888::new(0, 0, 255)));
        assert!(!frame.as_slice().contains(&RED));
    }

    #[test]
    fn test_combined_shows_both() {
        let mut p = active("combined");
        p.apply_refresh(Ok(FetchPayload::Trains(boards())));
        let mut frame = Frame::new(64, 32, Rgb888::BLACK);
        p.render_frame(Duration::ZERO, &mut frame).unwrap();
        assert!(frame.as_slice().contains(&Rgb888::new(255, 165, 0)));
        assert!(frame.as_slice().contains(&Rgb888::new(0, 0, 255)));
    }

    #[test]
    fn test_error_keeps_boards() {
        let mut p = active("alternating");
        p.apply_refresh(Ok(FetchPayload::Trains(boards())));
        p.apply_refresh(Err(FetchError::Unauthorized { service: "wmata".into(), status: 401 }));
        assert_eq!(p.boards(), Some(&boards()));
        assert!(p.last_error().is_some_and(|e| e.contains("401")));
    }

    #[test]
    fn test_placeholder_before_data() {
        let p = active("alternating");
        let mut frame = Frame::new(64, 32, Rgb888::BLACK);
        p.render_frame(Duration::ZERO, &mut frame).unwrap();
        assert!(frame.lit_pixels() > 0);
    }
}
