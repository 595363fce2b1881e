/*
 *  plugins/stock.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Stock ticker rotating through the configured symbols
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

use embedded_graphics::mono_font::MonoFont;
use embedded_graphics::mono_font::ascii::{FONT_4X6, FONT_6X10};
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use std::time::Duration;

use super::{Cached, DisplayPlugin, FetchPayload, FetchTask, PluginDescriptor};
use crate::config::{PluginSettings, SettingsExt, is_stock_symbol};
use crate::display::Frame;
use crate::draw::{self, GREEN, RED, WHITE};
use crate::errors::{ConfigError, FetchError, RenderError};
use crate::fetch::HttpFetcher;
use crate::fetch::finnhub::{self, Quote, QuoteBatch};

const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "stock",
    description: "Stock ticker",
    needs_network: true,
};

#[derive(Debug, Clone, PartialEq)]
struct StockSettings {
    api_key: String,
    symbols: Vec<String>,
    update_interval: Duration,
    rotation_interval: Duration,
}

impl StockSettings {
    fn parse(s: &PluginSettings) -> Result<Self, ConfigError> {
        let api_key = s.api_key().ok_or_else(|| ConfigError::missing("stock", "api_key"))?;
        let symbols: Vec<String> = s
            .str_list("symbols")
            .unwrap_or_default()
            .into_iter()
            .map(|sym| sym.to_ascii_uppercase())
            .collect();
        if let Some(bad) = symbols.iter().find(|sym| !is_stock_symbol(sym)) {
            return Err(ConfigError::invalid("stock", "symbols", format!("bad symbol '{bad}'")));
        }
        Ok(Self {
            api_key,
            symbols,
            update_interval: Duration::from_secs(s.u64_or("update_interval", 900)),
            rotation_interval: Duration::from_secs(s.u64_or("rotation_interval", 4).max(1)),
        })
    }
}

pub struct StockPlugin {
    width: u32,
    height: u32,
    fetcher: HttpFetcher,
    settings: Option<StockSettings>,
    cache: Cached<QuoteBatch>,
}

impl StockPlugin {
    pub fn new(width: u32, height: u32) -> Result<Self, FetchError> {
        Ok(Self {
            width,
            height,
            fetcher: HttpFetcher::new("finnhub", Duration::from_secs(60))?,
            settings: None,
            cache: Cached::default(),
        })
    }

    pub fn quotes(&self) -> Option<&QuoteBatch> {
        self.cache.data()
    }

    fn font(&self) -> &'static MonoFont<'static> {
        if self.height >= 32 { &FONT_6X10 } else { &FONT_4X6 }
    }

    /// Quote on screen `elapsed` after activation.
    pub fn current(&self, elapsed: Duration) -> Option<&Quote> {
        let quotes = &self.cache.data()?.quotes;
        if quotes.is_empty() {
            return None;
        }
        let every = self.settings.as_ref().map(|s| s.rotation_interval).unwrap_or(Duration::from_secs(4));
        let i = (elapsed.as_secs() / every.as_secs().max(1)) as usize % quotes.len();
        quotes.get(i)
    }

    fn draw_quote(&self, q: &Quote, frame: &mut Frame) -> Result<(), RenderError> {
        let font = self.font();
        let line = font.character_size.height as i32 + 1;
        let color = if q.change >= 0.0 { GREEN } else { RED };
        let wide = self.width >= 64;
        let text_w = if wide { self.width / 2 } else { self.width };

        draw::draw_text(frame, &q.symbol, 1, 1, font, WHITE)?;
        let price = draw::fit_text(&format!("${:.2}", q.price), font, text_w);
        draw::draw_text(frame, &price, 1, 1 + line, font, color)?;
        let pct = format!("{:+.2}%", q.percent);
        draw::draw_text(frame, &draw::fit_text(&pct, font, text_w), 1, 1 + 2 * line, font, color)?;

        let area = if wide {
            Rectangle::new(Point::new(self.width as i32 / 2, 1), Size::new(self.width / 2 - 1, self.height - 2))
        } else {
            let top = 1 + 3 * line;
            let h = (self.height as i32 - top - 1).max(0) as u32;
            Rectangle::new(Point::new(0, top), Size::new(self.width, h))
        };
        draw::draw_sparkline(frame, &q.series, area, color)?;
        Ok(())
    }
}

impl DisplayPlugin for StockPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn activate(&mut self, settings: &PluginSettings) -> Result<(), ConfigError> {
        let parsed = StockSettings::parse(settings)?;
        if self.settings.as_ref().is_some_and(|old| old.symbols != parsed.symbols) {
            self.cache.clear();
        }
        self.settings = Some(parsed);
        Ok(())
    }

    fn refresh_interval(&self) -> Option<Duration> {
        self.settings
            .as_ref()
            .filter(|s| !s.symbols.is_empty())
            .map(|s| s.update_interval)
    }

    fn refresh(&self) -> Option<FetchTask> {
        let s = self.settings.clone().filter(|s| !s.symbols.is_empty())?;
        let fetcher = self.fetcher.clone();
        Some(Box::pin(async move {
            finnhub::fetch_quotes(&fetcher, &s.api_key, &s.symbols)
                .await
                .map(FetchPayload::Quotes)
        }))
    }

    fn apply_refresh(&mut self, result: Result<FetchPayload, FetchError>) {
        self.cache.apply(DESCRIPTOR.name, result, |p| match p {
            FetchPayload::Quotes(b) => Some(b),
            _ => None,
        });
    }

    fn render_frame(&self, elapsed: Duration, frame: &mut Frame) -> Result<(), RenderError> {
        let font = &FONT_4X6;
        let no_symbols = self.settings.as_ref().is_none_or(|s| s.symbols.is_empty());
        if no_symbols {
            return Ok(draw::draw_placeholder(frame, "No stocks", "Add in settings", font, RED)?);
        }
        match self.current(elapsed) {
            Some(q) => self.draw_quote(q, frame),
            None if self.cache.last_error().is_some() => {
                Ok(draw::draw_placeholder(frame, "Stock API", "Error", font, RED)?)
            }
            None => Ok(draw::draw_placeholder(frame, "Stocks", "Loading", font, WHITE)?),
        }
    }

    fn last_error(&self) -> Option<String> {
        if let Some(e) = self.cache.last_error() {
            return Some(e.to_string());
        }
        // partial failures: the batch names the symbols that did not answer
        let batch = self.cache.data()?;
        let (symbol, err) = batch.errors.first()?;
        Some(format!("{symbol}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::pixelcolor::Rgb888;
    use serde_json::json;

    fn quote(symbol: &str, price: f64, prev: f64) -> Quote {
        let change = price - prev;
        Quote {
            symbol: symbol.into(),
            price,
            prev_close: prev,
            change,
            percent: change / prev * 100.0,
            open: prev,
            high: price.max(prev) + 1.0,
            low: price.min(prev) - 1.0,
            series: finnhub::synth_series(prev, price.max(prev) + 1.0, price.min(prev) - 1.0, price, 20),
        }
    }

    fn active(width: u32) -> StockPlugin {
        let mut p = StockPlugin::new(width, 32).unwrap();
        let s = json!({ "api_key": "k", "symbols": "aapl, MSFT", "rotation_interval": 4 });
        p.activate(s.as_object().unwrap()).unwrap();
        p.apply_refresh(Ok(FetchPayload::Quotes(QuoteBatch {
            quotes: vec![quote("AAPL", 190.0, 187.0), quote("MSFT", 400.0, 410.0)],
            errors: vec![("ZZZZ".into(), "No price data for ZZZZ".into())],
        })));
        p
    }

    #[test]
    fn test_settings() {
        let mut p = StockPlugin::new(64, 32).unwrap();
        assert!(matches!(
            p.activate(json!({ "symbols": ["AAPL"] }).as_object().unwrap()),
            Err(ConfigError::MissingSetting { .. })
        ));
        assert!(matches!(
            p.activate(json!({ "api_key": "k", "symbols": ["TOOLONG"] }).as_object().unwrap()),
            Err(ConfigError::InvalidSetting { .. })
        ));
        p.activate(json!({ "api_key": "k", "symbols": [] }).as_object().unwrap()).unwrap();
        assert!(p.refresh().is_none());
        assert_eq!(p.refresh_interval(), None);
    }

    #[test]
    fn test_rotation() {
        let p = active(64);
        assert_eq!(p.current(Duration::from_secs(0)).map(|q| q.symbol.as_str()), Some("AAPL"));
        assert_eq!(p.current(Duration::from_secs(4)).map(|q| q.symbol.as_str()), Some("MSFT"));
        assert_eq!(p.current(Duration::from_secs(9)).map(|q| q.symbol.as_str()), Some("AAPL"));
    }

    #[test]
    fn test_colors_follow_direction() {
        let p = active(64);
        let mut frame = Frame::new(64, 32, Rgb888::BLACK);
        p.render_frame(Duration::ZERO, &mut frame).unwrap();
        assert!(frame.as_slice().contains(&GREEN));
        assert!(!frame.as_slice().contains(&RED));

        let mut frame = Frame::new(64, 32, Rgb888::BLACK);
        p.render_frame(Duration::from_secs(4), &mut frame).unwrap();
        assert!(frame.as_slice().contains(&RED));
    }

    #[test]
    fn test_partial_failure_reported() {
        let p = active(32);
        assert!(p.last_error().is_some_and(|e| e.starts_with("ZZZZ")));
        let mut frame = Frame::new(32, 32, Rgb888::BLACK);
        p.render_frame(Duration::ZERO, &mut frame).unwrap();
        assert!(frame.lit_pixels() > 0);
    }

    #[test]
    fn test_error_keeps_quotes() {
        let mut p = active(64);
        let before = p.quotes().cloned();
        p.apply_refresh(Err(FetchError::Status { service: "finnhub".into(), status: 503 }));
        assert_eq!(p.quotes().cloned(), before);
    }
}
