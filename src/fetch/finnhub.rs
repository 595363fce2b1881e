/*
 *  fetch/finnhub.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Stock quotes from Finnhub
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

use log::{info, warn};
use serde_json::Value;

use super::HttpFetcher;
use crate::errors::FetchError;

pub const BASE_URL: &str = "https://finnhub.io/api/v1/quote";
pub const SERIES_POINTS: usize = 40;

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub prev_close: f64,
    pub change: f64,
    pub percent: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    /// Intraday shape derived from open/high/low/close
    pub series: Vec<f64>,
}

/// Quotes for every symbol that answered, plus the ones that did not.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuoteBatch {
    pub quotes: Vec<Quote>,
    pub errors: Vec<(String, String)>,
}

/// One request per symbol. Fails only when no symbol could be fetched, so
/// a single delisted ticker does not blank the rotation.
pub async fn fetch_quotes(
    fetcher: &HttpFetcher,
    api_key: &str,
    symbols: &[String],
) -> Result<QuoteBatch, FetchError> {
    if api_key.is_empty() {
        return Err(FetchError::MissingApiKey(fetcher.service().to_string()));
    }
    let mut batch = QuoteBatch::default();
    let mut first_err = None;
    for symbol in symbols {
        let params = [("symbol", symbol.clone()), ("token", api_key.to_string())];
        let result = match fetcher.get_json(BASE_URL, &params, &[]).await {
            Ok(json) => parse_quote(symbol, &json),
            Err(e) => Err(e),
        };
        match result {
            Ok(q) => batch.quotes.push(q),
            Err(e) => {
                warn!("finnhub: {}: {}", symbol, e);
                batch.errors.push((symbol.clone(), e.to_string()));
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    match first_err {
        Some(e) if batch.quotes.is_empty() => Err(e),
        _ => {
            info!("finnhub: {} quotes, {} failed", batch.quotes.len(), batch.errors.len());
            Ok(batch)
        }
    }
}

pub fn parse_quote(symbol: &str, v: &Value) -> Result<Quote, FetchError> {
    let field = |k: &str| v.get(k).and_then(Value::as_f64);
    let price = field("c").ok_or_else(|| FetchError::Malformed(format!("{symbol}: missing price")))?;
    if price == 0.0 {
        return Err(FetchError::Malformed(format!("No price data for {symbol}")));
    }
    let prev_close = field("pc").unwrap_or(price);
    let open = field("o").filter(|o| *o > 0.0).unwrap_or(prev_close);
    let high = field("h").filter(|h| *h > 0.0).unwrap_or(price.max(open));
    let low = field("l").filter(|l| *l > 0.0).unwrap_or(price.min(open));
    let change = price - prev_close;
    let percent = if prev_close != 0.0 { change / prev_close * 100.0 } else { 0.0 };

    Ok(Quote {
        symbol: symbol.to_string(),
        price,
        prev_close,
        change,
        percent,
        open,
        high,
        low,
        series: synth_series(open, high, low, price, SERIES_POINTS),
    })
}

/// Piecewise linear walk through the session's extremes. An up day visits
/// the low before the high, a down day the high before the low.
pub fn synth_series(open: f64, high: f64, low: f64, close: f64, points: usize) -> Vec<f64> {
    if points < 2 {
        return vec![close; points];
    }
    let knots = if close >= open {
        [open, low, high, close]
    } else {
        [open, high, low, close]
    };
    let last = (points - 1) as f64;
    (0..points)
        .map(|i| {
            let pos = (i * 3) as f64 / last;
            let seg = (pos.floor() as usize).min(2);
            let t = pos - seg as f64;
            knots[seg] + (knots[seg + 1] - knots[seg]) * t
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_quote() {
        let v = json!({ "c": 189.5, "d": 2.5, "dp": 1.3369, "h": 190.2, "l": 186.1, "o": 187.0, "pc": 187.0 });
        let q = parse_quote("AAPL", &v).unwrap();
        assert_eq!(q.symbol, "AAPL");
        assert!((q.change - 2.5).abs() < 1e-9);
        assert!((q.percent - 1.336_898).abs() < 1e-4);
        assert_eq!(q.series.len(), SERIES_POINTS);
        assert_eq!(q.series[0], 187.0);
        assert!((q.series[SERIES_POINTS - 1] - 189.5).abs() < 1e-9);
    }

    #[test]
    fn test_zero_price_is_no_data() {
        let v = json!({ "c": 0, "d": null, "dp": null, "h": 0, "l": 0, "o": 0, "pc": 0 });
        assert!(matches!(parse_quote("ZZZZ", &v), Err(FetchError::Malformed(m)) if m.contains("No price data")));
    }

    #[test]
    fn test_series_shape() {
        let up = synth_series(10.0, 12.0, 9.0, 11.0, 7);
        assert_eq!(up, vec![10.0, 9.5, 9.0, 10.5, 12.0, 11.5, 11.0]);
        let down = synth_series(10.0, 12.0, 9.0, 9.5, 4);
        assert_eq!(down, vec![10.0, 12.0, 9.0, 9.5]);
        // every point within the session range
        assert!(up.iter().all(|p| (9.0..=12.0).contains(p)));
    }
}
