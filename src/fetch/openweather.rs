/*
 *  fetch/openweather.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  OpenWeatherMap current conditions
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

use log::info;
use serde_json::Value;

use super::HttpFetcher;
use crate::errors::FetchError;

pub const BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub city: String,
    pub temp: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity: i64,
    pub pressure: i64,
    pub description: String,
    pub icon: String,
    pub wind_speed: f64,
    pub wind_deg: f64,
    pub clouds: i64,
}

impl WeatherReport {
    /// 16 point compass for the wind bearing.
    pub fn wind_compass(&self) -> &'static str {
        let compass_points = [
            "N",  "NNE", "NE", "ENE", "E",  "ESE",
            "SE", "SSE", "S",  "SSW", "SW", "WSW",
            "W",  "WNW", "NW", "NNW"];
        let d16 = ((self.wind_deg.rem_euclid(360.0) / 22.5) + 0.5) as usize % 16;
        compass_points[d16]
    }
}

/// Units as the display names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Metric,
    Imperial,
    Kelvin,
}

impl Units {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "metric" | "c" | "celsius" => Some(Units::Metric),
            "imperial" | "f" | "fahrenheit" => Some(Units::Imperial),
            "kelvin" | "standard" | "k" => Some(Units::Kelvin),
            _ => None,
        }
    }

    /// Value of the API's `units` parameter.
    fn api_param(self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
            Units::Kelvin => "standard",
        }
    }

    pub fn temp_suffix(self) -> &'static str {
        match self {
            Units::Metric => "C",
            Units::Imperial => "F",
            Units::Kelvin => "K",
        }
    }

    pub fn speed_suffix(self) -> &'static str {
        match self {
            Units::Imperial => "mph",
            _ => "m/s",
        }
    }
}

pub async fn fetch_current(
    fetcher: &HttpFetcher,
    api_key: &str,
    city_id: u64,
    units: Units,
) -> Result<WeatherReport, FetchError> {
    if api_key.is_empty() {
        return Err(FetchError::MissingApiKey(fetcher.service().to_string()));
    }
    let params = [
        ("id", city_id.to_string()),
        ("units", units.api_param().to_string()),
        ("appid", api_key.to_string()),
    ];
    let json = fetcher.get_json(BASE_URL, &params, &[]).await?;
    let report = parse_current(&json)?;
    info!("Weather for {}: {:.1}{} {}", report.city, report.temp, units.temp_suffix(), report.description);
    Ok(report)
}

pub fn parse_current(v: &Value) -> Result<WeatherReport, FetchError> {
    // the API reports errors in-band as {"cod": "404", "message": ...}
    if let Some(cod) = v.get("cod") {
        let code = cod.as_i64().or_else(|| cod.as_str().and_then(|s| s.parse().ok()));
        if let Some(code) = code.filter(|c| *c != 200) {
            let msg = v["message"].as_str().unwrap_or("error").to_string();
            return Err(FetchError::Malformed(format!("cod {code}: {msg}")));
        }
    }
    let main = v
        .get("main")
        .ok_or_else(|| FetchError::Malformed("missing 'main'".into()))?;
    let temp = main["temp"]
        .as_f64()
        .ok_or_else(|| FetchError::Malformed("missing main.temp".into()))?;
    let weather0 = &v["weather"][0];

    Ok(WeatherReport {
        city: v["name"].as_str().unwrap_or("").to_string(),
        temp,
        temp_min: main["temp_min"].as_f64().unwrap_or(temp),
        temp_max: main["temp_max"].as_f64().unwrap_or(temp),
        humidity: main["humidity"].as_i64().unwrap_or(0),
        pressure: main["pressure"].as_i64().unwrap_or(0),
        description: weather0["description"].as_str().unwrap_or("").to_string(),
        icon: weather0["icon"].as_str().unwrap_or("").to_string(),
        wind_speed: v["wind"]["speed"].as_f64().unwrap_or(0.0),
        wind_deg: v["wind"]["deg"].as_f64().unwrap_or(0.0),
        clouds: v["clouds"]["all"].as_i64().unwrap_or(0),
    })
}
