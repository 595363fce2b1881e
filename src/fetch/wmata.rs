/*
 *  fetch/wmata.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  DC Metro real-time train predictions
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

use log::debug;
use serde::Deserialize;
use serde_json::Value;

use super::HttpFetcher;
use crate::errors::FetchError;

pub const BASE_URL: &str = "https://api.wmata.com/StationPrediction.svc/json/GetPrediction";

#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    pub line: String,
    pub destination: String,
    /// 0 for boarding or arriving trains
    pub minutes: u32,
    /// What the platform sign shows: "BRD", "ARR" or the minutes
    pub label: String,
    pub cars: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationBoard {
    pub code: String,
    pub name: String,
    pub arrivals: Vec<Arrival>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTrain {
    #[serde(default)]
    line: String,
    #[serde(default)]
    destination: String,
    #[serde(default)]
    destination_name: String,
    #[serde(default)]
    min: String,
    #[serde(default)]
    car: Option<String>,
}

pub async fn fetch_boards(
    fetcher: &HttpFetcher,
    api_key: &str,
    stations: &[String],
    max_trains: usize,
) -> Result<Vec<StationBoard>, FetchError> {
    if api_key.is_empty() {
        return Err(FetchError::MissingApiKey(fetcher.service().to_string()));
    }
    let headers = [("api_key", api_key.to_string())];
    let mut boards = Vec::with_capacity(stations.len());
    for code in stations {
        let url = format!("{}/{}", BASE_URL, code);
        let json = fetcher.get_json(&url, &[], &headers).await?;
        let arrivals = parse_predictions(&json, max_trains)?;
        debug!("wmata: {} has {} trains", code, arrivals.len());
        boards.push(StationBoard {
            code: code.clone(),
            name: station_name(code).unwrap_or(code.as_str()).to_string(),
            arrivals,
        });
    }
    Ok(boards)
}

/// "BRD"/"ARR" are boarding/arriving, digits are minutes, anything else
/// ("---", blank) has no usable estimate.
fn parse_min(min: &str) -> Option<u32> {
    match min.trim() {
        "BRD" | "ARR" => Some(0),
        m => m.parse().ok(),
    }
}

pub fn parse_predictions(v: &Value, max_trains: usize) -> Result<Vec<Arrival>, FetchError> {
    let trains = v
        .get("Trains")
        .ok_or_else(|| FetchError::Malformed("missing Trains".into()))?;
    let raw: Vec<RawTrain> = serde_json::from_value(trains.clone())?;
    let mut arrivals: Vec<Arrival> = raw
        .into_iter()
        .filter_map(|t| {
            let minutes = parse_min(&t.min)?;
            let destination = if t.destination.is_empty() { t.destination_name } else { t.destination };
            Some(Arrival {
                line: t.line,
                destination,
                minutes,
                label: t.min.trim().to_string(),
                cars: t.car.unwrap_or_default(),
            })
        })
        .collect();
    arrivals.sort_by_key(|a| a.minutes);
    arrivals.truncate(max_trains);
    Ok(arrivals)
}

pub fn line_color(line: &str) -> (u8, u8, u8) {
    match line {
        "RD" => (255, 0, 0),
        "BL" => (0, 0, 255),
        "OR" => (255, 165, 0),
        "SV" => (192, 192, 192),
        "GR" => (0, 255, 0),
        "YL" => (255, 255, 0),
        _ => (128, 128, 128),
    }
}

pub fn station_name(code: &str) -> Option<&'static str> {
    STATIONS.iter().find(|(c, _)| *c == code).map(|(_, n)| *n)
}

const STATIONS: &[(&str, &str)] = &[
    ("A01", "Metro Center"), ("A02", "Farragut North"), ("A03", "Dupont Circle"),
    ("A04", "Woodley Park"), ("A05", "Cleveland Park"), ("A06", "Van Ness-UDC"),
    ("A07", "Tenleytown-AU"), ("A08", "Friendship Heights"), ("A09", "Bethesda"),
    ("A10", "Medical Center"), ("A11", "Grosvenor-Strathmore"), ("A12", "White Flint"),
    ("A13", "Twinbrook"), ("A14", "Rockville"), ("A15", "Shady Grove"),
    ("B01", "Gallery Place"), ("B02", "Judiciary Square"), ("B03", "Union Station"),
    ("B04", "Rhode Island Ave"), ("B05", "Brookland-CUA"), ("B06", "Fort Totten"),
    ("B07", "Takoma"), ("B08", "Silver Spring"), ("B09", "Forest Glen"),
    ("B10", "Wheaton"), ("B11", "Glenmont"),
    ("C01", "Metro Center"), ("C02", "McPherson Square"), ("C03", "Farragut West"),
    ("C04", "Foggy Bottom-GWU"), ("C05", "Rosslyn"), ("C06", "Arlington Cemetery"),
    ("C07", "Pentagon"), ("C08", "Pentagon City"), ("C09", "Crystal City"),
    ("C10", "Reagan Airport"), ("C11", "Potomac Yard"), ("C12", "Braddock Road"),
    ("C13", "King St-Old Town"), ("C14", "Eisenhower Avenue"), ("C15", "Huntington"),
    ("D01", "Federal Triangle"), ("D02", "Smithsonian"), ("D03", "L'Enfant Plaza"),
    ("D04", "Federal Center SW"), ("D05", "Capitol South"), ("D06", "Eastern Market"),
    ("D07", "Potomac Ave"), ("D08", "Stadium-Armory"), ("D09", "Minnesota Ave"),
    ("D10", "Deanwood"), ("D11", "Cheverly"), ("D12", "Landover"), ("D13", "New Carrollton"),
    ("E01", "Mt Vernon Square"), ("E02", "Shaw-Howard"), ("E03", "U Street"),
    ("E04", "Columbia Heights"), ("E05", "Georgia Ave"), ("E06", "Fort Totten"),
    ("E07", "West Hyattsville"), ("E08", "Prince George's"), ("E09", "College Park"),
    ("E10", "Greenbelt"),
    ("F01", "Gallery Place"), ("F02", "Archives"), ("F03", "L'Enfant Plaza"),
    ("F04", "Waterfront"), ("F05", "Navy Yard"), ("F06", "Anacostia"),
    ("F07", "Congress Heights"), ("F08", "Southern Avenue"), ("F09", "Naylor Road"),
    ("F10", "Suitland"), ("F11", "Branch Ave"),
    ("G01", "Benning Road"), ("G02", "Capitol Heights"), ("G03", "Addison Road"),
    ("G04", "Morgan Boulevard"), ("G05", "Largo Town Center"),
    ("J01", "Court House"), ("J02", "Clarendon"), ("J03", "Virginia Square"), ("J04", "Ballston"),
    ("K01", "East Falls Church"), ("K02", "West Falls Church"), ("K03", "Dunn Loring"),
    ("K04", "Vienna"), ("K05", "McLean"), ("K06", "Tysons"), ("K07", "Greensboro"),
    ("K08", "Spring Hill"),
    ("N01", "Wiehle-Reston East"), ("N02", "Reston Town Center"), ("N03", "Herndon"),
    ("N04", "Innovation Center"), ("N06", "Dulles Airport"), ("N08", "Loudoun Gateway"),
    ("N09", "Ashburn"), ("N10", "Dulles Airport"), ("N12", "Downtown Largo"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({ "Trains": [
            { "Car": "8", "Destination": "NewCrltn", "DestinationCode": "D13", "DestinationName": "New Carrollton",
              "Group": "1", "Line": "OR", "LocationCode": "K08", "LocationName": "Vienna", "Min": "12" },
            { "Car": "6", "Destination": "Vienna", "DestinationName": "Vienna", "Line": "OR", "Min": "ARR" },
            { "Car": null, "Destination": "No Psngr", "Line": "--", "Min": "---" },
            { "Car": "8", "Destination": "Largo", "Line": "SV", "Min": "4" },
            { "Car": "8", "Destination": "Ashburn", "Line": "SV", "Min": "BRD" },
            { "Car": "6", "Destination": "NewCrltn", "Line": "OR", "Min": "20" }
        ]})
    }

    #[test]
    fn test_predictions_sorted_and_truncated() {
        let a = parse_predictions(&sample(), 3).unwrap();
        assert_eq!(a.len(), 3);
        let mins: Vec<u32> = a.iter().map(|t| t.minutes).collect();
        assert_eq!(mins, vec![0, 0, 4]);
        // stable sort keeps feed order among the boarding/arriving trains
        assert_eq!(a[0].label, "ARR");
        assert_eq!(a[1].label, "BRD");
        assert_eq!(a[2].destination, "Largo");
    }

    #[test]
    fn test_unknown_minutes_skipped() {
        let a = parse_predictions(&sample(), 10).unwrap();
        assert_eq!(a.len(), 5);
        assert!(a.iter().all(|t| t.line != "--"));
    }

    #[test]
    fn test_missing_trains() {
        assert!(parse_predictions(&json!({ "Message": "denied" }), 3).is_err());
    }

    #[test]
    fn test_station_lookup() {
        assert_eq!(station_name("C01"), Some("Metro Center"));
        assert_eq!(station_name("Z99"), None);
        assert_eq!(line_color("OR"), (255, 165, 0));
    }
}
