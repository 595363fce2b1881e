/*
 *  fetch/mod.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  HTTP plumbing shared by the data fetchers: client setup, retries,
 *  gzip tolerant decoding, error classification and a response cache
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

pub mod aladhan;
pub mod finnhub;
pub mod openweather;
pub mod wmata;

use flate2::read::GzDecoder;
use log::{debug, warn};
use mini_moka::sync::Cache;
use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::FetchError;

const VERSION: &str = concat!("InfoCube ", env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

/// Parameters that never make it into logs or cache keys.
const SECRET_PARAMS: [&str; 4] = ["appid", "token", "api_key", "apikey"];

/// GET-JSON client for one external service.
///
/// Cheap to clone; clones share the connection pool and the cache, so a
/// fetch task can own one without borrowing the plugin.
#[derive(Clone)]
pub struct HttpFetcher {
    service: &'static str,
    client: Client,
    cache: Cache<String, Arc<Value>>,
    max_retries: u8,
    retry_delay: Duration,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("service", &self.service)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl HttpFetcher {
    /// `cache_ttl` bounds how long an identical request is answered from
    /// memory.
    pub fn new(service: &'static str, cache_ttl: Duration) -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        headers.insert("User-Agent", header::HeaderValue::from_static(VERSION));
        headers.insert("Accept", header::HeaderValue::from_static("application/json"));
        headers.insert("Accept-Encoding", header::HeaderValue::from_static("gzip"));

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()?;

        let cache = Cache::builder()
            .max_capacity(64)
            .time_to_live(cache_ttl.max(Duration::from_secs(1)))
            .build();

        Ok(Self {
            service,
            client,
            cache,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn with_retries(mut self, max_retries: u8, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// GET `url` with `query` and extra `headers`, returning parsed JSON.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&'static str, String)],
    ) -> Result<Arc<Value>, FetchError> {
        let key = cache_key(url, query);
        if let Some(hit) = self.cache.get(&key) {
            debug!("{}: cache hit {}", self.service, key);
            return Ok(hit);
        }
        let body = self.send_with_retries(url, query, headers).await?;
        let value: Value = serde_json::from_str(&body)?;
        let value = Arc::new(value);
        self.cache.insert(key, Arc::clone(&value));
        Ok(value)
    }

    async fn send_with_retries(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&'static str, String)],
    ) -> Result<String, FetchError> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let mut req = self.client.get(url).query(query);
            for (name, value) in headers {
                req = req.header(*name, value.as_str());
            }
            let err = match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.bytes().await?;
                        return Ok(decode_body(&raw));
                    }
                    classify_status(self.service, status)
                }
                Err(e) => FetchError::from(e),
            };
            if !err.is_retryable() || attempt >= self.max_retries {
                return Err(err);
            }
            warn!("{}: attempt {} failed ({}), retrying", self.service, attempt, err);
            tokio::time::sleep(self.retry_delay * attempt as u32).await;
        }
    }
}

/// Try to decode as gzip first, fall back to plain text if it fails.
pub fn decode_body(raw: &[u8]) -> String {
    let mut decoder = GzDecoder::new(raw);
    let mut decoded = String::new();
    match decoder.read_to_string(&mut decoded) {
        Ok(_) => decoded,
        Err(_) => String::from_utf8_lossy(raw).to_string(),
    }
}

pub fn classify_status(service: &str, status: StatusCode) -> FetchError {
    match status.as_u16() {
        401 | 403 => FetchError::Unauthorized { service: service.to_string(), status: status.as_u16() },
        code => FetchError::Status { service: service.to_string(), status: code },
    }
}

fn cache_key(url: &str, query: &[(&str, String)]) -> String {
    let mut parts: Vec<String> = query
        .iter()
        .filter(|(k, _)| !SECRET_PARAMS.contains(k))
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    parts.sort();
    format!("{}?{}", url, parts.join("&"))
}
