/*
 *  gif_library.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  The directory of named GIF animations the gif plugin plays
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
use reqwest::header;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::file_lock;

pub const MAX_GIF_BYTES: usize = 16 * 1024 * 1024;
const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum GifError {
    #[error("invalid GIF name '{0}'")]
    InvalidName(String),
    #[error("GIF '{0}' not found")]
    NotFound(String),
    #[error("not a GIF file")]
    NotAGif,
    #[error("GIF too large ({0} bytes)")]
    TooLarge(usize),
    #[error("download failed: {0}")]
    Download(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Names are bare file stems: letters, digits, `-` and `_`. A trailing
/// `.gif` is accepted and dropped.
pub fn sanitize_name(raw: &str) -> Result<String, GifError> {
    let trimmed = raw.trim();
    let stem = trimmed
        .strip_suffix(".gif")
        .or_else(|| trimmed.strip_suffix(".GIF"))
        .unwrap_or(trimmed);
    let ok = !stem.is_empty()
        && stem.len() <= MAX_NAME_LEN
        && stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok { Ok(stem.to_string()) } else { Err(GifError::InvalidName(raw.to_string())) }
}

/// Name for a download when the caller gave none: the last path segment
/// with anything unsafe replaced.
pub fn name_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let last = path.rsplit('/').next()?;
    let stem = last.strip_suffix(".gif").unwrap_or(last);
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

pub fn is_gif(bytes: &[u8]) -> bool {
    bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a")
}

#[derive(Debug, Clone)]
pub struct GifLibrary {
    dir: PathBuf,
}

impl GifLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sorted names of every `.gif` in the directory. A missing directory
    /// is an empty library.
    pub fn list(&self) -> Result<Vec<String>, GifError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .and_then(|x| x.to_str())
                    .is_some_and(|x| x.eq_ignore_ascii_case("gif"))
            })
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    fn file_for(&self, name: &str) -> Result<PathBuf, GifError> {
        let stem = sanitize_name(name)?;
        Ok(self.dir.join(format!("{stem}.gif")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.file_for(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Path of an existing GIF.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, GifError> {
        let path = self.file_for(name)?;
        if path.is_file() { Ok(path) } else { Err(GifError::NotFound(name.to_string())) }
    }

    /// Store `bytes` as `name`, replacing any GIF of the same name.
    pub fn add_bytes(&self, name: &str, bytes: &[u8]) -> Result<String, GifError> {
        let stem = sanitize_name(name)?;
        if bytes.len() > MAX_GIF_BYTES {
            return Err(GifError::TooLarge(bytes.len()));
        }
        if !is_gif(bytes) {
            return Err(GifError::NotAGif);
        }
        let path = self.dir.join(format!("{stem}.gif"));
        file_lock::write_atomic(&path, bytes)?;
        info!("Stored GIF '{}' ({} bytes)", stem, bytes.len());
        Ok(stem)
    }

    /// Copy an uploaded file into the library.
    pub fn add_from_file(&self, name: &str, src: &Path) -> Result<String, GifError> {
        let len = fs::metadata(src)?.len() as usize;
        if len > MAX_GIF_BYTES {
            return Err(GifError::TooLarge(len));
        }
        let bytes = fs::read(src)?;
        self.add_bytes(name, &bytes)
    }

    pub async fn add_from_url(&self, name: Option<&str>, url: &str) -> Result<String, GifError> {
        let name = match name {
            Some(n) => sanitize_name(n)?,
            None => name_from_url(url).ok_or_else(|| GifError::InvalidName(url.to_string()))?,
        };
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GifError::Download(e.to_string()))?;
        let response = client
            .get(url)
            .header(header::ACCEPT, "image/gif")
            .send()
            .await
            .map_err(|e| GifError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GifError::Download(format!("HTTP {}", response.status())));
        }
        if let Some(len) = response.content_length() {
            if len as usize > MAX_GIF_BYTES {
                return Err(GifError::TooLarge(len as usize));
            }
        }
        let bytes = response.bytes().await.map_err(|e| GifError::Download(e.to_string()))?;
        self.add_bytes(&name, &bytes)
    }

    pub fn delete(&self, name: &str) -> Result<(), GifError> {
        let path = self.path_for(name)?;
        fs::remove_file(&path)?;
        info!("Deleted GIF '{}'", name);
        Ok(())
    }
}
