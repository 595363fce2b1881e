/*
 *  plugins/gif.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Animated GIF playback with an optional clock overlay
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

use chrono::{DateTime, Local};
use embedded_graphics::mono_font::ascii::{FONT_4X6, FONT_6X10, FONT_7X13};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, imageops};
use log::{debug, info};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::clock::wall_time;
use super::{DisplayPlugin, PluginDescriptor};
use crate::config::{PluginSettings, SettingsExt};
use crate::display::Frame;
use crate::draw::{self, WHITE};
use crate::errors::{ConfigError, RenderError};
use crate::gif_library::GifLibrary;

const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "gif",
    description: "Animated GIF player",
    needs_network: false,
};

/// Browsers treat a zero delay as "as fast as sensible", 100 ms is the
/// common reading.
const DEFAULT_DELAY: Duration = Duration::from_millis(100);
const MIN_DELAY: Duration = Duration::from_millis(20);

/// One decoded frame, already scaled to the panel.
#[derive(Debug, Clone)]
pub struct GifFrame {
    pub image: Frame,
    pub delay: Duration,
}

/// Decode every frame of `path`, scaled to `width` x `height`.
pub fn decode_gif(path: &Path, width: u32, height: u32) -> Result<Vec<GifFrame>, String> {
    let file = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| e.to_string())?;
    let frames = decoder.into_frames().collect_frames().map_err(|e| e.to_string())?;

    let mut out = Vec::with_capacity(frames.len());
    for f in frames {
        let (num, den) = f.delay().numer_denom_ms();
        let ms = if den == 0 { 0 } else { num / den };
        let delay = match Duration::from_millis(ms as u64) {
            d if d.is_zero() => DEFAULT_DELAY,
            d => d.max(MIN_DELAY),
        };
        let rgba = f.into_buffer();
        let scaled = imageops::resize(&rgba, width, height, imageops::FilterType::Nearest);
        let mut image = Frame::new(width, height, Rgb888::BLACK);
        for (x, y, p) in scaled.enumerate_pixels() {
            // transparent areas stay dark on an LED panel
            if p[3] >= 128 {
                image.set_pixel(x as usize, y as usize, Rgb888::new(p[0], p[1], p[2]));
            }
        }
        out.push(GifFrame { image, delay });
    }
    if out.is_empty() {
        return Err("no frames".to_string());
    }
    Ok(out)
}

/// Index of the frame showing `elapsed` into a looping animation.
pub fn frame_index(delays: impl Iterator<Item = Duration> + Clone, elapsed: Duration) -> usize {
    let total: u128 = delays.clone().map(|d| d.as_millis()).sum();
    if total == 0 {
        return 0;
    }
    let mut t = elapsed.as_millis() % total;
    for (i, d) in delays.enumerate() {
        let ms = d.as_millis();
        if t < ms {
            return i;
        }
        t -= ms;
    }
    0
}

pub struct GifPlugin {
    width: u32,
    height: u32,
    show_clock: bool,
    format_24h: bool,
    loaded: Option<PathBuf>,
    frames: Vec<GifFrame>,
    activated_at: DateTime<Local>,
}

impl GifPlugin {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            show_clock: true,
            format_24h: true,
            loaded: None,
            frames: Vec::new(),
            activated_at: Local::now(),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn draw_clock(&self, now: DateTime<Local>, frame: &mut Frame) -> Result<(), RenderError> {
        let text = if self.format_24h {
            now.format("%H:%M").to_string()
        } else {
            now.format("%I:%M%p").to_string().to_lowercase()
        };
        let font = draw::pick_font(&text, self.width.saturating_sub(2), &[&FONT_7X13, &FONT_6X10, &FONT_4X6]);
        let x = (self.width as i32 - draw::text_width(&text, font) as i32) / 2;
        let y = (self.height as i32 - font.character_size.height as i32) / 2;
        draw::draw_text_outlined(frame, &text, x, y, font, WHITE, Rgb888::BLACK)?;
        Ok(())
    }
}

impl DisplayPlugin for GifPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn activate(&mut self, settings: &PluginSettings) -> Result<(), ConfigError> {
        let name = settings.str_or("current_gif", "");
        if name.is_empty() {
            return Err(ConfigError::missing("gif", "current_gif"));
        }
        let library = GifLibrary::new(settings.str_or("directory", "resources/images/gifs"));
        let path = library
            .path_for(&name)
            .map_err(|e| ConfigError::invalid("gif", "current_gif", e.to_string()))?;

        if self.loaded.as_deref() != Some(path.as_path()) || self.frames.is_empty() {
            let frames = decode_gif(&path, self.width, self.height)
                .map_err(|e| ConfigError::invalid("gif", "current_gif", e))?;
            info!("Loaded GIF '{}': {} frames", name, frames.len());
            self.frames = frames;
            self.loaded = Some(path);
        }
        self.show_clock = settings.bool_or("show_clock", true);
        self.format_24h = settings.bool_or("format_24h", true);
        self.activated_at = Local::now();
        Ok(())
    }

    fn render_frame(&self, elapsed: Duration, frame: &mut Frame) -> Result<(), RenderError> {
        if self.frames.is_empty() {
            return Ok(draw::draw_placeholder(frame, "GIF", "not loaded", &FONT_4X6, WHITE)?);
        }
        let i = frame_index(self.frames.iter().map(|f| f.delay), elapsed);
        let image = &self.frames[i].image;
        if image.size() == frame.size() {
            frame.copy_from(image);
        } else {
            return Err(RenderError::Draw(format!(
                "frame is {}x{}, GIF scaled to {}x{}",
                frame.width(),
                frame.height(),
                image.width(),
                image.height()
            )));
        }
        if self.show_clock {
            self.draw_clock(wall_time(self.activated_at, elapsed), frame)?;
        }
        Ok(())
    }

    fn deactivate(&mut self) {
        debug!("Releasing {} GIF frames", self.frames.len());
        self.frames.clear();
        self.frames.shrink_to_fit();
        self.loaded = None;
    }
}
