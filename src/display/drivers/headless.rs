/*
 *  display/drivers/headless.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Surface used when no panel driver is linked in. Holds the current
 *  frame in memory and can mirror it to a PPM file for inspection.
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

use log::{debug, info};
use std::path::PathBuf;

use crate::config::{HARDWARE_MAPPINGS, MatrixConfig};
use crate::display::Frame;
use crate::display::error::HardwareError;
use crate::display::traits::{RenderSurface, SurfaceCapabilities, check_geometry};
use crate::file_lock;

#[derive(Debug)]
pub struct HeadlessSurface {
    capabilities: SurfaceCapabilities,
    front: Option<Frame>,
    brightness: u8,
    frames: u64,
    snapshot: Option<PathBuf>,
    snapshot_every: u64,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self {
            capabilities: SurfaceCapabilities {
                name: "headless",
                width: 0,
                height: 0,
                max_fps: 60,
                supports_brightness: true,
            },
            front: None,
            brightness: 100,
            frames: 0,
            snapshot: None,
            snapshot_every: 30,
        }
    }

    /// Mirror every `every`th frame to a binary PPM at `path`.
    pub fn with_snapshot(mut self, path: PathBuf, every: u64) -> Self {
        self.snapshot = Some(path);
        self.snapshot_every = every.max(1);
        self
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames
    }

    pub fn front(&self) -> Option<&Frame> {
        self.front.as_ref()
    }

    /// P6 image of the current frame with brightness applied.
    pub fn to_ppm(&self) -> Option<Vec<u8>> {
        let frame = self.front.as_ref()?;
        let mut out = format!("P6\n{} {}\n255\n", frame.width(), frame.height()).into_bytes();
        let scale = self.brightness as u32;
        out.extend(frame.to_rgb_bytes().into_iter().map(|v| (v as u32 * scale / 100) as u8));
        Some(out)
    }
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface for HeadlessSurface {
    fn capabilities(&self) -> &SurfaceCapabilities {
        &self.capabilities
    }

    fn init(&mut self, matrix: &MatrixConfig) -> Result<(), HardwareError> {
        if !HARDWARE_MAPPINGS.contains(&matrix.hardware_mapping.as_str()) {
            return Err(HardwareError::InvalidConfiguration(format!(
                "unknown hardware mapping '{}'",
                matrix.hardware_mapping
            )));
        }
        self.capabilities.width = matrix.width();
        self.capabilities.height = matrix.height();
        self.brightness = matrix.brightness.clamp(1, 100);
        self.front = None;
        info!(
            "Headless surface {}x{} (mapping {}, slowdown {}, brightness {}%)",
            self.capabilities.width,
            self.capabilities.height,
            matrix.hardware_mapping,
            matrix.gpio_slowdown,
            self.brightness
        );
        Ok(())
    }

    fn set_brightness(&mut self, percent: u8) -> Result<(), HardwareError> {
        self.brightness = percent.clamp(1, 100);
        debug!("Headless brightness {}%", self.brightness);
        Ok(())
    }

    fn show(&mut self, frame: &Frame) -> Result<(), HardwareError> {
        check_geometry(&self.capabilities, frame)?;
        match self.front.as_mut() {
            Some(front) => front.copy_from(frame),
            None => self.front = Some(frame.clone()),
        }
        self.frames += 1;

        if let Some(path) = self.snapshot.as_ref() {
            if self.frames % self.snapshot_every == 0 {
                if let Some(ppm) = self.to_ppm() {
                    file_lock::write_atomic(path, &ppm)?;
                }
            }
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), HardwareError> {
        info!("Headless surface released after {} frames", self.frames);
        self.front = None;
        Ok(())
    }
}
