/*
 *  display/traits.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Render surface abstraction over the LED panel
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

use crate::config::MatrixConfig;
use crate::display::Frame;
use crate::display::error::HardwareError;

/// Surface capabilities and metadata
#[derive(Debug, Clone)]
pub struct SurfaceCapabilities {
    /// Human readable surface name for logs
    pub name: &'static str,

    /// Width in pixels once initialized
    pub width: u32,

    /// Height in pixels once initialized
    pub height: u32,

    /// Maximum recommended frame rate
    pub max_fps: u32,

    /// Whether brightness can be changed at runtime
    pub supports_brightness: bool,
}

/// Minimal hardware abstraction for the matrix.
///
/// The render loop owns the surface exclusively. Each frame is handed over
/// with `show`, which returns once the panel displays it; the panel keeps
/// the last frame until the next successful `show`.
pub trait RenderSurface: Send {
    fn capabilities(&self) -> &SurfaceCapabilities;

    fn dimensions(&self) -> (u32, u32) {
        let caps = self.capabilities();
        (caps.width, caps.height)
    }

    /// Bring the panel up with the given geometry, brightness, hardware
    /// mapping and GPIO slowdown.
    fn init(&mut self, matrix: &MatrixConfig) -> Result<(), HardwareError>;

    /// Brightness in percent, 1..=100
    fn set_brightness(&mut self, percent: u8) -> Result<(), HardwareError>;

    /// Swap `frame` onto the panel.
    fn show(&mut self, frame: &Frame) -> Result<(), HardwareError>;

    /// Blank and hand the panel back.
    fn release(&mut self) -> Result<(), HardwareError>;
}

/// Boxed surface as held by the loop
pub type BoxedSurface = Box<dyn RenderSurface>;

pub(crate) fn check_geometry(caps: &SurfaceCapabilities, frame: &Frame) -> Result<(), HardwareError> {
    let expected = (caps.width * caps.height) as usize;
    let actual = frame.width() * frame.height();
    if expected != actual || frame.width() as u32 != caps.width {
        return Err(HardwareError::BufferSizeMismatch { expected, actual });
    }
    Ok(())
}
