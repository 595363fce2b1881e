/*
 *  display/drivers/mock.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Mock render surface for testing without hardware
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

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::MatrixConfig;
use crate::display::Frame;
use crate::display::error::HardwareError;
use crate::display::traits::{RenderSurface, SurfaceCapabilities, check_geometry};

/// Mock surface for tests
///
/// Records every call and keeps a copy of the last frame shown. Clone the
/// handle from [`MockSurface::state`] before boxing the surface to keep
/// inspecting it.
#[derive(Debug, Clone)]
pub struct MockSurface {
    capabilities: SurfaceCapabilities,
    state: Arc<Mutex<MockSurfaceState>>,
}

/// Internal state for the mock surface (shared for inspection in tests)
#[derive(Debug, Default)]
pub struct MockSurfaceState {
    pub init_count: usize,
    pub show_count: usize,
    pub release_count: usize,
    pub last_brightness: Option<u8>,
    pub hardware_mapping: Option<String>,
    pub gpio_slowdown: Option<u32>,
    pub is_initialized: bool,
    pub last_frame: Option<Frame>,

    /// Simulate failures (for error testing)
    pub simulate_show_failure: bool,
    pub simulate_init_failure: bool,
}

impl MockSurface {
    pub fn new() -> Self {
        Self {
            capabilities: SurfaceCapabilities {
                name: "mock",
                width: 0,
                height: 0,
                max_fps: 120,
                supports_brightness: true,
            },
            state: Arc::new(Mutex::new(MockSurfaceState::default())),
        }
    }

    pub fn state(&self) -> Arc<Mutex<MockSurfaceState>> {
        Arc::clone(&self.state)
    }

    fn lock(&self) -> MutexGuard<'_, MockSurfaceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface for MockSurface {
    fn capabilities(&self) -> &SurfaceCapabilities {
        &self.capabilities
    }

    fn init(&mut self, matrix: &MatrixConfig) -> Result<(), HardwareError> {
        let (w, h) = (matrix.width(), matrix.height());
        {
            let mut state = self.lock();
            if state.simulate_init_failure {
                return Err(HardwareError::InitializationFailed("Simulated init failure".to_string()));
            }
            state.init_count += 1;
            state.is_initialized = true;
            state.last_brightness = Some(matrix.brightness);
            state.hardware_mapping = Some(matrix.hardware_mapping.clone());
            state.gpio_slowdown = Some(matrix.gpio_slowdown);
        }
        self.capabilities.width = w;
        self.capabilities.height = h;
        Ok(())
    }

    fn set_brightness(&mut self, percent: u8) -> Result<(), HardwareError> {
        self.lock().last_brightness = Some(percent);
        Ok(())
    }

    fn show(&mut self, frame: &Frame) -> Result<(), HardwareError> {
        check_geometry(&self.capabilities, frame)?;
        let mut state = self.lock();
        if !state.is_initialized {
            return Err(HardwareError::NotInitialized);
        }
        if state.simulate_show_failure {
            return Err(HardwareError::SwapFailed("Simulated show failure".to_string()));
        }
        state.show_count += 1;
        state.last_frame = Some(frame.clone());
        Ok(())
    }

    fn release(&mut self) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.release_count += 1;
        state.is_initialized = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::pixelcolor::Rgb888;
    use embedded_graphics::prelude::*;

    fn matrix() -> MatrixConfig {
        MatrixConfig { rows: 16, cols: 32, chain_length: 2, ..Default::default() }
    }

    #[test]
    fn test_mock_surface_init() {
        let mut surface = MockSurface::new();
        let state = surface.state();
        surface.init(&matrix()).unwrap();

        assert_eq!(surface.dimensions(), (64, 16));
        let s = state.lock().unwrap();
        assert_eq!(s.init_count, 1);
        assert!(s.is_initialized);
        assert_eq!(s.last_brightness, Some(70));
        assert_eq!(s.hardware_mapping.as_deref(), Some("adafruit-hat"));
    }

    #[test]
    fn test_mock_surface_show_keeps_frame() {
        let mut surface = MockSurface::new();
        surface.init(&matrix()).unwrap();
        let mut frame = Frame::new(64, 16, Rgb888::BLACK);
        frame.set_pixel(3, 3, Rgb888::GREEN);

        surface.show(&frame).unwrap();

        let state = surface.state();
        let s = state.lock().unwrap();
        assert_eq!(s.show_count, 1);
        assert_eq!(s.last_frame.as_ref().unwrap().pixel(3, 3), Some(Rgb888::GREEN));
    }

    #[test]
    fn test_mock_surface_rejects_wrong_geometry() {
        let mut surface = MockSurface::new();
        surface.init(&matrix()).unwrap();
        let frame = Frame::new(32, 32, Rgb888::BLACK);
        assert!(matches!(
            surface.show(&frame),
            Err(HardwareError::BufferSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_mock_surface_simulated_failure() {
        let mut surface = MockSurface::new();
        surface.init(&matrix()).unwrap();
        let frame = Frame::new(64, 16, Rgb888::BLACK);

        surface.state().lock().unwrap().simulate_show_failure = true;
        assert!(surface.show(&frame).is_err());

        surface.state().lock().unwrap().simulate_show_failure = false;
        assert!(surface.show(&frame).is_ok());
    }

    #[test]
    fn test_show_after_release_fails() {
        let mut surface = MockSurface::new();
        surface.init(&matrix()).unwrap();
        surface.release().unwrap();
        let frame = Frame::new(64, 16, Rgb888::BLACK);
        assert!(matches!(surface.show(&frame), Err(HardwareError::NotInitialized)));
    }
}
