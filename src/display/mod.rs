/*
 *  display/mod.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display subsystem: render surfaces, the frame scheduler and cycling
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

use embedded_graphics::pixelcolor::Rgb888;
use serde::Serialize;

use crate::vframebuf::VarFrameBuf;

// Core trait definitions
pub mod traits;
pub mod error;

// Render surfaces
pub mod drivers;

// Frame loop
pub mod cycle;
pub mod scheduler;

/// One full panel frame, owned by the loop and lent to the active plugin.
pub type Frame = VarFrameBuf<Rgb888>;

/// Lifecycle of the render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

// Re-exports for convenience
pub use traits::{BoxedSurface, RenderSurface, SurfaceCapabilities};
pub use error::HardwareError;
pub use drivers::{HeadlessSurface, MockSurface};
pub use cycle::CycleState;
pub use scheduler::{ExitReason, Scheduler, SchedulerError, TickOutcome};
