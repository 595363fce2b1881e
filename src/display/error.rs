/*
 *  display/error.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Render surface failures. Every one of these is fatal to the loop.
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

use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum HardwareError {
    /// Panel bring-up failed
    InitializationFailed(String),

    /// Geometry or mapping the surface cannot drive
    InvalidConfiguration(String),

    /// Frame does not match the panel geometry
    BufferSizeMismatch { expected: usize, actual: usize },

    /// show() called before init() or after release()
    NotInitialized,

    /// Swapping the frame to the panel failed
    SwapFailed(String),

    /// I/O on the device or snapshot file
    Io(std::io::Error),

    /// Generic error with message
    Other(String),
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareError::InitializationFailed(msg) =>
                write!(f, "Panel initialization failed: {}", msg),
            HardwareError::InvalidConfiguration(msg) =>
                write!(f, "Invalid panel configuration: {}", msg),
            HardwareError::BufferSizeMismatch { expected, actual } =>
                write!(f, "Frame size mismatch: expected {} pixels, got {}", expected, actual),
            HardwareError::NotInitialized =>
                write!(f, "Render surface is not initialized"),
            HardwareError::SwapFailed(msg) =>
                write!(f, "Frame swap failed: {}", msg),
            HardwareError::Io(err) =>
                write!(f, "Surface I/O error: {}", err),
            HardwareError::Other(msg) =>
                write!(f, "{}", msg),
        }
    }
}

impl Error for HardwareError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HardwareError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HardwareError {
    fn from(err: std::io::Error) -> Self {
        HardwareError::Io(err)
    }
}
