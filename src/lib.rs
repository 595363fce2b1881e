/*
 *  lib.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Library root: everything the binary and the integration tests share
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

pub mod config;
pub mod errors;
pub mod file_lock;
pub mod vframebuf;
pub mod pacer;
pub mod draw;
pub mod moon_phase;
pub mod gif_library;
pub mod display;
pub mod plugins;
pub mod fetch;
pub mod remote;
pub mod supervisor;

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));
