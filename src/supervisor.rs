/*
 *  supervisor.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Start, stop and restart of the display loop inside the process
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

use log::{error, info, warn};

use crate::config::Config;
use crate::display::{BoxedSurface, ExitReason, Scheduler, SchedulerError};
use crate::plugins::PluginRegistry;
use crate::remote::{RunCommand, SharedState};

/// Builds a fresh surface for every run of the loop.
pub type SurfaceFactory = Box<dyn FnMut(&Config) -> BoxedSurface + Send>;

pub struct Supervisor {
    shared: SharedState,
    make_surface: SurfaceFactory,
}

impl Supervisor {
    pub fn new(shared: SharedState, make_surface: SurfaceFactory) -> Self {
        Self { shared, make_surface }
    }

    /// Run the loop until shutdown. A stopped loop waits here for `start`
    /// or `restart`; restart re-reads the configuration first. A loop that
    /// cannot activate any plugin waits the same way, only a hardware
    /// failure is returned.
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        loop {
            let config = self.shared.config();
            let registry = PluginRegistry::from_enabled(
                &config.plugins.enabled,
                config.matrix.width(),
                config.matrix.height(),
            );
            let surface = (self.make_surface)(&config);
            let scheduler = Scheduler::new(registry, surface, self.shared.view());
            info!("Display loop starting");

            let reason = match scheduler.run().await {
                Ok(reason) => reason,
                Err(SchedulerError::NoPlugin) => {
                    error!("No enabled plugin accepts its settings, display idle");
                    ExitReason::Stopped
                }
                Err(e) => return Err(e),
            };
            match reason {
                ExitReason::Shutdown => {
                    info!("Display loop shut down");
                    return Ok(());
                }
                ExitReason::Restart => self.reload(),
                ExitReason::Stopped => {
                    info!("Display loop stopped, waiting for start");
                    loop {
                        match self.shared.next_run_command().await {
                            RunCommand::Start => break,
                            RunCommand::Restart => {
                                self.reload();
                                break;
                            }
                            RunCommand::Shutdown => return Ok(()),
                            RunCommand::Stop => continue,
                        }
                    }
                }
            }
        }
    }

    fn reload(&self) {
        if let Err(e) = self.shared.reload() {
            warn!("Reload failed, keeping current config: {}", e);
        }
    }
}
