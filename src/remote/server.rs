/*
 *  remote/server.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  JSON command server: one request per connection
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

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::{RemoteControl, RunCommand};
use crate::config::{CYCLE_DURATION_RANGE, PluginSettings};
use crate::display::LoopState;
use crate::gif_library::GifLibrary;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Accepted commands, tagged by their `command` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    #[serde(alias = "set_mode")]
    SetPlugin { plugin: String },
    SetGif { gif_name: String },
    GetStatus,
    SetBrightness { brightness: i64 },
    GetPluginCycle,
    SetPluginCycle { enabled: bool, plugins: Vec<String>, duration: i64 },
    GetSettings { plugin: String },
    SetSettings { plugin: String, settings: PluginSettings },
    ListGifs,
    AddGif {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        url: Option<String>,
    },
    DeleteGif {
        #[serde(alias = "name")]
        gif_name: String,
    },
    Start,
    Stop,
    Restart,
}

impl Request {
    pub const COMMANDS: [&'static str; 15] = [
        "set_plugin",
        "set_mode",
        "set_gif",
        "get_status",
        "set_brightness",
        "get_plugin_cycle",
        "set_plugin_cycle",
        "get_settings",
        "set_settings",
        "list_gifs",
        "add_gif",
        "delete_gif",
        "start",
        "stop",
        "restart",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self { status: "success", message: message.into(), data: None }
    }

    pub fn with_data(message: impl Into<String>, data: Value) -> Self {
        Self { status: "success", message: message.into(), data: Some(data) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: "error", message: message.into(), data: None }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Decode raw request bytes. Errors come back as the response to send.
pub fn parse_request(raw: &[u8]) -> Result<Request, Response> {
    let value: Value = serde_json::from_slice(raw).map_err(|_| Response::error("Invalid JSON"))?;
    let command = value.get("command").and_then(Value::as_str).unwrap_or_default().to_string();
    if command.is_empty() {
        return Err(Response::error("Missing command"));
    }
    // shutdown stays local: the process is stopped through its signals
    if !Request::COMMANDS.contains(&command.as_str()) {
        return Err(Response::error(format!("Unknown command: {command}")));
    }
    serde_json::from_value(value).map_err(|e| Response::error(format!("Invalid {command} request: {e}")))
}

/// Apply one request.
pub async fn handle_command(remote: &RemoteControl, request: Request) -> Response {
    let gifs = GifLibrary::new(remote.config().gif_directory());
    match request {
        Request::SetPlugin { plugin } => match remote.set_plugin(&plugin) {
            Ok(()) => Response::success(format!("Switched to {plugin}")),
            Err(e) => Response::error(e.to_string()),
        },

        Request::SetGif { gif_name } => {
            if !gifs.exists(&gif_name) {
                return Response::error(format!("GIF '{gif_name}' not found"));
            }
            match remote.set_gif(&gif_name) {
                Ok(()) => Response::success(format!("GIF set to {gif_name}")),
                Err(e) => Response::error(e.to_string()),
            }
        }

        Request::GetStatus => {
            let status = remote.status();
            let config = remote.config();
            let active = status.active_plugin.clone().unwrap_or(config.current_state.active_plugin);
            Response::with_data(
                "Status retrieved",
                json!({
                    "current_plugin": active,
                    "running": status.state == LoopState::Running,
                    "current_gif": config.current_state.active_gif,
                    "state": status.state,
                    "brightness": config.matrix.brightness,
                    "fps": config.defaults.fps,
                    "frames": status.frames,
                    "dropped_frames": status.dropped_frames,
                    "errors": status.last_errors,
                    "version": env!("CARGO_PKG_VERSION"),
                    "build": crate::BUILD_DATE,
                }),
            )
        }

        Request::SetBrightness { brightness } => {
            let Some(percent) = u8::try_from(brightness).ok().filter(|b| (1..=100).contains(b)) else {
                return Response::error("Brightness must be between 1 and 100");
            };
            match remote.set_brightness(percent) {
                Ok(()) => Response::success(format!("Brightness set to {percent}")),
                Err(e) => Response::error(e.to_string()),
            }
        }

        Request::GetPluginCycle => {
            let cycle = remote.plugin_cycle();
            Response::with_data(
                "Plugin cycle retrieved",
                json!({
                    "enabled": cycle.enabled,
                    "plugins": cycle.plugins,
                    "duration": cycle.duration,
                }),
            )
        }

        Request::SetPluginCycle { enabled, plugins, duration } => {
            let (lo, hi) = CYCLE_DURATION_RANGE;
            let Some(duration) = u64::try_from(duration).ok().filter(|d| (lo..=hi).contains(d)) else {
                return Response::error(format!("Duration must be between {lo} and {hi} seconds"));
            };
            match remote.set_plugin_cycle(enabled, plugins, duration) {
                Ok(()) => Response::success("Plugin cycle updated"),
                Err(e) => Response::error(e.to_string()),
            }
        }

        Request::GetSettings { plugin } => match remote.plugin_settings(&plugin) {
            Ok(settings) => Response::with_data(format!("Settings of {plugin}"), Value::Object(settings)),
            Err(e) => Response::error(e.to_string()),
        },

        Request::SetSettings { plugin, settings } => match remote.set_plugin_settings(&plugin, settings) {
            Ok(()) => Response::success(format!("Settings of {plugin} updated")),
            Err(e) => Response::error(e.to_string()),
        },

        Request::ListGifs => match gifs.list() {
            Ok(names) => Response::with_data(format!("{} GIFs", names.len()), json!({ "gifs": names })),
            Err(e) => Response::error(e.to_string()),
        },

        Request::AddGif { name, path, url } => {
            let added = match (path, url) {
                (Some(path), _) => {
                    let name = name.or_else(|| {
                        path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
                    });
                    match name {
                        Some(name) => gifs.add_from_file(&name, &path),
                        None => return Response::error("GIF name required"),
                    }
                }
                (None, Some(url)) => gifs.add_from_url(name.as_deref(), &url).await,
                (None, None) => return Response::error("Either path or url is required"),
            };
            match added {
                Ok(stored) => Response::with_data(format!("GIF '{stored}' added"), json!({ "name": stored })),
                Err(e) => Response::error(e.to_string()),
            }
        }

        Request::DeleteGif { gif_name } => {
            if remote.config().current_state.active_gif == gif_name {
                return Response::error(format!("GIF '{gif_name}' is in use"));
            }
            match gifs.delete(&gif_name) {
                Ok(()) => Response::success(format!("GIF '{gif_name}' deleted")),
                Err(e) => Response::error(e.to_string()),
            }
        }

        Request::Start => {
            remote.request(RunCommand::Start);
            Response::success("Display start requested")
        }
        Request::Stop => {
            remote.request(RunCommand::Stop);
            Response::success("Display stop requested")
        }
        Request::Restart => {
            remote.request(RunCommand::Restart);
            Response::success("Display restart requested")
        }
    }
}

/// Read one request, bounded in size and time.
async fn read_request(stream: &mut TcpStream) -> Result<Vec<u8>, Response> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    let read_all = async {
        loop {
            let n = stream.read(&mut chunk).await.map_err(|e| Response::error(format!("Read failed: {e}")))?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() > MAX_REQUEST_BYTES {
                return Err(Response::error("Request too large"));
            }
            // a complete or malformed document ends the request, clients
            // need not half-close
            match serde_json::from_slice::<Value>(&buf) {
                Err(e) if e.is_eof() => {}
                _ => return Ok(()),
            }
        }
    };
    match tokio::time::timeout(READ_TIMEOUT, read_all).await {
        Ok(Ok(())) => Ok(buf),
        Ok(Err(resp)) => Err(resp),
        Err(_) => Err(Response::error("Request timed out")),
    }
}

async fn handle_client(mut stream: TcpStream, peer: SocketAddr, remote: RemoteControl) {
    let response = match read_request(&mut stream).await {
        Ok(raw) => match parse_request(&raw) {
            Ok(request) => {
                debug!("Remote {}: {:?}", peer, request);
                handle_command(&remote, request).await
            }
            Err(resp) => resp,
        },
        Err(resp) => resp,
    };
    if !response.is_success() {
        warn!("Remote {}: {}", peer, response.message);
    }
    let body = match serde_json::to_vec(&response) {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to encode response: {}", e);
            return;
        }
    };
    if let Err(e) = stream.write_all(&body).await {
        debug!("Remote {}: write failed: {}", peer, e);
    }
    let _ = stream.shutdown().await;
}

/// Accept connections until the task is dropped. Each client gets its own
/// task so a slow one cannot hold up the rest.
pub async fn serve(listener: TcpListener, remote: RemoteControl) {
    if let Ok(addr) = listener.local_addr() {
        info!("Remote command server listening on {}", addr);
    }
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let remote = remote.clone();
                tokio::spawn(handle_client(stream, peer, remote));
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

pub async fn bind(addr: &str) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}
