//! Launch/attach arguments and the engine command line they imply.
//!
//! The adapter never spawns the engine itself; it listens for the engine's
//! debugger connection and hands back the arguments a launcher should pass.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use serde::Deserialize;

use crate::{
    breakpoints::Breakpoint,
    error::{DebugError, DebugResult},
    paths,
};

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
/// The engine's default remote debug port.
pub const DEFAULT_PORT: u16 = 6007;

/// `launch`/`attach` request arguments, as written in `launch.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LaunchArgs {
    pub project: Option<PathBuf>,
    pub address: String,
    /// `0` binds a free port.
    pub port: u16,
    /// Scene to run instead of the project's main scene.
    pub scene: Option<String>,
    pub profiling: bool,
    pub single_threaded_scene: bool,
    pub debug_collisions: bool,
    pub debug_paths: bool,
    pub debug_navigation: bool,
    pub debug_avoidance: bool,
    pub debug_stringnames: bool,
    pub frame_delay: Option<u32>,
    pub time_scale: Option<f64>,
    pub disable_vsync: bool,
    pub fixed_fps: Option<u32>,
    /// Appended verbatim, split on whitespace.
    pub additional_options: Option<String>,
}

impl Default for LaunchArgs {
    fn default() -> Self {
        Self {
            project: None,
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            scene: None,
            profiling: false,
            single_threaded_scene: false,
            debug_collisions: false,
            debug_paths: false,
            debug_navigation: false,
            debug_avoidance: false,
            debug_stringnames: false,
            frame_delay: None,
            time_scale: None,
            disable_vsync: false,
            fixed_fps: None,
            additional_options: None,
        }
    }
}

impl LaunchArgs {
    /// Where to listen for the engine. Accepts `tcp://` prefixed addresses.
    pub fn socket_addr(&self) -> DebugResult<SocketAddr> {
        let host = self.address.trim_start_matches("tcp://");
        let ip: IpAddr = host
            .parse()
            .map_err(|e| DebugError::InvalidRequest(format!("invalid address {host:?}: {e}")))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Engine arguments for a debug run connecting back to `addr` with
    /// `breakpoints` already set.
    pub fn engine_args(&self, addr: SocketAddr, breakpoints: &[Breakpoint]) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(project) = &self.project {
            args.push("--path".to_string());
            args.push(project.display().to_string());
        }
        args.push("--remote-debug".to_string());
        args.push(format!("tcp://{addr}"));

        let switches = [
            (self.profiling, "--profiling"),
            (self.single_threaded_scene, "--single-threaded-scene"),
            (self.debug_collisions, "--debug-collisions"),
            (self.debug_paths, "--debug-paths"),
            (self.debug_navigation, "--debug-navigation"),
            (self.debug_avoidance, "--debug-avoidance"),
            (self.debug_stringnames, "--debug-stringnames"),
            (self.disable_vsync, "--disable-vsync"),
        ];
        args.extend(
            switches
                .into_iter()
                .filter(|(on, _)| *on)
                .map(|(_, flag)| flag.to_string()),
        );
        if let Some(delay) = self.frame_delay {
            args.extend(["--frame-delay".to_string(), delay.to_string()]);
        }
        if let Some(scale) = self.time_scale {
            args.extend(["--time-scale".to_string(), scale.to_string()]);
        }
        if let Some(fps) = self.fixed_fps {
            args.extend(["--fixed-fps".to_string(), fps.to_string()]);
        }
        if let Some(scene) = self.scene.as_deref().filter(|s| *s != "main") {
            args.push(scene.to_string());
        }
        if !breakpoints.is_empty() {
            let list: Vec<String> = breakpoints
                .iter()
                .map(|bp| {
                    let file = paths::to_res_path(self.project.as_deref(), &bp.file);
                    format!("{file}:{}", bp.line)
                })
                .collect();
            args.push("--breakpoints".to_string());
            args.push(list.join(","));
        }
        if let Some(extra) = &self.additional_options {
            args.extend(extra.split_whitespace().map(str::to_string));
        }
        args
    }
}

/// Result of a successful `launch`.
#[derive(Debug, Clone, PartialEq)]
pub struct Launched {
    pub addr: SocketAddr,
    pub engine_args: Vec<String>,
}
