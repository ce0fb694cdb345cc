// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use prism_core::init_tracing;
use prism_render::{Culling, RenderSize};
use prism_render_vk::VkOptions;
use prism_scene::Scene;
use tracing::info;

mod config;
mod headless;
mod interactive;
mod session;

use config::load_cfg;
use session::Session;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scene file (s72)
    #[arg(long)]
    scene: PathBuf,
    /// Camera active at startup: "user" or a scene camera name
    #[arg(long)]
    camera: Option<String>,
    /// Exact name of the GPU to render on
    #[arg(long = "physical-device")]
    physical_device: Option<String>,
    /// Window or capture size in pixels
    #[arg(long = "drawing-size", num_args = 2, value_names = ["W", "H"])]
    drawing_size: Option<Vec<u32>>,
    #[arg(long, value_enum, default_value_t = CullingArg::None)]
    culling: CullingArg,
    /// Replace the window with a scripted event file
    #[arg(long, value_name = "EVENTS")]
    headless: Option<PathBuf>,
    /// Log average frame time every second
    #[arg(long)]
    measure: bool,
    /// Headless: draw only after a scripted AVAILABLE
    #[arg(long = "limit-fps")]
    limit_fps: bool,
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CullingArg {
    None,
    Frustum,
}

impl From<CullingArg> for Culling {
    fn from(c: CullingArg) -> Self {
        match c {
            CullingArg::None => Culling::None,
            CullingArg::Frustum => Culling::Frustum,
        }
    }
}

impl Args {
    fn render_size(&self) -> Result<RenderSize> {
        let Some(wh) = &self.drawing_size else {
            return Ok(VkOptions::default().size);
        };
        let size = RenderSize::new(wh[0], wh[1]);
        if size.is_empty() {
            bail!("--drawing-size must be non-zero, got {}x{}", size.width, size.height);
        }
        Ok(size)
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);

    let size = args.render_size()?;
    let opts = VkOptions {
        size,
        clear_color: cfg.render.clear_color,
        vsync: cfg.render.vsync,
        vsync_mode: cfg.render.present_mode.into(),
        physical_device: args.physical_device.clone(),
    };

    let scene = Scene::load(&args.scene)
        .with_context(|| format!("loading scene {}", args.scene.display()))?;
    let session = Session::new(scene, &cfg, size.aspect(), args.camera.as_deref())?;
    let culling = args.culling.into();

    match &args.headless {
        Some(events) => {
            info!("headless, events = {}", events.display());
            headless::run(session, opts, culling, args.limit_fps, args.measure, events)
        }
        None => interactive::run(session, opts, culling, args.limit_fps, args.measure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawing_size_takes_two_values() {
        let args = Args::try_parse_from([
            "prism",
            "--scene",
            "a.s72",
            "--drawing-size",
            "640",
            "480",
            "--culling",
            "frustum",
        ])
        .unwrap();
        assert_eq!(args.render_size().unwrap(), RenderSize::new(640, 480));
        assert_eq!(Culling::from(args.culling), Culling::Frustum);
        assert_eq!(args.config, PathBuf::from("prism.toml"));
    }

    #[test]
    fn zero_drawing_size_is_rejected() {
        let args =
            Args::try_parse_from(["prism", "--scene", "a.s72", "--drawing-size", "0", "480"])
                .unwrap();
        assert!(args.render_size().is_err());
    }

    #[test]
    fn scene_is_required_and_culling_is_closed() {
        assert!(Args::try_parse_from(["prism"]).is_err());
        assert!(
            Args::try_parse_from(["prism", "--scene", "a.s72", "--culling", "bvh"]).is_err()
        );
    }

    #[test]
    fn headless_flags() {
        let args = Args::try_parse_from([
            "prism",
            "--scene",
            "a.s72",
            "--headless",
            "events.txt",
            "--limit-fps",
            "--measure",
        ])
        .unwrap();
        assert_eq!(args.headless, Some(PathBuf::from("events.txt")));
        assert!(args.limit_fps && args.measure);
        assert_eq!(args.render_size().unwrap(), VkOptions::default().size);
    }
}
