// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::Path;

use prism_render_vk::VsyncMode;
use prism_scene::CameraControls;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_true")]
    pub vsync: bool,
    #[serde(default)]
    pub present_mode: PresentModeCfg,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Fifo,
    Mailbox,
}

impl From<PresentModeCfg> for VsyncMode {
    fn from(mode: PresentModeCfg) -> Self {
        match mode {
            PresentModeCfg::Fifo => VsyncMode::Fifo,
            PresentModeCfg::Mailbox => VsyncMode::Mailbox,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PlaybackCfg {
    #[serde(default = "default_true")]
    pub looping: bool,
    #[serde(default = "default_true")]
    pub playing: bool,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CameraCfg {
    #[serde(default = "default_sensitivity")]
    pub mouse_sensitivity_deg: f32,
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,
    #[serde(default = "default_zoom_speed")]
    pub zoom_speed: f32,
}

impl CameraCfg {
    pub fn controls(&self) -> CameraControls {
        CameraControls {
            mouse_sensitivity: self.mouse_sensitivity_deg.to_radians(),
            move_speed: self.move_speed,
            zoom_speed: self.zoom_speed,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
pub struct AppCfg {
    #[serde(default)]
    pub render: RenderCfg,
    #[serde(default)]
    pub playback: PlaybackCfg,
    #[serde(default)]
    pub camera: CameraCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync: true,
            present_mode: PresentModeCfg::Fifo,
        }
    }
}

impl Default for PlaybackCfg {
    fn default() -> Self {
        PlaybackCfg {
            looping: true,
            playing: true,
        }
    }
}

impl Default for CameraCfg {
    fn default() -> Self {
        CameraCfg {
            mouse_sensitivity_deg: default_sensitivity(),
            move_speed: default_move_speed(),
            zoom_speed: default_zoom_speed(),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.05, 0.05, 0.08, 1.0]
}
fn default_true() -> bool {
    true
}
fn default_sensitivity() -> f32 {
    1.0
}
fn default_move_speed() -> f32 {
    10.0
}
fn default_zoom_speed() -> f32 {
    0.1
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(text)
}

/// A missing file means defaults; a malformed one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(e) => {
            debug!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert!(cfg.render.vsync);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Fifo);
        assert!(cfg.playback.looping && cfg.playback.playing);
        assert_eq!(cfg.camera.zoom_speed, 0.1);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [render]
            present_mode = "mailbox"
            [playback]
            looping = false
            [camera]
            mouse_sensitivity_deg = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Mailbox);
        assert!(cfg.render.vsync);
        assert!(!cfg.playback.looping);
        assert!(cfg.playback.playing);
        let controls = cfg.camera.controls();
        assert!((controls.mouse_sensitivity - 2f32.to_radians()).abs() < 1e-6);
        assert_eq!(controls.move_speed, 10.0);
    }

    #[test]
    fn unknown_present_mode_is_rejected() {
        assert!(parse_cfg("[render]\npresent_mode = \"immediate\"").is_err());
    }

    #[test]
    fn malformed_or_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prism.toml");
        assert!(load_cfg(&path).render.vsync);

        fs::write(&path, "[render\nvsync = false").unwrap();
        assert!(load_cfg(&path).render.vsync);

        fs::write(&path, "[render]\nvsync = false").unwrap();
        assert!(!load_cfg(&path).render.vsync);
    }
}
