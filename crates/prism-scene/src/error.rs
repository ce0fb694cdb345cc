// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use thiserror::Error;

/// Load-time failures. Any of these aborts the scene load; there is no partial scene.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed scene json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not an s72-v1 scene: {0}")]
    Format(String),
    #[error("unknown {what} {value:?}")]
    UnknownEnum { what: &'static str, value: String },
    #[error("{object} {name:?}: missing {key}")]
    MissingKey {
        object: &'static str,
        name: String,
        key: &'static str,
    },
    #[error("{object} {name:?}: reference {index} is not a {expected}")]
    BadReference {
        object: &'static str,
        name: String,
        index: usize,
        expected: &'static str,
    },
    #[error("{path}: truncated, needed {needed} bytes at offset {offset}, file has {len}")]
    Truncated {
        path: PathBuf,
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("driver {name:?}: {reason}")]
    InvalidDriver { name: String, reason: String },
    #[error("texture {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("mesh {mesh:?}: index {index} is out of range for {vertices} vertices")]
    IndexOutOfRange {
        mesh: String,
        index: u32,
        vertices: usize,
    },
    #[error("node {name:?}: children form a cycle")]
    Cycle { name: String },
    #[error("unknown camera {0:?}")]
    UnknownCamera(String),
}
