// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use prism_math::{Aabb, Vec3};

use crate::error::SceneError;
use crate::graph::MaterialId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl Topology {
    pub fn parse(s: &str) -> Result<Self, SceneError> {
        Ok(match s {
            "POINT_LIST" => Topology::PointList,
            "LINE_LIST" => Topology::LineList,
            "LINE_STRIP" => Topology::LineStrip,
            "TRIANGLE_LIST" => Topology::TriangleList,
            "TRIANGLE_STRIP" => Topology::TriangleStrip,
            "TRIANGLE_FAN" => Topology::TriangleFan,
            other => {
                return Err(SceneError::UnknownEnum {
                    what: "topology",
                    value: other.to_string(),
                })
            }
        })
    }
}

/// Element formats that may appear in attribute and index streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementFormat {
    R32Sfloat,
    R32G32Sfloat,
    R32G32B32Sfloat,
    R32G32B32A32Sfloat,
    R8Unorm,
    R8G8Unorm,
    R8G8B8Unorm,
    R8G8B8A8Unorm,
    R32Uint,
}

impl ElementFormat {
    pub fn parse(s: &str) -> Result<Self, SceneError> {
        Ok(match s {
            "R32_SFLOAT" => ElementFormat::R32Sfloat,
            "R32G32_SFLOAT" => ElementFormat::R32G32Sfloat,
            "R32G32B32_SFLOAT" => ElementFormat::R32G32B32Sfloat,
            "R32G32B32A32_SFLOAT" => ElementFormat::R32G32B32A32Sfloat,
            "R8_UNORM" => ElementFormat::R8Unorm,
            "R8G8_UNORM" => ElementFormat::R8G8Unorm,
            "R8G8B8_UNORM" => ElementFormat::R8G8B8Unorm,
            "R8G8B8A8_UNORM" => ElementFormat::R8G8B8A8Unorm,
            "UINT32" | "R32_UINT" => ElementFormat::R32Uint,
            other => {
                return Err(SceneError::UnknownEnum {
                    what: "format",
                    value: other.to_string(),
                })
            }
        })
    }

    pub fn byte_size(self) -> usize {
        match self {
            ElementFormat::R8Unorm => 1,
            ElementFormat::R8G8Unorm => 2,
            ElementFormat::R8G8B8Unorm => 3,
            ElementFormat::R32Sfloat | ElementFormat::R8G8B8A8Unorm | ElementFormat::R32Uint => 4,
            ElementFormat::R32G32Sfloat => 8,
            ElementFormat::R32G32B32Sfloat => 12,
            ElementFormat::R32G32B32A32Sfloat => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Position,
    Normal,
    Tangent,
    TexCoord,
    Color,
}

impl Attribute {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "POSITION" => Attribute::Position,
            "NORMAL" => Attribute::Normal,
            "TANGENT" => Attribute::Tangent,
            "TEXCOORD" => Attribute::TexCoord,
            "COLOR" => Attribute::Color,
            _ => return None,
        })
    }

    /// Byte offset of this attribute inside [`Vertex`].
    fn vertex_offset(self) -> usize {
        match self {
            Attribute::Position => 0,
            Attribute::Normal => 12,
            Attribute::Tangent => 24,
            Attribute::TexCoord => 40,
            Attribute::Color => 48,
        }
    }

    /// Widest element this slot can hold.
    fn slot_size(self) -> usize {
        match self {
            Attribute::Position | Attribute::Normal => 12,
            Attribute::Tangent => 16,
            Attribute::TexCoord => 8,
            Attribute::Color => 4,
        }
    }
}

/// Interleaved vertex as uploaded to the GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
    pub texcoord: [f32; 2],
    pub color: [u8; 4],
}

#[derive(Clone, Debug)]
pub struct AttributeStream {
    pub src: PathBuf,
    pub offset: usize,
    pub stride: usize,
    pub format: ElementFormat,
}

#[derive(Clone, Debug)]
pub struct IndexStream {
    pub src: PathBuf,
    pub offset: usize,
    pub format: ElementFormat,
}

/// CPU geometry ready for upload.
#[derive(Clone, Debug, Default)]
pub struct MeshPayload {
    pub vertices: Vec<Vertex>,
    pub indices: Option<Vec<u32>>,
}

/// What a mesh's `material` entry resolved to at load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialRef {
    /// No material given; draws with the simple shading model.
    Default,
    Resolved(MaterialId),
    /// Points at something that is not a material. Instances are skipped at draw time.
    Unresolved(usize),
}

#[derive(Clone, Debug)]
pub struct Mesh {
    pub name: String,
    pub topology: Topology,
    pub count: usize,
    pub material: MaterialRef,
    pub payload: MeshPayload,
    /// Object-space bounds of the positions.
    pub bounds: Aabb,
}

impl Mesh {
    /// Reads every attribute stream into interleaved vertices. Files are read once
    /// each, even when several streams share one.
    pub fn load(
        name: impl Into<String>,
        topology: Topology,
        count: usize,
        material: MaterialRef,
        attributes: &[(Attribute, AttributeStream)],
        indices: Option<&IndexStream>,
    ) -> Result<Self, SceneError> {
        let mut files: HashMap<PathBuf, Vec<u8>> = HashMap::new();
        // Meshes without a COLOR stream draw opaque white.
        let blank = Vertex {
            color: [255; 4],
            ..Vertex::default()
        };
        let mut vertices = vec![blank; count];

        for (attr, stream) in attributes {
            let width = stream.format.byte_size().min(attr.slot_size());
            let bytes = read_cached(&mut files, &stream.src)?;
            for (i, vertex) in vertices.iter_mut().enumerate() {
                let start = stream.offset + i * stream.stride;
                let src = slice_checked(bytes, &stream.src, start, width)?;
                let dst = bytemuck::bytes_of_mut(vertex);
                let at = attr.vertex_offset();
                dst[at..at + width].copy_from_slice(src);
            }
        }

        let indices = match indices {
            Some(stream) => {
                if stream.format != ElementFormat::R32Uint {
                    return Err(SceneError::UnknownEnum {
                        what: "index format",
                        value: format!("{:?}", stream.format),
                    });
                }
                let bytes = read_cached(&mut files, &stream.src)?;
                let raw = slice_checked(bytes, &stream.src, stream.offset, count * 4)?;
                let indices: Vec<u32> = raw
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                if let Some(&index) = indices.iter().find(|&&i| i as usize >= count) {
                    return Err(SceneError::IndexOutOfRange {
                        mesh: name.into(),
                        index,
                        vertices: count,
                    });
                }
                Some(indices)
            }
            None => None,
        };

        let bounds = Aabb::from_points(vertices.iter().map(|v| Vec3::from_array(v.position)));

        Ok(Self {
            name: name.into(),
            topology,
            count,
            material,
            payload: MeshPayload { vertices, indices },
            bounds,
        })
    }
}

fn read_cached<'a>(
    files: &'a mut HashMap<PathBuf, Vec<u8>>,
    path: &Path,
) -> Result<&'a [u8], SceneError> {
    if !files.contains_key(path) {
        let bytes = fs::read(path).map_err(|source| SceneError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        files.insert(path.to_path_buf(), bytes);
    }
    Ok(files.get(path).map(Vec::as_slice).unwrap_or_default())
}

fn slice_checked<'a>(
    bytes: &'a [u8],
    path: &Path,
    offset: usize,
    len: usize,
) -> Result<&'a [u8], SceneError> {
    bytes
        .get(offset..offset.saturating_add(len))
        .ok_or_else(|| SceneError::Truncated {
            path: path.to_path_buf(),
            offset,
            needed: len,
            len: bytes.len(),
        })
}
