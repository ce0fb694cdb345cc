// SPDX-License-Identifier: CEPL-1.0
use std::path::{Path, PathBuf};

use prism_math::Vec3;

use crate::error::SceneError;
use crate::graph::TextureId;

/// Shading model; the numeric tag travels to shaders in push constants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MaterialKind {
    #[default]
    Simple,
    Lambertian,
    Pbr,
    Mirror,
    Environment,
}

impl MaterialKind {
    pub fn tag(self) -> u32 {
        match self {
            MaterialKind::Simple => 0,
            MaterialKind::Lambertian => 1,
            MaterialKind::Pbr => 2,
            MaterialKind::Mirror => 3,
            MaterialKind::Environment => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureShape {
    Flat,
    /// Six square faces stacked vertically in the source image.
    Cube,
}

impl TextureShape {
    pub fn parse(s: &str) -> Result<Self, SceneError> {
        match s {
            "2D" => Ok(TextureShape::Flat),
            "cube" => Ok(TextureShape::Cube),
            other => Err(SceneError::UnknownEnum {
                what: "texture type",
                value: other.to_string(),
            }),
        }
    }

    pub fn layers(self) -> u32 {
        match self {
            TextureShape::Flat => 1,
            TextureShape::Cube => 6,
        }
    }
}

/// How texel bytes are to be interpreted by the sampler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TexelEncoding {
    Linear,
    Srgb,
    /// Shared-exponent HDR packed into RGBA8.
    Rgbe,
}

impl TexelEncoding {
    pub fn parse(s: &str) -> Result<Self, SceneError> {
        match s {
            "linear" => Ok(TexelEncoding::Linear),
            "srgb" => Ok(TexelEncoding::Srgb),
            "rgbe" => Ok(TexelEncoding::Rgbe),
            other => Err(SceneError::UnknownEnum {
                what: "texture format",
                value: other.to_string(),
            }),
        }
    }
}

/// CPU-side RGBA8 texel payload. GPU residency is tracked by the renderer.
#[derive(Clone, Debug)]
pub struct Texture {
    pub label: String,
    pub shape: TextureShape,
    pub encoding: TexelEncoding,
    /// Face size; for cubes this is one face.
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Texture {
    /// 1x1 texture holding a constant; used for material channels given as numbers.
    pub fn constant(label: impl Into<String>, rgba: [f32; 4], encoding: TexelEncoding) -> Self {
        let to_byte = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self {
            label: label.into(),
            shape: TextureShape::Flat,
            encoding,
            width: 1,
            height: 1,
            pixels: rgba.map(to_byte).to_vec(),
        }
    }

    pub fn from_rgb(label: impl Into<String>, rgb: Vec3, encoding: TexelEncoding) -> Self {
        Self::constant(label, [rgb.x, rgb.y, rgb.z, 1.0], encoding)
    }

    pub fn from_scalar(label: impl Into<String>, v: f32) -> Self {
        Self::constant(label, [v, v, v, 1.0], TexelEncoding::Linear)
    }

    /// Decodes a PNG. Cube maps must be six square faces stacked vertically.
    pub fn load(
        path: &Path,
        shape: TextureShape,
        encoding: TexelEncoding,
    ) -> Result<Self, SceneError> {
        let img = image::open(path)
            .map_err(|source| SceneError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        let (width, mut height) = img.dimensions();
        if shape == TextureShape::Cube {
            if height != width * 6 {
                return Err(SceneError::Format(format!(
                    "{}: cube map must be W x 6W, got {width}x{height}",
                    path.display()
                )));
            }
            height = width;
        }
        Ok(Self {
            label: path.display().to_string(),
            shape,
            encoding,
            width,
            height,
            pixels: img.into_raw(),
        })
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    pub kind: MaterialKind,
    pub normal_map: TextureId,
    pub displacement_map: Option<TextureId>,
    pub albedo: Option<TextureId>,
    pub roughness: Option<TextureId>,
    pub metalness: Option<TextureId>,
}

impl Material {
    /// Every texture this material samples, normal map first.
    pub fn textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        std::iter::once(self.normal_map)
            .chain(self.displacement_map)
            .chain(self.albedo)
            .chain(self.roughness)
            .chain(self.metalness)
    }
}

/// Image-based lighting source.
#[derive(Clone, Debug)]
pub struct Environment {
    pub name: String,
    pub radiance: TextureId,
}

/// Source files referenced by a scene are resolved relative to the scene file.
pub(crate) fn resolve(scene_dir: &Path, src: &str) -> PathBuf {
    scene_dir.join(src)
}
