// SPDX-License-Identifier: CEPL-1.0
//! s72 scene files: a JSON array whose first element is `"s72-v1"` followed by
//! typed objects. Objects refer to each other by array position, which is
//! remapped here into per-kind arena slots.

use std::collections::BTreeMap;
use std::path::Path;

use prism_math::{Perspective, Quat, Transform, Vec3};
use serde::Deserialize;
use tracing::warn;

use crate::camera::CameraDesc;
use crate::driver::{Channel, Driver, Interpolation};
use crate::error::SceneError;
use crate::graph::{CameraId, MaterialId, MeshId, Node, NodeId, SceneGraph, TextureId};
use crate::material::{
    resolve, Environment, Material, MaterialKind, TexelEncoding, Texture, TextureShape,
};
use crate::mesh::{
    Attribute, AttributeStream, ElementFormat, IndexStream, MaterialRef, Mesh, Topology,
};
use crate::scene::Scene;

const MAGIC: &str = "s72-v1";

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum RawObject {
    Scene(RawScene),
    Node(RawNode),
    Mesh(RawMesh),
    Camera(RawCamera),
    Driver(RawDriver),
    Material(RawMaterial),
    Environment(RawEnvironment),
}

#[derive(Deserialize)]
struct RawScene {
    name: String,
    roots: Vec<usize>,
}

#[derive(Deserialize)]
struct RawNode {
    name: String,
    translation: Option<[f32; 3]>,
    rotation: Option<[f32; 4]>,
    scale: Option<[f32; 3]>,
    #[serde(default)]
    children: Vec<usize>,
    mesh: Option<usize>,
    camera: Option<usize>,
}

#[derive(Deserialize)]
struct RawMesh {
    name: String,
    topology: String,
    count: usize,
    indices: Option<RawIndices>,
    #[serde(default)]
    attributes: BTreeMap<String, RawAttribute>,
    material: Option<usize>,
}

#[derive(Deserialize)]
struct RawIndices {
    src: String,
    #[serde(default)]
    offset: usize,
    format: String,
}

#[derive(Deserialize)]
struct RawAttribute {
    src: String,
    #[serde(default)]
    offset: usize,
    stride: usize,
    format: String,
}

#[derive(Deserialize)]
struct RawCamera {
    name: String,
    perspective: Option<RawPerspective>,
}

#[derive(Deserialize)]
struct RawPerspective {
    aspect: f32,
    vfov: f32,
    near: f32,
    far: Option<f32>,
}

#[derive(Deserialize)]
struct RawDriver {
    name: String,
    node: usize,
    channel: String,
    times: Vec<f32>,
    values: Vec<f32>,
    interpolation: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMaterial {
    name: String,
    normal_map: Option<RawTexture>,
    displacement_map: Option<RawTexture>,
    pbr: Option<RawPbr>,
    lambertian: Option<RawLambertian>,
    mirror: Option<serde_json::Value>,
    environment: Option<serde_json::Value>,
    simple: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawPbr {
    albedo: Option<ColorOrTexture>,
    roughness: Option<ScalarOrTexture>,
    metalness: Option<ScalarOrTexture>,
}

#[derive(Deserialize)]
struct RawLambertian {
    albedo: Option<ColorOrTexture>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColorOrTexture {
    Color([f32; 3]),
    Texture(RawTexture),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarOrTexture {
    Scalar(f32),
    Texture(RawTexture),
}

#[derive(Deserialize)]
struct RawTexture {
    src: String,
    #[serde(rename = "type", default = "default_texture_type")]
    kind: String,
    #[serde(default = "default_texture_format")]
    format: String,
}

fn default_texture_type() -> String {
    "2D".into()
}

fn default_texture_format() -> String {
    "linear".into()
}

#[derive(Deserialize)]
struct RawEnvironment {
    name: String,
    radiance: RawTexture,
}

/// Where each array position landed after remapping.
#[derive(Clone, Copy)]
enum Slot {
    Scene,
    Node(NodeId),
    Mesh(MeshId),
    Camera(CameraId),
    Driver,
    Material(MaterialId),
    Environment,
}

struct Refs {
    slots: Vec<Option<Slot>>,
}

impl Refs {
    fn get(&self, pos: usize) -> Option<Slot> {
        self.slots.get(pos).copied().flatten()
    }

    fn node(&self, object: &'static str, name: &str, pos: usize) -> Result<NodeId, SceneError> {
        match self.get(pos) {
            Some(Slot::Node(id)) => Ok(id),
            _ => Err(bad_ref(object, name, pos, "NODE")),
        }
    }

    fn mesh(&self, object: &'static str, name: &str, pos: usize) -> Result<MeshId, SceneError> {
        match self.get(pos) {
            Some(Slot::Mesh(id)) => Ok(id),
            _ => Err(bad_ref(object, name, pos, "MESH")),
        }
    }

    fn camera(&self, object: &'static str, name: &str, pos: usize) -> Result<CameraId, SceneError> {
        match self.get(pos) {
            Some(Slot::Camera(id)) => Ok(id),
            _ => Err(bad_ref(object, name, pos, "CAMERA")),
        }
    }
}

fn bad_ref(object: &'static str, name: &str, index: usize, expected: &'static str) -> SceneError {
    SceneError::BadReference {
        object,
        name: name.to_string(),
        index,
        expected,
    }
}

pub(crate) fn load_file(path: &Path) -> Result<Scene, SceneError> {
    let text = std::fs::read_to_string(path).map_err(|source| SceneError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse(&text, base)
}

/// Parses s72 text. Relative `src` paths resolve against `base`.
pub(crate) fn parse(text: &str, base: &Path) -> Result<Scene, SceneError> {
    let array: Vec<serde_json::Value> = serde_json::from_str(text)?;
    let mut items = array.into_iter();
    match items.next() {
        Some(serde_json::Value::String(s)) if s == MAGIC => {}
        _ => return Err(SceneError::Format(format!("first element must be {MAGIC:?}"))),
    }

    // Position 0 is the magic string, so objects start at 1.
    let objects = items
        .map(serde_json::from_value::<RawObject>)
        .collect::<Result<Vec<_>, _>>()?;

    let mut slots = vec![None];
    let (mut n_nodes, mut n_meshes, mut n_cameras, mut n_materials) = (0u32, 0u32, 0u32, 0u32);
    for obj in &objects {
        let slot = match obj {
            RawObject::Scene(_) => Slot::Scene,
            RawObject::Node(_) => {
                n_nodes += 1;
                Slot::Node(NodeId(n_nodes - 1))
            }
            RawObject::Mesh(_) => {
                n_meshes += 1;
                Slot::Mesh(MeshId(n_meshes - 1))
            }
            RawObject::Camera(_) => {
                n_cameras += 1;
                Slot::Camera(CameraId(n_cameras - 1))
            }
            RawObject::Driver(_) => Slot::Driver,
            RawObject::Material(_) => {
                n_materials += 1;
                Slot::Material(MaterialId(n_materials - 1))
            }
            RawObject::Environment(_) => Slot::Environment,
        };
        slots.push(Some(slot));
    }
    let refs = Refs { slots };

    let mut scene_header: Option<(String, Vec<NodeId>)> = None;
    let mut nodes = Vec::new();
    let mut cameras = Vec::new();
    let mut materials = Vec::new();
    let mut textures = Vec::new();
    let mut raw_meshes = Vec::new();
    let mut raw_drivers = Vec::new();
    let mut environment = None;

    for obj in objects {
        match obj {
            RawObject::Scene(s) => {
                if scene_header.is_some() {
                    return Err(SceneError::Format("more than one SCENE object".into()));
                }
                let roots = s
                    .roots
                    .iter()
                    .map(|&r| refs.node("SCENE", &s.name, r))
                    .collect::<Result<_, _>>()?;
                scene_header = Some((s.name, roots));
            }
            RawObject::Node(n) => nodes.push(build_node(&refs, n)?),
            RawObject::Camera(c) => {
                let p = c.perspective.ok_or_else(|| SceneError::MissingKey {
                    object: "CAMERA",
                    name: c.name.clone(),
                    key: "perspective",
                })?;
                cameras.push(CameraDesc {
                    name: c.name,
                    perspective: Perspective {
                        aspect: p.aspect,
                        vfov: p.vfov,
                        near: p.near,
                        far: p.far.unwrap_or(f32::INFINITY),
                    },
                });
            }
            RawObject::Material(m) => materials.push(build_material(base, &mut textures, m)?),
            RawObject::Environment(e) => {
                if environment.is_some() {
                    warn!("ignoring extra ENVIRONMENT {:?}", e.name);
                    continue;
                }
                let radiance = push_texture(
                    &mut textures,
                    Texture::load(
                        &resolve(base, &e.radiance.src),
                        TextureShape::parse(&e.radiance.kind)?,
                        TexelEncoding::parse(&e.radiance.format)?,
                    )?,
                );
                environment = Some(Environment {
                    name: e.name,
                    radiance,
                });
            }
            // Meshes and drivers refer to other objects by position; resolve them
            // once every slot is known.
            RawObject::Mesh(m) => raw_meshes.push(m),
            RawObject::Driver(d) => raw_drivers.push(d),
        }
    }

    let (name, roots) =
        scene_header.ok_or_else(|| SceneError::Format("missing SCENE object".into()))?;

    let meshes = raw_meshes
        .into_iter()
        .map(|m| build_mesh(&refs, base, m))
        .collect::<Result<Vec<_>, _>>()?;

    let drivers = raw_drivers
        .into_iter()
        .map(|d| {
            let node = refs.node("DRIVER", &d.name, d.node)?;
            let interpolation = match d.interpolation.as_deref() {
                Some(s) => Interpolation::parse(s)?,
                None => Interpolation::Linear,
            };
            let channel = Channel::parse(&d.channel)?;
            Driver::new(d.name, node, channel, interpolation, d.times, d.values)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Scene {
        name,
        graph: SceneGraph::new(nodes, roots)?,
        meshes,
        cameras,
        drivers,
        materials,
        textures,
        environment,
    })
}

fn build_node(refs: &Refs, n: RawNode) -> Result<Node, SceneError> {
    let mut node = Node::new(n.name.clone());
    node.transform = Transform {
        translation: n.translation.map_or(Vec3::ZERO, Vec3::from_array),
        rotation: n.rotation.map_or(Quat::IDENTITY, Quat::from_array),
        scale: n.scale.map_or(Vec3::ONE, Vec3::from_array),
    };
    node.children = n
        .children
        .iter()
        .map(|&c| refs.node("NODE", &n.name, c))
        .collect::<Result<_, _>>()?;
    node.mesh = n.mesh.map(|m| refs.mesh("NODE", &n.name, m)).transpose()?;
    node.camera = n.camera.map(|c| refs.camera("NODE", &n.name, c)).transpose()?;
    Ok(node)
}

fn build_mesh(refs: &Refs, base: &Path, m: RawMesh) -> Result<Mesh, SceneError> {
    let topology = Topology::parse(&m.topology)?;

    let mut attributes = Vec::with_capacity(m.attributes.len());
    for (key, raw) in &m.attributes {
        let Some(attr) = Attribute::parse(key) else {
            warn!("mesh {:?}: ignoring attribute {key}", m.name);
            continue;
        };
        attributes.push((
            attr,
            AttributeStream {
                src: resolve(base, &raw.src),
                offset: raw.offset,
                stride: raw.stride,
                format: ElementFormat::parse(&raw.format)?,
            },
        ));
    }
    if !attributes.iter().any(|(a, _)| *a == Attribute::Position) {
        return Err(SceneError::MissingKey {
            object: "MESH",
            name: m.name,
            key: "attributes.POSITION",
        });
    }

    let indices = m
        .indices
        .as_ref()
        .map(|raw| -> Result<IndexStream, SceneError> {
            Ok(IndexStream {
                src: resolve(base, &raw.src),
                offset: raw.offset,
                format: ElementFormat::parse(&raw.format)?,
            })
        })
        .transpose()?;

    let material = match m.material {
        None => MaterialRef::Default,
        Some(pos) => match refs.get(pos) {
            Some(Slot::Material(id)) => MaterialRef::Resolved(id),
            _ => {
                warn!("mesh {:?}: material reference {pos} does not resolve", m.name);
                MaterialRef::Unresolved(pos)
            }
        },
    };

    Mesh::load(m.name, topology, m.count, material, &attributes, indices.as_ref())
}

fn push_texture(textures: &mut Vec<Texture>, texture: Texture) -> TextureId {
    textures.push(texture);
    TextureId(textures.len() as u32 - 1)
}

/// The role decides the encoding unless the file declares rgbe.
fn load_texture(
    base: &Path,
    raw: &RawTexture,
    role: TexelEncoding,
) -> Result<Texture, SceneError> {
    let encoding = match TexelEncoding::parse(&raw.format)? {
        TexelEncoding::Rgbe => TexelEncoding::Rgbe,
        _ => role,
    };
    Texture::load(
        &resolve(base, &raw.src),
        TextureShape::parse(&raw.kind)?,
        encoding,
    )
}

fn build_material(
    base: &Path,
    textures: &mut Vec<Texture>,
    m: RawMaterial,
) -> Result<Material, SceneError> {
    let normal = match &m.normal_map {
        Some(raw) => load_texture(base, raw, TexelEncoding::Linear)?,
        None => Texture::from_rgb(
            format!("{}:normal", m.name),
            Vec3::new(0.5, 0.5, 1.0),
            TexelEncoding::Linear,
        ),
    };
    let normal_map = push_texture(textures, normal);
    let displacement_map = match &m.displacement_map {
        Some(raw) => {
            let tex = load_texture(base, raw, TexelEncoding::Linear)?;
            Some(push_texture(textures, tex))
        }
        None => None,
    };

    let mut material = Material {
        name: m.name.clone(),
        kind: MaterialKind::Simple,
        normal_map,
        displacement_map,
        albedo: None,
        roughness: None,
        metalness: None,
    };

    let albedo = |textures: &mut Vec<Texture>, value: Option<&ColorOrTexture>| {
        let tex = match value {
            Some(ColorOrTexture::Texture(raw)) => {
                load_texture(base, raw, TexelEncoding::Srgb)?
            }
            Some(ColorOrTexture::Color(c)) => Texture::from_rgb(
                format!("{}:albedo", m.name),
                Vec3::from_array(*c),
                TexelEncoding::Srgb,
            ),
            None => Texture::from_rgb(
                format!("{}:albedo", m.name),
                Vec3::ONE,
                TexelEncoding::Srgb,
            ),
        };
        Ok::<_, SceneError>(push_texture(textures, tex))
    };
    let scalar = |textures: &mut Vec<Texture>,
                  value: Option<&ScalarOrTexture>,
                  default: f32,
                  what: &str| {
        let tex = match value {
            Some(ScalarOrTexture::Texture(raw)) => {
                load_texture(base, raw, TexelEncoding::Linear)?
            }
            Some(ScalarOrTexture::Scalar(v)) => {
                Texture::from_scalar(format!("{}:{what}", m.name), *v)
            }
            None => Texture::from_scalar(format!("{}:{what}", m.name), default),
        };
        Ok::<_, SceneError>(push_texture(textures, tex))
    };

    if let Some(pbr) = &m.pbr {
        material.kind = MaterialKind::Pbr;
        material.albedo = Some(albedo(textures, pbr.albedo.as_ref())?);
        material.roughness = Some(scalar(textures, pbr.roughness.as_ref(), 1.0, "roughness")?);
        material.metalness = Some(scalar(textures, pbr.metalness.as_ref(), 0.0, "metalness")?);
    } else if let Some(lambertian) = &m.lambertian {
        material.kind = MaterialKind::Lambertian;
        material.albedo = Some(albedo(textures, lambertian.albedo.as_ref())?);
    } else if m.mirror.is_some() {
        material.kind = MaterialKind::Mirror;
    } else if m.environment.is_some() {
        material.kind = MaterialKind::Environment;
    } else if m.simple.is_none() {
        warn!("material {:?} names no shading model, using simple", m.name);
    }

    Ok(material)
}
