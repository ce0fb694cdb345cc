// SPDX-License-Identifier: CEPL-1.0
//! Scene side of the renderer: the arena node graph, animation drivers and
//! playback clock, cameras, materials and the s72 loader.

mod camera;
mod clock;
mod driver;
mod error;
mod graph;
mod loader;
mod material;
mod mesh;
mod scene;

pub use camera::{
    Camera, CameraControls, CameraDesc, CameraRegistry, SceneCamera, UserCamera, USER_CAMERA,
};
pub use clock::SceneClock;
pub use driver::{Channel, ChannelValue, Driver, Interpolation};
pub use error::SceneError;
pub use graph::{
    CameraId, MaterialId, MeshId, MeshInstance, Node, NodeId, SceneGraph, TextureId,
};
pub use material::{
    Environment, Material, MaterialKind, TexelEncoding, Texture, TextureShape,
};
pub use mesh::{
    Attribute, AttributeStream, ElementFormat, IndexStream, MaterialRef, Mesh, MeshPayload,
    Topology, Vertex,
};
pub use scene::Scene;
