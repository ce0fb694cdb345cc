// SPDX-License-Identifier: CEPL-1.0
use std::path::Path;

use tracing::info;

use crate::camera::CameraDesc;
use crate::driver::Driver;
use crate::error::SceneError;
use crate::graph::{MeshId, MeshInstance, SceneGraph};
use crate::loader;
use crate::material::{Environment, Material, MaterialKind, Texture};
use crate::mesh::{MaterialRef, Mesh};

/// A loaded scene. Everything is immutable after load except node transforms,
/// which drivers rewrite every tick.
#[derive(Clone, Debug)]
pub struct Scene {
    pub name: String,
    pub graph: SceneGraph,
    pub meshes: Vec<Mesh>,
    pub cameras: Vec<CameraDesc>,
    pub drivers: Vec<Driver>,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
    pub environment: Option<Environment>,
}

impl Scene {
    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let scene = loader::load_file(path)?;
        scene.log_statistics();
        Ok(scene)
    }

    /// Parses s72 text; relative geometry and texture paths resolve against `base`.
    pub fn from_s72(text: &str, base: &Path) -> Result<Self, SceneError> {
        loader::parse(text, base)
    }

    /// Largest last-keyframe time over all drivers; the looping period.
    pub fn loop_period(&self) -> f32 {
        self.drivers.iter().map(Driver::end_time).fold(0.0, f32::max)
    }

    /// Writes every driver's value at `time` into its node. Drivers evaluate in
    /// file order, so a later driver on the same channel wins.
    pub fn animate(&mut self, time: f32) {
        for driver in &self.drivers {
            driver.apply(time, &mut self.graph.node_mut(driver.node).transform);
        }
    }

    pub fn collect_instances(&self, out: &mut Vec<MeshInstance>) {
        self.graph.collect_instances(out);
    }

    /// Shading model for a mesh; `None` when its material reference did not resolve.
    pub fn material_kind(&self, mesh: MeshId) -> Option<MaterialKind> {
        match self.meshes[mesh.index()].material {
            MaterialRef::Default => Some(MaterialKind::Simple),
            MaterialRef::Resolved(id) => Some(self.materials[id.index()].kind),
            MaterialRef::Unresolved(_) => None,
        }
    }

    pub fn log_statistics(&self) {
        info!(
            "scene {:?}: {} nodes, {} roots, {} meshes, {} cameras, {} drivers, {} materials, {} textures{}",
            self.name,
            self.graph.nodes().len(),
            self.graph.roots().len(),
            self.meshes.len(),
            self.cameras.len(),
            self.drivers.len(),
            self.materials.len(),
            self.textures.len(),
            if self.environment.is_some() { ", environment" } else { "" },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SceneClock;
    use prism_math::Vec3;

    const BOUNCE: &str = r#"[
        "s72-v1",
        { "type": "SCENE", "name": "bounce", "roots": [2] },
        { "type": "NODE", "name": "ball", "mesh": 3 },
        { "type": "MESH", "name": "pt", "topology": "POINT_LIST", "count": 1,
          "attributes": {
            "POSITION": { "src": "pt.b72", "offset": 0, "stride": 12, "format": "R32G32B32_SFLOAT" }
          } },
        { "type": "DRIVER", "name": "up-down", "node": 2, "channel": "translation",
          "times": [0, 1, 2], "values": [0,0,0, 0,0,1, 0,0,0] },
        { "type": "DRIVER", "name": "grow", "node": 2, "channel": "scale",
          "times": [1.5], "values": [3,3,3], "interpolation": "STEP" }
    ]"#;

    fn bounce() -> Scene {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pt.b72"), [0u8; 12]).unwrap();
        Scene::from_s72(BOUNCE, dir.path()).unwrap()
    }

    #[test]
    fn drivers_write_their_channels_only() {
        let mut scene = bounce();
        assert_eq!(scene.loop_period(), 2.0);

        let mut clock = SceneClock::new(scene.loop_period());
        clock.set_playback(5.25, 1.0);
        scene.animate(clock.time());

        let t = scene.graph.nodes()[0].transform;
        assert_eq!(t.translation, Vec3::new(0.0, 0.0, 0.75));
        assert_eq!(t.scale, Vec3::ONE);

        scene.animate(1.5);
        let t = scene.graph.nodes()[0].transform;
        assert_eq!(t.translation, Vec3::new(0.0, 0.0, 0.5));
        assert_eq!(t.scale, Vec3::splat(3.0));

        let mut out = Vec::new();
        scene.collect_instances(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].world.transform_point3(Vec3::X), Vec3::new(3.0, 0.0, 0.5));
        assert_eq!(scene.material_kind(out[0].mesh), Some(MaterialKind::Simple));
    }
}
