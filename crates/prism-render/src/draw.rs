// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use prism_math::{normal_matrix, Mat4, Vec3};
use prism_scene::{MaterialKind, Topology};

/// Per-draw data pushed ahead of each mesh instance. Exactly 128 bytes, the
/// smallest push-constant range devices are required to offer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    pub world: [[f32; 4]; 4],
    /// Inverse-transpose of the world 3x3, stored as three padded columns.
    pub normal: [[f32; 4]; 3],
    pub material: u32,
    pub _pad: [u32; 3],
}

impl PushConstants {
    pub fn new(world: Mat4, material: MaterialKind) -> Self {
        let n = normal_matrix(&world);
        Self {
            world: world.to_cols_array_2d(),
            normal: [
                n.x_axis.to_array(),
                n.y_axis.to_array(),
                n.z_axis.to_array(),
            ],
            material: material.tag(),
            _pad: [0; 3],
        }
    }
}

/// Camera block written into the slot's mapped uniform buffer each frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub eye: [f32; 4],
}

impl FrameUniforms {
    pub fn new(view: Mat4, projection: Mat4, eye: Vec3) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            eye: eye.extend(1.0).to_array(),
        }
    }
}

/// One surviving mesh instance, ready to record.
#[derive(Debug)]
pub struct DrawItem<'a, M> {
    pub mesh: &'a M,
    pub topology: Topology,
    /// Vertex count, or index count when the mesh is indexed.
    pub count: u32,
    pub push: PushConstants,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_fit_minimum_limit() {
        assert_eq!(std::mem::size_of::<PushConstants>(), 128);
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 144);
    }

    #[test]
    fn push_constants_carry_normal_matrix_and_tag() {
        let world = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let pc = PushConstants::new(world, MaterialKind::Lambertian);
        assert_eq!(pc.material, 1);
        assert_eq!(pc.world[0][0], 2.0);
        assert_eq!(pc.normal[0][0], 0.5);
        assert_eq!(pc.normal[1][1], 1.0);
    }
}
