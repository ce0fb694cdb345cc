// SPDX-License-Identifier: CEPL-1.0
use prism_math::{Mat4, Transform};

use crate::error::SceneError;

macro_rules! index_type {
    ($($(#[$m:meta])* $name:ident),* $(,)?) => {$(
        $(#[$m])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    )*};
}

index_type!(
    /// Slot in [`SceneGraph::nodes`].
    NodeId,
    /// Slot in `Scene::meshes`.
    MeshId,
    /// Slot in `Scene::cameras`.
    CameraId,
    /// Slot in `Scene::materials`.
    MaterialId,
    /// Slot in `Scene::textures`.
    TextureId,
);

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub transform: Transform,
    pub mesh: Option<MeshId>,
    pub camera: Option<CameraId>,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Transform::default(),
            mesh: None,
            camera: None,
            children: Vec::new(),
        }
    }
}

/// One mesh occurrence reached by traversal, with its composed transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshInstance {
    pub node: NodeId,
    pub mesh: MeshId,
    pub world: Mat4,
}

/// Arena-backed node hierarchy. Children and parents are indices into `nodes`.
///
/// A node may appear under several parents in the source data; traversal visits
/// it once per path, while `parent` records only the first parent seen.
#[derive(Clone, Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    parents: Vec<Option<NodeId>>,
    roots: Vec<NodeId>,
}

impl SceneGraph {
    /// Fails when `children` links form a cycle. Sharing a node between parents
    /// is allowed.
    pub fn new(nodes: Vec<Node>, roots: Vec<NodeId>) -> Result<Self, SceneError> {
        if let Some(id) = find_cycle(&nodes) {
            return Err(SceneError::Cycle {
                name: nodes[id.index()].name.clone(),
            });
        }
        let mut parents = vec![None; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for child in &node.children {
                let slot = &mut parents[child.index()];
                if slot.is_none() {
                    *slot = Some(NodeId(i as u32));
                }
            }
        }
        Ok(Self {
            nodes,
            parents,
            roots,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents[id.index()]
    }

    /// Composes local transforms from the root down to `id`, following first parents.
    pub fn world_transform(&self, id: NodeId) -> Mat4 {
        let mut world = self.node(id).transform.to_mat4();
        let mut cursor = self.parent(id);
        while let Some(p) = cursor {
            world = self.node(p).transform.to_mat4() * world;
            cursor = self.parent(p);
        }
        world
    }

    /// Depth-first walk from every root, appending each mesh-bearing node with its
    /// world matrix. Nothing is cached between calls.
    pub fn collect_instances(&self, out: &mut Vec<MeshInstance>) {
        out.clear();
        let mut stack: Vec<(NodeId, Mat4)> = self
            .roots
            .iter()
            .rev()
            .map(|&r| (r, Mat4::IDENTITY))
            .collect();

        while let Some((id, parent_world)) = stack.pop() {
            let node = self.node(id);
            let world = parent_world * node.transform.to_mat4();
            if let Some(mesh) = node.mesh {
                out.push(MeshInstance {
                    node: id,
                    mesh,
                    world,
                });
            }
            for &child in node.children.iter().rev() {
                stack.push((child, world));
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Open,
    Done,
}

/// Iterative depth-first search over `children`. Returns a node whose child
/// link closes a cycle. Child ids must already be in range.
fn find_cycle(nodes: &[Node]) -> Option<NodeId> {
    let mut marks = vec![Mark::New; nodes.len()];
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for start in 0..nodes.len() {
        if marks[start] != Mark::New {
            continue;
        }
        marks[start] = Mark::Open;
        stack.push((start, 0));
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            let Some(child) = nodes[node].children.get(*next) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            *next += 1;
            let child = child.index();
            match marks[child] {
                Mark::Open => return Some(NodeId(node as u32)),
                Mark::New => {
                    marks[child] = Mark::Open;
                    stack.push((child, 0));
                }
                Mark::Done => {}
            }
        }
    }
    None
}
