// SPDX-License-Identifier: CEPL-1.0
use std::path::Path;

use anyhow::{bail, Result};
use prism_math::{aabb_in_frustum, Mat4};
use prism_scene::{CameraRegistry, MaterialRef, MeshInstance, Scene, TextureId};
use tracing::{debug, info, warn};

use crate::backend::FrameBackend;
use crate::capture::write_ppm;
use crate::deletion::DeletionQueue;
use crate::draw::{DrawItem, FrameUniforms, PushConstants};
use crate::lazy::LazyResource;
use crate::present::{Acquire, HeadlessImages, Present, PresentMode};
use crate::ring::FrameRing;
use crate::RenderSize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Culling {
    #[default]
    None,
    Frustum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Headless tick arrived before the next scripted `AVAILABLE`.
    NotReady,
    /// Acquire reported the image set out of date; it has been recreated.
    Stale,
    /// Zero-sized surface.
    Minimized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Submitted {
        slot: usize,
        image: u32,
        draws: usize,
        culled: usize,
    },
    Skipped(SkipReason),
}

/// Runs one frame-ring cycle per tick over a [`FrameBackend`].
///
/// Owns the per-slot and global deletion queues and the residency of every mesh
/// and texture in the scene it was built for.
pub struct FrameOrchestrator<B: FrameBackend> {
    backend: B,
    ring: FrameRing<DeletionQueue<B::Destroy>>,
    global: DeletionQueue<B::Destroy>,
    meshes: Vec<LazyResource<B::Mesh>>,
    textures: Vec<LazyResource<B::Texture>>,
    headless: Option<HeadlessImages>,
    culling: Culling,
    size: RenderSize,
    pending_resize: bool,
    last_submitted: Option<(usize, u32)>,
    instances: Vec<MeshInstance>,
    visible: Vec<(usize, PushConstants)>,
    frames: u64,
}

impl<B: FrameBackend> FrameOrchestrator<B> {
    pub fn new(backend: B, scene: &Scene, culling: Culling, limit_fps: bool) -> Self {
        let size = backend.size();
        let headless = match backend.mode() {
            PresentMode::Headless => Some(HeadlessImages::new(
                crate::SWAPCHAIN_IMAGE_COUNT,
                limit_fps,
            )),
            PresentMode::Interactive => None,
        };
        info!(
            "frame orchestrator: {:?} mode, culling {:?}, {}x{}",
            backend.mode(),
            culling,
            size.width,
            size.height
        );
        Self {
            backend,
            ring: FrameRing::new(|_| DeletionQueue::new()),
            global: DeletionQueue::new(),
            meshes: scene.meshes.iter().map(|_| LazyResource::new()).collect(),
            textures: scene.textures.iter().map(|_| LazyResource::new()).collect(),
            headless,
            culling,
            size,
            pending_resize: false,
            last_submitted: None,
            instances: Vec::new(),
            visible: Vec::new(),
            frames: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames
    }

    pub fn culling(&self) -> Culling {
        self.culling
    }

    pub fn set_culling(&mut self, culling: Culling) {
        self.culling = culling;
    }

    pub fn mesh_resident(&self, index: usize) -> bool {
        self.meshes.get(index).is_some_and(LazyResource::is_resident)
    }

    pub fn texture_resident(&self, index: usize) -> bool {
        self.textures.get(index).is_some_and(LazyResource::is_resident)
    }

    /// Records an external resize; the image set is rebuilt at the end of the next tick.
    pub fn resize(&mut self, size: RenderSize) {
        if size != self.size {
            self.size = size;
            self.pending_resize = true;
        }
    }

    /// Scripted `AVAILABLE`: the next synthetic image may be drawn into.
    pub fn mark_available(&mut self) {
        match &mut self.headless {
            Some(images) => images.mark_available(),
            None => warn!("AVAILABLE ignored outside headless mode"),
        }
    }

    pub fn advance_frame(
        &mut self,
        scene: &Scene,
        cameras: &CameraRegistry,
    ) -> Result<FrameOutcome> {
        self.draw_frame(scene, cameras, false)
    }

    /// `force` draws into the current headless image even when no `AVAILABLE`
    /// has released it.
    fn draw_frame(
        &mut self,
        scene: &Scene,
        cameras: &CameraRegistry,
        force: bool,
    ) -> Result<FrameOutcome> {
        if self.size.is_empty() {
            return Ok(FrameOutcome::Skipped(SkipReason::Minimized));
        }

        let slot = self.ring.advance();
        self.backend.wait_slot(slot)?;

        let backend = &mut self.backend;
        let flushed = self.ring.current_mut().flush(|r| backend.destroy(r));
        if flushed > 0 {
            debug!("slot {slot}: destroyed {flushed} deferred resources");
        }

        let acquired = match &self.headless {
            Some(images) if force => Acquire::Ready(images.current()),
            Some(images) => images.acquire(),
            None => self.backend.acquire(slot)?,
        };
        let image = match acquired {
            Acquire::Ready(image) => image,
            Acquire::NotReady => return Ok(FrameOutcome::Skipped(SkipReason::NotReady)),
            Acquire::Stale => {
                self.recreate_swapchain()?;
                return Ok(FrameOutcome::Skipped(SkipReason::Stale));
            }
        };
        // The slot's fence has signaled, so its uniform buffer is free to rewrite.
        let camera = cameras.view_camera();
        let uniforms = FrameUniforms::new(
            camera.view(&scene.graph),
            camera.projection(),
            camera.eye(&scene.graph),
        );
        self.backend.write_uniforms(slot, &uniforms)?;
        self.backend.reset_slot(slot)?;

        let culled = self.gather_visible(scene, cameras)?;
        self.ensure_environment(scene)?;

        let draws: Vec<DrawItem<'_, B::Mesh>> = self
            .visible
            .iter()
            .filter_map(|&(index, push)| {
                let mesh = &scene.meshes[index];
                self.meshes[index].handle().map(|handle| DrawItem {
                    mesh: handle,
                    topology: mesh.topology,
                    count: mesh.count as u32,
                    push,
                })
            })
            .collect();
        let draw_count = draws.len();
        self.backend.record(slot, image, &draws)?;
        drop(draws);

        self.backend.submit(slot, image)?;
        self.last_submitted = Some((slot, image));
        self.frames += 1;

        let presented = match &mut self.headless {
            Some(images) => {
                images.consume();
                Present::Done
            }
            None => self.backend.present(slot, image)?,
        };
        if presented == Present::Stale || self.pending_resize {
            self.recreate_swapchain()?;
        }

        Ok(FrameOutcome::Submitted {
            slot,
            image,
            draws: draw_count,
            culled,
        })
    }

    /// Fills `visible` with instances that pass culling and are resident. Returns
    /// how many were culled.
    fn gather_visible(&mut self, scene: &Scene, cameras: &CameraRegistry) -> Result<usize> {
        scene.collect_instances(&mut self.instances);
        self.visible.clear();

        let clip_from_world = match self.culling {
            Culling::Frustum => {
                let camera = cameras.culling_camera();
                Some(camera.projection() * camera.view(&scene.graph))
            }
            Culling::None => None,
        };

        let mut culled = 0;
        for instance in &self.instances {
            let index = instance.mesh.index();
            let mesh = &scene.meshes[index];
            if mesh.count == 0 {
                continue;
            }
            if let Some(clip) = clip_from_world {
                let clip_from_object: Mat4 = clip * instance.world;
                if !aabb_in_frustum(&clip_from_object, &mesh.bounds) {
                    culled += 1;
                    continue;
                }
            }

            let Some(kind) = scene.material_kind(instance.mesh) else {
                debug!("mesh {:?}: material did not resolve, skipping", mesh.name);
                continue;
            };
            if let MaterialRef::Resolved(material) = mesh.material {
                let textures = scene.materials[material.index()].textures();
                if !ensure_textures(&mut self.textures, &mut self.backend, scene, textures)? {
                    continue;
                }
            }

            let backend = &mut self.backend;
            if !self.meshes[index].ensure_resident(|| backend.upload_mesh(mesh))? {
                continue;
            }
            self.visible.push((index, PushConstants::new(instance.world, kind)));
        }
        Ok(culled)
    }

    fn ensure_environment(&mut self, scene: &Scene) -> Result<()> {
        if let Some(env) = &scene.environment {
            ensure_textures(
                &mut self.textures,
                &mut self.backend,
                scene,
                std::iter::once(env.radiance),
            )?;
        }
        Ok(())
    }

    /// Waits for the device to go idle, destroys everything deferred, and rebuilds
    /// the image set at the current size.
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        if self.size.is_empty() {
            self.pending_resize = true;
            return Ok(());
        }
        self.backend.wait_idle()?;
        self.flush_all();
        self.backend.recreate(self.size)?;
        self.pending_resize = false;
        info!("image set recreated at {}x{}", self.size.width, self.size.height);
        Ok(())
    }

    /// Queue covering the most recent use of any resource: the last submitted slot.
    fn release_queue(&mut self) -> &mut DeletionQueue<B::Destroy> {
        let slot = self
            .last_submitted
            .map(|(slot, _)| slot)
            .unwrap_or_else(|| self.ring.index());
        match self.ring.get_mut(slot) {
            Some(queue) => queue,
            None => &mut self.global,
        }
    }

    /// Drops the device copy of a mesh. Destruction waits for the slot fence that
    /// covers its last draw.
    pub fn release_mesh(&mut self, index: usize) -> bool {
        let Some(mut res) = self.meshes.get_mut(index).map(std::mem::take) else {
            return false;
        };
        let released = res.release(|h| B::retire_mesh(h, self.release_queue()));
        self.meshes[index] = res;
        released
    }

    pub fn release_texture(&mut self, index: usize) -> bool {
        let Some(mut res) = self.textures.get_mut(index).map(std::mem::take) else {
            return false;
        };
        let released = res.release(|h| B::retire_texture(h, self.release_queue()));
        self.textures[index] = res;
        released
    }

    /// Hands every resident resource to the global queue, which only drains at
    /// device idle.
    pub fn release_all(&mut self) {
        let global = &mut self.global;
        for res in &mut self.meshes {
            res.release(|h| B::retire_mesh(h, global));
        }
        for res in &mut self.textures {
            res.release(|h| B::retire_texture(h, global));
        }
    }

    fn flush_all(&mut self) {
        let backend = &mut self.backend;
        for queue in self.ring.iter_mut() {
            queue.flush(|r| backend.destroy(r));
        }
        self.global.flush(|r| backend.destroy(r));
    }

    /// Writes the image the last submitted slot rendered into as PPM. With
    /// nothing submitted yet, one frame of the current scene state is drawn first.
    pub fn save_frame(
        &mut self,
        path: &Path,
        scene: &Scene,
        cameras: &CameraRegistry,
    ) -> Result<()> {
        // A stale image set costs one skipped attempt.
        for _ in 0..2 {
            if self.last_submitted.is_some() {
                break;
            }
            debug!("SAVE {}: drawing a first frame", path.display());
            self.draw_frame(scene, cameras, true)?;
        }
        let Some((slot, image)) = self.last_submitted else {
            bail!("SAVE {}: no frame could be rendered", path.display());
        };
        self.backend.wait_slot(slot)?;
        let captured = self.backend.read_back(slot, image)?;
        write_ppm(path, &captured)?;
        Ok(())
    }

    /// Device idle, then every deferred and resident resource is destroyed.
    pub fn shutdown(&mut self) -> Result<()> {
        self.backend.wait_idle()?;
        self.release_all();
        self.flush_all();
        Ok(())
    }
}

impl<B: FrameBackend> Drop for FrameOrchestrator<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("orchestrator teardown: {e:#}");
        }
    }
}

fn ensure_textures<B: FrameBackend>(
    textures: &mut [LazyResource<B::Texture>],
    backend: &mut B,
    scene: &Scene,
    ids: impl Iterator<Item = TextureId>,
) -> Result<bool> {
    let mut ready = true;
    for id in ids {
        let texture = &scene.textures[id.index()];
        ready &= textures[id.index()].ensure_resident(|| backend.upload_texture(texture))?;
    }
    Ok(ready)
}
