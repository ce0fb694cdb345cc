// SPDX-License-Identifier: CEPL-1.0
//! Drives `FrameOrchestrator` against a fake device with its own GPU timeline:
//! every submission finishes a fixed number of CPU steps after it is queued,
//! and the device executes submissions in order.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::Result;
use prism_platform::{HeadlessEvent, Timeline};
use prism_render::{
    Acquire, CapturedImage, Culling, DeletionQueue, DrawItem, FrameBackend, FrameOrchestrator,
    FrameOutcome, FrameUniforms, PixelOrder, Present, PresentMode, RenderSize, RowOrder,
    SkipReason, MAX_FRAMES_IN_FLIGHT,
};
use prism_scene::{CameraControls, CameraRegistry, Mesh, Scene, Texture};

const SCENE: &str = r#"[
    "s72-v1",
    { "type": "SCENE", "name": "synthetic", "roots": [2, 3, 4] },
    { "type": "NODE", "name": "near", "mesh": 5 },
    { "type": "NODE", "name": "behind", "translation": [20, 20, 20], "mesh": 5 },
    { "type": "NODE", "name": "orphan", "mesh": 6 },
    { "type": "MESH", "name": "tri", "topology": "TRIANGLE_LIST", "count": 3,
      "attributes": {
        "POSITION": { "src": "tri.b72", "offset": 0, "stride": 12, "format": "R32G32B32_SFLOAT" }
      },
      "material": 7 },
    { "type": "MESH", "name": "lost", "topology": "TRIANGLE_LIST", "count": 3,
      "attributes": {
        "POSITION": { "src": "tri.b72", "offset": 0, "stride": 12, "format": "R32G32B32_SFLOAT" }
      },
      "material": 2 },
    { "type": "MATERIAL", "name": "red", "lambertian": { "albedo": [1, 0, 0] } }
]"#;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const LATENCY: u64 = 5;
const UNSIGNALED: u64 = u64::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Destroy {
    Mesh(u32),
    Texture(u32),
}

#[derive(Debug)]
struct MeshHandle(u32);

#[derive(Debug)]
struct TextureHandle(u32);

#[derive(Debug)]
struct Submission {
    done_at: u64,
    meshes: Vec<u32>,
}

struct SyntheticGpu {
    mode: PresentMode,
    size: RenderSize,
    now: u64,
    queue_free_at: u64,
    fences: [u64; MAX_FRAMES_IN_FLIGHT],
    submissions: Vec<Submission>,
    recorded: Vec<u32>,
    next_handle: u32,
    mesh_uploads: Vec<String>,
    texture_uploads: usize,
    defer_uploads: usize,
    destroyed: Vec<(Destroy, u64)>,
    violations: Vec<String>,
    max_in_flight: usize,
    acquires: VecDeque<Acquire>,
    presents: VecDeque<Present>,
    next_image: u32,
    recreated: Vec<RenderSize>,
    uniforms_written: usize,
    unmapped_uniforms: bool,
}

impl SyntheticGpu {
    fn new(mode: PresentMode) -> Self {
        Self {
            mode,
            size: RenderSize::new(WIDTH, HEIGHT),
            now: 0,
            queue_free_at: 0,
            fences: [0; MAX_FRAMES_IN_FLIGHT],
            submissions: Vec::new(),
            recorded: Vec::new(),
            next_handle: 0,
            mesh_uploads: Vec::new(),
            texture_uploads: 0,
            defer_uploads: 0,
            destroyed: Vec::new(),
            violations: Vec::new(),
            max_in_flight: 0,
            acquires: VecDeque::new(),
            presents: VecDeque::new(),
            next_image: 0,
            recreated: Vec::new(),
            uniforms_written: 0,
            unmapped_uniforms: false,
        }
    }

    fn in_flight(&self) -> usize {
        self.submissions
            .iter()
            .filter(|s| s.done_at > self.now)
            .count()
    }

    fn handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl FrameBackend for SyntheticGpu {
    type Mesh = MeshHandle;
    type Texture = TextureHandle;
    type Destroy = Destroy;

    fn mode(&self) -> PresentMode {
        self.mode
    }

    fn size(&self) -> RenderSize {
        self.size
    }

    fn wait_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.fences[slot];
        if fence == UNSIGNALED {
            anyhow::bail!("slot {slot} fence was reset but never submitted");
        }
        self.now = self.now.max(fence);
        Ok(())
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        if self.fences[slot] > self.now {
            self.violations.push(format!("slot {slot} reset while in flight"));
        }
        self.fences[slot] = UNSIGNALED;
        Ok(())
    }

    fn acquire(&mut self, _slot: usize) -> Result<Acquire> {
        Ok(self.acquires.pop_front().unwrap_or_else(|| {
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % 3;
            Acquire::Ready(image)
        }))
    }

    fn upload_mesh(&mut self, mesh: &Mesh) -> Result<Option<MeshHandle>> {
        if self.defer_uploads > 0 {
            self.defer_uploads -= 1;
            return Ok(None);
        }
        self.mesh_uploads.push(mesh.name.clone());
        Ok(Some(MeshHandle(self.handle())))
    }

    fn upload_texture(&mut self, _texture: &Texture) -> Result<Option<TextureHandle>> {
        self.texture_uploads += 1;
        Ok(Some(TextureHandle(self.handle())))
    }

    fn retire_mesh(mesh: MeshHandle, queue: &mut DeletionQueue<Destroy>) {
        queue.push(Destroy::Mesh(mesh.0));
    }

    fn retire_texture(texture: TextureHandle, queue: &mut DeletionQueue<Destroy>) {
        queue.push(Destroy::Texture(texture.0));
    }

    fn destroy(&mut self, request: Destroy) {
        if let Destroy::Mesh(id) = request {
            for s in &self.submissions {
                if s.meshes.contains(&id) && s.done_at > self.now {
                    self.violations.push(format!(
                        "mesh {id} destroyed at {} while a submission finishing at {} reads it",
                        self.now, s.done_at
                    ));
                }
            }
        }
        self.destroyed.push((request, self.now));
    }

    fn write_uniforms(&mut self, slot: usize, _uniforms: &FrameUniforms) -> Result<()> {
        if self.unmapped_uniforms {
            anyhow::bail!("slot {slot}: write to unmapped buffer");
        }
        self.uniforms_written += 1;
        Ok(())
    }

    fn record(
        &mut self,
        _slot: usize,
        _image: u32,
        draws: &[DrawItem<'_, MeshHandle>],
    ) -> Result<()> {
        self.recorded = draws.iter().map(|d| d.mesh.0).collect();
        Ok(())
    }

    fn submit(&mut self, slot: usize, _image: u32) -> Result<()> {
        let done_at = self.now.max(self.queue_free_at) + LATENCY;
        self.queue_free_at = done_at;
        self.fences[slot] = done_at;
        self.submissions.push(Submission {
            done_at,
            meshes: std::mem::take(&mut self.recorded),
        });
        self.max_in_flight = self.max_in_flight.max(self.in_flight());
        self.now += 1;
        Ok(())
    }

    fn present(&mut self, _slot: usize, _image: u32) -> Result<Present> {
        Ok(self.presents.pop_front().unwrap_or(Present::Done))
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.now = self.now.max(self.queue_free_at);
        Ok(())
    }

    fn recreate(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        self.recreated.push(size);
        Ok(())
    }

    fn read_back(&mut self, _slot: usize, _image: u32) -> Result<CapturedImage> {
        let pixels = [0u8, 128, 255, 255].repeat((self.size.width * self.size.height) as usize);
        Ok(CapturedImage {
            width: self.size.width,
            height: self.size.height,
            pixels,
            order: PixelOrder::Bgra,
            rows: RowOrder::TopDown,
        })
    }
}

fn load_scene(dir: &Path) -> Scene {
    let pts: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let bytes: Vec<u8> = pts.iter().flat_map(|f| f.to_le_bytes()).collect();
    fs::write(dir.join("tri.b72"), bytes).unwrap();
    Scene::from_s72(SCENE, dir).unwrap()
}

fn cameras() -> CameraRegistry {
    CameraRegistry::new(WIDTH as f32 / HEIGHT as f32, CameraControls::default())
}

fn setup(
    mode: PresentMode,
    culling: Culling,
    limit_fps: bool,
) -> (Scene, FrameOrchestrator<SyntheticGpu>) {
    let dir = tempfile::tempdir().unwrap();
    let scene = load_scene(dir.path());
    let orchestrator = FrameOrchestrator::new(SyntheticGpu::new(mode), &scene, culling, limit_fps);
    (scene, orchestrator)
}

#[test]
fn never_more_than_two_frames_in_flight() {
    let (scene, mut frames) = setup(PresentMode::Interactive, Culling::None, false);
    let cams = cameras();

    let mut slots = Vec::new();
    for _ in 0..40 {
        match frames.advance_frame(&scene, &cams).unwrap() {
            FrameOutcome::Submitted { slot, .. } => slots.push(slot),
            other => panic!("unexpected {other:?}"),
        }
    }

    let gpu = frames.backend();
    assert!(gpu.max_in_flight <= MAX_FRAMES_IN_FLIGHT, "{}", gpu.max_in_flight);
    assert_eq!(gpu.max_in_flight, MAX_FRAMES_IN_FLIGHT);
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
    assert_eq!(&slots[..4], &[0, 1, 0, 1]);
    assert_eq!(gpu.uniforms_written, 40);
}

#[test]
fn released_meshes_outlive_their_last_draw() {
    let (scene, mut frames) = setup(PresentMode::Interactive, Culling::None, false);
    let cams = cameras();

    for _ in 0..3 {
        frames.advance_frame(&scene, &cams).unwrap();
    }
    assert!(frames.mesh_resident(0));
    assert!(frames.release_mesh(0));
    assert!(!frames.mesh_resident(0));
    assert!(frames.backend().destroyed.is_empty());

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.push(frames.advance_frame(&scene, &cams).unwrap());
    }

    let gpu = frames.backend();
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
    let (id, destroyed_at) = gpu
        .destroyed
        .iter()
        .find_map(|&(d, at)| match d {
            Destroy::Mesh(id) => Some((id, at)),
            Destroy::Texture(_) => None,
        })
        .expect("mesh destroyed after its slot came around");
    let last_use = gpu
        .submissions
        .iter()
        .filter(|s| s.meshes.contains(&id))
        .map(|s| s.done_at)
        .max()
        .unwrap();
    assert!(destroyed_at >= last_use);

    // Re-referenced on the very next frame, so it was uploaded again under a new handle.
    assert!(frames.mesh_resident(0));
    assert_eq!(
        frames.backend().mesh_uploads.iter().filter(|n| *n == "tri").count(),
        2
    );
}

#[test]
fn uploads_happen_once_and_bad_materials_are_skipped() {
    let (scene, mut frames) = setup(PresentMode::Interactive, Culling::None, false);
    let cams = cameras();

    for _ in 0..10 {
        let outcome = frames.advance_frame(&scene, &cams).unwrap();
        // "near" and "behind" share a mesh; "orphan" has an unresolved material.
        assert!(matches!(outcome, FrameOutcome::Submitted { draws: 2, .. }));
    }
    let gpu = frames.backend();
    assert_eq!(gpu.mesh_uploads, ["tri"]);
    // normal map and albedo of the lambertian material
    assert_eq!(gpu.texture_uploads, 2);
    assert!(!frames.mesh_resident(1));
}

#[test]
fn deferred_upload_skips_instances_without_failing() {
    let (scene, mut frames) = setup(PresentMode::Interactive, Culling::None, false);
    let cams = cameras();
    frames.backend_mut().defer_uploads = 2;

    let first = frames.advance_frame(&scene, &cams).unwrap();
    assert!(matches!(first, FrameOutcome::Submitted { draws: 0, .. }));
    let second = frames.advance_frame(&scene, &cams).unwrap();
    assert!(matches!(second, FrameOutcome::Submitted { draws: 2, .. }));
}

#[test]
fn frustum_culling_drops_instances_behind_the_camera() {
    let (scene, mut frames) = setup(PresentMode::Interactive, Culling::Frustum, false);
    let cams = cameras();

    let outcome = frames.advance_frame(&scene, &cams).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Submitted {
            draws: 1,
            culled: 1,
            ..
        }
    ));

    frames.set_culling(Culling::None);
    let outcome = frames.advance_frame(&scene, &cams).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Submitted {
            draws: 2,
            culled: 0,
            ..
        }
    ));
}

#[test]
fn stale_image_set_is_recreated_and_tick_skipped() {
    let (scene, mut frames) = setup(PresentMode::Interactive, Culling::None, false);
    let cams = cameras();
    frames.backend_mut().acquires.push_back(Acquire::Stale);

    let outcome = frames.advance_frame(&scene, &cams).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::Stale));
    assert_eq!(frames.backend().recreated.len(), 1);
    assert!(frames.backend().submissions.is_empty());

    // The skipped slot's fence was left signaled, so the ring keeps going.
    for _ in 0..4 {
        let outcome = frames.advance_frame(&scene, &cams).unwrap();
        assert!(matches!(outcome, FrameOutcome::Submitted { .. }));
    }

    frames.backend_mut().presents.push_back(Present::Stale);
    frames.advance_frame(&scene, &cams).unwrap();
    assert_eq!(frames.backend().recreated.len(), 2);
    assert!(frames.backend().violations.is_empty());
}

#[test]
fn resize_recreates_and_minimized_skips() {
    let (scene, mut frames) = setup(PresentMode::Interactive, Culling::None, false);
    let cams = cameras();

    frames.resize(RenderSize::new(0, 0));
    assert_eq!(
        frames.advance_frame(&scene, &cams).unwrap(),
        FrameOutcome::Skipped(SkipReason::Minimized)
    );

    frames.resize(RenderSize::new(320, 200));
    frames.advance_frame(&scene, &cams).unwrap();
    assert_eq!(frames.backend().recreated, [RenderSize::new(320, 200)]);

    frames.advance_frame(&scene, &cams).unwrap();
    assert_eq!(frames.backend().recreated.len(), 1);
}

#[test]
fn headless_waits_for_available_when_limited() {
    let (scene, mut frames) = setup(PresentMode::Headless, Culling::None, true);
    let cams = cameras();

    assert_eq!(
        frames.advance_frame(&scene, &cams).unwrap(),
        FrameOutcome::Skipped(SkipReason::NotReady)
    );
    frames.mark_available();
    let outcome = frames.advance_frame(&scene, &cams).unwrap();
    assert!(matches!(outcome, FrameOutcome::Submitted { image: 1, .. }));
    assert_eq!(
        frames.advance_frame(&scene, &cams).unwrap(),
        FrameOutcome::Skipped(SkipReason::NotReady)
    );

    // Skips must not have left a reset fence behind.
    for _ in 0..3 {
        frames.mark_available();
        frames.advance_frame(&scene, &cams).unwrap();
    }
    assert_eq!(frames.frames_submitted(), 4);
    assert!(frames.backend().violations.is_empty());
}

#[test]
fn headless_unlimited_draws_every_tick() {
    let (scene, mut frames) = setup(PresentMode::Headless, Culling::None, false);
    let cams = cameras();
    for _ in 0..5 {
        let outcome = frames.advance_frame(&scene, &cams).unwrap();
        assert!(matches!(outcome, FrameOutcome::Submitted { image: 0, .. }));
    }
}

/// Runs `script` the way the headless loop does: due events first, then a frame,
/// with 5 µs per tick.
fn run_script(
    frames: &mut FrameOrchestrator<SyntheticGpu>,
    scene: &Scene,
    cams: &CameraRegistry,
    script: &str,
) {
    let mut timeline = Timeline::parse(script).unwrap();
    let mut elapsed_us = 0;
    while !timeline.is_finished() {
        while let Some(event) = timeline.next_due(elapsed_us) {
            match event {
                HeadlessEvent::Available => frames.mark_available(),
                HeadlessEvent::Save { path } => frames.save_frame(&path, scene, cams).unwrap(),
                other => panic!("unexpected {other:?}"),
            }
        }
        frames.advance_frame(scene, cams).unwrap();
        elapsed_us += 5;
    }
}

fn assert_window_sized_ppm(path: &Path) {
    let bytes = fs::read(path).expect("SAVE wrote a file");
    let header = format!("P6\n{WIDTH} {HEIGHT}\n255\n");
    assert!(bytes.starts_with(header.as_bytes()));
    assert_eq!(bytes.len() - header.len(), (WIDTH * HEIGHT * 3) as usize);
    assert_eq!(&bytes[header.len()..header.len() + 3], &[255, 128, 0]);
}

#[test]
fn scripted_save_writes_ppm_of_window_size() {
    let dir = tempfile::tempdir().unwrap();
    let scene = load_scene(dir.path());
    let gpu = SyntheticGpu::new(PresentMode::Headless);
    let mut frames = FrameOrchestrator::new(gpu, &scene, Culling::None, true);
    let cams = cameras();

    let out = dir.path().join("out.ppm");
    run_script(
        &mut frames,
        &scene,
        &cams,
        &format!("0 AVAILABLE\n10 SAVE {}\n", out.display()),
    );
    assert_window_sized_ppm(&out);
}

#[test]
fn save_in_the_tick_of_the_first_available_still_writes() {
    let dir = tempfile::tempdir().unwrap();
    let scene = load_scene(dir.path());
    let gpu = SyntheticGpu::new(PresentMode::Headless);
    let mut frames = FrameOrchestrator::new(gpu, &scene, Culling::None, true);
    let cams = cameras();

    let out = dir.path().join("first.ppm");
    run_script(
        &mut frames,
        &scene,
        &cams,
        &format!("0 AVAILABLE\n0 SAVE {}\n", out.display()),
    );
    assert_window_sized_ppm(&out);
    // The frame drawn for SAVE used the released image; the tick's own frame then waits.
    assert_eq!(frames.frames_submitted(), 1);
    assert!(frames.backend().violations.is_empty());
}

#[test]
fn save_before_any_available_draws_a_frame_first() {
    let dir = tempfile::tempdir().unwrap();
    let scene = load_scene(dir.path());
    let gpu = SyntheticGpu::new(PresentMode::Headless);
    let mut frames = FrameOrchestrator::new(gpu, &scene, Culling::None, true);
    let cams = cameras();

    let out = dir.path().join("early.ppm");
    frames.save_frame(&out, &scene, &cams).unwrap();
    assert_window_sized_ppm(&out);
    assert_eq!(frames.frames_submitted(), 1);

    // Forcing did not release an image for the regular path.
    assert_eq!(
        frames.advance_frame(&scene, &cams).unwrap(),
        FrameOutcome::Skipped(SkipReason::NotReady)
    );
}

#[test]
fn uniform_write_failure_aborts_the_frame() {
    let (scene, mut frames) = setup(PresentMode::Interactive, Culling::None, false);
    let cams = cameras();
    frames.backend_mut().unmapped_uniforms = true;

    let err = frames.advance_frame(&scene, &cams).unwrap_err();
    assert!(err.to_string().contains("unmapped"));
    assert!(frames.backend().submissions.is_empty());
    assert_eq!(frames.frames_submitted(), 0);

    // The failed tick left its fence signaled, so the ring still turns over.
    frames.backend_mut().unmapped_uniforms = false;
    for _ in 0..3 {
        let outcome = frames.advance_frame(&scene, &cams).unwrap();
        assert!(matches!(outcome, FrameOutcome::Submitted { .. }));
    }
}

#[test]
fn shutdown_destroys_everything() {
    let (scene, mut frames) = setup(PresentMode::Interactive, Culling::None, false);
    let cams = cameras();
    for _ in 0..3 {
        frames.advance_frame(&scene, &cams).unwrap();
    }
    frames.release_texture(0);
    frames.shutdown().unwrap();

    let gpu = frames.backend();
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
    // one mesh + two textures
    assert_eq!(gpu.destroyed.len(), 3);
    assert!(!frames.mesh_resident(0));
    assert!(!frames.texture_resident(1));
}
