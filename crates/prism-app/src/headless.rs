// SPDX-License-Identifier: CEPL-1.0
use std::path::Path;

use anyhow::{Context, Result};
use prism_core::{FrameStats, Stopwatch};
use prism_platform::{HeadlessEvent, Timeline};
use prism_render::{Culling, FrameBackend, FrameOrchestrator};
use prism_render_vk::{VkBackend, VkOptions};
use tracing::info;

use crate::session::{measure_window, step, Session};

/// Applies one scripted event before the tick's frame is drawn.
fn apply<B: FrameBackend>(
    event: HeadlessEvent,
    session: &mut Session,
    orchestrator: &mut FrameOrchestrator<B>,
) -> Result<()> {
    match event {
        HeadlessEvent::Available => orchestrator.mark_available(),
        HeadlessEvent::Play { time, rate } => {
            info!("PLAY {time} {rate}");
            session.clock.set_playback(time, rate);
        }
        HeadlessEvent::Save { path } => {
            orchestrator
                .save_frame(&path, &session.scene, &session.cameras)
                .with_context(|| format!("SAVE {}", path.display()))?;
            info!("SAVE {}", path.display());
        }
        HeadlessEvent::Mark { text } => info!("MARK {text}"),
    }
    Ok(())
}

/// Each tick drains every event due at the elapsed wall time, then renders.
/// Returns once the timeline is empty and the device is idle.
pub fn run(
    mut session: Session,
    opts: VkOptions,
    culling: Culling,
    limit_fps: bool,
    measure: bool,
    events: &Path,
) -> Result<()> {
    let mut timeline = Timeline::load(events)?;
    info!("{}: {} events", events.display(), timeline.len());

    let backend = VkBackend::new_headless(&opts)?;
    info!(
        "device = {} (headless {}x{})",
        backend.device_name(),
        opts.size.width,
        opts.size.height
    );
    let mut orchestrator = FrameOrchestrator::new(backend, &session.scene, culling, limit_fps);
    let mut stats = measure.then(|| FrameStats::new(measure_window()));
    let mut stopwatch = Stopwatch::start();

    while !timeline.is_finished() {
        let tick = stopwatch.tick();
        while let Some(event) = timeline.next_due(tick.elapsed_us) {
            apply(event, &mut session, &mut orchestrator)?;
        }
        step(&mut session, &mut orchestrator, stats.as_mut(), tick.delta)?;
    }

    orchestrator.shutdown()?;
    info!(
        "timeline finished, {} frames submitted",
        orchestrator.frames_submitted()
    );
    Ok(())
}
