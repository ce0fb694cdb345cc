// SPDX-License-Identifier: CEPL-1.0
use std::time::Instant;

use anyhow::{Context, Result};
use prism_core::{FrameStats, Stopwatch};
use prism_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use prism_platform::{EventHub, InputTranslator};
use prism_render::{Culling, FrameOrchestrator, FrameOutcome, RenderSize};
use prism_render_vk::{VkBackend, VkOptions};
use tracing::{error, info, warn};

use crate::session::{install_handlers, measure_window, step, Session};

struct App {
    opts: VkOptions,
    culling: Culling,
    limit_fps: bool,

    session: Session,
    hub: EventHub<Session>,
    translator: InputTranslator,

    // Dropped before `window`: the surface must not outlive it.
    orchestrator: Option<FrameOrchestrator<VkBackend>>,
    window: Option<Window>,

    stopwatch: Stopwatch,
    stats: Option<FrameStats>,
    exiting: bool,
    paused: bool,
    frames: u32,
    last_fps_instant: Instant,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(format!("prism - {}", self.session.scene.name))
            .with_inner_size(PhysicalSize::new(self.opts.size.width, self.opts.size.height));
        let window = event_loop.create_window(attrs).context("create_window")?;

        let size = window.inner_size();
        self.opts.size = RenderSize::new(size.width.max(1), size.height.max(1));
        let backend = VkBackend::new_windowed(&window, &self.opts)?;
        info!("device = {}", backend.device_name());

        self.session.cameras.set_user_aspect(self.opts.size.aspect());
        self.orchestrator = Some(FrameOrchestrator::new(
            backend,
            &self.session.scene,
            self.culling,
            self.limit_fps,
        ));
        self.window = Some(window);
        self.stopwatch = Stopwatch::start();
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.close(event_loop);
    }

    /// Device idle and GPU teardown happen before the window goes away.
    fn close(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(mut orchestrator) = self.orchestrator.take() {
            if let Err(e) = orchestrator.shutdown() {
                warn!("shutdown: {e:#}");
            }
            info!("{} frames submitted", orchestrator.frames_submitted());
        }
        self.window = None;
        event_loop.exit();
    }

    fn redraw(&mut self) -> Result<()> {
        let tick = self.stopwatch.tick();
        self.hub.dispatch(&mut self.session);
        if self.session.exit_requested() {
            return Ok(());
        }
        let Some(orchestrator) = self.orchestrator.as_mut() else {
            return Ok(());
        };
        if self.paused {
            self.session.update(tick.delta);
            return Ok(());
        }
        let outcome = step(
            &mut self.session,
            orchestrator,
            self.stats.as_mut(),
            tick.delta,
        )?;
        if let FrameOutcome::Submitted { .. } = outcome {
            self.frames = self.frames.saturating_add(1);
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.start(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }

        event_loop.set_control_flow(if self.opts.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });

        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        if let Some(input) = self.translator.translate(&event) {
            self.hub.push(input);
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize::new(new_size.width, new_size.height);
                info!("Resized → {}x{}", size.width, size.height);
                if let Some(orchestrator) = &mut self.orchestrator {
                    orchestrator.resize(size);
                }
                if !size.is_empty() {
                    self.session.cameras.set_user_aspect(size.aspect());
                }
            }

            WindowEvent::Occluded(occluded) => {
                if self.paused != occluded {
                    self.paused = occluded;
                    info!("Occluded={occluded}");
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                } else if self.session.exit_requested() {
                    info!("exit requested");
                    self.close(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if self.stats.is_none() && now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

/// Opens a window and renders until it is closed or Escape is pressed.
pub fn run(
    session: Session,
    opts: VkOptions,
    culling: Culling,
    limit_fps: bool,
    measure: bool,
) -> Result<()> {
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut hub = EventHub::new();
    install_handlers(&mut hub);

    let mut app = App {
        opts,
        culling,
        limit_fps,
        session,
        hub,
        translator: InputTranslator::default(),
        orchestrator: None,
        window: None,
        stopwatch: Stopwatch::start(),
        stats: measure.then(|| FrameStats::new(measure_window())),
        exiting: false,
        paused: false,
        frames: 0,
        last_fps_instant: Instant::now(),
        fatal: None,
    };

    event_loop.run_app(&mut app)?;
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
