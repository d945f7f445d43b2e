//! The per-frame driver tying the frame pipeline, the renaming ring and the draw
//! subsystems together.
use std::sync::Arc;

use glam::Mat4;

use crate::{
    Error, Result,
    backend::{AcquiredImage, Backend, PresentStatus, Viewport},
    config::ViewerConfig,
    frame::FramePipeline,
    gpu::GpuContext,
    mesh::MeshSource,
    passes::{
        AccelStructPass, MeshPass, NormalPass, ObjectBuffer, SolidPass, TangentPass,
        WireframePass,
    },
    reconcile::ReconcileStats,
    registry::Handle,
    rename::RenamePool,
};

/// Pipelines the draw subsystems render with. Built by the caller.
pub struct PassPipelines<B: Backend> {
    /// Triangle list pipeline taking [`SolidVertex`](crate::passes::SolidVertex) and
    /// color streams.
    pub solid: Option<Handle<B::Pipeline>>,
    /// Line list pipeline taking position and color streams.
    pub lines: Option<Handle<B::Pipeline>>,
}

impl<B: Backend> Default for PassPipelines<B> {
    fn default() -> Self {
        Self {
            solid: None,
            lines: None,
        }
    }
}

/// What to draw this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub viewport: Viewport,
    /// World to clip space.
    pub transform: Mat4,
    pub show_solid: bool,
    pub show_wireframe: bool,
    pub show_normals: bool,
    pub show_tangents: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            transform: Mat4::IDENTITY,
            show_solid: true,
            show_wireframe: false,
            show_normals: false,
            show_tangents: false,
        }
    }
}

/// Reconciliation results of the last frame, per subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub serial: u64,
    pub solid: ReconcileStats,
    pub wireframe: ReconcileStats,
    pub normals: ReconcileStats,
    pub tangents: ReconcileStats,
    pub accel: ReconcileStats,
    pub draws: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// No image could be acquired, typically because the window is minimized. The
    /// frame was still submitted so the slot keeps rotating.
    Skipped,
}

pub struct Viewer<B: Backend, S> {
    context: GpuContext<B>,
    config: ViewerConfig,
    frames: FramePipeline<B>,
    object_buffers: RenamePool<ObjectBuffer<B>>,
    solid: MeshPass<B, S, SolidPass>,
    wireframe: MeshPass<B, S, WireframePass>,
    normals: MeshPass<B, S, NormalPass>,
    tangents: MeshPass<B, S, TangentPass>,
    accel: Option<MeshPass<B, S, AccelStructPass>>,
    stats: FrameStats,
}

impl<B: Backend, S: MeshSource> Viewer<B, S> {
    pub fn new(
        context: &GpuContext<B>,
        config: ViewerConfig,
        pipelines: PassPipelines<B>,
    ) -> Result<Self> {
        config.validate()?;
        let frames = FramePipeline::new(context, &config.frame_config())?;
        let object_buffers =
            ObjectBuffer::pool(context, config.object_buffer_ring, config.frames_in_flight)?;
        let lines = pipelines.lines;
        Ok(Self {
            solid: MeshPass::new(context, SolidPass::default(), pipelines.solid),
            wireframe: MeshPass::new(context, WireframePass::default(), lines.clone()),
            normals: MeshPass::new(context, NormalPass::new(config.normal_length), lines.clone()),
            tangents: MeshPass::new(context, TangentPass::new(config.tangent_length), lines),
            accel: config
                .ray_tracing
                .then(|| MeshPass::new(context, AccelStructPass, None)),
            context: context.clone(),
            config,
            frames,
            object_buffers,
            stats: FrameStats::default(),
        })
    }

    pub fn context(&self) -> &GpuContext<B> {
        &self.context
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn frames(&self) -> &FramePipeline<B> {
        &self.frames
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn solid(&self) -> &MeshPass<B, S, SolidPass> {
        &self.solid
    }

    pub fn accel(&self) -> Option<&MeshPass<B, S, AccelStructPass>> {
        self.accel.as_ref()
    }

    /// Swap the pipelines passes draw with. Cached artifacts are kept.
    pub fn set_pipelines(&mut self, pipelines: PassPipelines<B>) {
        self.solid.set_pipeline(pipelines.solid);
        self.wireframe.set_pipeline(pipelines.lines.clone());
        self.normals.set_pipeline(pipelines.lines.clone());
        self.tangents.set_pipeline(pipelines.lines);
    }

    /// Render and present one frame of `sources`.
    pub fn render_frame(&mut self, sources: &[Arc<S>], view: &ViewState) -> Result<FrameOutcome> {
        let serial = self.frames.start_frame()?;
        self.stats = FrameStats {
            serial,
            ..Default::default()
        };

        let updated = self.update(sources, view);
        let image = match updated.and_then(|()| self.acquire()) {
            Ok(image) => image,
            Err(err) => {
                // Close the frame so the slot does not stay in recording.
                self.frames.submit()?;
                return Err(err);
            }
        };

        let recorded = match image {
            Some(image) => self.record(image, view),
            None => Ok(0),
        };
        // Sources stay alive until the device is done with this frame.
        self.frames.retain(sources.to_vec());
        self.frames.submit()?;

        if image.is_none() {
            self.stats.draws = recorded?;
            return Ok(FrameOutcome::Skipped);
        }
        // The acquired image goes back to the swapchain even if recording failed.
        let presented = self.present();
        self.stats.draws = recorded?;
        presented
    }

    fn present(&mut self) -> Result<FrameOutcome> {
        match self.frames.present_frame() {
            Ok(PresentStatus::Optimal) => Ok(FrameOutcome::Presented),
            Ok(PresentStatus::Suboptimal) | Err(Error::SwapchainOutOfDate) => {
                self.recreate_swapchain()?;
                Ok(FrameOutcome::Presented)
            }
            Err(err) => Err(err),
        }
    }

    fn update(&mut self, sources: &[Arc<S>], view: &ViewState) -> Result<()> {
        self.stats.solid = update_or_clear(&mut self.solid, view.show_solid, sources)?;
        self.stats.wireframe = update_or_clear(&mut self.wireframe, view.show_wireframe, sources)?;
        self.stats.normals = update_or_clear(&mut self.normals, view.show_normals, sources)?;
        self.stats.tangents = update_or_clear(&mut self.tangents, view.show_tangents, sources)?;
        if let Some(accel) = &mut self.accel {
            self.stats.accel = accel.update(sources)?;
        }
        Ok(())
    }

    /// Acquire an image, recreating the swapchain once if it went out of date.
    fn acquire(&mut self) -> Result<Option<AcquiredImage>> {
        match self.frames.acquire_image() {
            Ok(image) => return Ok(Some(image)),
            Err(Error::SwapchainOutOfDate) => {}
            Err(err) => return Err(err),
        }
        self.recreate_swapchain()?;
        match self.frames.acquire_image() {
            Ok(image) => Ok(Some(image)),
            Err(Error::SwapchainOutOfDate) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn record(&mut self, image: AcquiredImage, view: &ViewState) -> Result<u32> {
        let context = self.context.clone();
        let recorder = self.frames.current().recorder().clone();
        context.backend().begin_pass(&recorder, image, self.config.clear_color);
        let drawn = self.draw_passes(&recorder, view);
        context.backend().end_pass(&recorder);
        drawn
    }

    fn draw_passes(&mut self, recorder: &B::Recorder, view: &ViewState) -> Result<u32> {
        let (viewport, transform) = (view.viewport, view.transform);
        let pool = &mut self.object_buffers;
        let mut draws = 0;
        if view.show_solid {
            draws += self.solid.draw(recorder, pool, viewport, transform)?;
        }
        if view.show_wireframe {
            draws += self.wireframe.draw(recorder, pool, viewport, transform)?;
        }
        if view.show_normals {
            draws += self.normals.draw(recorder, pool, viewport, transform)?;
        }
        if view.show_tangents {
            draws += self.tangents.draw(recorder, pool, viewport, transform)?;
        }
        Ok(draws)
    }

    /// Wait for the device, then rebuild the swapchain.
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        self.frames.wait_idle()?;
        self.context.backend().recreate_swapchain()?;
        tracing::info!(serial = self.stats.serial, "swapchain recreated");
        Ok(())
    }

    /// Stop rendering and tear everything down.
    ///
    /// Waits for the device, releases every artifact and frame slot, destroys all
    /// orphans and fails if any handle is still alive elsewhere.
    pub fn shutdown(mut self) -> Result<()> {
        self.frames.wait_idle()?;
        let context = self.context.clone();
        drop(self);
        context.backend().release();
        context.resources().shutdown()
    }
}

fn update_or_clear<B: Backend, S: MeshSource, K: crate::passes::PassKind<B>>(
    pass: &mut MeshPass<B, S, K>,
    enabled: bool,
    sources: &[Arc<S>],
) -> Result<ReconcileStats> {
    if enabled {
        pass.update(sources)
    } else {
        pass.clear();
        Ok(ReconcileStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ResourceContext,
        reconcile::{EntityId, Generation},
        testing::{Command, MockBackend, TestMesh},
    };
    use std::sync::atomic::Ordering;

    fn viewer(config: ViewerConfig) -> (GpuContext<MockBackend>, Viewer<MockBackend, TestMesh>) {
        let context = GpuContext::new(MockBackend::new(), ResourceContext::new());
        let pipelines = PassPipelines {
            solid: Some(context.add_pipeline(context.backend().pipeline())),
            lines: Some(context.add_pipeline(context.backend().pipeline())),
        };
        let viewer = Viewer::new(&context, config, pipelines).unwrap();
        (context, viewer)
    }

    #[test]
    fn test_mesh_lifecycle_end_to_end() {
        let (context, mut viewer) = viewer(ViewerConfig::default());
        let view = ViewState::default();
        let mesh = TestMesh::quad(1);
        let sources = vec![mesh.clone()];

        viewer.render_frame(&sources, &view).unwrap();
        let entry = viewer.solid().cache().get(EntityId(1)).unwrap();
        assert_eq!(entry.built_generations(), (Generation::new(1), Generation::new(1)));
        assert_eq!(viewer.stats().solid.geometry_rebuilds, 1);
        assert_eq!(viewer.stats().draws, 1);

        viewer.render_frame(&sources, &view).unwrap();
        assert!(viewer.stats().solid.is_noop());

        mesh.bump_geometry();
        viewer.render_frame(&sources, &view).unwrap();
        let stats = viewer.stats().solid;
        assert_eq!((stats.geometry_rebuilds, stats.color_rebuilds), (1, 1));
        let entry = viewer.solid().cache().get(EntityId(1)).unwrap();
        assert_eq!(entry.built_generations(), (Generation::new(2), Generation::new(1)));

        viewer.render_frame(&[], &view).unwrap();
        assert!(viewer.solid().cache().is_empty());
        assert_eq!(viewer.stats().solid.dropped, 1);
        assert!(context.buffers.orphan_count() >= 3);

        // Two more frames retire every slot that could still read them.
        viewer.render_frame(&[], &view).unwrap();
        viewer.render_frame(&[], &view).unwrap();
        assert_eq!(context.buffers.orphan_count(), 0);
        // Original build, the geometry rebuild and the removal: 3 buffers + 3 buffers.
        assert_eq!(context.backend().state.destroyed_of("buffer").len(), 6);
    }

    #[test]
    fn test_frame_records_pass_and_presents() {
        let (context, mut viewer) = viewer(ViewerConfig::default());
        let view = ViewState {
            show_wireframe: true,
            show_normals: true,
            show_tangents: true,
            ..Default::default()
        };
        let outcome = viewer.render_frame(&[TestMesh::quad(1)], &view).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(viewer.stats().draws, 4);

        let recorder = viewer.frames().current().recorder();
        let commands = recorder.commands.lock().unwrap();
        assert_eq!(commands.first(), Some(&Command::BeginPass { image: 0 }));
        assert_eq!(commands.last(), Some(&Command::EndPass));
        assert_eq!(context.backend().state.presented.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_hidden_visualizers_release_their_buffers() {
        let (context, mut viewer) = viewer(ViewerConfig::default());
        let mesh = TestMesh::quad(1);
        let shown = ViewState {
            show_normals: true,
            ..Default::default()
        };
        viewer.render_frame(&[mesh.clone()], &shown).unwrap();
        let with_normals = context.buffers.count();
        viewer.render_frame(&[mesh], &ViewState::default()).unwrap();
        assert_eq!(context.buffers.count(), with_normals - 2);
    }

    #[test]
    fn test_out_of_date_swapchain_is_recreated() {
        let (context, mut viewer) = viewer(ViewerConfig::default());
        context.backend().state.out_of_date.store(1, Ordering::Relaxed);
        let outcome = viewer
            .render_frame(&[TestMesh::quad(1)], &ViewState::default())
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(context.backend().state.recreations.load(Ordering::Relaxed), 1);

        // Still out of date after recreation: the frame is skipped but submitted.
        context.backend().state.out_of_date.store(2, Ordering::Relaxed);
        let outcome = viewer
            .render_frame(&[TestMesh::quad(1)], &ViewState::default())
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped);
        viewer
            .render_frame(&[TestMesh::quad(1)], &ViewState::default())
            .unwrap();
    }

    #[test]
    fn test_skipped_frames_do_not_signal_release() {
        let (context, mut viewer) = viewer(ViewerConfig::default());
        let sources = [TestMesh::quad(1)];
        let view = ViewState::default();
        viewer.render_frame(&sources, &view).unwrap();

        context.backend().state.out_of_date.store(2, Ordering::Relaxed);
        assert_eq!(viewer.render_frame(&sources, &view).unwrap(), FrameOutcome::Skipped);
        for _ in 0..4 {
            assert_eq!(viewer.render_frame(&sources, &view).unwrap(), FrameOutcome::Presented);
        }
        let state = &context.backend().state;
        assert_eq!(state.double_signals.load(Ordering::Relaxed), 0);
        assert_eq!(state.presented.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_failed_recording_still_presents() {
        let (context, mut viewer) = viewer(ViewerConfig::default());
        let sources = [TestMesh::quad(1)];
        let view = ViewState::default();
        viewer.render_frame(&sources, &view).unwrap();

        let state = &context.backend().state;
        state.fail_writes.store(true, Ordering::Relaxed);
        assert_eq!(viewer.render_frame(&sources, &view).unwrap_err(), Error::OutOfMemory);
        assert_eq!(state.presented.lock().unwrap().len(), 2);
        assert!(viewer.frames().current().image().is_none());

        state.fail_writes.store(false, Ordering::Relaxed);
        for _ in 0..3 {
            viewer.render_frame(&sources, &view).unwrap();
        }
        assert_eq!(state.double_signals.load(Ordering::Relaxed), 0);
        assert_eq!(state.presented.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_frame_keeps_its_sources_alive() {
        let (_context, mut viewer) = viewer(ViewerConfig::default());
        let view = ViewState::default();
        let mesh = TestMesh::quad(1);
        let weak = Arc::downgrade(&mesh);
        viewer.render_frame(&[mesh], &view).unwrap();
        let entry = viewer.solid().cache().get(EntityId(1)).unwrap();
        assert!(entry.source().is_some());

        viewer.render_frame(&[], &view).unwrap();
        assert!(weak.upgrade().is_some());
        // The first slot comes around again and releases what it retained.
        viewer.render_frame(&[], &view).unwrap();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_pipelines_can_be_swapped() {
        let (context, mut viewer) = viewer(ViewerConfig::default());
        let sources = [TestMesh::quad(1)];
        let view = ViewState {
            show_wireframe: true,
            ..Default::default()
        };
        viewer.render_frame(&sources, &view).unwrap();
        assert_eq!(viewer.stats().draws, 2);

        viewer.set_pipelines(PassPipelines {
            solid: None,
            lines: Some(context.add_pipeline(context.backend().pipeline())),
        });
        viewer.render_frame(&sources, &view).unwrap();
        assert_eq!(viewer.stats().draws, 1);
        assert!(viewer.stats().wireframe.is_noop());
    }

    #[test]
    fn test_accel_structures_follow_sources() {
        let (context, mut viewer) = viewer(ViewerConfig {
            ray_tracing: true,
            ..Default::default()
        });
        let mesh = TestMesh::quad(1);
        viewer.render_frame(&[mesh.clone()], &ViewState::default()).unwrap();
        assert_eq!(context.accel_structs.count(), 1);
        mesh.bump_geometry();
        viewer.render_frame(&[mesh], &ViewState::default()).unwrap();
        assert_eq!(context.accel_structs.count(), 1);
        assert_eq!(context.accel_structs.orphan_count(), 1);
        let accel = viewer.accel().unwrap();
        assert!(accel.cache().get(EntityId(1)).unwrap().artifact().instance().is_some());
    }

    #[test]
    fn test_shutdown_reports_leaks() {
        let (context, mut viewer) = viewer(ViewerConfig::default());
        viewer
            .render_frame(&[TestMesh::quad(1)], &ViewState::default())
            .unwrap();
        let leaked = context.create_buffer(crate::BufferUsage::Vertex, 16).unwrap();
        let err = viewer.shutdown().unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { kind: "buffer", .. }));
        drop(leaked);
        context.resources().shutdown().unwrap();
    }

    #[test]
    fn test_clean_shutdown() {
        let (context, mut viewer) = viewer(ViewerConfig::default());
        viewer
            .render_frame(&[TestMesh::quad(1)], &ViewState::default())
            .unwrap();
        viewer.shutdown().unwrap();
        assert!(context.resources().stats().iter().all(|s| s.live == 0 && s.orphaned == 0));
    }
}
