//! Integration tests for the frame scheduler on the headless device.

mod common;

use std::cell::Cell;
use std::path::PathBuf;
use std::sync::Arc;

use glam::Vec3;
use parking_lot::RwLock;

use common::SceneBuilder;
use tracer_renderer::{FrameStatus, JobKind, Renderer, RendererConfig};
use tracer_rhi::command::GpuCommand;
use tracer_rhi::headless::{DeviceEvent, HeadlessDevice};
use tracer_rhi::swapchain::PresentStatus;
use tracer_rhi::{DrawableSurface, Extent2D};
use tracer_scene::{DirtyTracker, GeometryId, PropertyValue, Scene, SceneChange};

struct TestSurface {
    size: Cell<Extent2D>,
}

impl TestSurface {
    fn new(width: u32, height: u32) -> Self {
        Self {
            size: Cell::new(Extent2D::new(width, height)),
        }
    }

    fn resize(&self, width: u32, height: u32) {
        self.size.set(Extent2D::new(width, height));
    }
}

impl DrawableSurface for TestSurface {
    fn drawable_size(&self) -> Extent2D {
        self.size.get()
    }
}

fn config() -> RendererConfig {
    RendererConfig {
        frames_in_flight: Some(2),
        descriptor_capacity: 16,
        shader_dir: PathBuf::from("shaders"),
        job_workers: 1,
    }
}

struct Harness {
    device: Arc<HeadlessDevice>,
    renderer: Renderer,
    surface: TestSurface,
}

fn harness(builder: SceneBuilder) -> Harness {
    let device = Arc::new(HeadlessDevice::new());
    let surface = TestSurface::new(64, 32);
    let SceneBuilder { scene, dirty, .. } = builder;
    let renderer = Renderer::new(
        device.clone(),
        Arc::new(RwLock::new(scene)),
        Arc::new(dirty),
        config(),
        &surface,
    )
    .unwrap();
    Harness {
        device,
        renderer,
        surface,
    }
}

/// One triangle in front of a camera.
fn triangle_scene() -> (SceneBuilder, tracer_scene::NodeId) {
    let mut builder = SceneBuilder::new();
    builder.geometry_data(GeometryId(1), 1);
    let (_, transform) = builder.renderable(GeometryId(1), None, Vec3::new(0.0, 0.0, -3.0));
    builder.camera(Vec3::ZERO);
    (builder, transform)
}

fn trace_count(device: &HeadlessDevice) -> usize {
    device
        .executed_commands()
        .iter()
        .flatten()
        .filter(|c| matches!(c, GpuCommand::TraceRays { .. }))
        .count()
}

#[test]
fn test_new_renderer_creates_swapchain() {
    let h = harness(SceneBuilder::new());
    assert_eq!(h.renderer.frames_in_flight(), 2);
    assert_eq!(h.renderer.swapchain_extent(), Some(Extent2D::new(64, 32)));
    assert!(
        h.device
            .events()
            .contains(&DeviceEvent::SwapchainCreated(Extent2D::new(64, 32)))
    );
}

#[test]
fn test_frames_in_flight_follows_surface() {
    let device = Arc::new(HeadlessDevice::with_surface_image_count(3));
    let surface = TestSurface::new(8, 8);
    let renderer = Renderer::new(
        device,
        Arc::new(RwLock::new(Scene::new())),
        Arc::new(DirtyTracker::new()),
        RendererConfig {
            frames_in_flight: None,
            ..config()
        },
        &surface,
    )
    .unwrap();
    assert_eq!(renderer.frames_in_flight(), 3);
}

#[test]
fn test_first_tick_builds_and_traces_scene() {
    let (builder, _) = triangle_scene();
    let mut h = harness(builder);

    let graph = h.renderer.render_jobs();
    assert!(graph.contains(JobKind::BuildGeometry(GeometryId(1))));
    assert!(graph.contains(JobKind::BuildSceneTlas));
    let report = h.renderer.run_jobs(&graph);
    assert!(report.is_success());

    let status = h.renderer.render_frame(&h.surface).unwrap();
    assert_eq!(status, FrameStatus::Presented);
    assert_eq!(h.renderer.accumulated_frames(), 1);
    assert_eq!(h.renderer.frame_index(), 1);

    h.device.complete_all();
    assert_eq!(trace_count(&h.device), 1);
    assert!(h.device.violations().is_empty());
}

#[test]
fn test_render_jobs_drain_dirty_set() {
    let (builder, _) = triangle_scene();
    let mut h = harness(builder);

    let first = h.renderer.render_jobs();
    assert!(first.len() > 1);

    // Nothing changed since: only reclamation is scheduled
    let second = h.renderer.render_jobs();
    assert_eq!(second.jobs(), vec![JobKind::DestroyRetiredResources]);
}

#[test]
fn test_transform_change_rebuilds_tlas_only() {
    let (builder, transform) = triangle_scene();
    let mut h = harness(builder);
    h.renderer.tick(&h.surface).unwrap();
    let first_tlas = h.renderer.resources().scene_tlas().unwrap();

    h.renderer
        .scene()
        .write()
        .apply(
            SceneChange::PropertyUpdated {
                node: transform,
                property: PropertyValue::Translation(Vec3::new(1.0, 0.0, -3.0)),
            },
            h.renderer.dirty(),
        )
        .unwrap();

    let graph = h.renderer.render_jobs();
    assert_eq!(
        graph.jobs(),
        vec![
            JobKind::UpdateWorldTransforms,
            JobKind::BuildSceneTlas,
            JobKind::DestroyRetiredResources,
        ]
    );
    assert_eq!(h.renderer.accumulated_frames(), 0);
    assert!(h.renderer.run_jobs(&graph).is_success());
    assert_ne!(h.renderer.resources().scene_tlas().unwrap(), first_tlas);
    assert_eq!(h.renderer.resources().geometry_count(), 1);
}

#[test]
fn test_accumulation_grows_while_scene_is_static() {
    let (builder, _) = triangle_scene();
    let mut h = harness(builder);
    for _ in 0..4 {
        assert_eq!(h.renderer.tick(&h.surface).unwrap(), FrameStatus::Presented);
    }
    assert_eq!(h.renderer.accumulated_frames(), 4);
    assert_eq!(h.renderer.frame_index(), 0);
    assert!(h.device.violations().is_empty());
}

#[test]
fn test_out_of_date_present_recreates_swapchain() {
    let (builder, _) = triangle_scene();
    let mut h = harness(builder);
    h.renderer.tick(&h.surface).unwrap();

    h.device.script_present(PresentStatus::OutOfDate);
    assert_eq!(
        h.renderer.tick(&h.surface).unwrap(),
        FrameStatus::SwapchainStale
    );
    assert!(h.renderer.is_swapchain_stale());

    h.device.clear_events();
    assert_eq!(h.renderer.tick(&h.surface).unwrap(), FrameStatus::Presented);
    assert!(!h.renderer.is_swapchain_stale());

    let events = h.device.events();
    let created = events
        .iter()
        .position(|e| matches!(e, DeviceEvent::SwapchainCreated(_)))
        .unwrap();
    let acquired = events
        .iter()
        .position(|e| matches!(e, DeviceEvent::Acquired(_)))
        .unwrap();
    assert!(created < acquired);
    assert!(h.device.violations().is_empty());
}

#[test]
fn test_out_of_date_acquire_skips_frame() {
    let (builder, _) = triangle_scene();
    let mut h = harness(builder);
    h.renderer.tick(&h.surface).unwrap();
    let frame_index = h.renderer.frame_index();

    h.device.script_acquire_out_of_date();
    assert_eq!(
        h.renderer.render_frame(&h.surface).unwrap(),
        FrameStatus::SwapchainStale
    );
    assert_eq!(h.renderer.frame_index(), frame_index);

    assert_eq!(
        h.renderer.render_frame(&h.surface).unwrap(),
        FrameStatus::Presented
    );
    assert!(h.device.violations().is_empty());
}

#[test]
fn test_resize_recreates_swapchain_and_targets() {
    let mut h = harness(SceneBuilder::new());
    let images = h.device.live_image_count();

    h.surface.resize(128, 96);
    assert_eq!(h.renderer.tick(&h.surface).unwrap(), FrameStatus::Presented);
    assert_eq!(h.renderer.swapchain_extent(), Some(Extent2D::new(128, 96)));
    assert_eq!(h.device.live_image_count(), images);
    assert!(
        h.device
            .events()
            .contains(&DeviceEvent::SwapchainCreated(Extent2D::new(128, 96)))
    );
}

#[test]
fn test_zero_size_surface_skips_frame() {
    let mut h = harness(SceneBuilder::new());
    h.surface.resize(0, 32);
    h.device.clear_events();

    assert_eq!(h.renderer.tick(&h.surface).unwrap(), FrameStatus::Skipped);
    assert!(
        !h.device
            .events()
            .iter()
            .any(|e| matches!(e, DeviceEvent::Acquired(_)))
    );
}

#[test]
fn test_minimized_changes_coalesce_until_resumed() {
    let (builder, transform) = triangle_scene();
    let mut h = harness(builder);
    for _ in 0..2 {
        h.renderer.tick(&h.surface).unwrap();
        h.device.complete_all();
    }
    let buffers = h.device.live_buffer_count();
    let structures = h.device.live_acceleration_structure_count();
    let tlas = h.renderer.resources().scene_tlas().unwrap();

    h.surface.resize(0, 0);
    for step in 0..50 {
        h.renderer
            .scene()
            .write()
            .apply(
                SceneChange::PropertyUpdated {
                    node: transform,
                    property: PropertyValue::Translation(Vec3::new(step as f32, 0.0, -3.0)),
                },
                h.renderer.dirty(),
            )
            .unwrap();
        assert_eq!(h.renderer.tick(&h.surface).unwrap(), FrameStatus::Skipped);
        h.device.complete_all();
    }
    assert_eq!(h.device.live_buffer_count(), buffers);
    assert_eq!(h.device.live_acceleration_structure_count(), structures);
    assert_eq!(h.renderer.resources().scene_tlas(), Some(tlas));
    assert!(h.renderer.resources().retired_resources().is_empty());

    // One rebuild covers every change made while minimized
    h.surface.resize(64, 32);
    assert_eq!(h.renderer.tick(&h.surface).unwrap(), FrameStatus::Presented);
    assert_ne!(h.renderer.resources().scene_tlas(), Some(tlas));
    assert_eq!(h.renderer.resources().retired_resources().len(), 1);
    assert_eq!(h.renderer.accumulated_frames(), 1);
    assert!(h.device.violations().is_empty());
}

#[test]
fn test_empty_scene_presents_without_tracing() {
    let mut h = harness(SceneBuilder::new());
    assert_eq!(h.renderer.tick(&h.surface).unwrap(), FrameStatus::Presented);
    h.device.complete_all();
    assert_eq!(trace_count(&h.device), 0);
    assert_eq!(h.renderer.accumulated_frames(), 0);
}

#[test]
fn test_failed_present_is_reported() {
    let mut h = harness(SceneBuilder::new());
    h.device.fail_next(tracer_rhi::headless::FailPoint::Present);
    assert!(h.renderer.tick(&h.surface).is_err());
    // The next frame proceeds normally
    assert_eq!(h.renderer.tick(&h.surface).unwrap(), FrameStatus::Presented);
}

#[test]
fn test_shutdown_releases_all_resources() {
    let (builder, _) = triangle_scene();
    let mut h = harness(builder);
    for _ in 0..3 {
        h.renderer.tick(&h.surface).unwrap();
    }
    h.renderer.shutdown();
    h.renderer.shutdown();

    assert_eq!(h.device.live_buffer_count(), 0);
    assert_eq!(h.device.live_image_count(), 0);
    assert_eq!(h.device.live_acceleration_structure_count(), 0);
    assert_eq!(h.device.live_command_pool_count(), 0);
    assert_eq!(h.device.live_fence_count(), 0);
    assert!(h.device.swapchain().is_none());
    assert!(h.device.violations().is_empty());
    assert!(h.renderer.render_frame(&h.surface).is_err());
}
