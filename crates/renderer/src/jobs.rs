//! Per-frame job graph.
//!
//! The accumulated dirty set decides which jobs a frame needs. Jobs form a
//! DAG whose edges mean "must complete before"; any executor may run them
//! as long as it respects the edges. Two executors are provided:
//!
//! - [`JobGraph::run_sequential`]: topological order on the calling thread
//! - [`JobGraph::run_parallel`]: in-degree counting over a ready queue,
//!   drained by scoped worker threads
//!
//! # Dependencies
//!
//! ```text
//! UpdateWorldTransforms ──┐
//! BuildGeometry(g) ───────┼──► BuildSceneTlas
//! BuildTexture(t) ────────┘
//! DestroyRetiredResources
//! ```
//!
//! A failed job still releases its dependents. They observe whatever state
//! it left: a top-level build skips geometry that failed to build.

use std::collections::HashMap;
use std::fmt;
use std::thread;

use crossbeam_channel::unbounded;
use parking_lot::RwLock;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, error, trace, warn};

use tracer_scene::{DirtySet, DirtySnapshot, GeometryId, Scene, TextureId};

use crate::command_buffer_manager::CommandBufferManager;
use crate::error::{RendererError, RendererResult};
use crate::scene_resources::SceneResources;

/// A unit of per-frame work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Propagates local transforms into cached world matrices.
    UpdateWorldTransforms,
    /// Uploads a geometry and builds its bottom-level structure.
    BuildGeometry(GeometryId),
    /// Uploads a texture and binds it for shading.
    BuildTexture(TextureId),
    /// Rebuilds the scene top-level structure and instance data.
    BuildSceneTlas,
    /// Destroys expired retired structures and transient resources.
    DestroyRetiredResources,
}

impl JobKind {
    /// Dirty categories that make this job ready. Empty means always.
    pub fn trigger(&self) -> DirtySet {
        match self {
            JobKind::UpdateWorldTransforms => DirtySet::TRANSFORM,
            JobKind::BuildGeometry(_) => DirtySet::GEOMETRY,
            JobKind::BuildTexture(_) => DirtySet::MATERIAL,
            JobKind::BuildSceneTlas => DirtySet::TRANSFORM | DirtySet::GEOMETRY | DirtySet::MATERIAL,
            JobKind::DestroyRetiredResources => DirtySet::NONE,
        }
    }

    pub fn is_ready(&self, flags: DirtySet) -> bool {
        let trigger = self.trigger();
        trigger.is_empty() || flags.intersects(trigger)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::UpdateWorldTransforms => f.write_str("update world transforms"),
            JobKind::BuildGeometry(id) => write!(f, "build {id}"),
            JobKind::BuildTexture(id) => write!(f, "build {id}"),
            JobKind::BuildSceneTlas => f.write_str("build scene TLAS"),
            JobKind::DestroyRetiredResources => f.write_str("destroy retired resources"),
        }
    }
}

/// Jobs that completed and jobs that failed, with their errors.
#[derive(Debug)]
pub struct JobReport<E> {
    pub completed: Vec<JobKind>,
    pub failed: Vec<(JobKind, E)>,
}

impl<E> JobReport<E> {
    fn new() -> Self {
        Self {
            completed: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn record(&mut self, job: JobKind, result: Result<(), E>) {
        match result {
            Ok(()) => self.completed.push(job),
            Err(e) => self.failed.push((job, e)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A DAG of jobs for one frame.
#[derive(Clone, Debug, Default)]
pub struct JobGraph {
    graph: DiGraph<JobKind, ()>,
    nodes: HashMap<JobKind, NodeIndex>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the jobs `dirty` calls for.
    pub fn render_jobs(dirty: &DirtySnapshot) -> Self {
        let mut graph = Self::new();
        let flags = dirty.flags;

        let mut producers = Vec::new();
        if JobKind::UpdateWorldTransforms.is_ready(flags) {
            producers.push(graph.add_job(JobKind::UpdateWorldTransforms));
        }
        for &id in &dirty.geometries {
            let job = JobKind::BuildGeometry(id);
            if job.is_ready(flags) {
                producers.push(graph.add_job(job));
            }
        }
        for &id in &dirty.textures {
            let job = JobKind::BuildTexture(id);
            if job.is_ready(flags) {
                producers.push(graph.add_job(job));
            }
        }

        if JobKind::BuildSceneTlas.is_ready(flags) {
            let tlas = graph.add_job(JobKind::BuildSceneTlas);
            for producer in producers {
                graph.graph.add_edge(producer, tlas, ());
            }
        }

        graph.add_job(JobKind::DestroyRetiredResources);
        trace!("{:?} produced {} job(s)", flags, graph.len());
        graph
    }

    fn add_job(&mut self, job: JobKind) -> NodeIndex {
        if let Some(&index) = self.nodes.get(&job) {
            return index;
        }
        let index = self.graph.add_node(job);
        self.nodes.insert(job, index);
        index
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, job: JobKind) -> bool {
        self.nodes.contains_key(&job)
    }

    /// Every job, in insertion order.
    pub fn jobs(&self) -> Vec<JobKind> {
        self.graph.node_weights().copied().collect()
    }

    /// Jobs that must complete before `job`.
    pub fn dependencies(&self, job: JobKind) -> Vec<JobKind> {
        let Some(&index) = self.nodes.get(&job) else {
            return Vec::new();
        };
        let mut dependencies: Vec<JobKind> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|n| self.graph[n])
            .collect();
        // neighbors_directed walks edges newest first
        dependencies.reverse();
        dependencies
    }

    /// Runs every job on the calling thread in a topological order.
    pub fn run_sequential<E>(
        &self,
        mut run: impl FnMut(&JobKind) -> Result<(), E>,
    ) -> JobReport<E> {
        let mut report = JobReport::new();
        let Ok(order) = toposort(&self.graph, None) else {
            error!("Job graph contains a cycle; nothing was run");
            return report;
        };
        for index in order {
            let job = self.graph[index];
            report.record(job, run(&job));
        }
        report
    }

    /// Runs jobs on up to `workers` scoped threads.
    ///
    /// A job is queued once all of its dependencies have finished.
    pub fn run_parallel<E: Send>(
        &self,
        workers: usize,
        run: impl Fn(&JobKind) -> Result<(), E> + Sync,
    ) -> JobReport<E> {
        let mut report = JobReport::new();
        if self.is_empty() {
            return report;
        }
        if toposort(&self.graph, None).is_err() {
            error!("Job graph contains a cycle; nothing was run");
            return report;
        }

        let graph = &self.graph;
        let run = &run;
        let mut in_degree: Vec<usize> = graph
            .node_indices()
            .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        thread::scope(|scope| {
            let (ready_tx, ready_rx) = unbounded::<NodeIndex>();
            let (done_tx, done_rx) = unbounded::<(NodeIndex, Result<(), E>)>();

            for _ in 0..workers.clamp(1, graph.node_count()) {
                let ready_rx = ready_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for index in ready_rx.iter() {
                        let result = run(&graph[index]);
                        if done_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            for index in graph.node_indices() {
                if in_degree[index.index()] == 0 {
                    let _ = ready_tx.send(index);
                }
            }

            let mut remaining = graph.node_count();
            while remaining > 0 {
                let Ok((index, result)) = done_rx.recv() else {
                    warn!("Job workers exited with {} job(s) outstanding", remaining);
                    break;
                };
                remaining -= 1;
                report.record(graph[index], result);

                for next in graph.neighbors_directed(index, Direction::Outgoing) {
                    let degree = &mut in_degree[next.index()];
                    *degree -= 1;
                    if *degree == 0 {
                        let _ = ready_tx.send(next);
                    }
                }
            }
            // Workers stop once the ready queue closes.
            drop(ready_tx);
        });

        report
    }
}

/// What a job needs to run.
pub struct JobContext<'a> {
    pub scene: &'a RwLock<Scene>,
    pub resources: &'a SceneResources,
    pub commands: &'a CommandBufferManager,
}

impl JobContext<'_> {
    pub fn run(&self, job: &JobKind) -> RendererResult<()> {
        match *job {
            JobKind::UpdateWorldTransforms => {
                self.scene.write().update_world_transforms();
            }
            JobKind::BuildGeometry(id) => {
                let mesh = self
                    .scene
                    .read()
                    .geometry_data(id)
                    .ok_or(RendererError::MissingGeometryData(id))?;
                let index = self.resources.build_geometry(id, &mesh)?;
                debug!("Built {} as geometry {}", id, index);
            }
            JobKind::BuildTexture(id) => {
                let image = self
                    .scene
                    .read()
                    .texture_data(id)
                    .ok_or(RendererError::MissingTextureData(id))?;
                self.resources.add_texture(id, &image)?;
            }
            JobKind::BuildSceneTlas => {
                let scene = self.scene.read();
                let build = self.resources.build_scene_tlas(&scene)?;
                if build.skipped > 0 {
                    warn!(
                        "{} renderable(s) reference geometry that is not built",
                        build.skipped
                    );
                }
            }
            JobKind::DestroyRetiredResources => {
                self.resources.destroy_retired_resources();
                self.commands.destroy_expired_resources();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn snapshot(flags: DirtySet, geometries: &[u64]) -> DirtySnapshot {
        DirtySnapshot {
            flags,
            geometries: geometries.iter().map(|&g| GeometryId(g)).collect(),
            textures: Vec::new(),
        }
    }

    #[test]
    fn test_clean_frame_only_reclaims() {
        let graph = JobGraph::render_jobs(&DirtySnapshot::default());
        assert_eq!(graph.jobs(), vec![JobKind::DestroyRetiredResources]);
    }

    #[test]
    fn test_transform_only() {
        let graph = JobGraph::render_jobs(&snapshot(DirtySet::TRANSFORM, &[]));
        assert_eq!(
            graph.jobs(),
            vec![
                JobKind::UpdateWorldTransforms,
                JobKind::BuildSceneTlas,
                JobKind::DestroyRetiredResources,
            ]
        );
        assert_eq!(
            graph.dependencies(JobKind::BuildSceneTlas),
            vec![JobKind::UpdateWorldTransforms]
        );
        assert!(
            graph
                .dependencies(JobKind::DestroyRetiredResources)
                .is_empty()
        );
    }

    #[test]
    fn test_geometry_jobs_feed_tlas() {
        let graph = JobGraph::render_jobs(&snapshot(DirtySet::GEOMETRY, &[1, 2]));
        assert!(!graph.contains(JobKind::UpdateWorldTransforms));
        assert_eq!(
            graph.dependencies(JobKind::BuildSceneTlas),
            vec![
                JobKind::BuildGeometry(GeometryId(1)),
                JobKind::BuildGeometry(GeometryId(2)),
            ]
        );
    }

    #[test]
    fn test_camera_only_needs_no_rebuild() {
        let graph = JobGraph::render_jobs(&snapshot(DirtySet::CAMERA, &[]));
        assert_eq!(graph.jobs(), vec![JobKind::DestroyRetiredResources]);
    }

    #[test]
    fn test_sequential_respects_edges() {
        let graph = JobGraph::render_jobs(&snapshot(DirtySet::ALL, &[3]));
        let report = graph.run_sequential(|_| Ok::<(), String>(()));
        let order = report.completed;
        let position = |job| order.iter().position(|j| *j == job).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(JobKind::UpdateWorldTransforms) < position(JobKind::BuildSceneTlas));
        assert!(
            position(JobKind::BuildGeometry(GeometryId(3))) < position(JobKind::BuildSceneTlas)
        );
    }

    #[test]
    fn test_parallel_respects_edges() {
        let graph = JobGraph::render_jobs(&snapshot(DirtySet::ALL, &[1, 2, 3, 4]));
        let log = Mutex::new(Vec::new());
        let report = graph.run_parallel(4, |job| {
            log.lock().unwrap().push(*job);
            Ok::<(), String>(())
        });
        assert!(report.is_success());
        assert_eq!(report.completed.len(), graph.len());

        let log = log.into_inner().unwrap();
        let tlas = log
            .iter()
            .position(|j| *j == JobKind::BuildSceneTlas)
            .unwrap();
        for dependency in graph.dependencies(JobKind::BuildSceneTlas) {
            assert!(log.iter().position(|j| *j == dependency).unwrap() < tlas);
        }
    }

    #[test]
    fn test_failed_job_still_releases_dependents() {
        let graph = JobGraph::render_jobs(&snapshot(DirtySet::GEOMETRY, &[9]));
        let report = graph.run_parallel(2, |job| match job {
            JobKind::BuildGeometry(_) => Err("no data"),
            _ => Ok(()),
        });
        assert_eq!(report.failed.len(), 1);
        assert!(report.completed.contains(&JobKind::BuildSceneTlas));
    }
}
