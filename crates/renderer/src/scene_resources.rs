//! GPU-resident scene: geometry, textures and acceleration structures.
//!
//! [`SceneResources`] is the authoritative mapping from scene geometry ids
//! to GPU geometry indices and bottom-level structures, and owns the single
//! current top-level structure. Uploads are recorded into transient command
//! buffers and released to the [`CommandBufferManager`]; the render loop
//! submits them before the next frame's commands.
//!
//! # Top-level structure replacement
//!
//! A rebuild installs a new [`SceneTlas`] and retires the previous one with
//! a time-to-live equal to the number of frames in flight. The TTL drops by
//! one per frame and the structure, with its instance and material buffers,
//! is destroyed only once it reaches zero, so no in-flight frame can trace
//! against a destroyed structure.
//!
//! Table mutation and snapshot reads happen under one mutex; buffer
//! creation and command recording happen outside it.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use tracer_resources::{ImageData, MeshData, Vertex};
use tracer_rhi::acceleration::{AccelerationStructureDesc, AccelerationStructureInstance};
use tracer_rhi::buffer::{BufferDesc, BufferUsage};
use tracer_rhi::command::Access;
use tracer_rhi::image::{ImageDesc, ImageFormat, ImageState, ImageUsage};
use tracer_rhi::{
    AccelerationStructureHandle, BufferHandle, DeviceRef, Extent2D, ImageHandle, RhiError,
};
use tracer_scene::{GeometryId, Scene, TextureId};

use crate::command_buffer_manager::{
    CommandBufferManager, TransientCommandBuffer, TransientResource,
};
use crate::descriptor_manager::{DescriptorManager, ResourceClass};
use crate::error::RendererResult;
use crate::gpu_types::{GeometryInstance, MaterialData, NO_TEXTURE};

/// Geometry index returned for ids that have not been built.
pub const INVALID_GEOMETRY_INDEX: u32 = u32::MAX;

/// A built geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Packed [`Vertex`] attributes.
    pub attributes: BufferHandle,
    pub indices: BufferHandle,
    pub blas: AccelerationStructureHandle,
    /// Device reference stored in top-level instances.
    pub blas_reference: u64,
    pub face_count: u32,
}

/// An uploaded texture and its index in the texture descriptor array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Texture {
    pub image: ImageHandle,
    pub index: u32,
}

/// The scene-wide top-level structure and the buffers it was built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SceneTlas {
    pub tlas: AccelerationStructureHandle,
    /// Build input: one [`AccelerationStructureInstance`] per instance.
    pub instances: BufferHandle,
    /// One [`GeometryInstance`] per instance, for shading.
    pub geometry_instances: BufferHandle,
    pub materials: BufferHandle,
    pub instance_count: u32,
}

/// A superseded resource kept alive for `ttl` more frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetiredResource<T> {
    pub resource: T,
    pub ttl: u32,
}

impl<T> RetiredResource<T> {
    pub fn update_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
    }

    pub fn is_expired(&self) -> bool {
        self.ttl == 0
    }
}

#[derive(Default)]
struct SceneState {
    geometry: Vec<Geometry>,
    geometry_lookup: HashMap<GeometryId, u32>,
    textures: HashMap<TextureId, Texture>,
    scene_tlas: Option<SceneTlas>,
    retired: Vec<RetiredResource<SceneTlas>>,
}

/// Outcome of a top-level structure build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlasBuild {
    pub instance_count: u32,
    pub material_count: u32,
    /// Renderables skipped because their geometry is not built yet.
    pub skipped: u32,
}

/// Objects created during a build that must be destroyed if it fails.
#[derive(Default)]
struct Created {
    buffers: Vec<BufferHandle>,
    images: Vec<ImageHandle>,
    acceleration_structures: Vec<AccelerationStructureHandle>,
}

impl Created {
    fn destroy(self, device: &DeviceRef) {
        for handle in self.acceleration_structures {
            device.destroy_acceleration_structure(handle);
        }
        for buffer in self.buffers {
            device.destroy_buffer(buffer);
        }
        for image in self.images {
            device.destroy_image(image);
        }
    }
}

/// GPU-resident scene tables and acceleration structure maintenance.
pub struct SceneResources {
    device: DeviceRef,
    commands: Arc<CommandBufferManager>,
    descriptors: Arc<DescriptorManager>,
    frames_in_flight: u32,
    state: Mutex<SceneState>,
}

impl SceneResources {
    pub fn new(
        device: DeviceRef,
        commands: Arc<CommandBufferManager>,
        descriptors: Arc<DescriptorManager>,
        frames_in_flight: u32,
    ) -> Self {
        Self {
            device,
            commands,
            descriptors,
            frames_in_flight,
            state: Mutex::new(SceneState::default()),
        }
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight
    }

    // ========================================================================
    // Geometry table
    // ========================================================================

    /// Registers a built geometry and returns its index.
    ///
    /// The attribute and index buffers are bound in their descriptor arrays
    /// at the geometry's index. Indices increase monotonically; re-adding an
    /// id points it at the new geometry. Nothing is registered on error.
    pub fn add_geometry(&self, id: GeometryId, geometry: Geometry) -> RendererResult<u32> {
        let mut state = self.state.lock();
        let index = state.geometry.len() as u32;
        self.bind_geometry_descriptors(index, &geometry)?;
        Self::register_geometry(&mut state, id, index, geometry);
        Ok(index)
    }

    /// Reserves both descriptors of geometry `index` and writes its buffers.
    ///
    /// Either both descriptors are bound or neither is held on return.
    fn bind_geometry_descriptors(&self, index: u32, geometry: &Geometry) -> RendererResult<()> {
        let mut bound = Vec::with_capacity(2);
        for (class, buffer) in [
            (ResourceClass::AttributeBuffer, geometry.attributes),
            (ResourceClass::IndexBuffer, geometry.indices),
        ] {
            let result = self.descriptors.allocate_descriptor(class).and_then(|descriptor| {
                if descriptor != index {
                    self.descriptors.free_descriptor(class, descriptor);
                    return Err(RhiError::OutOfDescriptors(format!(
                        "{class} descriptor {descriptor} does not match geometry index {index}"
                    )));
                }
                self.descriptors
                    .update_buffer_descriptor(class, descriptor, buffer)
                    .inspect_err(|_| self.descriptors.free_descriptor(class, descriptor))
            });
            if let Err(e) = result {
                for class in bound {
                    self.descriptors.free_descriptor(class, index);
                }
                return Err(e.into());
            }
            bound.push(class);
        }
        Ok(())
    }

    fn unbind_geometry_descriptors(&self, index: u32) {
        self.descriptors.free_descriptor(ResourceClass::AttributeBuffer, index);
        self.descriptors.free_descriptor(ResourceClass::IndexBuffer, index);
    }

    fn register_geometry(state: &mut SceneState, id: GeometryId, index: u32, geometry: Geometry) {
        state.geometry.push(geometry);
        state.geometry_lookup.insert(id, index);
        debug!(
            "Geometry {} registered at index {} ({} faces)",
            id, index, geometry.face_count
        );
    }

    /// Index and stored geometry for `id`.
    pub fn lookup_geometry(&self, id: GeometryId) -> Option<(u32, Geometry)> {
        let state = self.state.lock();
        let index = *state.geometry_lookup.get(&id)?;
        state
            .geometry
            .get(index as usize)
            .map(|geometry| (index, *geometry))
    }

    /// Index for `id`, or [`INVALID_GEOMETRY_INDEX`] when it is not built.
    pub fn lookup_geometry_index(&self, id: GeometryId) -> u32 {
        self.state
            .lock()
            .geometry_lookup
            .get(&id)
            .copied()
            .unwrap_or(INVALID_GEOMETRY_INDEX)
    }

    pub fn geometry(&self) -> Vec<Geometry> {
        self.state.lock().geometry.clone()
    }

    pub fn geometry_count(&self) -> usize {
        self.state.lock().geometry.len()
    }

    /// Uploads `mesh` and records its bottom-level structure build.
    ///
    /// The work is released to the command buffer manager; it executes with
    /// the next batch submission.
    pub fn build_geometry(&self, id: GeometryId, mesh: &MeshData) -> RendererResult<u32> {
        let vertices = mesh.to_vertices()?;
        let indices = mesh.indices();

        let mut created = Created::default();
        let mut transient = Vec::new();
        let recorded = self.record_geometry(&vertices, &indices, &mut created, &mut transient);
        let (command_buffer, geometry) = match recorded {
            Ok(recorded) => recorded,
            Err(e) => {
                self.destroy_transient(&transient);
                created.destroy(&self.device);
                return Err(e);
            }
        };

        // Nothing is queued until both descriptors are bound.
        let mut state = self.state.lock();
        let index = state.geometry.len() as u32;
        if let Err(e) = self.bind_geometry_descriptors(index, &geometry) {
            warn!("Cannot register geometry {}: {}", id, e);
            self.commands.discard(command_buffer, &transient);
            created.destroy(&self.device);
            return Err(e);
        }
        if let Err(e) = self.commands.release(command_buffer, transient) {
            self.unbind_geometry_descriptors(index);
            created.destroy(&self.device);
            return Err(e.into());
        }

        // The build is queued; the geometry is registered now so a
        // top-level build later in the same frame can reference it.
        Self::register_geometry(&mut state, id, index, geometry);
        Ok(index)
    }

    fn record_geometry(
        &self,
        vertices: &[Vertex],
        indices: &[u32],
        created: &mut Created,
        transient: &mut Vec<TransientResource>,
    ) -> RendererResult<(TransientCommandBuffer, Geometry)> {
        let attributes = self.create_buffer(BufferUsage::Vertex, size_of_val(vertices), created)?;
        let index_buffer = self.create_buffer(BufferUsage::Index, size_of_val(indices), created)?;
        let vertex_staging = self.create_staging(vertices, transient)?;
        let index_staging = self.create_staging(indices, transient)?;

        let desc = AccelerationStructureDesc::BottomLevel {
            vertices: attributes,
            vertex_count: vertices.len() as u32,
            vertex_stride: Vertex::STRIDE,
            indices: index_buffer,
            triangle_count: (indices.len() / 3) as u32,
        };
        let blas = self.device.create_acceleration_structure(&desc)?;
        created.acceleration_structures.push(blas.handle);
        let scratch = self
            .device
            .create_buffer(&BufferDesc::new(BufferUsage::Scratch, blas.scratch_size))?;
        transient.push(TransientResource::Buffer(scratch));

        let command_buffer = self.commands.acquire()?;
        let encoder = command_buffer.encoder(self.device.as_ref());
        let encoded = encoder
            .copy_buffer(vertex_staging, attributes, size_of_val(vertices) as u64)
            .and_then(|()| {
                encoder.copy_buffer(index_staging, index_buffer, size_of_val(indices) as u64)
            })
            .and_then(|()| {
                encoder.memory_barrier(Access::TransferWrite, Access::AccelerationStructureBuild)
            })
            .and_then(|()| encoder.build_acceleration_structure(blas.handle, desc, scratch))
            .and_then(|()| {
                encoder.memory_barrier(Access::AccelerationStructureBuild, Access::ShaderRead)
            });
        if let Err(e) = encoded {
            // Transient resources are destroyed by the caller.
            self.commands.discard(command_buffer, &[]);
            return Err(e.into());
        }

        Ok((
            command_buffer,
            Geometry {
                attributes,
                indices: index_buffer,
                blas: blas.handle,
                blas_reference: blas.reference,
                face_count: (indices.len() / 3) as u32,
            },
        ))
    }

    // ========================================================================
    // Textures
    // ========================================================================

    /// Uploads `image` and binds it in the texture descriptor array.
    pub fn add_texture(&self, id: TextureId, image: &ImageData) -> RendererResult<u32> {
        let pixels = image.to_rgba_bytes()?;
        let desc = ImageDesc {
            extent: Extent2D::new(image.width, image.height),
            format: if image.is_hdr() {
                ImageFormat::Rgba32Float
            } else {
                ImageFormat::Rgba8Unorm
            },
            usage: ImageUsage::Texture,
        };

        let mut created = Created::default();
        let mut transient = Vec::new();
        let result = self.record_texture(&desc, &pixels, &mut created, &mut transient);
        let (command_buffer, handle) = match result {
            Ok(recorded) => recorded,
            Err(e) => {
                self.destroy_transient(&transient);
                created.destroy(&self.device);
                return Err(e);
            }
        };
        if let Err(e) = self.commands.release(command_buffer, transient) {
            created.destroy(&self.device);
            return Err(e.into());
        }

        let index = match self
            .descriptors
            .allocate_descriptor(ResourceClass::TextureImage)
        {
            Ok(index) => index,
            Err(e) => {
                self.commands.retire_after_next_batch(TransientResource::Image(handle));
                return Err(e.into());
            }
        };
        self.descriptors
            .update_image_descriptor(ResourceClass::TextureImage, index, handle)?;

        let previous = self.state.lock().textures.insert(
            id,
            Texture {
                image: handle,
                index,
            },
        );
        if let Some(previous) = previous {
            // Frames in flight may still sample it.
            self.commands
                .retire_after_next_batch(TransientResource::Image(previous.image));
            self.descriptors
                .free_descriptor(ResourceClass::TextureImage, previous.index);
        }
        debug!("Texture {} uploaded at index {} ({})", id, index, desc.extent);
        Ok(index)
    }

    fn record_texture(
        &self,
        desc: &ImageDesc,
        pixels: &[u8],
        created: &mut Created,
        transient: &mut Vec<TransientResource>,
    ) -> RendererResult<(TransientCommandBuffer, ImageHandle)> {
        let image = self.device.create_image(desc)?;
        created.images.push(image);
        let staging = self.create_staging(pixels, transient)?;

        let command_buffer = self.commands.acquire()?;
        let encoder = command_buffer.encoder(self.device.as_ref());
        let encoded = encoder
            .image_barrier(image, ImageState::Undefined, ImageState::TransferDst)
            .and_then(|()| encoder.copy_buffer_to_image(staging, image))
            .and_then(|()| {
                encoder.image_barrier(image, ImageState::TransferDst, ImageState::ShaderRead)
            });
        if let Err(e) = encoded {
            self.commands.discard(command_buffer, &[]);
            return Err(e.into());
        }
        Ok((command_buffer, image))
    }

    pub fn lookup_texture(&self, id: TextureId) -> Option<Texture> {
        self.state.lock().textures.get(&id).copied()
    }

    // ========================================================================
    // Top-level structure
    // ========================================================================

    /// Rebuilds the scene top-level structure from the current renderables.
    ///
    /// World transforms must be up to date. Renderables whose geometry has
    /// not been built are skipped. An empty scene retires the current
    /// structure without building a new one.
    pub fn build_scene_tlas(&self, scene: &Scene) -> RendererResult<TlasBuild> {
        let renderables = scene.renderables();

        let mut instances = Vec::with_capacity(renderables.len());
        let mut geometry_instances = Vec::with_capacity(renderables.len());
        let mut materials: Vec<MaterialData> = Vec::new();
        let mut material_lookup = HashMap::new();
        let mut skipped = 0;
        {
            let state = self.state.lock();
            for renderable in &renderables {
                let Some(geometry) = state
                    .geometry_lookup
                    .get(&renderable.geometry)
                    .and_then(|&index| Some((index, state.geometry.get(index as usize)?)))
                else {
                    trace!(
                        "Skipping {}: {} not built",
                        renderable.entity,
                        renderable.geometry
                    );
                    skipped += 1;
                    continue;
                };
                let (geometry_index, geometry) = geometry;

                let material_index = *material_lookup
                    .entry(renderable.material_id)
                    .or_insert_with(|| {
                        let texture = renderable
                            .material
                            .albedo_texture
                            .and_then(|t| state.textures.get(&t))
                            .map_or(NO_TEXTURE, |t| t.index);
                        materials.push(MaterialData::new(renderable.material, texture));
                        materials.len() as u32 - 1
                    });

                let custom_index = geometry_instances.len() as u32;
                geometry_instances.push(GeometryInstance::new(
                    renderable.world_matrix,
                    material_index,
                    geometry_index,
                    geometry.face_count,
                ));
                let rows = renderable.world_matrix.transpose();
                instances.push(AccelerationStructureInstance::new(
                    [
                        rows.x_axis.to_array(),
                        rows.y_axis.to_array(),
                        rows.z_axis.to_array(),
                    ],
                    custom_index,
                    geometry.blas_reference,
                ));
            }
        }

        let build = TlasBuild {
            instance_count: instances.len() as u32,
            material_count: materials.len() as u32,
            skipped,
        };
        if instances.is_empty() {
            self.install_tlas(None);
            return Ok(build);
        }

        let mut created = Created::default();
        let mut transient = Vec::new();
        let recorded = self.record_tlas(
            &instances,
            &geometry_instances,
            &materials,
            &mut created,
            &mut transient,
        );
        let (command_buffer, tlas) = match recorded {
            Ok(recorded) => recorded,
            Err(e) => {
                self.destroy_transient(&transient);
                created.destroy(&self.device);
                return Err(e);
            }
        };
        if let Err(e) = self.commands.release(command_buffer, transient) {
            created.destroy(&self.device);
            return Err(e.into());
        }

        self.install_tlas(Some(tlas));
        debug!(
            "Scene TLAS rebuilt: {} instance(s), {} material(s)",
            build.instance_count, build.material_count
        );
        Ok(build)
    }

    fn record_tlas(
        &self,
        instances: &[AccelerationStructureInstance],
        geometry_instances: &[GeometryInstance],
        materials: &[MaterialData],
        created: &mut Created,
        transient: &mut Vec<TransientResource>,
    ) -> RendererResult<(TransientCommandBuffer, SceneTlas)> {
        let instance_buffer =
            self.create_buffer(BufferUsage::Instance, size_of_val(instances), created)?;
        let geometry_instance_buffer =
            self.create_buffer(BufferUsage::Storage, size_of_val(geometry_instances), created)?;
        let material_buffer =
            self.create_buffer(BufferUsage::Storage, size_of_val(materials), created)?;

        let uploads = [
            (self.create_staging(instances, transient)?, instance_buffer, size_of_val(instances)),
            (
                self.create_staging(geometry_instances, transient)?,
                geometry_instance_buffer,
                size_of_val(geometry_instances),
            ),
            (self.create_staging(materials, transient)?, material_buffer, size_of_val(materials)),
        ];

        let desc = AccelerationStructureDesc::TopLevel {
            instances: instance_buffer,
            instance_count: instances.len() as u32,
        };
        let tlas = self.device.create_acceleration_structure(&desc)?;
        created.acceleration_structures.push(tlas.handle);
        let scratch = self
            .device
            .create_buffer(&BufferDesc::new(BufferUsage::Scratch, tlas.scratch_size))?;
        transient.push(TransientResource::Buffer(scratch));

        let command_buffer = self.commands.acquire()?;
        let encoder = command_buffer.encoder(self.device.as_ref());
        let encoded = uploads
            .iter()
            .try_for_each(|&(src, dst, size)| encoder.copy_buffer(src, dst, size as u64))
            .and_then(|()| {
                encoder.memory_barrier(Access::TransferWrite, Access::AccelerationStructureBuild)
            })
            .and_then(|()| encoder.memory_barrier(Access::TransferWrite, Access::ShaderRead))
            // Bottom-level builds released earlier in the batch
            .and_then(|()| {
                encoder.memory_barrier(
                    Access::AccelerationStructureBuild,
                    Access::AccelerationStructureBuild,
                )
            })
            .and_then(|()| encoder.build_acceleration_structure(tlas.handle, desc, scratch))
            .and_then(|()| {
                encoder.memory_barrier(Access::AccelerationStructureBuild, Access::ShaderRead)
            });
        if let Err(e) = encoded {
            self.commands.discard(command_buffer, &[]);
            return Err(e.into());
        }

        Ok((
            command_buffer,
            SceneTlas {
                tlas: tlas.handle,
                instances: instance_buffer,
                geometry_instances: geometry_instance_buffer,
                materials: material_buffer,
                instance_count: instances.len() as u32,
            },
        ))
    }

    /// Makes `tlas` current, retiring the previous structure.
    pub fn install_tlas(&self, tlas: Option<SceneTlas>) {
        let mut state = self.state.lock();
        if let Some(previous) = std::mem::replace(&mut state.scene_tlas, tlas) {
            state.retired.push(RetiredResource {
                resource: previous,
                ttl: self.frames_in_flight,
            });
        }
    }

    pub fn scene_tlas(&self) -> Option<SceneTlas> {
        self.state.lock().scene_tlas
    }

    // ========================================================================
    // Retirement
    // ========================================================================

    /// Advances every retired structure's TTL by one frame.
    pub fn update_retired_resources(&self) {
        for retired in &mut self.state.lock().retired {
            retired.update_ttl();
        }
    }

    /// Destroys retired structures whose TTL has reached zero.
    pub fn destroy_retired_resources(&self) {
        let expired: Vec<SceneTlas> = {
            let mut state = self.state.lock();
            let (expired, live) = std::mem::take(&mut state.retired)
                .into_iter()
                .partition(RetiredResource::is_expired);
            state.retired = live;
            expired.into_iter().map(|r| r.resource).collect()
        };
        for tlas in expired {
            trace!("Destroying retired TLAS {:?}", tlas.tlas);
            self.destroy_tlas(tlas);
        }
    }

    pub fn retired_resources(&self) -> Vec<RetiredResource<SceneTlas>> {
        self.state.lock().retired.clone()
    }

    /// Destroys every geometry, texture and acceleration structure.
    ///
    /// The caller must have drained the device.
    pub fn destroy_all(&self) {
        let state = std::mem::take(&mut *self.state.lock());
        for retired in state.retired {
            self.destroy_tlas(retired.resource);
        }
        if let Some(tlas) = state.scene_tlas {
            self.destroy_tlas(tlas);
        }
        let geometry_count = state.geometry.len();
        for (index, geometry) in state.geometry.into_iter().enumerate() {
            self.device.destroy_acceleration_structure(geometry.blas);
            self.device.destroy_buffer(geometry.attributes);
            self.device.destroy_buffer(geometry.indices);
            self.descriptors
                .free_descriptor(ResourceClass::AttributeBuffer, index as u32);
            self.descriptors
                .free_descriptor(ResourceClass::IndexBuffer, index as u32);
        }
        for texture in state.textures.into_values() {
            self.device.destroy_image(texture.image);
            self.descriptors
                .free_descriptor(ResourceClass::TextureImage, texture.index);
        }
        info!("Scene resources destroyed ({} geometries)", geometry_count);
    }

    fn destroy_tlas(&self, tlas: SceneTlas) {
        self.device.destroy_acceleration_structure(tlas.tlas);
        self.device.destroy_buffer(tlas.instances);
        self.device.destroy_buffer(tlas.geometry_instances);
        self.device.destroy_buffer(tlas.materials);
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn create_buffer(
        &self,
        usage: BufferUsage,
        size: usize,
        created: &mut Created,
    ) -> RendererResult<BufferHandle> {
        let buffer = self
            .device
            .create_buffer(&BufferDesc::new(usage, size as u64))?;
        created.buffers.push(buffer);
        Ok(buffer)
    }

    /// Host-visible copy of `data`, destroyed after the upload executes.
    fn create_staging<T: Pod>(
        &self,
        data: &[T],
        transient: &mut Vec<TransientResource>,
    ) -> RendererResult<BufferHandle> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let staging = self.device.create_buffer(&BufferDesc::staging(bytes.len()))?;
        transient.push(TransientResource::Buffer(staging));
        self.device.write_buffer(staging, 0, bytes)?;
        Ok(staging)
    }

    fn destroy_transient(&self, resources: &[TransientResource]) {
        for resource in resources {
            match *resource {
                TransientResource::Buffer(buffer) => self.device.destroy_buffer(buffer),
                TransientResource::Image(image) => self.device.destroy_image(image),
            }
        }
    }
}
