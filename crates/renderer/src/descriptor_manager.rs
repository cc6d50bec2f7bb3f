//! Bindless descriptor arrays per resource class.
//!
//! Geometry attribute buffers, index buffers and textures are each bound
//! through one variable-count descriptor array that the ray-tracing shaders
//! index with the geometry or texture index. Arrays live for the whole
//! renderer lifetime, independent of frames in flight.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, warn};

use tracer_rhi::descriptor::{
    DescriptorBinding, DescriptorKind, DescriptorPoolDesc, DescriptorResource, DescriptorWrite,
    ShaderStages,
};
use tracer_rhi::{
    BufferHandle, DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, DeviceRef,
    ImageHandle, RhiError, RhiResult,
};

/// Kind of resource bound through a bindless array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    AttributeBuffer,
    IndexBuffer,
    TextureImage,
}

impl ResourceClass {
    /// All classes, in the descriptor set order the ray-tracing pipeline uses.
    pub const ALL: [ResourceClass; 3] = [
        ResourceClass::AttributeBuffer,
        ResourceClass::IndexBuffer,
        ResourceClass::TextureImage,
    ];

    pub fn descriptor_kind(self) -> DescriptorKind {
        match self {
            ResourceClass::AttributeBuffer | ResourceClass::IndexBuffer => {
                DescriptorKind::StorageBuffer
            }
            ResourceClass::TextureImage => DescriptorKind::SampledImage,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceClass::AttributeBuffer => "attribute buffer",
            ResourceClass::IndexBuffer => "index buffer",
            ResourceClass::TextureImage => "texture image",
        })
    }
}

struct ClassDescriptors {
    layout: DescriptorSetLayoutHandle,
    pool: DescriptorPoolHandle,
    set: DescriptorSetHandle,
    capacity: u32,
    next: u32,
    free: Vec<u32>,
}

/// Owns one bindless descriptor set per [`ResourceClass`].
pub struct DescriptorManager {
    device: DeviceRef,
    classes: Mutex<HashMap<ResourceClass, ClassDescriptors>>,
}

impl DescriptorManager {
    pub fn new(device: DeviceRef) -> Self {
        Self {
            device,
            classes: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the layout, pool and set backing `class` with room for
    /// `capacity` descriptors.
    pub fn create_descriptor_pool(&self, class: ResourceClass, capacity: u32) -> RhiResult<()> {
        let kind = class.descriptor_kind();
        let layout = self
            .device
            .create_descriptor_set_layout(&[DescriptorBinding::bindless(
                0,
                kind,
                capacity,
                ShaderStages::RAY_TRACING,
            )])?;

        let pool = match self.device.create_descriptor_pool(&DescriptorPoolDesc {
            max_sets: 1,
            sizes: vec![(kind, capacity)],
        }) {
            Ok(pool) => pool,
            Err(e) => {
                self.device.destroy_descriptor_set_layout(layout);
                return Err(e);
            }
        };

        let set = match self
            .device
            .allocate_descriptor_set(pool, layout, Some(capacity))
        {
            Ok(set) => set,
            Err(e) => {
                self.device.destroy_descriptor_pool(pool);
                self.device.destroy_descriptor_set_layout(layout);
                return Err(e);
            }
        };

        debug!("Created {} descriptor pool ({} descriptors)", class, capacity);
        let previous = self.classes.lock().insert(
            class,
            ClassDescriptors {
                layout,
                pool,
                set,
                capacity,
                next: 0,
                free: Vec::new(),
            },
        );
        if let Some(previous) = previous {
            warn!("Replacing existing {} descriptor pool", class);
            self.destroy_class(previous);
        }
        Ok(())
    }

    /// Reserves a descriptor index in `class`, reusing freed indices first.
    pub fn allocate_descriptor(&self, class: ResourceClass) -> RhiResult<u32> {
        let mut classes = self.classes.lock();
        let descriptors = classes
            .get_mut(&class)
            .ok_or_else(|| RhiError::OutOfDescriptors(format!("no {class} descriptor pool")))?;

        if let Some(index) = descriptors.free.pop() {
            return Ok(index);
        }
        if descriptors.next >= descriptors.capacity {
            return Err(RhiError::OutOfDescriptors(format!(
                "{} descriptors exhausted ({} in use)",
                class, descriptors.capacity
            )));
        }
        let index = descriptors.next;
        descriptors.next += 1;
        Ok(index)
    }

    /// Returns `index` to `class` for reuse.
    pub fn free_descriptor(&self, class: ResourceClass, index: u32) {
        if let Some(descriptors) = self.classes.lock().get_mut(&class)
            && index < descriptors.next
            && !descriptors.free.contains(&index)
        {
            descriptors.free.push(index);
        }
    }

    pub fn update_buffer_descriptor(
        &self,
        class: ResourceClass,
        index: u32,
        buffer: BufferHandle,
    ) -> RhiResult<()> {
        self.write(class, index, DescriptorResource::StorageBuffer(buffer))
    }

    pub fn update_image_descriptor(
        &self,
        class: ResourceClass,
        index: u32,
        image: ImageHandle,
    ) -> RhiResult<()> {
        self.write(class, index, DescriptorResource::SampledImage(image))
    }

    fn write(&self, class: ResourceClass, index: u32, resource: DescriptorResource) -> RhiResult<()> {
        let set = self
            .descriptor_set(class)
            .ok_or_else(|| RhiError::OutOfDescriptors(format!("no {class} descriptor pool")))?;
        self.device
            .write_descriptors(set, &[DescriptorWrite::at(0, index, resource)])
    }

    pub fn descriptor_set(&self, class: ResourceClass) -> Option<DescriptorSetHandle> {
        self.classes.lock().get(&class).map(|d| d.set)
    }

    pub fn descriptor_set_layout(&self, class: ResourceClass) -> Option<DescriptorSetLayoutHandle> {
        self.classes.lock().get(&class).map(|d| d.layout)
    }

    /// Descriptor sets of every class in [`ResourceClass::ALL`] order.
    pub fn descriptor_sets(&self) -> Vec<DescriptorSetHandle> {
        let classes = self.classes.lock();
        ResourceClass::ALL
            .iter()
            .filter_map(|class| classes.get(class).map(|d| d.set))
            .collect()
    }

    pub fn destroy_all_descriptor_pools(&self) {
        let classes: Vec<ClassDescriptors> =
            self.classes.lock().drain().map(|(_, d)| d).collect();
        for descriptors in classes {
            self.destroy_class(descriptors);
        }
    }

    fn destroy_class(&self, descriptors: ClassDescriptors) {
        self.device.destroy_descriptor_pool(descriptors.pool);
        self.device.destroy_descriptor_set_layout(descriptors.layout);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tracer_rhi::GpuDevice;
    use tracer_rhi::buffer::{BufferDesc, BufferUsage};
    use tracer_rhi::headless::HeadlessDevice;

    use super::*;

    fn manager(capacity: u32) -> (Arc<HeadlessDevice>, DescriptorManager) {
        let device = Arc::new(HeadlessDevice::new());
        let manager = DescriptorManager::new(device.clone());
        for class in ResourceClass::ALL {
            manager.create_descriptor_pool(class, capacity).unwrap();
        }
        (device, manager)
    }

    #[test]
    fn test_indices_increase_and_reuse() {
        let (_device, manager) = manager(4);
        let class = ResourceClass::AttributeBuffer;
        assert_eq!(manager.allocate_descriptor(class).unwrap(), 0);
        assert_eq!(manager.allocate_descriptor(class).unwrap(), 1);
        assert_eq!(manager.allocate_descriptor(class).unwrap(), 2);

        manager.free_descriptor(class, 1);
        assert_eq!(manager.allocate_descriptor(class).unwrap(), 1);
        assert_eq!(manager.allocate_descriptor(class).unwrap(), 3);

        // Classes are independent
        assert_eq!(
            manager
                .allocate_descriptor(ResourceClass::IndexBuffer)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_exhausted_capacity() {
        let (_device, manager) = manager(1);
        let class = ResourceClass::TextureImage;
        manager.allocate_descriptor(class).unwrap();
        assert!(matches!(
            manager.allocate_descriptor(class),
            Err(RhiError::OutOfDescriptors(_))
        ));
    }

    #[test]
    fn test_buffer_descriptor_written_at_index() {
        let (device, manager) = manager(8);
        let buffer = device
            .create_buffer(&BufferDesc::new(BufferUsage::Vertex, 64))
            .unwrap();
        let class = ResourceClass::AttributeBuffer;
        let index = manager.allocate_descriptor(class).unwrap();
        manager
            .update_buffer_descriptor(class, index, buffer)
            .unwrap();

        let set = manager.descriptor_set(class).unwrap();
        assert_eq!(
            device.descriptor_writes(set),
            vec![DescriptorWrite::at(
                0,
                index,
                DescriptorResource::StorageBuffer(buffer)
            )]
        );
    }

    #[test]
    fn test_destroy_all_forgets_classes() {
        let (_device, manager) = manager(2);
        manager.destroy_all_descriptor_pools();
        assert!(manager.descriptor_sets().is_empty());
        assert!(
            manager
                .allocate_descriptor(ResourceClass::AttributeBuffer)
                .is_err()
        );
    }
}
