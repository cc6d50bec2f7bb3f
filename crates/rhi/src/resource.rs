//! Typed resource handles and the table that owns backend objects.
//!
//! Every GPU object the core touches is named by a generation-checked
//! [`Handle`]. Backends keep the real objects in a [`ResourceTable`], so a
//! handle that outlives its object resolves to an error instead of a
//! dangling driver handle.

use tracer_core::{Arena, Handle};

use crate::error::{RhiError, RhiResult};

macro_rules! resource_handles {
    ($($(#[$meta:meta])* $marker:ident => $alias:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug)]
            pub enum $marker {}

            $(#[$meta])*
            pub type $alias = Handle<$marker>;
        )*
    };
}

resource_handles! {
    /// GPU buffer.
    BufferResource => BufferHandle;
    /// GPU image together with its default view.
    ImageResource => ImageHandle;
    /// Bottom- or top-level acceleration structure.
    AccelerationStructureResource => AccelerationStructureHandle;
    /// CPU-visible completion fence.
    FenceResource => FenceHandle;
    /// GPU-side semaphore.
    SemaphoreResource => SemaphoreHandle;
    /// Command pool.
    CommandPoolResource => CommandPoolHandle;
    /// Primary command buffer.
    CommandBufferResource => CommandBufferHandle;
    /// Descriptor set layout.
    DescriptorSetLayoutResource => DescriptorSetLayoutHandle;
    /// Descriptor pool.
    DescriptorPoolResource => DescriptorPoolHandle;
    /// Descriptor set.
    DescriptorSetResource => DescriptorSetHandle;
    /// Ray-tracing or display pipeline.
    PipelineResource => PipelineHandle;
}

/// Whether a resource holds valid contents for GPU consumption yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Readiness {
    /// Created, contents or layout still undefined.
    #[default]
    Uninitialized,
    /// Initialized and usable by shaders.
    Ready,
}

struct Entry<T> {
    object: T,
    readiness: Readiness,
}

/// Arena of backend objects addressed by typed handles.
///
/// `M` is the handle marker (e.g. [`BufferResource`]), `T` the backend's
/// object type, so one backend can use different payloads per resource kind
/// while sharing the handle types.
pub struct ResourceTable<M, T> {
    label: &'static str,
    entries: Arena<Entry<T>>,
    _marker: std::marker::PhantomData<fn() -> M>,
}

impl<M, T> ResourceTable<M, T> {
    /// Creates an empty table; `label` names the resource kind in errors.
    pub const fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Arena::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Takes ownership of `object` and returns its handle.
    pub fn insert(&mut self, object: T) -> Handle<M> {
        self.entries
            .insert(Entry {
                object,
                readiness: Readiness::Uninitialized,
            })
            .cast()
    }

    /// Resolves a handle.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] if the handle is stale.
    pub fn get(&self, handle: Handle<M>) -> RhiResult<&T> {
        self.entries
            .get(handle.cast())
            .map(|entry| &entry.object)
            .ok_or_else(|| self.invalid(handle))
    }

    /// Mutable variant of [`ResourceTable::get`].
    pub fn get_mut(&mut self, handle: Handle<M>) -> RhiResult<&mut T> {
        let label = self.label;
        self.entries
            .get_mut(handle.cast())
            .map(|entry| &mut entry.object)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{label} {handle:?}")))
    }

    /// Removes the object, handing it back for destruction.
    pub fn remove(&mut self, handle: Handle<M>) -> Option<T> {
        self.entries.remove(handle.cast()).map(|entry| entry.object)
    }

    /// Whether the handle is live.
    pub fn contains(&self, handle: Handle<M>) -> bool {
        self.entries.contains(handle.cast())
    }

    /// Marks the resource as initialized.
    pub fn mark_ready(&mut self, handle: Handle<M>) -> RhiResult<()> {
        let label = self.label;
        let entry = self
            .entries
            .get_mut(handle.cast())
            .ok_or_else(|| RhiError::InvalidHandle(format!("{label} {handle:?}")))?;
        entry.readiness = Readiness::Ready;
        Ok(())
    }

    /// Readiness of the resource, `None` for a stale handle.
    pub fn readiness(&self, handle: Handle<M>) -> Option<Readiness> {
        self.entries.get(handle.cast()).map(|entry| entry.readiness)
    }

    /// Whether the resource is live and initialized.
    pub fn is_ready(&self, handle: Handle<M>) -> bool {
        self.readiness(handle) == Some(Readiness::Ready)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over live objects.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<M>, &T)> {
        self.entries
            .iter()
            .map(|(handle, entry)| (handle.cast(), &entry.object))
    }

    /// Removes every object; used at teardown to destroy leftovers.
    pub fn drain(&mut self) -> Vec<(Handle<M>, T)> {
        self.entries
            .drain()
            .into_iter()
            .map(|(handle, entry)| (handle.cast(), entry.object))
            .collect()
    }

    fn invalid(&self, handle: Handle<M>) -> RhiError {
        RhiError::InvalidHandle(format!("{} {:?}", self.label, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_handle_is_invalid() {
        let mut table: ResourceTable<BufferResource, u32> = ResourceTable::new("buffer");
        let handle = table.insert(7);
        assert_eq!(*table.get(handle).unwrap(), 7);
        assert_eq!(table.remove(handle), Some(7));
        assert!(matches!(table.get(handle), Err(RhiError::InvalidHandle(_))));
        assert!(table.mark_ready(handle).is_err());
    }

    #[test]
    fn test_readiness_transitions_once_marked() {
        let mut table: ResourceTable<ImageResource, ()> = ResourceTable::new("image");
        let handle = table.insert(());
        assert_eq!(table.readiness(handle), Some(Readiness::Uninitialized));
        assert!(!table.is_ready(handle));
        table.mark_ready(handle).unwrap();
        assert!(table.is_ready(handle));
        table.remove(handle);
        assert_eq!(table.readiness(handle), None);
    }

    #[test]
    fn test_drain_returns_all_live_objects() {
        let mut table: ResourceTable<FenceResource, u8> = ResourceTable::new("fence");
        let a = table.insert(1);
        let _b = table.insert(2);
        table.remove(a);
        let drained: Vec<u8> = table.drain().into_iter().map(|(_, v)| v).collect();
        assert_eq!(drained, vec![2]);
        assert!(table.is_empty());
    }
}
