//! Integration tests for the geometry table and scene TLAS maintenance.

mod common;

use glam::Vec3;

use common::{SceneBuilder, fixture, fixture_with_capacity, mesh};
use tracer_renderer::gpu_types::{GeometryInstance, MaterialData, NO_TEXTURE};
use tracer_renderer::{INVALID_GEOMETRY_INDEX, ResourceClass};
use tracer_resources::{ImageData, PixelData};
use tracer_rhi::acceleration::AccelerationStructureInstance;
use tracer_rhi::descriptor::DescriptorResource;
use tracer_rhi::headless::DeviceEvent;
use tracer_scene::{GeometryId, Material, SceneChange, TextureId};

fn read_records<T: bytemuck::Pod>(bytes: &[u8], count: usize) -> Vec<T> {
    let size = size_of::<T>();
    assert!(bytes.len() >= size * count);
    (0..count)
        .map(|i| bytemuck::pod_read_unaligned(&bytes[i * size..(i + 1) * size]))
        .collect()
}

#[test]
fn test_geometry_indices_are_dense() {
    let f = fixture(2);
    let ids = [GeometryId(10), GeometryId(20), GeometryId(30)];
    for (expected, &id) in ids.iter().enumerate() {
        let index = f.resources.build_geometry(id, &mesh(1)).unwrap();
        assert_eq!(index, expected as u32);
    }

    assert_eq!(f.resources.geometry_count(), 3);
    for (expected, &id) in ids.iter().enumerate() {
        assert_eq!(f.resources.lookup_geometry_index(id), expected as u32);
        let (index, geometry) = f.resources.lookup_geometry(id).unwrap();
        assert_eq!(index, expected as u32);
        assert_eq!(geometry.face_count, 1);
    }
    assert_eq!(
        f.resources.lookup_geometry_index(GeometryId(99)),
        INVALID_GEOMETRY_INDEX
    );
    assert!(f.resources.lookup_geometry(GeometryId(99)).is_none());

    // Attribute and index arrays are bound at the geometry's index
    let attribute_set = f.descriptors.descriptor_set(ResourceClass::AttributeBuffer).unwrap();
    let index_set = f.descriptors.descriptor_set(ResourceClass::IndexBuffer).unwrap();
    let attribute_writes = f.device.descriptor_writes(attribute_set);
    let index_writes = f.device.descriptor_writes(index_set);
    for (index, geometry) in f.resources.geometry().iter().enumerate() {
        let element = index as u32;
        assert!(attribute_writes.iter().any(|w| w.array_element == element
            && w.resource == DescriptorResource::StorageBuffer(geometry.attributes)));
        assert!(index_writes.iter().any(|w| w.array_element == element
            && w.resource == DescriptorResource::StorageBuffer(geometry.indices)));
    }
}

#[test]
fn test_transients_destroyed_after_batch_executes() {
    let f = fixture(2);
    f.resources.build_geometry(GeometryId(1), &mesh(4)).unwrap();
    assert_eq!(f.commands.executable_count(), 1);

    assert_eq!(f.commands.submit_command_buffers().unwrap(), 1);
    f.commands.proceed_to_next_frame();
    f.commands.destroy_expired_resources();
    assert!(
        !f.device
            .events()
            .iter()
            .any(|e| matches!(e, DeviceEvent::BufferDestroyed(_))),
        "staging destroyed before the batch executed"
    );

    f.device.complete_all();
    f.commands.proceed_to_next_frame();
    f.commands.destroy_expired_resources();

    let events = f.device.events();
    let signaled = events
        .iter()
        .position(|e| matches!(e, DeviceEvent::FenceSignaled(_)))
        .unwrap();
    let destroyed: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, DeviceEvent::BufferDestroyed(_)))
        .map(|(i, _)| i)
        .collect();
    // Two staging buffers and the scratch buffer
    assert_eq!(destroyed.len(), 3);
    assert!(destroyed.iter().all(|&i| i > signaled));

    let (_, geometry) = f.resources.lookup_geometry(GeometryId(1)).unwrap();
    assert!(f.device.is_buffer_live(geometry.attributes));
    assert!(f.device.is_buffer_live(geometry.indices));
    assert!(f.device.is_acceleration_structure_live(geometry.blas));
    assert!(f.device.violations().is_empty());
}

#[test]
fn test_scene_tlas_instances_and_materials() {
    let f = fixture(2);
    let mut builder = SceneBuilder::new();
    let shared = builder.material(Material::diffuse(Vec3::new(1.0, 0.0, 0.0)));
    builder.renderable(GeometryId(1), Some(shared), Vec3::new(1.0, 0.0, 0.0));
    builder.renderable(GeometryId(2), None, Vec3::new(2.0, 0.0, 0.0));
    builder.renderable(GeometryId(1), Some(shared), Vec3::new(3.0, 0.0, 0.0));
    builder.scene.update_world_transforms();

    assert_eq!(f.resources.build_geometry(GeometryId(1), &mesh(10)).unwrap(), 0);
    assert_eq!(f.resources.build_geometry(GeometryId(2), &mesh(20)).unwrap(), 1);

    let build = f.resources.build_scene_tlas(&builder.scene).unwrap();
    assert_eq!(build.instance_count, 3);
    assert_eq!(build.material_count, 2);
    assert_eq!(build.skipped, 0);

    f.commands.submit_command_buffers().unwrap();
    f.device.complete_all();
    assert!(f.device.violations().is_empty());

    let tlas = f.resources.scene_tlas().unwrap();
    assert_eq!(tlas.instance_count, 3);

    let bytes = f.device.read_buffer(tlas.geometry_instances).unwrap();
    let instances: Vec<GeometryInstance> = read_records(&bytes, 3);
    let geometry_indices: Vec<u32> = instances.iter().map(|i| i.geometry_index).collect();
    let face_counts: Vec<u32> = instances.iter().map(|i| i.geometry_face_count).collect();
    let material_indices: Vec<u32> = instances.iter().map(|i| i.material_index).collect();
    assert_eq!(geometry_indices, [0, 1, 0]);
    assert_eq!(face_counts, [10, 20, 10]);
    assert_eq!(material_indices, [0, 1, 0]);
    assert_eq!(instances[1].transform.w_axis.x, 2.0);

    let bytes = f.device.read_buffer(tlas.materials).unwrap();
    let materials: Vec<MaterialData> = read_records(&bytes, 2);
    assert_eq!(materials[0].albedo, [1.0, 0.0, 0.0]);
    assert_eq!(materials[0].albedo_texture, NO_TEXTURE);

    let geometry = f.resources.geometry();
    let bytes = f.device.read_buffer(tlas.instances).unwrap();
    let records: Vec<AccelerationStructureInstance> = read_records(&bytes, 3);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.custom_index(), i as u32);
        assert_eq!(record.mask(), 0xff);
        // Translation sits in the last column of each row
        assert_eq!(record.transform[0][3], (i + 1) as f32);
        assert_eq!(record.transform[0][0], 1.0);
    }
    assert_eq!(records[0].acceleration_structure_reference, geometry[0].blas_reference);
    assert_eq!(records[1].acceleration_structure_reference, geometry[1].blas_reference);
    assert_eq!(records[2].acceleration_structure_reference, geometry[0].blas_reference);
}

#[test]
fn test_unbuilt_geometry_is_skipped() {
    let f = fixture(2);
    let mut builder = SceneBuilder::new();
    builder.renderable(GeometryId(5), None, Vec3::ZERO);
    builder.scene.update_world_transforms();

    let build = f.resources.build_scene_tlas(&builder.scene).unwrap();
    assert_eq!(build.instance_count, 0);
    assert_eq!(build.skipped, 1);
    assert!(f.resources.scene_tlas().is_none());
    assert_eq!(f.commands.executable_count(), 0);
}

#[test]
fn test_replaced_tlas_destroyed_after_ttl() {
    let f = fixture(3);
    let mut builder = SceneBuilder::new();
    builder.renderable(GeometryId(1), None, Vec3::ZERO);
    builder.scene.update_world_transforms();
    f.resources.build_geometry(GeometryId(1), &mesh(2)).unwrap();

    f.resources.build_scene_tlas(&builder.scene).unwrap();
    let first = f.resources.scene_tlas().unwrap();
    f.commands.submit_command_buffers().unwrap();
    f.device.complete_all();

    f.resources.build_scene_tlas(&builder.scene).unwrap();
    let second = f.resources.scene_tlas().unwrap();
    assert_ne!(first.tlas, second.tlas);

    let retired = f.resources.retired_resources();
    assert_eq!(retired.len(), 1);
    assert_eq!(retired[0].resource, first);
    assert_eq!(retired[0].ttl, 3);

    for _ in 0..2 {
        f.resources.update_retired_resources();
        f.resources.destroy_retired_resources();
        assert!(f.device.is_acceleration_structure_live(first.tlas));
    }
    f.resources.update_retired_resources();
    f.resources.destroy_retired_resources();

    assert!(!f.device.is_acceleration_structure_live(first.tlas));
    for buffer in [first.instances, first.geometry_instances, first.materials] {
        assert!(!f.device.is_buffer_live(buffer));
    }
    assert!(f.resources.retired_resources().is_empty());
    assert!(f.device.is_acceleration_structure_live(second.tlas));
    assert!(f.device.violations().is_empty());
}

#[test]
fn test_empty_scene_retires_current_tlas() {
    let f = fixture(2);
    let mut builder = SceneBuilder::new();
    let (entity, _) = builder.renderable(GeometryId(1), None, Vec3::ZERO);
    builder.scene.update_world_transforms();
    f.resources.build_geometry(GeometryId(1), &mesh(1)).unwrap();
    f.resources.build_scene_tlas(&builder.scene).unwrap();
    assert!(f.resources.scene_tlas().is_some());

    builder.apply(SceneChange::NodeDestroyed(entity));
    let build = f.resources.build_scene_tlas(&builder.scene).unwrap();
    assert_eq!(build.instance_count, 0);
    assert!(f.resources.scene_tlas().is_none());
    assert_eq!(f.resources.retired_resources().len(), 1);
}

#[test]
fn test_texture_bound_in_material() {
    let f = fixture(2);
    let image = ImageData::new(2, 2, 4, PixelData::U8(vec![255; 16])).unwrap();
    let index = f.resources.add_texture(TextureId(7), &image).unwrap();
    assert_eq!(index, 0);
    let texture = f.resources.lookup_texture(TextureId(7)).unwrap();

    let set = f.descriptors.descriptor_set(ResourceClass::TextureImage).unwrap();
    assert!(f.device.descriptor_writes(set).iter().any(|w| w.array_element == 0
        && w.resource == DescriptorResource::SampledImage(texture.image)));

    let mut builder = SceneBuilder::new();
    let material = builder.material(Material {
        albedo_texture: Some(TextureId(7)),
        ..Material::default()
    });
    builder.renderable(GeometryId(1), Some(material), Vec3::ZERO);
    builder.scene.update_world_transforms();
    f.resources.build_geometry(GeometryId(1), &mesh(1)).unwrap();
    f.resources.build_scene_tlas(&builder.scene).unwrap();
    f.commands.submit_command_buffers().unwrap();
    f.device.complete_all();

    let tlas = f.resources.scene_tlas().unwrap();
    let bytes = f.device.read_buffer(tlas.materials).unwrap();
    let materials: Vec<MaterialData> = read_records(&bytes, 1);
    assert_eq!(materials[0].albedo_texture, texture.index);
}

#[test]
fn test_replaced_texture_released_after_next_batch() {
    let f = fixture(2);
    let image = ImageData::new(1, 1, 4, PixelData::U8(vec![0; 4])).unwrap();
    f.resources.add_texture(TextureId(1), &image).unwrap();
    let first = f.resources.lookup_texture(TextureId(1)).unwrap();
    f.commands.submit_command_buffers().unwrap();
    f.device.complete_all();

    f.resources.add_texture(TextureId(1), &image).unwrap();
    let second = f.resources.lookup_texture(TextureId(1)).unwrap();
    assert_ne!(first.image, second.image);
    assert_eq!(f.device.live_image_count(), 2);

    f.commands.submit_command_buffers().unwrap();
    f.device.complete_all();
    f.commands.proceed_to_next_frame();
    f.commands.destroy_expired_resources();
    assert_eq!(f.device.live_image_count(), 1);
    assert!(f.device.violations().is_empty());
}

#[test]
fn test_destroy_all_releases_everything() {
    let f = fixture(2);
    let mut builder = SceneBuilder::new();
    builder.renderable(GeometryId(1), None, Vec3::ZERO);
    builder.scene.update_world_transforms();
    f.resources.build_geometry(GeometryId(1), &mesh(3)).unwrap();
    f.resources.build_scene_tlas(&builder.scene).unwrap();
    f.resources.build_scene_tlas(&builder.scene).unwrap();

    f.commands.submit_command_buffers().unwrap();
    f.device.complete_all();
    f.resources.destroy_all();
    f.commands.shutdown();

    assert_eq!(f.device.live_buffer_count(), 0);
    assert_eq!(f.device.live_acceleration_structure_count(), 0);
    assert_eq!(f.resources.geometry_count(), 0);
    assert!(f.device.violations().is_empty());
}

#[test]
fn test_full_descriptor_table_releases_new_geometry() {
    let f = fixture(2);
    for id in 0..16 {
        assert_eq!(f.resources.build_geometry(GeometryId(id), &mesh(1)).unwrap(), id as u32);
    }
    f.commands.submit_command_buffers().unwrap();
    f.device.complete_all();
    f.commands.proceed_to_next_frame();
    f.commands.destroy_expired_resources();

    let buffers = f.device.live_buffer_count();
    let structures = f.device.live_acceleration_structure_count();
    let pools = f.device.live_command_pool_count();

    assert!(f.resources.build_geometry(GeometryId(16), &mesh(1)).is_err());
    assert_eq!(f.device.live_buffer_count(), buffers);
    assert_eq!(f.device.live_acceleration_structure_count(), structures);
    assert_eq!(f.device.live_command_pool_count(), pools);
    assert_eq!(f.commands.executable_count(), 0);
    assert_eq!(f.resources.geometry_count(), 16);
    assert_eq!(
        f.resources.lookup_geometry_index(GeometryId(16)),
        INVALID_GEOMETRY_INDEX
    );

    f.resources.destroy_all();
    f.commands.shutdown();
    assert_eq!(f.device.live_buffer_count(), 0);
    assert_eq!(f.device.live_acceleration_structure_count(), 0);
    assert!(f.device.violations().is_empty());
}

#[test]
fn test_partial_descriptor_binding_is_undone() {
    let f = fixture_with_capacity(2, |class| match class {
        ResourceClass::IndexBuffer => 1,
        _ => 16,
    });
    f.resources.build_geometry(GeometryId(1), &mesh(1)).unwrap();
    let buffers = f.device.live_buffer_count();

    // The attribute slot is taken before the index array runs out
    assert!(f.resources.build_geometry(GeometryId(2), &mesh(1)).is_err());
    assert_eq!(f.device.live_buffer_count(), buffers);
    assert_eq!(f.commands.executable_count(), 1);
    assert_eq!(f.resources.geometry_count(), 1);
    assert_eq!(
        f.descriptors
            .allocate_descriptor(ResourceClass::AttributeBuffer)
            .unwrap(),
        1
    );
}
