//! Checks the GLSL sources against the pipeline file names and the binding
//! numbers the renderer writes.

use std::fs;
use std::path::{Path, PathBuf};

use tracer_renderer::ResourceClass;
use tracer_renderer::frame::{
    DISPLAY_SOURCE_BINDING, INSTANCE_BINDING, MATERIAL_BINDING, PREVIOUS_RENDER_TARGET_BINDING,
    RENDER_TARGET_BINDING, TLAS_BINDING,
};
use tracer_renderer::gpu_types::NO_TEXTURE;
use tracer_rhi::pipeline::PipelineDesc;

fn shader_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../shaders")
}

/// Source file compiled to `spv`.
fn source_of(spv: &Path) -> PathBuf {
    spv.with_extension("")
}

fn define(source: &str, name: &str) -> Option<String> {
    source.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        (words.next() == Some("#define") && words.next() == Some(name))
            .then(|| words.next().map(str::to_string))
            .flatten()
    })
}

#[test]
fn test_every_pipeline_stage_has_a_source() {
    let dir = shader_dir();
    let mut stages = Vec::new();
    match PipelineDesc::ray_tracing(&dir, Vec::new(), 0) {
        PipelineDesc::RayTracing {
            raygen,
            miss,
            closest_hit,
            ..
        } => {
            stages.push(raygen);
            stages.extend(miss);
            stages.push(closest_hit);
        }
        other => panic!("unexpected pipeline {:?}", other),
    }
    match PipelineDesc::display(&dir, Vec::new(), 0) {
        PipelineDesc::Display {
            vertex, fragment, ..
        } => stages.extend([vertex, fragment]),
        other => panic!("unexpected pipeline {:?}", other),
    }

    assert_eq!(stages.len(), 6);
    for spv in &stages {
        let source = source_of(spv);
        assert!(source.is_file(), "missing shader source {}", source.display());
        let text = fs::read_to_string(&source).unwrap();
        assert!(text.starts_with("#version 460"), "{}", source.display());
    }
}

#[test]
fn test_shared_layout_matches_renderer_bindings() {
    let common = fs::read_to_string(shader_dir().join("common.glsl")).unwrap();
    for (name, binding) in [
        ("TLAS_BINDING", TLAS_BINDING),
        ("RENDER_TARGET_BINDING", RENDER_TARGET_BINDING),
        ("PREVIOUS_RENDER_TARGET_BINDING", PREVIOUS_RENDER_TARGET_BINDING),
        ("INSTANCE_BINDING", INSTANCE_BINDING),
        ("MATERIAL_BINDING", MATERIAL_BINDING),
    ] {
        assert_eq!(define(&common, name), Some(binding.to_string()), "{name}");
    }

    // Bindless arrays follow the render set in class order
    for (class, name) in ResourceClass::ALL
        .into_iter()
        .zip(["ATTRIBUTE_SET", "INDEX_SET", "TEXTURE_SET"])
    {
        let set = match class {
            ResourceClass::AttributeBuffer => 1,
            ResourceClass::IndexBuffer => 2,
            ResourceClass::TextureImage => 3,
        };
        let position = ResourceClass::ALL.iter().position(|c| *c == class).unwrap() + 1;
        assert_eq!(position, set);
        assert_eq!(define(&common, name), Some(set.to_string()), "{name}");
    }

    assert_eq!(
        define(&common, "NO_TEXTURE"),
        Some(format!("{:#x}u", NO_TEXTURE))
    );
}

#[test]
fn test_display_source_binding() {
    let fragment = fs::read_to_string(shader_dir().join("display.frag")).unwrap();
    let expected = format!("layout(set = 0, binding = {DISPLAY_SOURCE_BINDING}) uniform sampler2D");
    assert!(fragment.contains(&expected));
}
