//! GPU picking integration tests.
//!
//! These tests require a GPU adapter (real or software fallback). On CI
//! without GPU support they skip themselves at engine creation, so the
//! remaining assertions only run where a device exists.

use std::sync::Arc;

use glam::Mat4;

use sensorscope_core::{PickerOptions, BACKGROUND_ID};
use sensorscope_render::{
    Camera, EncodeMaterial, Geometry, Picker, RenderEngine, RenderError, RenderObject, Scene,
    Vertex, ENCODE_FORMAT,
};

const SIZE: u32 = 128;
const CENTER: f64 = SIZE as f64 / 2.0;

fn try_engine() -> Option<RenderEngine> {
    let _ = env_logger::builder().is_test(true).try_init();
    match RenderEngine::new_headless_blocking(SIZE, SIZE) {
        Ok(engine) => Some(engine),
        Err(e) => {
            eprintln!("skipping picking test: no GPU adapter available ({e})");
            None
        }
    }
}

/// A camera-facing quad with the given half-extent, at the given depth along
/// the view axis (camera sits at +z looking toward -z).
fn quad(engine: &RenderEngine, half: f32, z: f32) -> RenderObject {
    let positions = [
        Vertex {
            position: [-half, -half, z],
        },
        Vertex {
            position: [half, -half, z],
        },
        Vertex {
            position: [half, half, z],
        },
        Vertex {
            position: [-half, half, z],
        },
    ];
    let indices = [0u32, 1, 2, 0, 2, 3];
    RenderObject::new(Arc::new(Geometry::mesh(&engine.device, &positions, &indices)))
}

fn render_once(engine: &mut RenderEngine, scene: &Scene, camera: &Camera) {
    engine.render(scene, camera).expect("headless render failed");
}

#[test]
fn picks_quad_at_center_and_background_at_corner() {
    let Some(mut engine) = try_engine() else {
        return;
    };
    let mut scene = Scene::new();
    let id = scene.add(quad(&engine, 1.0, 0.0));
    let mut camera = Camera::new(1.0);
    render_once(&mut engine, &scene, &camera);

    let mut picker = Picker::new(&engine, PickerOptions::default()).unwrap();
    let hit = picker
        .pick(&engine, &mut camera, CENTER, CENTER, |_| true)
        .unwrap();
    assert_eq!(hit, id);

    // The quad's half-extent is smaller than the frustum at its depth, so
    // the extreme corner sees background.
    let miss = picker.pick(&engine, &mut camera, 1.0, 1.0, |_| true).unwrap();
    assert_eq!(miss, BACKGROUND_ID);

    // Window clamping near the origin still yields a valid read.
    let edge = picker.pick(&engine, &mut camera, 0.0, 0.0, |_| true).unwrap();
    assert_eq!(edge, BACKGROUND_ID);

    assert!(camera.view_offset().is_none(), "view offset must be restored");
}

#[test]
fn empty_scene_picks_background() {
    let Some(mut engine) = try_engine() else {
        return;
    };
    let scene = Scene::new();
    let mut camera = Camera::new(1.0);
    render_once(&mut engine, &scene, &camera);

    let mut picker = Picker::new(&engine, PickerOptions::default()).unwrap();
    let hit = picker
        .pick(&engine, &mut camera, CENTER, CENTER, |_| true)
        .unwrap();
    assert_eq!(hit, BACKGROUND_ID);
}

#[test]
fn opted_out_objects_are_invisible_to_picking() {
    let Some(mut engine) = try_engine() else {
        return;
    };
    let mut scene = Scene::new();
    let id = scene.add(quad(&engine, 1.0, 0.0));
    scene.get_mut(id).unwrap().pick.opt_out = true;
    let mut camera = Camera::new(1.0);
    render_once(&mut engine, &scene, &camera);

    let mut picker = Picker::new(&engine, PickerOptions::default()).unwrap();
    let hit = picker
        .pick(&engine, &mut camera, CENTER, CENTER, |_| true)
        .unwrap();
    assert_eq!(hit, BACKGROUND_ID);
}

#[test]
fn filter_rejection_skips_items_and_reveals_occluded_ones() {
    let Some(mut engine) = try_engine() else {
        return;
    };
    let mut scene = Scene::new();
    let far = scene.add(quad(&engine, 1.0, 0.0));
    let near = scene.add(quad(&engine, 1.0, 0.5));
    let mut camera = Camera::new(1.0);
    render_once(&mut engine, &scene, &camera);

    let mut picker = Picker::new(&engine, PickerOptions::default()).unwrap();

    // Depth test resolves overlap: the nearer quad wins.
    let hit = picker
        .pick(&engine, &mut camera, CENTER, CENTER, |_| true)
        .unwrap();
    assert_eq!(hit, near);

    // Rejecting the near quad exposes the far one, regardless of depth.
    let hit = picker
        .pick(&engine, &mut camera, CENTER, CENTER, |item| item.id != near)
        .unwrap();
    assert_eq!(hit, far);

    // Rejecting everything leaves only background.
    let hit = picker
        .pick(&engine, &mut camera, CENTER, CENTER, |_| false)
        .unwrap();
    assert_eq!(hit, BACKGROUND_ID);
}

#[test]
fn encode_materials_are_cached_per_feature_set() {
    let Some(mut engine) = try_engine() else {
        return;
    };
    let mut scene = Scene::new();
    scene.add(quad(&engine, 0.4, 0.0));
    scene.add(quad(&engine, 0.4, 0.2));
    let mut camera = Camera::new(1.0);
    render_once(&mut engine, &scene, &camera);

    let mut picker = Picker::new(&engine, PickerOptions::default()).unwrap();
    assert_eq!(picker.cached_material_count(), 0);

    picker
        .pick(&engine, &mut camera, CENTER, CENTER, |_| true)
        .unwrap();
    // Both quads share the plain-mesh feature set, so one material serves
    // them and repeat picks build nothing new.
    assert_eq!(picker.cached_material_count(), 1);
    picker
        .pick(&engine, &mut camera, CENTER, CENTER, |_| true)
        .unwrap();
    assert_eq!(picker.cached_material_count(), 1);

    // A sprite brings a different feature set and gets its own entry.
    scene.add(RenderObject::new(Arc::new(Geometry::sprite_quad(
        &engine.device,
    ))));
    render_once(&mut engine, &scene, &camera);
    picker
        .pick(&engine, &mut camera, CENTER, CENTER, |_| true)
        .unwrap();
    assert_eq!(picker.cached_material_count(), 2);
}

#[test]
fn dispose_is_idempotent_and_fails_later_picks() {
    let Some(mut engine) = try_engine() else {
        return;
    };
    let mut scene = Scene::new();
    scene.add(quad(&engine, 1.0, 0.0));
    let mut camera = Camera::new(1.0);
    render_once(&mut engine, &scene, &camera);

    let mut picker = Picker::new(&engine, PickerOptions::default()).unwrap();
    picker
        .pick(&engine, &mut camera, CENTER, CENTER, |_| true)
        .unwrap();

    picker.dispose();
    picker.dispose();
    assert!(picker.is_disposed());

    let result = picker.pick(&engine, &mut camera, CENTER, CENTER, |_| true);
    assert!(matches!(
        result,
        Err(RenderError::Pick(sensorscope_core::PickError::Disposed))
    ));
    assert!(camera.view_offset().is_none());
}

#[test]
fn debug_overlay_does_not_change_the_result() {
    let Some(mut engine) = try_engine() else {
        return;
    };
    let mut scene = Scene::new();
    let id = scene.add(quad(&engine, 1.0, 0.0));
    let mut camera = Camera::new(1.0);
    render_once(&mut engine, &scene, &camera);

    let mut plain = Picker::new(&engine, PickerOptions::default()).unwrap();
    let mut debug = Picker::new(
        &engine,
        PickerOptions {
            debug: true,
            ..PickerOptions::default()
        },
    )
    .unwrap();
    assert!(plain.debug_overlay_view().is_none());
    assert!(debug.debug_overlay_view().is_some());

    let expected = plain
        .pick(&engine, &mut camera, CENTER, CENTER, |_| true)
        .unwrap();
    let got = debug
        .pick(&engine, &mut camera, CENTER, CENTER, |_| true)
        .unwrap();
    assert_eq!(got, expected);
    assert_eq!(got, id);
}

#[test]
fn override_material_without_color_uniform_halts_the_pick() {
    let Some(mut engine) = try_engine() else {
        return;
    };
    let mut scene = Scene::new();
    let id = scene.add(quad(&engine, 1.0, 0.0));
    scene.get_mut(id).unwrap().pick.override_material =
        Some(Arc::new(colorless_material(&engine)));
    let mut camera = Camera::new(1.0);
    render_once(&mut engine, &scene, &camera);

    let mut picker = Picker::new(&engine, PickerOptions::default()).unwrap();
    let result = picker.pick(&engine, &mut camera, CENTER, CENTER, |_| true);
    assert!(matches!(
        result,
        Err(RenderError::Pick(
            sensorscope_core::PickError::MissingColorUniform { object_id }
        )) if object_id == id
    ));
    assert!(camera.view_offset().is_none(), "error path must restore");
}

/// Builds a pipeline that ignores the identifier-color uniform entirely,
/// standing in for a misconfigured user override.
fn colorless_material(engine: &RenderEngine) -> EncodeMaterial {
    let shader = engine
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("colorless test shader"),
            source: wgpu::ShaderSource::Wgsl(
                r"
                @vertex
                fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
                    return vec4<f32>(position, 1.0);
                }
                @fragment
                fn fs_main() -> @location(0) vec4<f32> {
                    return vec4<f32>(0.0, 0.0, 0.0, 1.0);
                }
                "
                .into(),
            ),
        });
    let layout = engine
        .device
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("colorless test layout"),
            bind_group_layouts: &[],
            push_constant_ranges: &[],
        });
    let pipeline = engine
        .device
        .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("colorless test pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[Geometry::vertex_layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: ENCODE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: Some(wgpu::DepthStencilState {
                format: wgpu::TextureFormat::Depth24Plus,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
    EncodeMaterial::new(pipeline, false)
}

#[test]
fn invalid_target_sizes_are_rejected_at_construction() {
    let Some(engine) = try_engine() else {
        return;
    };
    for bad in [0, 2, 8] {
        let result = Picker::new(
            &engine,
            PickerOptions {
                target_size: bad,
                ..PickerOptions::default()
            },
        );
        assert!(matches!(
            result,
            Err(RenderError::Pick(
                sensorscope_core::PickError::InvalidTargetSize(size)
            )) if size == bad
        ));
    }
}

#[test]
fn sprites_are_pickable_through_the_billboard_path() {
    let Some(mut engine) = try_engine() else {
        return;
    };
    let mut scene = Scene::new();
    let mut sprite = RenderObject::new(Arc::new(Geometry::sprite_quad(&engine.device)));
    // Scale the unit quad up so it clearly covers the probe point.
    sprite.transform = Mat4::from_scale(glam::Vec3::splat(0.5));
    let id = scene.add(sprite);
    let mut camera = Camera::new(1.0);
    render_once(&mut engine, &scene, &camera);

    let mut picker = Picker::new(&engine, PickerOptions::default()).unwrap();
    let hit = picker
        .pick(&engine, &mut camera, CENTER, CENTER, |_| true)
        .unwrap();
    assert_eq!(hit, id);
}
