//! GPU color-identifier picking.
//!
//! [`Picker::pick`] re-renders the engine's retained draw lists into a small
//! offscreen target with every item flat-shaded by its encoded identifier,
//! reads the target back, and decodes the texel under the probe point. The
//! camera is restricted to a sub-rectangle of the full viewport for the
//! encode pass, so the small target rasterizes at full-frame precision.

use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use sensorscope_core::{
    debug_scramble, decode_id, encode_id_normalized, EncodeKey, PickError, PickerOptions,
    BACKGROUND_ID,
};

use crate::camera::{Camera, ViewOffset};
use crate::engine::{CameraUniforms, ItemUniformBuffer, ItemUniforms, RenderEngine, DEPTH_FORMAT};
use crate::error::RenderResult;
use crate::geometry::Geometry;
use crate::scene::DrawItem;

/// Texture format of the offscreen encode target. Custom override materials
/// must render to this format.
pub const ENCODE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// A pipeline that flat-shades geometry with a per-item color uniform.
///
/// Cache-built materials always carry the identifier-color uniform. Custom
/// override materials declare whether they do; one that does not is a
/// configuration error the pick reports as
/// [`PickError::MissingColorUniform`].
pub struct EncodeMaterial {
    pipeline: wgpu::RenderPipeline,
    expects_color: bool,
}

impl EncodeMaterial {
    /// Wraps a custom pipeline as an override encode material.
    ///
    /// The pipeline must target [`ENCODE_FORMAT`] with a `Depth24Plus` depth
    /// attachment and read its output color from the item uniform at group 1.
    #[must_use]
    pub fn new(pipeline: wgpu::RenderPipeline, expects_color: bool) -> Self {
        Self {
            pipeline,
            expects_color,
        }
    }

    /// Whether the material's pipeline reads the identifier-color uniform.
    #[must_use]
    pub fn expects_color(&self) -> bool {
        self.expects_color
    }

    fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }
}

impl std::fmt::Debug for EncodeMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeMaterial")
            .field("expects_color", &self.expects_color)
            .finish_non_exhaustive()
    }
}

/// Restores the camera's previous view offset when dropped, so the encode
/// pass cannot leak its sub-frustum into later frames on any exit path.
struct ViewOffsetGuard<'a> {
    camera: &'a mut Camera,
    previous: Option<ViewOffset>,
}

impl<'a> ViewOffsetGuard<'a> {
    fn new(camera: &'a mut Camera, offset: ViewOffset) -> Self {
        let previous = camera.view_offset();
        camera.set_view_offset(offset);
        Self { camera, previous }
    }
}

impl Deref for ViewOffsetGuard<'_> {
    type Target = Camera;

    fn deref(&self) -> &Camera {
        self.camera
    }
}

impl Drop for ViewOffsetGuard<'_> {
    fn drop(&mut self) {
        match self.previous {
            Some(previous) => self.camera.set_view_offset(previous),
            None => self.camera.clear_view_offset(),
        }
    }
}

struct DebugOverlay {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// GPU resources released by [`Picker::dispose`].
struct PickerGpu {
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    staging: wgpu::Buffer,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    item_uniforms: ItemUniformBuffer,
    debug: Option<DebugOverlay>,
}

/// Identifier picker over the engine's retained draw lists.
pub struct Picker {
    options: PickerOptions,
    cache: HashMap<EncodeKey, Arc<EncodeMaterial>>,
    gpu: Option<PickerGpu>,
}

impl Picker {
    /// Creates a picker for the given engine.
    ///
    /// # Errors
    /// Returns [`PickError::InvalidTargetSize`] for a zero or even target
    /// size.
    pub fn new(engine: &RenderEngine, options: PickerOptions) -> RenderResult<Self> {
        options.validate()?;
        let size = options.target_size;
        let device = &engine.device;

        let target = create_target_texture(device, size, "pick target");
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pick depth"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pick staging"),
            size: u64::from(padded_bytes_per_row(size)) * u64::from(size),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pick camera uniforms"),
            size: std::mem::size_of::<CameraUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pick camera bind group"),
            layout: engine.camera_bind_group_layout(),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let item_uniforms = ItemUniformBuffer::new(device, engine.item_bind_group_layout(), 64);

        let debug = options.debug.then(|| {
            let texture = create_target_texture(device, size, "pick debug overlay");
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            DebugOverlay { texture, view }
        });

        Ok(Self {
            options,
            cache: HashMap::new(),
            gpu: Some(PickerGpu {
                target,
                target_view,
                depth_view,
                staging,
                camera_buffer,
                camera_bind_group,
                item_uniforms,
                debug,
            }),
        })
    }

    /// Picks the object identifier under the probe point.
    ///
    /// `x`/`y` are logical pixels in the full viewport; the engine's pixel
    /// ratio converts them to device pixels. Items are skipped when they have
    /// no geometry, opted out of picking, or are rejected by `filter`. The
    /// topmost remaining item wins by depth test; returns [`BACKGROUND_ID`]
    /// when only background is under the probe.
    ///
    /// # Errors
    /// [`PickError::Disposed`] after [`dispose`](Self::dispose),
    /// [`PickError::MissingColorUniform`] for an override material without
    /// the identifier-color uniform, and [`PickError::ReadbackFailed`] when
    /// the staging buffer cannot be mapped. The camera's view offset is
    /// restored on every path, including errors.
    pub fn pick<F>(
        &mut self,
        engine: &RenderEngine,
        camera: &mut Camera,
        x: f64,
        y: f64,
        mut filter: F,
    ) -> RenderResult<u32>
    where
        F: FnMut(&DrawItem) -> bool,
    {
        if self.gpu.is_none() {
            return Err(PickError::Disposed.into());
        }

        // Resolve materials up front so a misconfigured override halts the
        // pick before any GPU work is submitted.
        let mut eligible: Vec<(&DrawItem, Arc<EncodeMaterial>)> = Vec::new();
        for item in engine.frame_lists().iter_pick_order() {
            if !is_pickable(item) || !filter(item) {
                continue;
            }
            let material = match &item.pick.override_material {
                Some(material) => {
                    if !material.expects_color() {
                        return Err(PickError::MissingColorUniform { object_id: item.id }.into());
                    }
                    Arc::clone(material)
                }
                None => Self::cached_material(&mut self.cache, engine, item.features),
            };
            eligible.push((item, material));
        }

        let Some(gpu) = self.gpu.as_mut() else {
            return Err(PickError::Disposed.into());
        };

        let size = self.options.target_size;
        let (full_width, full_height) = engine.dimensions();
        let (offset, probe_x, probe_y) =
            pick_window(x, y, engine.pixel_ratio(), size, full_width, full_height);

        let guard = ViewOffsetGuard::new(camera, offset);
        engine.queue.write_buffer(
            &gpu.camera_buffer,
            0,
            bytemuck::cast_slice(&[CameraUniforms::from_camera(&guard)]),
        );

        gpu.item_uniforms.ensure_capacity(
            &engine.device,
            engine.item_bind_group_layout(),
            eligible.len(),
        );
        for (slot, (item, _)) in eligible.iter().enumerate() {
            gpu.item_uniforms.write(
                &engine.queue,
                slot,
                &ItemUniforms::new(item, encode_id_normalized(item.id)),
            );
        }

        let mut encoder = engine
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pick encoder"),
            });
        encode_pass(
            &mut encoder,
            &gpu.target_view,
            &gpu.depth_view,
            &gpu.camera_bind_group,
            &gpu.item_uniforms,
            &eligible,
        );
        copy_target_to_staging(&mut encoder, &gpu.target, &gpu.staging, size);
        engine.queue.submit(std::iter::once(encoder.finish()));

        let pixels = map_staging(&engine.device, &gpu.staging)?;
        let at = probe_byte_offset(padded_bytes_per_row(size), probe_x, probe_y);
        let id = decode_id([pixels[at], pixels[at + 1], pixels[at + 2], pixels[at + 3]]);

        log::trace!("pick at ({x}, {y}) -> {id:#010x}");

        // The debug overlay renders after the readback with scrambled colors,
        // so it can never feed back into the decoded result.
        if let Some(debug) = &gpu.debug {
            for (slot, (item, _)) in eligible.iter().enumerate() {
                gpu.item_uniforms.write(
                    &engine.queue,
                    slot,
                    &ItemUniforms::new(item, encode_id_normalized(debug_scramble(item.id))),
                );
            }
            let mut encoder =
                engine
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("pick debug encoder"),
                    });
            encode_pass(
                &mut encoder,
                &debug.view,
                &gpu.depth_view,
                &gpu.camera_bind_group,
                &gpu.item_uniforms,
                &eligible,
            );
            engine.queue.submit(std::iter::once(encoder.finish()));
        }

        drop(guard);
        Ok(id)
    }

    fn cached_material(
        cache: &mut HashMap<EncodeKey, Arc<EncodeMaterial>>,
        engine: &RenderEngine,
        key: EncodeKey,
    ) -> Arc<EncodeMaterial> {
        Arc::clone(cache.entry(key).or_insert_with(|| {
            log::debug!("building encode material for {key:?}");
            Arc::new(create_encode_material(engine, key))
        }))
    }

    /// Releases all GPU resources and the material cache. Safe to call more
    /// than once; any later [`pick`](Self::pick) fails with
    /// [`PickError::Disposed`].
    pub fn dispose(&mut self) {
        self.gpu = None;
        self.cache.clear();
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.gpu.is_none()
    }

    /// Configuration this picker was built with.
    #[must_use]
    pub fn options(&self) -> &PickerOptions {
        &self.options
    }

    /// Number of cached encode materials. At most 8, one per feature
    /// combination actually encountered.
    #[must_use]
    pub fn cached_material_count(&self) -> usize {
        self.cache.len()
    }

    /// View of the debug-overlay texture, when built with `debug` enabled and
    /// not disposed.
    #[must_use]
    pub fn debug_overlay_view(&self) -> Option<&wgpu::TextureView> {
        self.gpu
            .as_ref()
            .and_then(|gpu| gpu.debug.as_ref())
            .map(|debug| &debug.view)
    }

    /// Saves the debug-overlay texture as a PNG.
    ///
    /// # Errors
    /// [`PickError::Disposed`] after dispose,
    /// [`PickError::DebugOverlayDisabled`] when `debug` was off, plus
    /// readback and image-encoding failures.
    pub fn save_debug_image<P: AsRef<Path>>(
        &self,
        engine: &RenderEngine,
        path: P,
    ) -> RenderResult<()> {
        let gpu = self.gpu.as_ref().ok_or(PickError::Disposed)?;
        let debug = gpu.debug.as_ref().ok_or(PickError::DebugOverlayDisabled)?;
        let size = self.options.target_size;

        let mut encoder = engine
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pick debug readback encoder"),
            });
        copy_target_to_staging(&mut encoder, &debug.texture, &gpu.staging, size);
        engine.queue.submit(std::iter::once(encoder.finish()));

        let pixels = map_staging(&engine.device, &gpu.staging)?;
        let padded = padded_bytes_per_row(size) as usize;
        let mut unpadded = Vec::with_capacity(size as usize * size as usize * 4);
        for row in pixels.chunks(padded).take(size as usize) {
            unpadded.extend_from_slice(&row[..size as usize * 4]);
        }
        let image = image::RgbaImage::from_raw(size, size, unpadded)
            .ok_or_else(|| PickError::ReadbackFailed("overlay pixel data truncated".into()))?;
        image.save(path.as_ref())?;
        log::info!("saved pick debug overlay to {}", path.as_ref().display());
        Ok(())
    }
}

/// Whether a draw item participates in picking at all, before the caller's
/// filter is consulted.
fn is_pickable(item: &DrawItem) -> bool {
    item.geometry.is_some() && !item.pick.opt_out && item.id != BACKGROUND_ID
}

/// Computes the encode pass's view restriction and the probe texel inside it.
///
/// The window is centered on the probe's device pixel, clamped so it never
/// extends past the top-left viewport edges; the probe texel shifts
/// accordingly near those edges.
fn pick_window(
    x: f64,
    y: f64,
    pixel_ratio: f64,
    target_size: u32,
    full_width: u32,
    full_height: u32,
) -> (ViewOffset, u32, u32) {
    let half = f64::from(target_size / 2);
    let device_x = (x * pixel_ratio).floor();
    let device_y = (y * pixel_ratio).floor();
    let offset_x = (device_x - half).max(0.0);
    let offset_y = (device_y - half).max(0.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let probe_x = ((device_x - offset_x).max(0.0) as u32).min(target_size - 1);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let probe_y = ((device_y - offset_y).max(0.0) as u32).min(target_size - 1);
    #[allow(clippy::cast_precision_loss)]
    let offset = ViewOffset {
        full_width: full_width as f32,
        full_height: full_height as f32,
        offset_x: offset_x as f32,
        offset_y: offset_y as f32,
        width: target_size as f32,
        height: target_size as f32,
    };
    (offset, probe_x, probe_y)
}

/// Row stride of the staging buffer, padded to wgpu's copy alignment.
fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Byte offset of a texel within the padded staging data.
fn probe_byte_offset(padded_bytes_per_row: u32, x: u32, y: u32) -> usize {
    y as usize * padded_bytes_per_row as usize + x as usize * 4
}

fn create_target_texture(device: &wgpu::Device, size: u32, label: &str) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: ENCODE_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    })
}

fn create_encode_material(engine: &RenderEngine, key: EncodeKey) -> EncodeMaterial {
    let device = &engine.device;
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("encode pipeline layout"),
        bind_group_layouts: &[
            engine.camera_bind_group_layout(),
            engine.item_bind_group_layout(),
        ],
        push_constant_ranges: &[],
    });

    // The sprite vertex stage takes precedence: a sprite-flagged item is
    // billboarded even when its geometry also carries instance data.
    let (module, buffers, constants): (_, _, &[(&str, f64)]) = if key.sprite() {
        let module = device.create_shader_module(wgpu::include_wgsl!("shaders/flat_sprite.wgsl"));
        let attenuation = if key.size_attenuation() {
            &[("size_attenuation", 1.0)]
        } else {
            &[("size_attenuation", 0.0)]
        };
        (module, vec![Geometry::sprite_corner_layout()], attenuation)
    } else if key.instanced() {
        let module =
            device.create_shader_module(wgpu::include_wgsl!("shaders/flat_instanced.wgsl"));
        (
            module,
            vec![Geometry::vertex_layout(), Geometry::instance_layout()],
            &[],
        )
    } else {
        let module = device.create_shader_module(wgpu::include_wgsl!("shaders/flat_mesh.wgsl"));
        (module, vec![Geometry::vertex_layout()], &[])
    };

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("encode pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            buffers: &buffers,
            compilation_options: wgpu::PipelineCompilationOptions {
                constants,
                ..Default::default()
            },
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: ENCODE_FORMAT,
                // Identifier colors must land in the target bit-exact.
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..wgpu::PrimitiveState::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    EncodeMaterial {
        pipeline,
        expects_color: true,
    }
}

fn encode_pass(
    encoder: &mut wgpu::CommandEncoder,
    target_view: &wgpu::TextureView,
    depth_view: &wgpu::TextureView,
    camera_bind_group: &wgpu::BindGroup,
    item_uniforms: &ItemUniformBuffer,
    eligible: &[(&DrawItem, Arc<EncodeMaterial>)],
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("encode pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target_view,
            resolve_target: None,
            ops: wgpu::Operations {
                // All channels at maximum decodes to the background sentinel.
                load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: depth_view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        ..Default::default()
    });

    for (slot, (item, material)) in eligible.iter().enumerate() {
        let Some(geometry) = &item.geometry else {
            continue;
        };
        pass.set_pipeline(material.pipeline());
        pass.set_bind_group(0, camera_bind_group, &[]);
        pass.set_bind_group(1, item_uniforms.bind_group(), &[item_uniforms.offset(slot)]);
        geometry.draw(&mut pass);
    }
}

fn copy_target_to_staging(
    encoder: &mut wgpu::CommandEncoder,
    target: &wgpu::Texture,
    staging: &wgpu::Buffer,
    size: u32,
) {
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: target,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row(size)),
                rows_per_image: Some(size),
            },
        },
        wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
    );
}

/// Blocks until the staging buffer is mapped, then copies its contents out.
fn map_staging(device: &wgpu::Device, staging: &wgpu::Buffer) -> sensorscope_core::Result<Vec<u8>> {
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait)
        .map_err(|e| PickError::ReadbackFailed(e.to_string()))?;
    rx.recv()
        .map_err(|_| PickError::ReadbackFailed("map callback dropped".into()))?
        .map_err(|e| PickError::ReadbackFailed(e.to_string()))?;
    let data = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(data)
}
