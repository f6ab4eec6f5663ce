//! The host rendering engine.
//!
//! Deliberately small: windowed/headless device setup, a forward flat-color
//! pass, and the per-frame [`RenderLists`] that [`render`](RenderEngine::render)
//! rebuilds and retains. The retained lists are the picking contract: after a
//! frame completes they still reference valid geometry/transform state, and
//! the picker re-submits them with encode materials instead of re-walking the
//! scene.

use std::num::NonZeroU64;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::camera::Camera;
use crate::error::{RenderError, RenderResult};
use crate::geometry::Geometry;
use crate::scene::{DrawItem, RenderLists, Scene};

/// Camera uniforms for GPU.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
}

impl CameraUniforms {
    pub(crate) fn from_camera(camera: &Camera) -> Self {
        let view = camera.view_matrix();
        let proj = camera.projection_matrix();
        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            view_proj: (proj * view).to_cols_array_2d(),
            camera_pos: camera.position.extend(1.0).to_array(),
        }
    }
}

/// Per-draw-item uniforms, bound at a dynamic offset.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ItemUniforms {
    pub model: [[f32; 4]; 4],
    pub color: [f32; 4],
    /// x = sprite rotation, yz = sprite center anchor.
    pub sprite: [f32; 4],
}

impl ItemUniforms {
    pub(crate) fn new(item: &DrawItem, color: [f32; 4]) -> Self {
        Self {
            model: item.transform.to_cols_array_2d(),
            color,
            sprite: [item.sprite.rotation, item.sprite.center[0], item.sprite.center[1], 0.0],
        }
    }
}

/// A growable uniform buffer holding one [`ItemUniforms`] slot per draw item,
/// bound with dynamic offsets.
pub(crate) struct ItemUniformBuffer {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    capacity: usize,
    stride: u32,
}

impl ItemUniformBuffer {
    pub(crate) fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        capacity: usize,
    ) -> Self {
        let align = device.limits().min_uniform_buffer_offset_alignment as u64;
        let size = std::mem::size_of::<ItemUniforms>() as u64;
        let stride = size.div_ceil(align) * align;
        let capacity = capacity.max(1);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("item uniforms"),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = Self::create_bind_group(device, layout, &buffer);
        Self {
            buffer,
            bind_group,
            capacity,
            stride: stride as u32,
        }
    }

    fn create_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        buffer: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("item uniforms bind group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<ItemUniforms>() as u64),
                }),
            }],
        })
    }

    pub(crate) fn ensure_capacity(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        count: usize,
    ) {
        if count <= self.capacity {
            return;
        }
        log::trace!("growing item uniform buffer to {count} slots");
        *self = Self::new(device, layout, count);
    }

    pub(crate) fn write(&self, queue: &wgpu::Queue, slot: usize, uniforms: &ItemUniforms) {
        debug_assert!(slot < self.capacity);
        queue.write_buffer(
            &self.buffer,
            u64::from(self.stride) * slot as u64,
            bytemuck::cast_slice(std::slice::from_ref(uniforms)),
        );
    }

    pub(crate) fn offset(&self, slot: usize) -> u32 {
        self.stride * slot as u32
    }

    pub(crate) fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}

/// Creates the camera/item bind group layouts shared by every flat-color
/// pipeline (display and encode).
pub(crate) fn create_bind_group_layouts(
    device: &wgpu::Device,
) -> (wgpu::BindGroupLayout, wgpu::BindGroupLayout) {
    let camera = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("camera bind group layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: NonZeroU64::new(std::mem::size_of::<CameraUniforms>() as u64),
            },
            count: None,
        }],
    });
    let item = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("item bind group layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(std::mem::size_of::<ItemUniforms>() as u64),
            },
            count: None,
        }],
    });
    (camera, item)
}

/// The main rendering engine backed by wgpu.
pub struct RenderEngine {
    /// The wgpu instance.
    pub instance: wgpu::Instance,
    /// The wgpu adapter.
    pub adapter: wgpu::Adapter,
    /// The wgpu device.
    pub device: wgpu::Device,
    /// The wgpu queue.
    pub queue: wgpu::Queue,
    surface: Option<wgpu::Surface<'static>>,
    surface_config: wgpu::SurfaceConfiguration,
    headless_target: Option<wgpu::Texture>,
    depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    camera_bind_group_layout: wgpu::BindGroupLayout,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    item_bind_group_layout: wgpu::BindGroupLayout,
    item_uniforms: ItemUniformBuffer,
    mesh_pipeline: wgpu::RenderPipeline,
    instanced_pipeline: wgpu::RenderPipeline,
    sprite_pipeline: wgpu::RenderPipeline,
    clear_color: wgpu::Color,
    pixel_ratio: f64,
    frame_lists: RenderLists,
}

/// Depth format used by the display pass.
pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

impl RenderEngine {
    /// Creates a new engine rendering to a winit window.
    pub async fn new_windowed(window: Arc<winit::window::Window>) -> RenderResult<Self> {
        let size = window.inner_size();
        let pixel_ratio = window.scale_factor();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..wgpu::InstanceDescriptor::default()
        });
        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| RenderError::AdapterCreationFailed)?;

        let (device, queue) = Self::request_device(&adapter).await?;

        let capabilities = surface.get_capabilities(&adapter);
        let format = capabilities
            .formats
            .first()
            .copied()
            .unwrap_or(wgpu::TextureFormat::Bgra8UnormSrgb);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        Ok(Self::from_parts(
            instance,
            adapter,
            device,
            queue,
            Some(surface),
            surface_config,
            pixel_ratio,
        ))
    }

    /// Creates a new headless render engine drawing to an internal texture.
    pub async fn new_headless(width: u32, height: u32) -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..wgpu::InstanceDescriptor::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| RenderError::AdapterCreationFailed)?;

        let (device, queue) = Self::request_device(&adapter).await?;

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: wgpu::TextureFormat::Rgba8Unorm,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        Ok(Self::from_parts(
            instance,
            adapter,
            device,
            queue,
            None,
            surface_config,
            1.0,
        ))
    }

    /// Blocking convenience wrapper around [`new_headless`](Self::new_headless).
    pub fn new_headless_blocking(width: u32, height: u32) -> RenderResult<Self> {
        pollster::block_on(Self::new_headless(width, height))
    }

    async fn request_device(adapter: &wgpu::Adapter) -> RenderResult<(wgpu::Device, wgpu::Queue)> {
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("sensorscope device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;
        Ok((device, queue))
    }

    #[allow(clippy::too_many_lines)]
    fn from_parts(
        instance: wgpu::Instance,
        adapter: wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface: Option<wgpu::Surface<'static>>,
        surface_config: wgpu::SurfaceConfiguration,
        pixel_ratio: f64,
    ) -> Self {
        log::debug!(
            "render engine on {} ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        let (camera_bind_group_layout, item_bind_group_layout) =
            create_bind_group_layouts(&device);

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("camera uniforms"),
            contents: bytemuck::cast_slice(&[CameraUniforms::from_camera(&Camera::new(1.0))]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("camera bind group"),
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let item_uniforms = ItemUniformBuffer::new(&device, &item_bind_group_layout, 64);

        let (depth_texture, depth_view) =
            Self::create_depth_texture(&device, surface_config.width, surface_config.height);

        let headless_target = if surface.is_none() {
            Some(Self::create_headless_target(
                &device,
                surface_config.width,
                surface_config.height,
                surface_config.format,
            ))
        } else {
            None
        };

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("display pipeline layout"),
            bind_group_layouts: &[&camera_bind_group_layout, &item_bind_group_layout],
            push_constant_ranges: &[],
        });

        let mesh_shader = device.create_shader_module(wgpu::include_wgsl!("shaders/flat_mesh.wgsl"));
        let instanced_shader =
            device.create_shader_module(wgpu::include_wgsl!("shaders/flat_instanced.wgsl"));
        let sprite_shader =
            device.create_shader_module(wgpu::include_wgsl!("shaders/flat_sprite.wgsl"));

        fn display_pipeline(
            device: &wgpu::Device,
            pipeline_layout: &wgpu::PipelineLayout,
            format: wgpu::TextureFormat,
            label: &str,
            shader: &wgpu::ShaderModule,
            buffers: &[wgpu::VertexBufferLayout<'_>],
        ) -> wgpu::RenderPipeline {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(pipeline_layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some("vs_main"),
                    buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
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
            })
        }

        let mesh_pipeline = display_pipeline(
            &device,
            &pipeline_layout,
            surface_config.format,
            "mesh display pipeline",
            &mesh_shader,
            &[Geometry::vertex_layout()],
        );
        let instanced_pipeline = display_pipeline(
            &device,
            &pipeline_layout,
            surface_config.format,
            "instanced display pipeline",
            &instanced_shader,
            &[Geometry::vertex_layout(), Geometry::instance_layout()],
        );
        let sprite_pipeline = display_pipeline(
            &device,
            &pipeline_layout,
            surface_config.format,
            "sprite display pipeline",
            &sprite_shader,
            &[Geometry::sprite_corner_layout()],
        );

        Self {
            instance,
            adapter,
            device,
            queue,
            surface,
            surface_config,
            headless_target,
            depth_texture,
            depth_view,
            camera_bind_group_layout,
            camera_buffer,
            camera_bind_group,
            item_bind_group_layout,
            item_uniforms,
            mesh_pipeline,
            instanced_pipeline,
            sprite_pipeline,
            clear_color: wgpu::Color {
                r: 0.1,
                g: 0.1,
                b: 0.1,
                a: 1.0,
            },
            pixel_ratio,
            frame_lists: RenderLists::default(),
        }
    }

    fn create_depth_texture(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn create_headless_target(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("headless target"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    /// Resizes the drawable area.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        if let Some(surface) = &self.surface {
            surface.configure(&self.device, &self.surface_config);
        }
        if self.headless_target.is_some() {
            self.headless_target = Some(Self::create_headless_target(
                &self.device,
                width,
                height,
                self.surface_config.format,
            ));
        }
        let (depth_texture, depth_view) = Self::create_depth_texture(&self.device, width, height);
        self.depth_texture = depth_texture;
        self.depth_view = depth_view;
    }

    /// Renders one frame and rebuilds the retained draw lists.
    ///
    /// # Errors
    /// Returns [`RenderError::SurfaceLost`] when the surface cannot provide a
    /// frame.
    pub fn render(&mut self, scene: &Scene, camera: &Camera) -> RenderResult<()> {
        self.update_camera_uniforms(camera);
        scene.build_lists(&mut self.frame_lists);

        let count = self.frame_lists.len();
        self.item_uniforms
            .ensure_capacity(&self.device, &self.item_bind_group_layout, count);
        for (slot, item) in self.frame_lists.iter_pick_order().enumerate() {
            self.item_uniforms
                .write(&self.queue, slot, &ItemUniforms::new(item, item.color));
        }

        let frame = match &self.surface {
            Some(surface) => Some(
                surface
                    .get_current_texture()
                    .map_err(|_| RenderError::SurfaceLost)?,
            ),
            None => None,
        };
        let view = match (&frame, &self.headless_target) {
            (Some(frame), _) => frame
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
            (None, Some(texture)) => texture.create_view(&wgpu::TextureViewDescriptor::default()),
            (None, None) => unreachable!("engine always has a surface or a headless target"),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("display encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("display pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            for (slot, item) in self.frame_lists.iter_pick_order().enumerate() {
                let Some(geometry) = &item.geometry else {
                    continue;
                };
                let pipeline = if item.features.sprite() {
                    &self.sprite_pipeline
                } else if item.features.instanced() {
                    &self.instanced_pipeline
                } else {
                    &self.mesh_pipeline
                };
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &self.camera_bind_group, &[]);
                pass.set_bind_group(
                    1,
                    self.item_uniforms.bind_group(),
                    &[self.item_uniforms.offset(slot)],
                );
                geometry.draw(&mut pass);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(frame) = frame {
            frame.present();
        }
        Ok(())
    }

    fn update_camera_uniforms(&self, camera: &Camera) {
        self.queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::cast_slice(&[CameraUniforms::from_camera(camera)]),
        );
    }

    /// The draw-item lists retained from the most recent [`render`](Self::render)
    /// call. Valid until the next render.
    #[must_use]
    pub fn frame_lists(&self) -> &RenderLists {
        &self.frame_lists
    }

    /// Drawable dimensions in device pixels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    /// Display pixel ratio (device pixels per logical pixel).
    #[must_use]
    pub fn pixel_ratio(&self) -> f64 {
        self.pixel_ratio
    }

    /// Sets the display pixel ratio, e.g. from a scale-factor change event.
    pub fn set_pixel_ratio(&mut self, pixel_ratio: f64) {
        self.pixel_ratio = pixel_ratio;
    }

    /// Current background clear color.
    #[must_use]
    pub fn clear_color(&self) -> wgpu::Color {
        self.clear_color
    }

    /// Sets the background clear color.
    pub fn set_clear_color(&mut self, color: wgpu::Color) {
        self.clear_color = color;
    }

    pub(crate) fn camera_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.camera_bind_group_layout
    }

    pub(crate) fn item_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.item_bind_group_layout
    }
}
