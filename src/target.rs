//! Offscreen render target and the orientation-correction pass.
//!
//! [`OffscreenTarget`] owns the GPU context, the two offscreen textures the
//! pipeline renders through (primary + post-process), and the pipeline that
//! performs orientation/flip correction as a single textured-quad draw. It
//! also performs the blocking pixel read-back that turns GPU contents into
//! caller-visible bytes.
//!
//! The [`RenderTarget`] trait mirrors what the session actually needs, so a
//! non-GPU target can be injected for tests or alternative backends.
//!
//! # Resource lifecycle
//!
//! The GPU context and correction pipeline are created exactly once, in
//! [`init`](RenderTarget::init) on the render thread. Textures are created
//! lazily on first use and are *rebuilt, never resized*: a surface change
//! simply drops them and the next frame allocates fresh ones at the new
//! size. Failure to allocate an attachment is not fatal — the pass is
//! skipped, the failure is logged, and the frame proceeds with whatever was
//! previously rendered.

use crate::engine::RenderScene;
use crate::frame::FrameData;
use crate::gpu::{GpuContext, GpuError};
use crate::orientation::{OrientFormat, QUAD_INDICES, QuadVertex, quad_vertices};

/// WGSL for the correction pass: draw the quad, sample the primary texture
/// at the per-corner coordinates chosen from the geometry table.
const ORIENTATION_SHADER: &str = r#"
struct VertexOut {
    @builtin(position) position: vec4f,
    @location(0) tex_coord: vec2f,
}

@vertex
fn vs(@location(0) position: vec3f, @location(1) tex_coord: vec2f) -> VertexOut {
    var out: VertexOut;
    out.position = vec4f(position, 1.0);
    out.tex_coord = tex_coord;
    return out;
}

@group(0) @binding(0) var input_texture: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;

@fragment
fn fs(in: VertexOut) -> @location(0) vec4f {
    return textureSample(input_texture, input_sampler, in.tex_coord);
}
"#;

/// Texture format used for both offscreen attachments and read-back.
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// What the render target must provide to the frame session.
///
/// All methods are called on the dedicated render thread only.
pub trait RenderTarget: Send {
    /// One-time initialization. Creates the GPU context and the correction
    /// pipeline. The only fatal failure point in the pipeline.
    fn init(&mut self) -> Result<(), GpuError>;

    /// Begin a frame: lazily (re)create the primary texture and expose it
    /// as the scene the engine draws into. After this call the primary
    /// texture is the read-back source.
    fn prepare_rendering(&mut self) -> RenderScene<'_>;

    /// Apply orientation/flip correction to the primary texture. The
    /// identity format skips the GPU pass entirely; otherwise the corrected
    /// result becomes the read-back source.
    fn orient_image(&mut self, format: OrientFormat);

    /// Blocking RGBA8 read-back of the current read-back source.
    fn read_current_buffer(&mut self) -> FrameData;

    /// Adopt a new surface size. Textures are released and rebuilt on
    /// demand; the pipeline and buffers are retained.
    fn surface_changed(&mut self, width: u32, height: u32);
}

/// Which texture the next read-back reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadSource {
    Primary,
    Post,
}

struct OffscreenTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// The wgpu implementation of [`RenderTarget`].
pub struct OffscreenTarget {
    width: u32,
    height: u32,
    gpu: Option<GpuContext>,
    render_texture: Option<OffscreenTexture>,
    post_texture: Option<OffscreenTexture>,
    pipeline: Option<wgpu::RenderPipeline>,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    sampler: Option<wgpu::Sampler>,
    vertex_buffer: Option<wgpu::Buffer>,
    index_buffer: Option<wgpu::Buffer>,
    read_source: ReadSource,
}

impl OffscreenTarget {
    /// Create an uninitialized target for the given surface size.
    ///
    /// No GPU work happens here; [`init`](RenderTarget::init) runs later on
    /// the render thread.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            gpu: None,
            render_texture: None,
            post_texture: None,
            pipeline: None,
            bind_group_layout: None,
            sampler: None,
            vertex_buffer: None,
            index_buffer: None,
            read_source: ReadSource::Primary,
        }
    }

    /// Allocate one offscreen attachment, trapping validation errors.
    ///
    /// Returns `None` (after logging) when the device rejects the texture,
    /// the recoverable analogue of an incomplete framebuffer.
    fn create_texture(gpu: &GpuContext, width: u32, height: u32, label: &str) -> Option<OffscreenTexture> {
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(gpu.device.pop_error_scope()) {
            tracing::error!("Failed to create {label} ({width}x{height}): {error}");
            return None;
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Some(OffscreenTexture { texture, view })
    }

    fn ensure_render_texture(&mut self) {
        if self.render_texture.is_none()
            && let Some(gpu) = &self.gpu
        {
            self.render_texture = Self::create_texture(gpu, self.width, self.height, "Render Texture");
        }
    }

    fn ensure_post_texture(&mut self) {
        if self.post_texture.is_none()
            && let Some(gpu) = &self.gpu
        {
            self.post_texture =
                Self::create_texture(gpu, self.width, self.height, "Post Process Texture");
        }
    }
}

impl RenderTarget for OffscreenTarget {
    fn init(&mut self) -> Result<(), GpuError> {
        let gpu = GpuContext::new()?;
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Orientation Shader"),
            source: wgpu::ShaderSource::Wgsl(ORIENTATION_SHADER.into()),
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Orientation Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Orientation Bind Group Layout"),
            entries: &[
                // Input texture
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Orientation Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Orientation Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[QuadVertex::LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Orientation Vertex Buffer"),
            size: (std::mem::size_of::<QuadVertex>() * 4) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let index_buffer = {
            use wgpu::util::DeviceExt;
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Orientation Index Buffer"),
                contents: bytemuck::cast_slice(&QUAD_INDICES),
                usage: wgpu::BufferUsages::INDEX,
            })
        };

        self.sampler = Some(sampler);
        self.bind_group_layout = Some(bind_group_layout);
        self.pipeline = Some(pipeline);
        self.vertex_buffer = Some(vertex_buffer);
        self.index_buffer = Some(index_buffer);
        self.gpu = Some(gpu);
        Ok(())
    }

    fn prepare_rendering(&mut self) -> RenderScene<'_> {
        self.ensure_render_texture();
        self.read_source = ReadSource::Primary;

        match (&self.gpu, &self.render_texture) {
            (Some(gpu), Some(texture)) => {
                RenderScene::attached(gpu, &texture.view, self.width, self.height)
            }
            _ => RenderScene::detached(self.width, self.height),
        }
    }

    fn orient_image(&mut self, format: OrientFormat) {
        {
            let Some(gpu) = &self.gpu else {
                tracing::error!("orient_image called before init");
                return;
            };
            // Flush whatever the engine queued so the correction pass is
            // ordered after it.
            gpu.queue.submit(std::iter::empty());
        }

        if format.is_identity() {
            return;
        }

        if self.render_texture.is_none() {
            tracing::error!("No rendered frame to orient");
            return;
        }
        self.ensure_post_texture();

        let (
            Some(gpu),
            Some(pipeline),
            Some(layout),
            Some(sampler),
            Some(vertex_buffer),
            Some(index_buffer),
            Some(render_texture),
        ) = (
            &self.gpu,
            &self.pipeline,
            &self.bind_group_layout,
            &self.sampler,
            &self.vertex_buffer,
            &self.index_buffer,
            &self.render_texture,
        ) else {
            tracing::error!("Orientation pipeline not initialized");
            return;
        };

        let Some(post_texture) = &self.post_texture else {
            // Allocation failed; already logged, leave the primary texture
            // as the read-back source.
            return;
        };

        gpu.queue.write_buffer(
            vertex_buffer,
            0,
            bytemuck::cast_slice(&quad_vertices(format)),
        );

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Orientation Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&render_texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Orientation Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Orientation Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &post_texture.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
        }
        // Submitting is the trailing flush that orders the pass ahead of
        // any subsequent read-back.
        gpu.queue.submit(Some(encoder.finish()));
        self.read_source = ReadSource::Post;
    }

    fn read_current_buffer(&mut self) -> FrameData {
        let source = match self.read_source {
            ReadSource::Primary => &self.render_texture,
            ReadSource::Post => &self.post_texture,
        };
        let (Some(gpu), Some(source)) = (&self.gpu, source) else {
            tracing::warn!("Read-back requested before any frame was rendered");
            return FrameData {
                bytes: vec![0; self.width as usize * self.height as usize * 4],
                width: self.width,
                height: self.height,
            };
        };

        let row_bytes = self.width as usize * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let padded_row_bytes = row_bytes.div_ceil(align) * align;

        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Read-back Buffer"),
            size: (padded_row_bytes * self.height as usize) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Read-back Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes as u32),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(Some(encoder.finish()));

        // Map, poll until ready, copy out with the row padding stripped.
        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = gpu.device.poll(wgpu::PollType::wait_indefinitely());

        let mut bytes = vec![0u8; row_bytes * self.height as usize];
        match receiver.recv() {
            Ok(Ok(())) => {
                let mapped = slice.get_mapped_range();
                for (row, chunk) in bytes.chunks_exact_mut(row_bytes).enumerate() {
                    let start = row * padded_row_bytes;
                    chunk.copy_from_slice(&mapped[start..start + row_bytes]);
                }
                drop(mapped);
                staging.unmap();
            }
            result => {
                tracing::error!("Read-back mapping failed: {result:?}");
            }
        }

        FrameData {
            bytes,
            width: self.width,
            height: self.height,
        }
    }

    fn surface_changed(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.render_texture = None;
        self.post_texture = None;
        self.read_source = ReadSource::Primary;
    }
}
