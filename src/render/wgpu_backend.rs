// SPDX-License-Identifier: GPL-3.0-only

//! wgpu surface backend
//!
//! Draws into an offscreen drawable texture that can be read back. Frame
//! textures are cached by size and pixel format and re-uploaded only when a
//! different frame is drawn.

use super::geometry::RenderGeometry;
use super::surface::SurfaceBackend;
use crate::backends::camera::types::{CameraFrame, PixelFormat};
use crate::errors::RenderError;
use crate::gpu::{self, GpuDeviceInfo, wgpu};
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Cached frame textures before the cache is flushed
const MAX_CACHED_TEXTURES: usize = 4;

const DRAWABLE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x4];
const TEX_COORD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x2];

fn texture_format(pixel_format: PixelFormat) -> wgpu::TextureFormat {
    match pixel_format {
        PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
    }
}

struct Drawable {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct CachedTexture {
    texture: wgpu::Texture,
    bind_group: Arc<wgpu::BindGroup>,
    /// Frame whose pixels are currently uploaded
    frame_id: Option<u64>,
}

/// Frame texture handed to the draw call
#[derive(Clone)]
pub struct PreviewTexture {
    bind_group: Arc<wgpu::BindGroup>,
    width: u32,
    height: u32,
}

/// Offscreen wgpu backend
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: GpuDeviceInfo,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    position_buffer: wgpu::Buffer,
    tex_coord_buffer: wgpu::Buffer,
    drawable: Option<Drawable>,
    textures: HashMap<(u32, u32, PixelFormat), CachedTexture>,
    presented: u64,
}

impl WgpuBackend {
    /// Create a backend on a new headless device
    pub async fn new() -> Result<Self, RenderError> {
        let (device, queue, info) = gpu::create_render_device("filter-camera preview").await?;
        Ok(Self::with_device(device, queue, info))
    }

    pub fn with_device(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        info: GpuDeviceInfo,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("filter-camera preview shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("preview.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("filter-camera preview bind group layout"),
            entries: &[
                // Frame texture
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("filter-camera preview pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("filter-camera preview pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[
                    wgpu::VertexBufferLayout {
                        array_stride: (4 * std::mem::size_of::<f32>()) as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &POSITION_ATTRIBUTES,
                    },
                    wgpu::VertexBufferLayout {
                        array_stride: (2 * std::mem::size_of::<f32>()) as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &TEX_COORD_ATTRIBUTES,
                    },
                ],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                // Mirroring flips the winding order
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: DRAWABLE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("filter-camera preview sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let position_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter-camera preview positions"),
            size: std::mem::size_of::<[f32; 16]>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let tex_coord_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter-camera preview texture coordinates"),
            size: std::mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        info!(adapter = %info.adapter_name, backend = ?info.backend, "Preview backend ready");

        Self {
            device,
            queue,
            info,
            pipeline,
            bind_group_layout,
            sampler,
            position_buffer,
            tex_coord_buffer,
            drawable: None,
            textures: HashMap::new(),
            presented: 0,
        }
    }

    pub fn device_info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    /// Number of presented draws
    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn cached_textures(&self) -> usize {
        self.textures.len()
    }

    fn create_texture(&self, width: u32, height: u32, pixel_format: PixelFormat) -> CachedTexture {
        debug!(width, height, %pixel_format, "Creating preview texture");
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("filter-camera preview frame"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(pixel_format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("filter-camera preview bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        CachedTexture {
            texture,
            bind_group: Arc::new(bind_group),
            frame_id: None,
        }
    }

    /// Copy the drawable back to the CPU
    pub fn read_drawable(&self) -> Result<RgbaImage, RenderError> {
        let drawable = self
            .drawable
            .as_ref()
            .ok_or_else(|| RenderError::ReadbackFailed("No drawable".to_string()))?;

        let unpadded_row = drawable.width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = unpadded_row.div_ceil(align) * align;
        let buffer_size = padded_row as wgpu::BufferAddress * drawable.height as wgpu::BufferAddress;

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter-camera readback"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &drawable.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(drawable.height),
                },
            },
            wgpu::Extent3d {
                width: drawable.width,
                height: drawable.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(receiver)
            .map_err(|_| RenderError::ReadbackFailed("Map callback dropped".to_string()))?
            .map_err(|e| RenderError::ReadbackFailed(format!("{:?}", e)))?;

        let data = buffer_slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_row * drawable.height) as usize);
        for row in data.chunks_exact(padded_row as usize) {
            pixels.extend_from_slice(&row[..unpadded_row as usize]);
        }
        drop(data);
        staging_buffer.unmap();

        RgbaImage::from_raw(drawable.width, drawable.height, pixels)
            .ok_or_else(|| RenderError::ReadbackFailed("Readback size mismatch".to_string()))
    }
}

impl SurfaceBackend for WgpuBackend {
    type Texture = PreviewTexture;

    fn resize_drawable(&mut self, width: u32, height: u32) {
        if self
            .drawable
            .as_ref()
            .is_some_and(|d| d.width == width && d.height == height)
        {
            return;
        }
        if width == 0 || height == 0 {
            self.drawable = None;
            return;
        }
        debug!(width, height, "Creating preview drawable");
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("filter-camera preview drawable"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DRAWABLE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.drawable = Some(Drawable {
            texture,
            view,
            width,
            height,
        });
    }

    fn next_drawable(&mut self) -> bool {
        self.drawable.is_some()
    }

    fn texture_for_frame(&mut self, frame: &CameraFrame) -> Option<Self::Texture> {
        let format = frame.format;
        let size = format.frame_size()?;
        if format.is_empty() || frame.data.len() < size {
            return None;
        }

        let key = (format.width, format.height, format.pixel_format);
        if !self.textures.contains_key(&key) {
            if self.textures.len() >= MAX_CACHED_TEXTURES {
                self.flush_texture_cache();
            }
            let cached = self.create_texture(format.width, format.height, format.pixel_format);
            self.textures.insert(key, cached);
        }
        let cached = self.textures.get_mut(&key)?;

        if cached.frame_id != Some(frame.id) {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &cached.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &frame.data[..size],
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(format.stride() as u32),
                    rows_per_image: Some(format.height),
                },
                wgpu::Extent3d {
                    width: format.width,
                    height: format.height,
                    depth_or_array_layers: 1,
                },
            );
            cached.frame_id = Some(frame.id);
        }

        Some(PreviewTexture {
            bind_group: Arc::clone(&cached.bind_group),
            width: format.width,
            height: format.height,
        })
    }

    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32) {
        (texture.width, texture.height)
    }

    fn flush_texture_cache(&mut self) {
        self.textures.clear();
    }

    fn upload_geometry(&mut self, geometry: &RenderGeometry) {
        self.queue
            .write_buffer(&self.position_buffer, 0, bytemuck::cast_slice(&geometry.vertices));
        self.queue
            .write_buffer(&self.tex_coord_buffer, 0, bytemuck::cast_slice(&geometry.tex_coords));
    }

    fn draw_quad(&mut self, texture: &Self::Texture) -> Result<(), String> {
        let drawable = self
            .drawable
            .as_ref()
            .ok_or_else(|| "No drawable".to_string())?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("filter-camera preview encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("filter-camera preview pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &drawable.view,
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
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, Some(texture.bind_group.as_ref()), &[]);
            pass.set_vertex_buffer(0, self.position_buffer.slice(..));
            pass.set_vertex_buffer(1, self.tex_coord_buffer.slice(..));
            pass.draw(0..4, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.presented += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::FrameFormat;
    use crate::render::geometry::{Rotation, ViewBounds};
    use crate::render::surface::{DrawOutcome, FrameRenderSurface, FrameSlot};

    fn backend() -> Option<WgpuBackend> {
        match pollster::block_on(WgpuBackend::new()) {
            Ok(backend) => Some(backend),
            Err(e) => {
                // Skip if no GPU available
                println!("Skipping test (no GPU): {}", e);
                None
            }
        }
    }

    #[test]
    fn test_preview_shader_validates() {
        let module = naga::front::wgsl::parse_str(include_str!("preview.wgsl"))
            .unwrap_or_else(|e| panic!("preview shader parse failed: {:?}", e));
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module);
        if let Err(e) = info {
            panic!("preview shader validation failed: {:?}", e);
        }
    }

    fn quadrant_frame(id: u64) -> CameraFrame {
        // 2x2 BGRA: red, green / blue, white
        let data = vec![
            0, 0, 255, 255, 0, 255, 0, 255, //
            255, 0, 0, 255, 255, 255, 255, 255,
        ];
        CameraFrame::new(id, FrameFormat::new(PixelFormat::Bgra8, 2, 2), data)
    }

    #[test]
    fn test_draw_and_read_back() {
        let Some(backend) = backend() else { return };
        let slot = FrameSlot::new();
        let mut surface = FrameRenderSurface::new(backend, slot.clone(), ViewBounds::new(2.0, 2.0), 1.0);
        surface.set_rotation(Rotation::Rotate0);
        slot.stage(quadrant_frame(1));
        assert_eq!(surface.draw(), DrawOutcome::Drawn { frame_id: 1 });

        let canvas = surface.backend().read_drawable().unwrap();
        assert_eq!(canvas.dimensions(), (2, 2));
        let close = |actual: [u8; 4], expected: [u8; 4]| {
            actual
                .iter()
                .zip(expected)
                .all(|(a, e)| (*a as i16 - e as i16).abs() <= 2)
        };
        assert!(close(canvas.get_pixel(0, 0).0, [255, 0, 0, 255]));
        assert!(close(canvas.get_pixel(1, 0).0, [0, 255, 0, 255]));
        assert!(close(canvas.get_pixel(0, 1).0, [0, 0, 255, 255]));
        assert!(close(canvas.get_pixel(1, 1).0, [255, 255, 255, 255]));
    }

    #[test]
    fn test_texture_cache_keyed_by_size() {
        let Some(mut backend) = backend() else { return };
        backend.texture_for_frame(&quadrant_frame(1)).unwrap();
        backend.texture_for_frame(&quadrant_frame(2)).unwrap();
        assert_eq!(backend.cached_textures(), 1);

        let larger = CameraFrame::new(3, FrameFormat::new(PixelFormat::Bgra8, 4, 4), vec![0u8; 64]);
        backend.texture_for_frame(&larger).unwrap();
        assert_eq!(backend.cached_textures(), 2);

        let short = CameraFrame::new(4, FrameFormat::new(PixelFormat::Bgra8, 4, 4), vec![0u8; 8]);
        assert!(backend.texture_for_frame(&short).is_none());
    }
}
