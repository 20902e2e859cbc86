//! The compositor as a wgpu render pass.
//!
//! Mirrors [`crate::compositor::Compositor::apply`] in `compositor.wgsl` so a
//! host can composite on the GPU with the same uniform block the CPU path uses.
//! [`upload_frame`] and [`read_back`] move frames between `image` buffers and
//! textures for offscreen rendering.
//!
//! # Key types
//!
//! - [`CompositorPipeline`] pipeline, uniform buffer and input layout
//! - [`FRAME_FORMAT`] format of the offscreen targets

use anyhow::Context;
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::compositor::CompositorUniform;

/// Format of the offscreen targets. Linear, so the pass matches the CPU compositor.
pub const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// GPU rendition of [`crate::compositor::Compositor::apply`].
///
/// The scene is rendered into an offscreen texture, bound with
/// [`CompositorPipeline::bind_input`], and drawn onto the target with one full
/// screen triangle.
pub struct CompositorPipeline {
    pub render_pipeline: wgpu::RenderPipeline,
    pub uniform_buffer: wgpu::Buffer,
    pub uniform_bind_group: wgpu::BindGroup,
    pub input_layout: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
}

fn mk_uniform_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
        label: Some("compositor_uniform_layout"),
    })
}

fn mk_input_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
        label: Some("compositor_input_layout"),
    })
}

impl CompositorPipeline {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat, uniform: &CompositorUniform) -> Self {
        let uniform_layout = mk_uniform_layout(device);
        let input_layout = mk_input_layout(device);

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Compositor Uniform Buffer"),
            contents: bytemuck::cast_slice(&[*uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
            label: Some("compositor_uniform_bind_group"),
        });

        // Nearest sampling keeps the voxel blocks crisp.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compositor Pipeline Layout"),
            bind_group_layouts: &[Some(&input_layout), Some(&uniform_layout)],
            immediate_size: 0,
        });
        let shader = wgpu::ShaderModuleDescriptor {
            label: Some("Compositor Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("compositor.wgsl").into()),
        };
        let render_pipeline = crate::pipelines::mk_render_pipeline(
            device,
            &layout,
            format,
            Some(wgpu::BlendState {
                alpha: wgpu::BlendComponent::REPLACE,
                color: wgpu::BlendComponent::REPLACE,
            }),
            None,
            &[],
            shader,
        );

        Self {
            render_pipeline,
            uniform_buffer,
            uniform_bind_group,
            input_layout,
            sampler,
        }
    }

    pub fn write_uniforms(&self, queue: &wgpu::Queue, uniform: &CompositorUniform) {
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[*uniform]));
    }

    /// Bind group for the rendered scene. Recreate it whenever the offscreen target is resized.
    pub fn bind_input(&self, device: &wgpu::Device, view: &wgpu::TextureView) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.input_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
            label: Some("compositor_input_bind_group"),
        })
    }

    pub fn draw(&self, render_pass: &mut wgpu::RenderPass<'_>, input: &wgpu::BindGroup) {
        render_pass.set_pipeline(&self.render_pipeline);
        render_pass.set_bind_group(0, input, &[]);
        render_pass.set_bind_group(1, &self.uniform_bind_group, &[]);
        render_pass.draw(0..3, 0..1);
    }
}

/// Upload a CPU frame (for example a background) as a sampleable texture.
pub fn upload_frame(device: &wgpu::Device, queue: &wgpu::Queue, frame: &RgbaImage) -> wgpu::Texture {
    let (width, height) = frame.dimensions();
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Compositor Input"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FRAME_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        frame,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );
    texture
}

/// Copy an `Rgba8Unorm` texture back into memory.
pub async fn read_back(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> anyhow::Result<RgbaImage> {
    let size = texture.size();
    let (width, height) = (size.width, size.height);
    let unpadded = 4 * width;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = unpadded.div_ceil(align) * align;

    let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        size: (padded * height) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        label: Some("Compositor Readback Buffer"),
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Compositor Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &output_buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        size,
    );
    queue.submit(std::iter::once(encoder.finish()));

    // NOTE: the mapping has to be requested before polling, otherwise the await never resolves.
    let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
    let buffer_slice = output_buffer.slice(..);
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    #[cfg(target_arch = "wasm32")]
    device.poll(wgpu::PollType::Poll)?;
    #[cfg(not(target_arch = "wasm32"))]
    device.poll(wgpu::PollType::Wait {
        submission_index: None,
        timeout: Some(std::time::Duration::from_secs(3)),
    })?;
    rx.receive().await.context("readback was cancelled")??;

    let pixels = {
        let data = buffer_slice.get_mapped_range();
        data.chunks(padded as usize)
            .flat_map(|row| &row[..unpadded as usize])
            .copied()
            .collect::<Vec<u8>>()
    };
    output_buffer.unmap();
    RgbaImage::from_raw(width, height, pixels).context("readback has an unexpected size")
}
