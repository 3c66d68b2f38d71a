//! Shared setup for the GPU tests and the `render-headless` demo: a headless
//! context, and the triangle scene drawn with it.
#![allow(dead_code)]
use anyhow::{Context as _, Result};
use bytemuck::{Pod, Zeroable};
use core::num::NonZero;
use vkheadless::{
    barrier::{ImageState, VertexInput},
    context::{ContextConfig, HeadlessContext},
    format::{self, Format},
    *,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A context to test against, or `None` (with a note in the log) when this
/// machine has no Vulkan loader or no usable device.
pub fn context() -> Option<HeadlessContext> {
    init_logging();
    let config = ContextConfig {
        application_name: c"vkheadless-tests",
        validation: true,
    };
    match unsafe { HeadlessContext::new(&config) } {
        Ok(context) => Some(context),
        Err(err) => {
            log::warn!("skipping, no vulkan here: {err}");
            eprintln!("skipping, no vulkan here: {err}");
            None
        }
    }
}

/// Compile a WGSL shader with a `main` entry point to SPIR-V words.
pub fn compile_wgsl(source: &str, stage: naga::ShaderStage) -> Result<Vec<u32>> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|err| anyhow::anyhow!("parsing WGSL: {err}"))?;
    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|err| anyhow::anyhow!("validating WGSL: {err}"))?;
    let options = naga::back::spv::Options {
        lang_version: (1, 0),
        // Vulkan's own clip space, no Y flip.
        flags: naga::back::spv::WriterFlags::empty(),
        ..Default::default()
    };
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage,
        entry_point: "main".into(),
    };
    let mut writer = naga::back::spv::Writer::new(&options)
        .map_err(|err| anyhow::anyhow!("creating SPIR-V writer: {err}"))?;
    let mut words = Vec::new();
    writer
        .write(&module, &info, Some(&pipeline_options), &None, &mut words)
        .map_err(|err| anyhow::anyhow!("writing SPIR-V: {err}"))?;
    Ok(words)
}

const VERTEX_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec3<f32>,
};

@vertex
fn main(@location(0) position: vec3<f32>, @location(1) color: vec3<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 1.0);
    out.color = color;
    return out;
}
"#;

const FRAGMENT_SHADER: &str = r#"
@fragment
fn main(@location(0) color: vec3<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(color, 1.0);
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ColoredVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

/// Red, green, and blue corners. Its centroid lands on `(0, 1/3)` in clip
/// space.
pub const TRIANGLE: [ColoredVertex; 3] = [
    ColoredVertex {
        position: [1.0, 1.0, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    ColoredVertex {
        position: [-1.0, 1.0, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    ColoredVertex {
        position: [0.0, -1.0, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];
pub const TRIANGLE_INDICES: [u32; 3] = [0, 1, 2];

/// Dark blue, `(0, 0, 51)` once stored as UNORM.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.2, 1.0];

pub const COLOR_FORMAT: Format = format::R8G8B8A8_UNORM;

/// An indexed mesh drawn with depth testing into a color target that can be
/// captured.
pub struct Scene {
    pub color: ImageResource<(ColorAttachment, TransferSrc)>,
    pub depth: ImageResource<DepthStencilAttachment>,
    pub vertices: Resource<Buffer<(Vertex, TransferDst)>>,
    pub indices: Resource<Buffer<(Index, TransferDst)>>,
    pub index_count: u32,
    pub clear_color: [f32; 4],
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl Scene {
    /// The triangle, at the given size.
    pub fn triangle(context: &mut HeadlessContext, extent: Extent2D) -> Result<Self> {
        Self::new(
            context,
            extent,
            CLEAR_COLOR,
            bytemuck::cast_slice(&TRIANGLE),
            &TRIANGLE_INDICES,
        )
    }
    pub fn new(
        context: &mut HeadlessContext,
        extent: Extent2D,
        clear_color: [f32; 4],
        vertices: &[u8],
        indices: &[u32],
    ) -> Result<Self> {
        let depth_format = context
            .depth_format()
            .context("no depth format can be rendered to")?;
        let (device, queue, pool) = context.split();
        unsafe {
            let vertex_size = NonZero::new(vertices.len() as u64).context("no vertices")?;
            let index_bytes: &[u8] = bytemuck::cast_slice(indices);
            let index_size = NonZero::new(index_bytes.len() as u64).context("no indices")?;

            let vertex_buffer = device.create_buffer(
                (Vertex, TransferDst),
                vertex_size,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                None,
            )?;
            let index_buffer = device.create_buffer(
                (Index, TransferDst),
                index_size,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                None,
            )?;
            device.upload(
                pool,
                queue,
                &vertex_buffer,
                vertices,
                VertexInput::ATTRIBUTE_READ,
            )?;
            device.upload(pool, queue, &index_buffer, index_bytes, VertexInput::INDEX_READ)?;

            let color = device.create_image(
                (ColorAttachment, TransferSrc),
                extent,
                COLOR_FORMAT,
                vk::ImageTiling::OPTIMAL,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;
            let depth = device.create_image(
                DepthStencilAttachment,
                extent,
                depth_format,
                vk::ImageTiling::OPTIMAL,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;

            let render_pass = create_render_pass(device.ash(), depth_format)?;
            let views = [
                color.view().context("color target has no view")?.handle(),
                depth.view().context("depth target has no view")?.handle(),
            ];
            let framebuffer = device.ash().create_framebuffer(
                &vk::FramebufferCreateInfo::default()
                    .render_pass(render_pass)
                    .attachments(&views)
                    .width(extent.width())
                    .height(extent.height())
                    .layers(1),
                None,
            )?;
            let layout = device
                .ash()
                .create_pipeline_layout(&vk::PipelineLayoutCreateInfo::default(), None)?;
            let pipeline = create_pipeline(device.ash(), render_pass, layout)?;

            Ok(Self {
                color,
                depth,
                vertices: vertex_buffer,
                indices: index_buffer,
                index_count: indices.len() as u32,
                clear_color,
                render_pass,
                framebuffer,
                layout,
                pipeline,
            })
        }
    }
    /// Clear and draw everything, and wait for it to finish. The color target
    /// is left as a color attachment.
    pub fn render(&mut self, context: &mut HeadlessContext) -> Result<()> {
        let (device, queue, pool) = context.split();
        let extent = self.color.extent();
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let begin = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: extent.vk(),
            })
            .clear_values(&clear_values);
        unsafe {
            device.one_shot(pool, queue, |device, recording| {
                let mut pass = device.begin_render_pass(recording, &begin);
                device
                    .bind_graphics_pipeline(&mut pass, self.pipeline)
                    .set_viewport_scissor(&mut pass, extent)
                    .bind_vertex_buffers(
                        &mut pass,
                        0,
                        &[self.vertices.handle().reference::<Vertex>()],
                        &[0],
                    )
                    .bind_index_buffer::<u32, _>(
                        &mut pass,
                        self.indices.handle().reference::<Index>(),
                        0,
                    )
                    .draw_indexed(&mut pass, 0, 0..self.index_count, 0..1)
                    .end_render_pass(pass);
                Ok(())
            })?;
            // The render pass moved them into these layouts itself.
            self.color.assume_state(ImageState::ColorAttachment);
            self.depth.assume_state(ImageState::DepthStencilAttachment);
        }
        Ok(())
    }
    pub fn destroy(self, context: &HeadlessContext) {
        let device = context.device();
        unsafe {
            let ash = device.ash();
            ash.destroy_pipeline(self.pipeline, None);
            ash.destroy_pipeline_layout(self.layout, None);
            ash.destroy_framebuffer(self.framebuffer, None);
            ash.destroy_render_pass(self.render_pass, None);
            device
                .destroy_image(self.color)
                .destroy_image(self.depth)
                .destroy_resource(self.vertices)
                .destroy_resource(self.indices);
        }
    }
}

unsafe fn create_render_pass(device: &ash::Device, depth_format: Format) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription::default()
            .format(COLOR_FORMAT.vk())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        vk::AttachmentDescription::default()
            .format(depth_format.vk())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref)];
    // Earlier renders and captures of the same targets must be done first.
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
                | vk::PipelineStageFlags::TRANSFER,
        )
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];
    Ok(device.create_render_pass(
        &vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies),
        None,
    )?)
}

unsafe fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline> {
    let vertex_code = compile_wgsl(VERTEX_SHADER, naga::ShaderStage::Vertex)?;
    let fragment_code = compile_wgsl(FRAGMENT_SHADER, naga::ShaderStage::Fragment)?;
    let vertex_module = device.create_shader_module(
        &vk::ShaderModuleCreateInfo::default().code(&vertex_code),
        None,
    )?;
    let fragment_module = match device.create_shader_module(
        &vk::ShaderModuleCreateInfo::default().code(&fragment_code),
        None,
    ) {
        Ok(module) => module,
        Err(err) => {
            device.destroy_shader_module(vertex_module, None);
            return Err(err.into());
        }
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_module)
            .name(c"main"),
    ];
    let bindings = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<ColoredVertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attributes = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: core::mem::offset_of!(ColoredVertex, position) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: core::mem::offset_of!(ColoredVertex, color) as u32,
        },
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    let viewport = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS);
    let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)];
    let blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&blend)
        .dynamic_state(&dynamic)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);
    let pipelines =
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None);
    // Modules are only needed during creation.
    device.destroy_shader_module(vertex_module, None);
    device.destroy_shader_module(fragment_module, None);
    let pipelines = pipelines.map_err(|(_, err)| err)?;
    pipelines
        .into_iter()
        .next()
        .context("driver returned no pipeline")
}
