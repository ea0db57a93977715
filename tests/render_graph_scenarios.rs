//! End-to-end render-graph scenarios over the recording test device.

mod common;

use std::sync::Arc;

use cgmath::Vector2;

use common::{TestDevice, TestImage};
use veil::render_graph::{
    RGGraphicsPipelineDescription, RGImageDescription, RGMemberValue, RGPassMember, RGPassParameters,
    RGRayTracingPipelineDescription, RenderGraph, RenderGraphBuilder,
};
use veil::rhi::descriptors::PushConstantRange;
use veil::rhi::rhi_enums::*;
use veil::rhi::rhi_structs::*;
use veil::rhi::rhi_traits::{ImageResource, RenderDevice};
use veil::shader::{ShaderBindingInfo, ShaderRegistry, ShaderSignature};

fn fragment_bindings(names: &[&str]) -> Vec<ShaderBindingInfo> {
    names
        .iter()
        .enumerate()
        .map(|(index, name)| ShaderBindingInfo {
            name: (*name).to_owned(),
            set: 0,
            binding: index as u32,
            kind: ShaderResourceKind::TextureSrv,
            count: 1,
            stages: ShaderStageFlags::FRAGMENT,
        })
        .collect()
}

fn graphics_shaders(registry: &ShaderRegistry, sampled: &[&str]) -> (ShaderFunction, ShaderFunction) {
    let vertex = registry.register_signature(ShaderSignature {
        stage: ShaderStageFlags::VERTEX,
        ..ShaderSignature::default()
    });
    let fragment = registry.register_signature(ShaderSignature {
        stage: ShaderStageFlags::FRAGMENT,
        bindings: fragment_bindings(sampled),
        ..ShaderSignature::default()
    });

    (
        ShaderFunction::new(vertex, "vsMain"),
        ShaderFunction::new(fragment, "fsMain"),
    )
}

fn default_pipeline(vertex: ShaderFunction, fragment: ShaderFunction) -> RGGraphicsPipelineDescription {
    RGGraphicsPipelineDescription {
        vertex,
        fragment,
        rasterization: RasterizationState::default(),
        depth_stencil: DepthStencilState::default(),
        color_blend: ColorBlendState::default(),
    }
}

fn external_color_target(width: u32, height: u32) -> Arc<dyn ImageResource> {
    Arc::new(TestImage::new(ImageDescription {
        name: "backbuffer".to_owned(),
        image_type: ImageType::Image2D,
        format: ImageFormat::R8G8B8A8_UNORM,
        width,
        height,
        depth: 1,
        num_mips: 1,
        num_layers: 1,
        usage: ImageUsage::ATTACHMENT | ImageUsage::SAMPLED,
        virtual_resource: false,
    }))
}

/// Scenario 1: one raster pass clearing and drawing into an external
/// attachment.
#[test]
fn single_fullscreen_pass() {
    let registry = Arc::new(ShaderRegistry::new());
    let device = TestDevice::new(registry.clone());

    let (vertex, fragment) = graphics_shaders(&registry, &[]);

    let mut builder = RenderGraphBuilder::new();
    let target = builder.register_external_texture(external_color_target(1920, 1080), ResourceState::Undefined);
    let target_view = builder.create_image_view(target, None);
    let framebuffer = builder.create_framebuffer(Vector2::new(1920, 1080), vec![target_view], None);

    builder.add_raster_pass(
        "fullscreen",
        default_pipeline(vertex, fragment),
        framebuffer,
        RGPassParameters::default(),
        |command, _resources| {
            command.draw(3);
        },
    );

    let graph = RenderGraph::build(device.clone() as Arc<dyn RenderDevice>, builder).unwrap();
    let mut recorder = device.create_command_recorder(QueueType::Graphics);
    graph.execute(recorder.as_mut(), &SubmitInfo::default()).unwrap();

    assert_eq!(device.lines_matching("begin_render_pass").len(), 1);
    assert_eq!(device.lines_matching("end_render_pass").len(), 1);
    assert_eq!(device.lines_matching("draw vertices=3").len(), 1);

    // Cleared to opaque black, external target handed onward for sampling.
    let attachment = &device.lines_matching("attachment-color")[0];
    assert!(attachment.contains("load=Clear"));
    assert!(attachment.contains("store=Store"));
    assert!(attachment.contains("initial=Undefined"));
    assert!(attachment.contains("final=ShaderReadOnly"));
    assert!(attachment.contains("clear=(0,0,0,1)"));

    // No explicit barriers: the render pass carries the transitions.
    assert!(device.lines_matching("transition image=").is_empty());
}

/// Scenario 2: four-target G-buffer plus depth, then a lighting pass
/// sampling all five.
#[test]
fn gbuffer_then_lighting() {
    let registry = Arc::new(ShaderRegistry::new());
    let device = TestDevice::new(registry.clone());

    let (gbuffer_vertex, gbuffer_fragment) = graphics_shaders(&registry, &[]);
    let (lighting_vertex, lighting_fragment) = graphics_shaders(
        &registry,
        &["uAlbedo", "uNormal", "uMaterial", "uEmissive", "uDepth"],
    );

    let mut builder = RenderGraphBuilder::new();

    let mut gbuffer_views = Vec::new();
    let mut gbuffer_images = Vec::new();
    for name in ["albedo", "normal", "material", "emissive"].iter() {
        let image = builder.create_texture(RGImageDescription::new_2d(*name, 1280, 720, ImageFormat::R16G16B16A16F));
        gbuffer_images.push(image);
        gbuffer_views.push(builder.create_image_view(image, None));
    }
    let depth = builder.create_texture(RGImageDescription::new_2d("depth", 1280, 720, ImageFormat::D32F));
    let depth_target = builder.create_image_view(depth, None);

    let gbuffer_framebuffer = builder.create_framebuffer(
        Vector2::new(1280, 720),
        gbuffer_views.clone(),
        Some(depth_target),
    );

    builder.add_raster_pass(
        "gbuffer",
        default_pipeline(gbuffer_vertex, gbuffer_fragment),
        gbuffer_framebuffer,
        RGPassParameters::default(),
        |command, _resources| {
            veil::scoped_gpu_label!(command, "geometry", {
                command.draw(36);
            });
        },
    );

    let target = builder.register_external_texture(external_color_target(1280, 720), ResourceState::Undefined);
    let target_view = builder.create_image_view(target, None);
    let lighting_framebuffer = builder.create_framebuffer(Vector2::new(1280, 720), vec![target_view], None);

    let members = vec![
        RGPassMember::new("uAlbedo", RGMemberValue::SampledImage(builder.create_image_view(gbuffer_images[0], None))),
        RGPassMember::new("uNormal", RGMemberValue::SampledImage(builder.create_image_view(gbuffer_images[1], None))),
        RGPassMember::new(
            "uMaterial",
            RGMemberValue::SampledImage(builder.create_image_view(gbuffer_images[2], None)),
        ),
        RGPassMember::new(
            "uEmissive",
            RGMemberValue::SampledImage(builder.create_image_view(gbuffer_images[3], None)),
        ),
        RGPassMember::new("uDepth", RGMemberValue::SampledImage(builder.create_image_view(depth, None))),
    ];

    builder.add_raster_pass(
        "lighting",
        default_pipeline(lighting_vertex, lighting_fragment),
        lighting_framebuffer,
        RGPassParameters {
            members,
            ..RGPassParameters::default()
        },
        |command, _resources| command.draw(3),
    );

    let graph = RenderGraph::build(device.clone() as Arc<dyn RenderDevice>, builder).unwrap();
    let mut recorder = device.create_command_recorder(QueueType::Graphics);
    graph.execute(recorder.as_mut(), &SubmitInfo::default()).unwrap();

    // Every G-buffer attachment leaves its pass already ShaderReadOnly;
    // the lighting pass adds no barriers of its own.
    let gbuffer_attachments: Vec<String> = device
        .lines_matching("attachment-")
        .into_iter()
        .filter(|line| !line.contains("backbuffer"))
        .collect();
    assert_eq!(gbuffer_attachments.len(), 5);
    for line in &gbuffer_attachments {
        assert!(line.contains("final=ShaderReadOnly"), "{}", line);
        assert!(line.contains("store=Store"), "{}", line);
    }

    assert!(device.lines_matching("transition image=").is_empty());

    // One transient descriptor set for the lighting pass's five reads.
    assert_eq!(device.lines_matching("allocate_transient_set").len(), 1);

    // The scoped label wrapped the geometry recording.
    let lines = device.log_lines();
    let label_at = lines.iter().position(|line| line == "marker-begin geometry").unwrap();
    assert_eq!(lines[label_at + 1], "draw vertices=36");
    assert_eq!(lines[label_at + 2], "marker-end");
}

/// Scenario 3: compute writes an image, raster samples it; exactly one
/// explicit barrier separates them.
#[test]
fn compute_then_raster_barrier() {
    let registry = Arc::new(ShaderRegistry::new());
    let device = TestDevice::new(registry.clone());

    let compute_shader = registry.register_signature(ShaderSignature {
        stage: ShaderStageFlags::COMPUTE,
        bindings: vec![ShaderBindingInfo {
            name: "uOutput".to_owned(),
            set: 0,
            binding: 0,
            kind: ShaderResourceKind::TextureUav,
            count: 1,
            stages: ShaderStageFlags::COMPUTE,
        }],
        ..ShaderSignature::default()
    });
    let (vertex, fragment) = graphics_shaders(&registry, &["uInput"]);

    let mut builder = RenderGraphBuilder::new();
    let image = builder.create_texture(RGImageDescription::new_2d("scratch", 512, 512, ImageFormat::R16G16B16A16F));
    let storage_view = builder.create_image_view(image, None);
    let sampled_view = builder.create_image_view(image, None);

    builder.add_compute_pass(
        "generate",
        ShaderFunction::new(compute_shader, "csMain"),
        RGPassParameters {
            members: vec![RGPassMember::new("uOutput", RGMemberValue::StorageImage(storage_view))],
            ..RGPassParameters::default()
        },
        |command, _resources| command.dispatch(64, 64, 1),
    );

    let target = builder.register_external_texture(external_color_target(512, 512), ResourceState::Undefined);
    let target_view = builder.create_image_view(target, None);
    let framebuffer = builder.create_framebuffer(Vector2::new(512, 512), vec![target_view], None);

    builder.add_raster_pass(
        "resolve",
        default_pipeline(vertex, fragment),
        framebuffer,
        RGPassParameters {
            members: vec![RGPassMember::new("uInput", RGMemberValue::SampledImage(sampled_view))],
            ..RGPassParameters::default()
        },
        |command, _resources| command.draw(3),
    );

    let graph = RenderGraph::build(device.clone() as Arc<dyn RenderDevice>, builder).unwrap();
    let mut recorder = device.create_command_recorder(QueueType::Graphics);
    graph.execute(recorder.as_mut(), &SubmitInfo::default()).unwrap();

    let transitions = device.lines_matching("transition image=scratch");
    assert_eq!(transitions.len(), 2, "{:?}", transitions);
    assert!(transitions[0].contains("Undefined->General"));

    // The compute-to-sample barrier carries the unordered-access masks.
    assert!(transitions[1].contains("General->ShaderReadOnly"));
    assert!(transitions[1].contains("src_stage=ALL_COMMANDS"));
    assert!(transitions[1].contains("dst_stage=FRAGMENT_SHADER | COMPUTE_SHADER"));
    assert!(transitions[1].contains("src_access=SHADER_READ | SHADER_WRITE"));
    assert!(transitions[1].contains("dst_access=SHADER_READ"));

    // Ordering: dispatch, barrier, then the render pass.
    let lines = device.log_lines();
    let dispatch_at = lines.iter().position(|line| line.starts_with("dispatch")).unwrap();
    let barrier_at = lines
        .iter()
        .position(|line| line.contains("General->ShaderReadOnly"))
        .unwrap();
    let render_pass_at = lines
        .iter()
        .position(|line| line.starts_with("begin_render_pass"))
        .unwrap();
    assert!(dispatch_at < barrier_at && barrier_at < render_pass_at);
}

/// Scenario 4: an immediate TLAS update feeding a ray-tracing pass, with
/// no compiler-inserted barriers between them.
#[test]
fn immediate_tlas_update_then_trace() {
    let registry = Arc::new(ShaderRegistry::new());
    let device = TestDevice::new(registry.clone());

    let raygen = registry.register_signature(ShaderSignature {
        stage: ShaderStageFlags::RAYGEN,
        bindings: vec![ShaderBindingInfo {
            name: "uScene".to_owned(),
            set: 0,
            binding: 0,
            kind: ShaderResourceKind::AccelerationStructure,
            count: 1,
            stages: ShaderStageFlags::RAYGEN,
        }],
        push_constant: Some(PushConstantRange {
            stages: ShaderStageFlags::RAYGEN,
            size: 16,
        }),
        ..ShaderSignature::default()
    });
    let miss = registry.register_signature(ShaderSignature {
        stage: ShaderStageFlags::MISS,
        ..ShaderSignature::default()
    });

    let tlas = device
        .create_acceleration_structure(AccelerationStructureDescription {
            name: "scene".to_owned(),
            as_type: AccelerationStructureType::TopLevel,
            geometry: AccelerationStructureGeometry::Instances {
                max_instances: 16,
                allow_updates: true,
            },
        })
        .unwrap();
    let scratch = device
        .create_buffer(BufferDescription {
            name: "scratch".to_owned(),
            size: 1024,
            stride: 0,
            usage: BufferUsage::UNORDERED_ACCESS,
            virtual_resource: false,
        })
        .unwrap();

    let mut builder = RenderGraphBuilder::new();
    let tlas_ref = builder.register_external_acceleration_structure(tlas.clone());
    let scratch_ref = builder.register_external_buffer(scratch);

    builder.add_immediate_pass(
        "update-tlas",
        RGPassParameters {
            written_acceleration_structures: vec![tlas_ref],
            ..RGPassParameters::default()
        },
        move |command, resources| {
            let tlas = resources.acceleration_structure(tlas_ref);
            let scratch = resources.buffer(scratch_ref);
            command.build_top_level(&tlas, &[], &scratch, AccelerationStructureBuildMode::Update);
        },
    );

    builder.add_ray_tracing_pass(
        "trace",
        RGRayTracingPipelineDescription {
            raygen: ShaderFunction::new(raygen, "rgMain"),
            miss: vec![ShaderFunction::new(miss, "missMain")],
            closest_hit: Vec::new(),
            max_recursion_depth: 1,
        },
        RGPassParameters {
            members: vec![RGPassMember::new("uScene", RGMemberValue::AccelerationStructure(tlas_ref))],
            ..RGPassParameters::default()
        },
        |command, _resources| command.trace_rays(1920, 1080, 1),
    );

    let graph = RenderGraph::build(device.clone() as Arc<dyn RenderDevice>, builder).unwrap();
    let mut recorder = device.create_command_recorder(QueueType::Graphics);
    graph.execute(recorder.as_mut(), &SubmitInfo::default()).unwrap();

    assert_eq!(device.lines_matching("build_top_level").len(), 1);
    assert!(device.lines_matching("build_top_level")[0].contains("mode=Update"));
    assert_eq!(device.lines_matching("trace_rays 1920x1080x1").len(), 1);

    // Immediate suppresses any barrier between the build and the trace,
    // and external structures are never staged into aliased memory.
    assert!(device.lines_matching("transition image=").is_empty());
    assert!(device.lines_matching("stage_").is_empty());
}

/// Scenario 5: cascade passes into layer views of one depth image. One
/// image backs every pass, the first pass clears, the later ones load,
/// and passes with identical attachment layouts share a cached render
/// pass.
#[test]
fn shadow_cascades_share_image() {
    let registry = Arc::new(ShaderRegistry::new());
    let device = TestDevice::new(registry.clone());

    let mut builder = RenderGraphBuilder::new();

    let cascade_count = 4u32;
    let cascades = builder.create_texture(RGImageDescription {
        name: "cascades".to_owned(),
        image_type: ImageType::Image2D,
        format: ImageFormat::D32F,
        width: 2048,
        height: 2048,
        num_mips: 1,
        num_layers: cascade_count,
    });

    for layer in 0..cascade_count {
        let (vertex, fragment) = graphics_shaders(&registry, &[]);
        let view = builder.create_image_view(cascades, Some(ImageViewRange::single(0, layer)));
        let framebuffer = builder.create_framebuffer(Vector2::new(2048, 2048), Vec::new(), Some(view));

        builder.add_raster_pass(
            format!("cascade-{}", layer),
            default_pipeline(vertex, fragment),
            framebuffer,
            RGPassParameters::default(),
            |command, _resources| command.draw(128),
        );
    }

    let graph = RenderGraph::build(device.clone() as Arc<dyn RenderDevice>, builder).unwrap();
    let mut recorder = device.create_command_recorder(QueueType::Graphics);
    graph.execute(recorder.as_mut(), &SubmitInfo::default()).unwrap();

    // One image creation backing every pass.
    assert_eq!(device.lines_matching("create_image name=cascades").len(), 1);
    assert_eq!(device.lines_matching("begin_render_pass").len(), cascade_count as usize);

    let attachments = device.lines_matching("attachment-depth");
    assert_eq!(attachments.len(), cascade_count as usize);
    assert!(attachments[0].contains("load=Clear"));
    assert!(attachments[0].contains("initial=Undefined"));
    for line in &attachments[1..] {
        assert!(line.contains("load=Load"), "{}", line);
        assert!(line.contains("initial=DepthStencilAttachment"), "{}", line);
        assert!(line.contains("final=DepthStencilAttachment"), "{}", line);
    }

    // Four framebuffers, three distinct attachment layouts: the clearing
    // first pass, the middle load/store passes (which share one cached
    // render pass), and the final pass that drops its store.
    assert_eq!(device.lines_matching("create_framebuffer").len(), cascade_count as usize);
    assert_eq!(device.render_pass_count(), 3);
}

/// Scenario 6: transient descriptor sets drain to zero between frames.
#[test]
fn frame_in_flight_isolation() {
    let registry = Arc::new(ShaderRegistry::new());
    let device = TestDevice::new(registry.clone());

    let (vertex, fragment) = graphics_shaders(&registry, &["uInput"]);
    let compute_shader = registry.register_signature(ShaderSignature {
        stage: ShaderStageFlags::COMPUTE,
        bindings: vec![ShaderBindingInfo {
            name: "uOutput".to_owned(),
            set: 0,
            binding: 0,
            kind: ShaderResourceKind::TextureUav,
            count: 1,
            stages: ShaderStageFlags::COMPUTE,
        }],
        ..ShaderSignature::default()
    });

    let mut builder = RenderGraphBuilder::new();
    let image = builder.create_texture(RGImageDescription::new_2d("scratch", 64, 64, ImageFormat::R32G32B32A32F));
    let storage_view = builder.create_image_view(image, None);
    let sampled_view = builder.create_image_view(image, None);

    builder.add_compute_pass(
        "generate",
        ShaderFunction::new(compute_shader, "csMain"),
        RGPassParameters {
            members: vec![RGPassMember::new("uOutput", RGMemberValue::StorageImage(storage_view))],
            ..RGPassParameters::default()
        },
        |command, _resources| command.dispatch(8, 8, 1),
    );

    let target = builder.register_external_texture(external_color_target(64, 64), ResourceState::Undefined);
    let target_view = builder.create_image_view(target, None);
    let framebuffer = builder.create_framebuffer(Vector2::new(64, 64), vec![target_view], None);
    builder.add_raster_pass(
        "resolve",
        default_pipeline(vertex, fragment),
        framebuffer,
        RGPassParameters {
            members: vec![RGPassMember::new("uInput", RGMemberValue::SampledImage(sampled_view))],
            ..RGPassParameters::default()
        },
        |command, _resources| command.draw(3),
    );

    let graph = RenderGraph::build(device.clone() as Arc<dyn RenderDevice>, builder).unwrap();
    let fence = device.create_fence(false).unwrap();

    let submit_info = SubmitInfo {
        signal_fence: Some(fence.clone()),
        ..SubmitInfo::default()
    };

    let mut recorder = device.create_command_recorder(QueueType::Graphics);
    graph.execute(recorder.as_mut(), &submit_info).unwrap();
    assert!(device.transient_descriptor_allocation_count() > 0);

    // The caller contract between frames: wait the fence, then reset.
    fence.wait_for();
    device.reset_transient_descriptors();
    assert_eq!(device.transient_descriptor_allocation_count(), 0);

    graph.execute(recorder.as_mut(), &submit_info).unwrap();
    assert!(device.transient_descriptor_allocation_count() > 0);
}

/// Two transient images with disjoint lifetimes share one backing
/// allocation; overlapping lifetimes get disjoint placements.
#[test]
fn transient_aliasing_placement() {
    let registry = Arc::new(ShaderRegistry::new());
    let device = TestDevice::new(registry.clone());

    let compute = |registry: &ShaderRegistry| {
        registry.register_signature(ShaderSignature {
            stage: ShaderStageFlags::COMPUTE,
            bindings: vec![ShaderBindingInfo {
                name: "uOutput".to_owned(),
                set: 0,
                binding: 0,
                kind: ShaderResourceKind::TextureUav,
                count: 1,
                stages: ShaderStageFlags::COMPUTE,
            }],
            ..ShaderSignature::default()
        })
    };

    let mut builder = RenderGraphBuilder::new();

    let early = builder.create_texture(RGImageDescription::new_2d("early", 256, 256, ImageFormat::R32F));
    let early_view = builder.create_image_view(early, None);
    let late = builder.create_texture(RGImageDescription::new_2d("late", 256, 256, ImageFormat::R32F));
    let late_view = builder.create_image_view(late, None);

    let early_shader = compute(&registry);
    builder.add_compute_pass(
        "p0",
        ShaderFunction::new(early_shader, "csMain"),
        RGPassParameters {
            members: vec![RGPassMember::new("uOutput", RGMemberValue::StorageImage(early_view))],
            ..RGPassParameters::default()
        },
        |command, _resources| command.dispatch(1, 1, 1),
    );

    // Two empty spacer passes keep the padded lifetimes disjoint.
    for name in ["spacer-a", "spacer-b"].iter() {
        builder.add_pass(*name, RGPassParameters::default(), veil::render_graph::RGPassHint::Compute, |_c, _r| {});
    }

    let late_shader = compute(&registry);
    builder.add_compute_pass(
        "p3",
        ShaderFunction::new(late_shader, "csMain"),
        RGPassParameters {
            members: vec![RGPassMember::new("uOutput", RGMemberValue::StorageImage(late_view))],
            ..RGPassParameters::default()
        },
        |command, _resources| command.dispatch(1, 1, 1),
    );

    let _graph = RenderGraph::build(device.clone() as Arc<dyn RenderDevice>, builder).unwrap();

    // Disjoint timelines: both images land at offset 0 of one block.
    let stage_lines = device.lines_matching("stage_image");
    assert_eq!(stage_lines.len(), 2, "{:?}", stage_lines);
    assert!(stage_lines.iter().all(|line| line.contains("offset=0")), "{:?}", stage_lines);

    // The shared block is exactly one image large.
    let image_size = 256u64 * 256 * 4;
    let allocate_line = &device.lines_matching("aliased_allocate")[0];
    assert!(allocate_line.contains(&format!("size={}", image_size)), "{}", allocate_line);

    // Overlapping timelines never share placement.
    let device = TestDevice::new(registry.clone());
    let mut builder = RenderGraphBuilder::new();

    let first = builder.create_texture(RGImageDescription::new_2d("first", 256, 256, ImageFormat::R32F));
    let first_view = builder.create_image_view(first, None);
    let second = builder.create_texture(RGImageDescription::new_2d("second", 256, 256, ImageFormat::R32F));
    let second_view = builder.create_image_view(second, None);

    let both_shader = registry.register_signature(ShaderSignature {
        stage: ShaderStageFlags::COMPUTE,
        bindings: vec![
            ShaderBindingInfo {
                name: "uOutput".to_owned(),
                set: 0,
                binding: 0,
                kind: ShaderResourceKind::TextureUav,
                count: 1,
                stages: ShaderStageFlags::COMPUTE,
            },
            ShaderBindingInfo {
                name: "uOther".to_owned(),
                set: 0,
                binding: 1,
                kind: ShaderResourceKind::TextureUav,
                count: 1,
                stages: ShaderStageFlags::COMPUTE,
            },
        ],
        ..ShaderSignature::default()
    });

    builder.add_compute_pass(
        "both",
        ShaderFunction::new(both_shader, "csMain"),
        RGPassParameters {
            members: vec![
                RGPassMember::new("uOutput", RGMemberValue::StorageImage(first_view)),
                RGPassMember::new("uOther", RGMemberValue::StorageImage(second_view)),
            ],
            ..RGPassParameters::default()
        },
        |command, _resources| command.dispatch(1, 1, 1),
    );

    let _graph = RenderGraph::build(device.clone() as Arc<dyn RenderDevice>, builder).unwrap();

    let stage_lines = device.lines_matching("stage_image");
    assert_eq!(stage_lines.len(), 2);
    let offsets: Vec<&str> = stage_lines
        .iter()
        .map(|line| line.split("offset=").nth(1).unwrap())
        .collect();
    assert_ne!(offsets[0], offsets[1], "{:?}", stage_lines);
}

/// View identity: one image hands out the same view for the same range
/// and distinct views for distinct ranges.
#[test]
fn image_view_identity() {
    let image = TestImage::new(ImageDescription {
        name: "probe".to_owned(),
        usage: ImageUsage::SAMPLED,
        num_mips: 4,
        ..ImageDescription::default()
    });

    let full = ImageViewDescription {
        kind: ViewKind::Srv,
        range: ImageViewRange::whole(4, 1),
        format_override: None,
    };
    let single = ImageViewDescription {
        kind: ViewKind::Srv,
        range: ImageViewRange::single(2, 0),
        format_override: None,
    };

    assert_eq!(image.view(full), image.view(full));
    assert_eq!(image.view(single), image.view(single));
    assert_ne!(image.view(full), image.view(single));
}
