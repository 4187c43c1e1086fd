use strata_gfx::{
    AppInfo, BufferInfo, BufferType, DeviceFlags, DeviceInfo, Format, GfxContext, GfxError, HandleKind, QueueFlags,
    RenderPassInfo, SamplerInfo, SubmitInfo, TextureInfo, TextureState, TextureUsage,
    backend::headless::{HeadlessBackend, HeadlessConfig},
};

type Context = GfxContext<HeadlessBackend>;

fn context() -> Context {
    strata_crate_tools::init_log::init_log();
    Context::new(&AppInfo::new("strata-gfx lifecycle test")).unwrap()
}

fn graphics_device(ctx: &mut Context) -> strata_gfx::DeviceHandle {
    ctx.create_device(&DeviceInfo::default()).unwrap()
}

#[test]
fn destroyed_handles_stay_invalid() {
    let mut ctx = context();
    let device = graphics_device(&mut ctx);

    let first = ctx.create_buffer(device, &BufferInfo::new(BufferType::Uniform, 64)).unwrap();
    ctx.destroy_buffer(first).unwrap();
    assert!(ctx.get_buffer(first).is_none());
    assert_eq!(ctx.destroy_buffer(first), Err(GfxError::invalid(HandleKind::Buffer)));

    // 槽位被复用后，旧 handle 仍然无效
    let second = ctx.create_buffer(device, &BufferInfo::new(BufferType::Uniform, 64)).unwrap();
    assert_ne!(first, second);
    assert!(ctx.get_buffer(first).is_none());
    assert!(matches!(ctx.write_buffer(first, 0, &[1]), Err(GfxError::InvalidHandle { .. })));
    assert_eq!(ctx.get_buffer(second).unwrap().size(), 64);
}

#[test]
fn handles_do_not_cross_devices() {
    let mut ctx = context();
    let a = graphics_device(&mut ctx);
    let b = graphics_device(&mut ctx);

    let buffer = ctx.create_buffer(a, &BufferInfo::new(BufferType::Storage, 16)).unwrap();
    let set = ctx
        .create_descriptor_set(
            b,
            &strata_gfx::DescriptorSetInfo::new([strata_gfx::DescriptorBindingInfo::new(
                strata_gfx::DescriptorType::StorageBuffer,
                strata_gfx::ShaderStages::COMPUTE,
            )]),
        )
        .unwrap();
    assert_eq!(buffer.device(), a);
    assert_eq!(set.device(), b);
    assert_eq!(
        ctx.bind_buffer_to_descriptor_set(set, 0, buffer),
        Err(GfxError::invalid(HandleKind::Buffer))
    );

    ctx.destroy_device(a).unwrap();
    assert!(ctx.get_buffer(buffer).is_none());
    assert_eq!(ctx.destroy_buffer(buffer), Err(GfxError::invalid(HandleKind::Device)));
    assert_eq!(ctx.destroy_device(a), Err(GfxError::invalid(HandleKind::Device)));
    assert!(ctx.get_descriptor_set(set).is_some());
}

#[test]
fn zero_sized_buffer_is_rejected() {
    let mut ctx = context();
    let device = graphics_device(&mut ctx);
    assert!(matches!(
        ctx.create_buffer(device, &BufferInfo::new(BufferType::Vertex, 0)),
        Err(GfxError::CreationFailed { .. })
    ));
}

#[test]
fn typed_reads_check_the_element_count() {
    let mut ctx = context();
    let device = graphics_device(&mut ctx);
    let buffer = ctx.create_buffer(device, &BufferInfo::new(BufferType::Storage, 16)).unwrap();
    ctx.write_buffer_pod(buffer, 0, &[1u32, 2, 3, 4]).unwrap();

    let errors = std::sync::Arc::new(std::sync::Mutex::new(0));
    let errors_cb = errors.clone();
    ctx.set_error_callback(move |_| *errors_cb.lock().unwrap() += 1);

    assert_eq!(ctx.read_buffer_pod::<u32>(buffer, 4, 3).unwrap(), vec![2, 3, 4]);
    assert!(matches!(ctx.read_buffer_pod::<()>(buffer, 0, 1), Err(GfxError::ProtocolViolation(_))));
    assert!(matches!(
        ctx.read_buffer_pod::<u64>(buffer, 0, usize::MAX),
        Err(GfxError::ProtocolViolation(_))
    ));
    assert!(matches!(ctx.read_buffer_pod::<u32>(buffer, 8, 3), Err(GfxError::ProtocolViolation(_))));
    assert_eq!(*errors.lock().unwrap(), 3);
}

#[test]
fn mapped_buffer_blocks_helpers() {
    let mut ctx = context();
    let device = graphics_device(&mut ctx);
    let buffer = ctx.create_buffer(device, &BufferInfo::new(BufferType::Upload, 8)).unwrap();

    ctx.map_buffer(buffer).unwrap().copy_from_slice(&[7; 8]);
    assert!(ctx.get_buffer(buffer).unwrap().is_mapped());
    assert!(matches!(ctx.map_buffer(buffer), Err(GfxError::ProtocolViolation(_))));
    assert!(matches!(ctx.read_buffer(buffer, 0, 8), Err(GfxError::ProtocolViolation(_))));
    ctx.unmap_buffer(buffer).unwrap();

    assert_eq!(ctx.read_buffer(buffer, 0, 8).unwrap(), vec![7; 8]);
    assert!(matches!(ctx.unmap_buffer(buffer), Err(GfxError::ProtocolViolation(_))));
    assert!(matches!(ctx.write_buffer(buffer, 4, &[0; 8]), Err(GfxError::ProtocolViolation(_))));
}

#[test]
fn upload_then_sample_texture() {
    let mut ctx = context();
    let device = graphics_device(&mut ctx);
    let info = TextureInfo::new_2d(TextureUsage::Sampled, Format::Rgba8, 2, 2);
    let texture = ctx.create_texture(device, &info).unwrap();
    let sampler = ctx.create_sampler(device, &SamplerInfo::default()).unwrap();
    let upload = ctx.create_buffer(device, &BufferInfo::new(BufferType::Upload, 16)).unwrap();
    let pixels = (0..16u8).collect::<Vec<_>>();
    ctx.write_buffer(upload, 0, &pixels).unwrap();

    let cmd = ctx.create_command_list(device, 0).unwrap();
    ctx.begin_command_list(cmd).unwrap();
    // 必须先转换到 UploadDestination
    assert!(matches!(
        ctx.copy_buffer_to_texture(cmd, upload, texture),
        Err(GfxError::ProtocolViolation(_))
    ));
    ctx.transition_texture(cmd, texture, TextureState::Undefined, TextureState::UploadDestination)
        .unwrap();
    ctx.copy_buffer_to_texture(cmd, upload, texture).unwrap();
    ctx.transition_texture(cmd, texture, TextureState::UploadDestination, TextureState::ShaderRead)
        .unwrap();
    ctx.end_command_list(cmd).unwrap();
    let fence = ctx.submit_command_list(&SubmitInfo::new(cmd), true, false).unwrap().fence.unwrap();
    ctx.wait_on_fence(fence).unwrap();

    assert_eq!(ctx.get_texture(texture).unwrap().state(), TextureState::ShaderRead);
    assert_eq!(ctx.get_texture(texture).unwrap().native().contents(), pixels);
    let stats = ctx.device_mut(device).unwrap().backend().stats();
    assert_eq!(stats.copies, 1);
    assert_eq!(stats.barriers, 2);

    let set = ctx
        .create_descriptor_set(
            device,
            &strata_gfx::DescriptorSetInfo::new([strata_gfx::DescriptorBindingInfo::new(
                strata_gfx::DescriptorType::Texture,
                strata_gfx::ShaderStages::FRAGMENT,
            )]),
        )
        .unwrap();
    ctx.bind_texture_to_descriptor_set(set, 0, texture, sampler).unwrap();
    assert!(matches!(
        ctx.bind_buffer_to_descriptor_set(set, 0, upload),
        Err(GfxError::ProtocolViolation(_))
    ));
}

#[test]
fn render_pass_checks_attachments() {
    let mut ctx = context();
    let device = graphics_device(&mut ctx);
    let color = ctx
        .create_texture(device, &TextureInfo::new_2d(TextureUsage::ColorAttachment, Format::Rgba8, 4, 4))
        .unwrap();
    let small_depth = ctx
        .create_texture(device, &TextureInfo::new_2d(TextureUsage::DepthStencilAttachment, Format::Depth32, 2, 2))
        .unwrap();

    let cmd = ctx.create_command_list(device, 0).unwrap();
    ctx.begin_command_list(cmd).unwrap();
    let pass = RenderPassInfo {
        color_attachments: vec![color],
        ..Default::default()
    };
    // 还没有转换到 RenderTarget
    assert!(matches!(ctx.begin_render_pass(cmd, &pass), Err(GfxError::ProtocolViolation(_))));

    ctx.transition_texture(cmd, color, TextureState::Undefined, TextureState::RenderTarget).unwrap();
    ctx.transition_texture(cmd, small_depth, TextureState::Undefined, TextureState::RenderTarget)
        .unwrap();
    let mismatched = RenderPassInfo {
        color_attachments: vec![color],
        depth_attachment: Some(small_depth),
        ..Default::default()
    };
    assert!(matches!(ctx.begin_render_pass(cmd, &mismatched), Err(GfxError::ProtocolViolation(_))));

    ctx.begin_render_pass(cmd, &pass).unwrap();
    assert!(matches!(ctx.begin_render_pass(cmd, &pass), Err(GfxError::ProtocolViolation(_))));
    assert!(matches!(ctx.end_command_list(cmd), Err(GfxError::ProtocolViolation(_))));
    assert!(matches!(
        ctx.transition_texture(cmd, color, TextureState::RenderTarget, TextureState::ShaderRead),
        Err(GfxError::ProtocolViolation(_))
    ));
    ctx.end_render_pass(cmd).unwrap();
    assert!(matches!(ctx.end_render_pass(cmd), Err(GfxError::ProtocolViolation(_))));
    ctx.end_command_list(cmd).unwrap();
}

#[test]
fn destroyed_objects_wait_for_their_submission() {
    let mut ctx = context();
    let device = graphics_device(&mut ctx);
    let buffer = ctx.create_buffer(device, &BufferInfo::new(BufferType::Storage, 16)).unwrap();

    let cmd = ctx.create_command_list(device, 0).unwrap();
    ctx.begin_command_list(cmd).unwrap();
    ctx.end_command_list(cmd).unwrap();
    let fence = ctx.submit_command_list(&SubmitInfo::new(cmd), true, false).unwrap().fence.unwrap();

    ctx.destroy_buffer(buffer).unwrap();
    ctx.destroy_command_list(cmd).unwrap();
    assert!(ctx.get_buffer(buffer).is_none());

    // headless 的提交在 submit 时就已经完成，延迟对象在下一次回收时释放
    ctx.wait_on_fence(fence).unwrap();
    let dev = ctx.device_mut(device).unwrap();
    assert_eq!(dev.tracker().pending_destroy_count(), 0);
    assert_eq!(dev.backend().stats().buffers, 0);
    assert_eq!(dev.backend().stats().command_buffers, 0);
}

#[test]
fn queue_requests_share_a_family() {
    let mut ctx = context();
    let device = ctx
        .create_device(&DeviceInfo {
            queues: vec![QueueFlags::GRAPHICS, QueueFlags::TRANSFER],
            ..Default::default()
        })
        .unwrap();
    let queues = ctx.device(device).unwrap().queues().to_vec();
    // 两个请求都落在第一个 family 上
    assert_eq!(queues[0].family, 0);
    assert_eq!(queues[1].family, 0);
    assert_eq!(queues[1].index, 1);

    assert!(matches!(ctx.create_command_list(device, 2), Err(GfxError::ProtocolViolation(_))));
}

#[test]
fn adapter_selection_honours_queue_requests() {
    strata_crate_tools::init_log::init_log();
    let mut config = HeadlessConfig::default();
    let mut transfer_only = config.adapters[0].clone();
    transfer_only.name = "transfer only".to_string();
    transfer_only.kind = strata_gfx::AdapterKind::Discrete;
    transfer_only.queue_families.retain(|family| family.flags == QueueFlags::TRANSFER);
    config.adapters.insert(0, transfer_only);

    let mut ctx = Context::with_config(&AppInfo::new("adapter test"), config).unwrap();
    assert_eq!(ctx.adapters().len(), 2);

    // 偏好 discrete，但它没有 graphics queue
    let device = ctx
        .create_device(&DeviceInfo {
            flags: DeviceFlags::PREFER_DISCRETE,
            queues: vec![QueueFlags::GRAPHICS],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(ctx.device(device).unwrap().adapter().name, "Strata Headless Adapter");

    let transfer = ctx
        .create_device(&DeviceInfo {
            flags: DeviceFlags::PREFER_DISCRETE,
            queues: vec![QueueFlags::TRANSFER],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(ctx.device(transfer).unwrap().adapter().name, "transfer only");

    assert!(matches!(
        ctx.create_device(&DeviceInfo {
            queues: vec![],
            ..Default::default()
        }),
        Err(GfxError::ProtocolViolation(_))
    ));
}

#[test]
fn dropping_the_context_releases_everything() {
    let mut ctx = context();
    let device = graphics_device(&mut ctx);
    ctx.create_buffer(device, &BufferInfo::new(BufferType::Storage, 16)).unwrap();
    ctx.create_texture(device, &TextureInfo::new_2d(TextureUsage::Sampled, Format::Rgba8, 8, 8))
        .unwrap();
    ctx.create_command_list(device, 0).unwrap();

    let stats = ctx.device_mut(device).unwrap().backend().stats();
    assert_eq!((stats.buffers, stats.textures, stats.command_buffers), (1, 1, 1));
    drop(ctx);
}
