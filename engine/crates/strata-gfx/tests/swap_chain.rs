use strata_gfx::{
    AppInfo, DeviceHandle, DeviceInfo, Format, GfxContext, GfxError, HandleKind, PresentMode, QueueFlags,
    SubmitInfo, SurfaceCapabilities, SwapChainInfo, TextureKind, TextureState,
    backend::headless::{HeadlessBackend, HeadlessSurface},
};

type Context = GfxContext<HeadlessBackend>;

fn present_context() -> (Context, DeviceHandle) {
    strata_crate_tools::init_log::init_log();
    let mut ctx = Context::new(&AppInfo::new("strata-gfx swap chain test")).unwrap();
    let device = ctx
        .create_device(&DeviceInfo {
            queues: vec![QueueFlags::GRAPHICS],
            ..Default::default()
        })
        .unwrap();
    (ctx, device)
}

fn window(capabilities: SurfaceCapabilities, width: u32, height: u32) -> SwapChainInfo<HeadlessSurface> {
    SwapChainInfo {
        surface: HeadlessSurface {
            capabilities,
            ..Default::default()
        },
        width,
        height,
        vsync: true,
        present_queue: 0,
    }
}

fn bounded_surface() -> SurfaceCapabilities {
    SurfaceCapabilities {
        min_image_count: 2,
        max_image_count: 3,
        min_extent: (64, 64),
        max_extent: (1920, 1080),
        formats: vec![Format::Bgra8Unorm, Format::Bgra8Srgb],
        present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
        present_supported: true,
    }
}

#[test]
fn creation_clamps_and_negotiates() {
    let (mut ctx, device) = present_context();
    let swap_chain = ctx.create_swap_chain(device, &window(bounded_surface(), 4000, 10)).unwrap();

    let entry = ctx.get_swap_chain(swap_chain).unwrap();
    assert_eq!(entry.extent(), (1920, 64));
    assert_eq!(entry.format(), Format::Bgra8Srgb);
    assert_eq!(entry.present_mode(), PresentMode::Mailbox);
    assert_eq!(entry.images().len(), 3);
    assert_eq!(entry.current_image_index(), 0);

    let image = ctx.get_swap_chain_image(swap_chain).unwrap();
    let texture = ctx.get_texture(image).unwrap();
    assert_eq!(texture.kind(), TextureKind::SwapChainImage { swap_chain });
    assert_eq!((texture.info().width, texture.info().height), (1920, 64));

    // 交换链的 image 不能单独销毁
    assert!(matches!(ctx.destroy_texture(image), Err(GfxError::ProtocolViolation(_))));
}

#[test]
fn no_presentable_format_fails() {
    let (mut ctx, device) = present_context();
    let capabilities = SurfaceCapabilities {
        formats: vec![Format::Rgba8],
        ..Default::default()
    };
    assert!(matches!(
        ctx.create_swap_chain(device, &window(capabilities, 800, 600)),
        Err(GfxError::Initialization(_))
    ));
    // 失败时不泄漏 surface
    assert_eq!(ctx.device_mut(device).unwrap().backend().stats().surfaces, 0);
}

#[test]
fn failed_first_acquire_releases_everything() {
    let (mut ctx, device) = present_context();
    let info = SwapChainInfo {
        surface: HeadlessSurface {
            capabilities: SurfaceCapabilities::default(),
            lost: true,
        },
        width: 800,
        height: 600,
        vsync: false,
        present_queue: 0,
    };
    assert!(matches!(ctx.create_swap_chain(device, &info), Err(GfxError::Device(_))));

    let stats = ctx.device_mut(device).unwrap().backend().stats();
    assert_eq!(
        (stats.surfaces, stats.swap_chains, stats.textures, stats.fences),
        (0, 0, 0, 0)
    );
}

#[test]
fn present_advances_the_image() {
    let (mut ctx, device) = present_context();
    let swap_chain = ctx
        .create_swap_chain(device, &window(SurfaceCapabilities::default(), 800, 600))
        .unwrap();
    let images = ctx.get_swap_chain(swap_chain).unwrap().images().to_vec();
    assert_eq!(images.len(), 3);

    for frame in 0..4 {
        let image = ctx.get_swap_chain_image(swap_chain).unwrap();
        assert_eq!(image, images[frame % 3]);

        let cmd = ctx.create_command_list(device, 0).unwrap();
        ctx.begin_command_list(cmd).unwrap();
        ctx.transition_texture(cmd, image, TextureState::Undefined, TextureState::RenderTarget)
            .unwrap();
        ctx.transition_texture(cmd, image, TextureState::RenderTarget, TextureState::Present)
            .unwrap();
        ctx.end_command_list(cmd).unwrap();
        let rendered = ctx
            .submit_command_list(&SubmitInfo::new(cmd), false, true)
            .unwrap()
            .semaphore
            .unwrap();

        ctx.present_swap_chain(swap_chain, 0, Some(rendered)).unwrap();
        assert!(!ctx.device_mut(device).unwrap().has_semaphore(rendered));
        ctx.destroy_command_list(cmd).unwrap();
    }

    ctx.wait_idle(device).unwrap();
    let stats = ctx.device_mut(device).unwrap().backend().stats();
    assert_eq!(stats.presents, 4);
    assert_eq!(stats.semaphores, 0);
}

#[test]
fn resize_rebuilds_images() {
    let (mut ctx, device) = present_context();
    let swap_chain = ctx.create_swap_chain(device, &window(bounded_surface(), 800, 600)).unwrap();
    let old_images = ctx.get_swap_chain(swap_chain).unwrap().images().to_vec();

    ctx.resize_swap_chain(swap_chain, 32, 2000).unwrap();
    let entry = ctx.get_swap_chain(swap_chain).unwrap();
    assert_eq!(entry.extent(), (64, 1080));
    let new_images = entry.images().to_vec();
    assert_eq!(new_images.len(), old_images.len());
    for image in &old_images {
        assert!(ctx.get_texture(*image).is_none());
    }
    let current = ctx.get_swap_chain_image(swap_chain).unwrap();
    assert_eq!(ctx.get_texture(current).unwrap().info().height, 1080);

    let stats = ctx.device_mut(device).unwrap().backend().stats();
    assert_eq!(stats.swap_chains, 1);
    assert_eq!(stats.textures, new_images.len());
}

#[test]
fn destroyed_swap_chain_releases_its_surface() {
    let (mut ctx, device) = present_context();
    let swap_chain = ctx
        .create_swap_chain(device, &window(SurfaceCapabilities::default(), 320, 240))
        .unwrap();
    let image = ctx.get_swap_chain_image(swap_chain).unwrap();

    ctx.destroy_swap_chain(swap_chain).unwrap();
    assert!(ctx.get_texture(image).is_none());
    assert_eq!(
        ctx.get_swap_chain_image(swap_chain),
        Err(GfxError::invalid(HandleKind::SwapChain))
    );

    let stats = ctx.device_mut(device).unwrap().backend().stats();
    assert_eq!((stats.surfaces, stats.swap_chains, stats.textures), (0, 0, 0));
}
