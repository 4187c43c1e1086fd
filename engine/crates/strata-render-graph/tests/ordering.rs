use std::{cell::RefCell, rc::Rc};

use strata_gfx::{
    AppInfo, CommandListHandle, DeviceHandle, DeviceInfo, Format, GfxContext, GfxError, SubmitInfo, TextureHandle,
    TextureInfo, TextureState, TextureUsage, backend::headless::HeadlessBackend,
};
use strata_render_graph::{RenderGraph, RenderGraphError};

type Context = GfxContext<HeadlessBackend>;
type Log = Rc<RefCell<Vec<String>>>;

struct Fixture {
    ctx: Context,
    device: DeviceHandle,
    cmd: CommandListHandle,
}

impl Fixture {
    fn new() -> Self {
        strata_crate_tools::init_log::init_log();
        let mut ctx = Context::new(&AppInfo::new("strata render graph test")).unwrap();
        let device = ctx.create_device(&DeviceInfo::default()).unwrap();
        let cmd = ctx.create_command_list(device, 0).unwrap();
        Self { ctx, device, cmd }
    }

    fn target(&mut self) -> TextureHandle {
        self.ctx
            .create_texture(self.device, &TextureInfo::new_2d(TextureUsage::ColorAttachment, Format::Rgba8, 16, 16))
            .unwrap()
    }
}

fn record(log: Log, name: &'static str) -> impl FnMut(&mut Context, CommandListHandle) -> Result<(), GfxError> {
    move |_, _| {
        log.borrow_mut().push(name.to_string());
        Ok(())
    }
}

#[test]
fn reads_wait_for_writers_regardless_of_registration() {
    let mut fx = Fixture::new();
    let t = fx.target();
    let u = fx.target();
    let executed = Log::default();

    let mut graph = RenderGraph::<HeadlessBackend>::new();
    graph.add_pass("A").write(t).on_execute(record(executed.clone(), "A"));
    graph.add_pass("C").read(u).on_execute(record(executed.clone(), "C"));
    graph.add_pass("B").read(t).write(u).on_execute(record(executed.clone(), "B"));

    graph.compile(1280, 720).unwrap();
    assert_eq!(graph.execution_order(), vec!["A", "B", "C"]);

    fx.ctx.begin_command_list(fx.cmd).unwrap();
    graph.execute(&mut fx.ctx, fx.cmd).unwrap();
    fx.ctx.end_command_list(fx.cmd).unwrap();
    assert_eq!(*executed.borrow(), vec!["A", "B", "C"]);
}

#[test]
fn read_modify_write_runs_after_a_later_registered_writer() {
    let mut fx = Fixture::new();
    let color = fx.target();

    let mut graph = RenderGraph::<HeadlessBackend>::new();
    graph.add_pass("tonemap").read(color).write(color);
    graph.add_pass("lighting").write(color);
    graph.add_pass("ui").read(color);

    graph.compile(640, 480).unwrap();
    assert_eq!(graph.execution_order(), vec!["lighting", "tonemap", "ui"]);
}

#[test]
fn cycle_fails_to_compile() {
    let mut fx = Fixture::new();
    let t = fx.target();
    let u = fx.target();
    let built = Log::default();

    let mut graph = RenderGraph::<HeadlessBackend>::new();
    let built_a = built.clone();
    graph.add_pass("A").write(t).read(u).on_build(move |_, _| built_a.borrow_mut().push("A".into()));
    graph.add_pass("B").write(u).read(t);
    graph.add_pass("present");

    assert_eq!(
        graph.compile(800, 600),
        Err(RenderGraphError::Cycle {
            passes: vec!["A".to_string(), "B".to_string()]
        })
    );
    assert!(!graph.is_compiled());
    assert!(graph.execution_order().is_empty());
    assert!(built.borrow().is_empty());
    assert_eq!(graph.execute(&mut fx.ctx, fx.cmd), Err(RenderGraphError::NotCompiled));
}

#[test]
fn independent_passes_keep_registration_order() {
    let mut fx = Fixture::new();
    let shadow = fx.target();
    let mut graph = RenderGraph::<HeadlessBackend>::new();
    graph.add_pass("ui");
    graph.add_pass("lighting").read(shadow);
    graph.add_pass("sky");
    graph.add_pass("shadow").write(shadow);

    graph.compile(64, 64).unwrap();
    assert_eq!(graph.execution_order(), vec!["ui", "sky", "shadow", "lighting"]);
}

#[test]
fn build_runs_once_per_compile_with_target_size() {
    let mut fx = Fixture::new();
    let t = fx.target();
    let sizes = Rc::new(RefCell::new(Vec::new()));

    let mut graph = RenderGraph::<HeadlessBackend>::new();
    let sizes_cb = sizes.clone();
    graph.add_pass("gbuffer").write(t).on_build(move |w, h| sizes_cb.borrow_mut().push((w, h)));

    graph.compile(1920, 1080).unwrap();
    fx.ctx.begin_command_list(fx.cmd).unwrap();
    graph.execute(&mut fx.ctx, fx.cmd).unwrap();
    graph.execute(&mut fx.ctx, fx.cmd).unwrap();
    assert_eq!(*sizes.borrow(), vec![(1920, 1080)]);

    graph.resize(800, 600).unwrap();
    assert_eq!(graph.extent(), (800, 600));
    assert_eq!(*sizes.borrow(), vec![(1920, 1080), (800, 600)]);
}

#[test]
fn adding_a_pass_requires_recompiling() {
    let mut fx = Fixture::new();
    let mut graph = RenderGraph::<HeadlessBackend>::new();
    graph.add_pass("first");
    graph.compile(32, 32).unwrap();
    assert!(graph.is_compiled());

    graph.add_pass("second");
    assert!(!graph.is_compiled());
    assert_eq!(graph.execute(&mut fx.ctx, fx.cmd), Err(RenderGraphError::NotCompiled));
}

#[test]
fn name_collision_replaces_in_place() {
    let mut fx = Fixture::new();
    let t = fx.target();
    let executed = Log::default();

    let mut graph = RenderGraph::<HeadlessBackend>::new();
    graph.add_pass("post").read(t).on_execute(record(executed.clone(), "old post"));
    graph.add_pass("scene").on_execute(record(executed.clone(), "scene"));
    graph.add_pass("post").on_execute(record(executed.clone(), "new post"));

    assert_eq!(graph.pass_count(), 2);
    assert!(graph.pass("post").unwrap().reads().is_empty());
    graph.compile(8, 8).unwrap();
    assert_eq!(graph.execution_order(), vec!["post", "scene"]);

    fx.ctx.begin_command_list(fx.cmd).unwrap();
    graph.execute(&mut fx.ctx, fx.cmd).unwrap();
    assert_eq!(*executed.borrow(), vec!["new post", "scene"]);
}

#[test]
fn passes_record_into_the_shared_command_list() {
    let mut fx = Fixture::new();
    let color = fx.target();

    let mut graph = RenderGraph::<HeadlessBackend>::new();
    graph.add_pass("clear").write(color).on_execute(move |ctx, cmd| {
        ctx.transition_texture(cmd, color, TextureState::Undefined, TextureState::RenderTarget)?;
        ctx.begin_render_pass(
            cmd,
            &strata_gfx::RenderPassInfo {
                color_attachments: vec![color],
                ..Default::default()
            },
        )?;
        ctx.end_render_pass(cmd)
    });
    graph.add_pass("sample").read(color).on_execute(move |ctx, cmd| {
        ctx.transition_texture(cmd, color, TextureState::RenderTarget, TextureState::ShaderRead)
    });
    graph.compile(16, 16).unwrap();

    fx.ctx.begin_command_list(fx.cmd).unwrap();
    graph.execute(&mut fx.ctx, fx.cmd).unwrap();
    fx.ctx.end_command_list(fx.cmd).unwrap();
    let fence = fx.ctx.submit_command_list(&SubmitInfo::new(fx.cmd), true, false).unwrap().fence.unwrap();
    fx.ctx.wait_on_fence(fence).unwrap();

    assert_eq!(fx.ctx.get_texture(color).unwrap().state(), TextureState::ShaderRead);
    assert_eq!(fx.ctx.device_mut(fx.device).unwrap().backend().stats().barriers, 2);

    // command list 已经结束录制，pass 的错误原样返回
    assert!(matches!(
        graph.execute(&mut fx.ctx, fx.cmd),
        Err(RenderGraphError::Gfx(GfxError::ProtocolViolation(_)))
    ));
}
