//! Spinning cube over a ground plane, lit by a shadow-casting sun and a few
//! point lights, with a procedural sky for image-based lighting.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example spinning_cube -- --width 1280 --height 720
//!
//! # Post-process chain and validation layers
//! cargo run --example spinning_cube -- --fxaa --outline --validation
//!
//! # Render 200 frames then exit
//! cargo run --example spinning_cube -- --max-frames 200
//! ```

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use glam::{Mat4, Vec3};
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

use tiled_render_core::backend::vulkan::SurfaceConfig;
use tiled_render_core::backend::TextureFormat;
use tiled_render_core::{
    Environment, Light, Material, MaterialDesc, Mesh, MeshDesc, OrAbort, PostProcessChain,
    PostStep, RenderResult, Renderer, RendererConfig, Texture, TextureDesc, TextureKind,
    Viewport, ViewportDesc, VulkanDevice,
};

#[derive(Debug, Parser)]
#[command(about = "Tiled forward renderer demo")]
struct Args {
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// Present without waiting for vertical blank.
    #[arg(long)]
    no_vsync: bool,
    /// Enable Vulkan validation layers.
    #[arg(long)]
    validation: bool,
    /// Anti-alias the final image.
    #[arg(long)]
    fxaa: bool,
    /// Outline the cube.
    #[arg(long)]
    outline: bool,
    /// Exit after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

const SKY_SIZE: u32 = 64;

struct Demo {
    renderer: Renderer<VulkanDevice>,
    viewport: Viewport,
    environment: Environment,
    cube: Mesh,
    ground: Mesh,
    cube_material: Material,
    ground_material: Material,
    lights: Vec<Light>,
    chain: PostProcessChain,
    outline: bool,
    started: Instant,
    frames: u64,
    // Dropped after the renderer, which holds the window's surface.
    window: Window,
}

impl Demo {
    fn new(window: Window, args: &Args) -> RenderResult<Self> {
        let size = window.inner_size();
        let config = RendererConfig {
            vsync: !args.no_vsync,
            validation: args.validation,
            clear_color: [0.02, 0.02, 0.03, 1.0],
            ..Default::default()
        };
        let device = VulkanDevice::new(
            &window,
            SurfaceConfig {
                width: size.width,
                height: size.height,
                vsync: config.vsync,
            },
            config.validation,
        )?;
        let mut renderer = Renderer::new(device, config)?;

        let viewport = renderer.make_viewport(&ViewportDesc {
            width: size.width,
            height: size.height,
        })?;
        let sky = Arc::new(make_sky(&mut renderer)?);
        let environment = renderer.make_environment(sky)?;

        let cube = renderer.make_mesh(&MeshDesc::cube())?;
        let ground = renderer.make_mesh(&MeshDesc::plane(20.0, 4))?;
        let cube_material = renderer.make_material(
            &MaterialDesc::new("cube")
                .with_base_color(glam::Vec4::new(0.8, 0.3, 0.2, 1.0))
                .with_metallic(0.1)
                .with_roughness(0.4),
        )?;
        let ground_material =
            renderer.make_material(&MaterialDesc::new("ground").with_roughness(0.9))?;

        let mut lights = vec![Light::directional(
            Vec3::new(-0.4, -1.0, -0.3),
            Vec3::new(1.0, 0.95, 0.85),
            2.5,
            true,
        )];
        lights.extend((0..8).map(|i| {
            let angle = i as f32 / 8.0 * std::f32::consts::TAU;
            let color = Vec3::new(angle.cos() * 0.5 + 0.5, 0.5, angle.sin() * 0.5 + 0.5);
            Light::point(Vec3::new(angle.cos() * 4.0, 0.5, angle.sin() * 4.0), color, 4.0, 3.0)
        }));

        let chain = if args.fxaa {
            PostProcessChain::new().with(PostStep::Fxaa)
        } else {
            PostProcessChain::new()
        };
        log::info!(
            "Spinning cube: {}x{}, {} lights, {} post steps",
            size.width,
            size.height,
            lights.len(),
            chain.len()
        );

        Ok(Self {
            renderer,
            viewport,
            environment,
            cube,
            ground,
            cube_material,
            ground_material,
            lights,
            chain,
            outline: args.outline,
            started: Instant::now(),
            frames: 0,
            window,
        })
    }

    fn draw(&mut self) -> RenderResult<()> {
        let t = self.started.elapsed().as_secs_f32();
        let (width, height) = self.viewport.size();
        let aspect = width as f32 / height.max(1) as f32;
        let projection = Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 100.0);
        let eye = Vec3::new(0.0, 3.0, 7.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let spin = Mat4::from_rotation_translation(
            glam::Quat::from_euler(glam::EulerRot::YXZ, t, t * 0.5, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        );
        let ground = Mat4::IDENTITY;
        let sun = &self.lights[0];

        let mut frame = self.renderer.begin(&mut self.viewport)?;
        frame.set_camera(projection, view, view.inverse(), Some(&self.environment))?;

        frame.begin_depth_pass()?;
        frame.draw_depth(&self.cube, &self.cube_material, spin)?;
        frame.draw_depth(&self.ground, &self.ground_material, ground)?;
        frame.end_depth_pass()?;

        frame.begin_shadow_pass(Some(sun))?;
        frame.draw_shadow(&self.cube, &self.cube_material, spin)?;
        frame.draw_shadow(&self.ground, &self.ground_material, ground)?;
        frame.end_shadow_pass()?;

        frame.begin_light_pass()?;
        frame.draw_lights(&self.lights)?;
        frame.end_light_pass()?;

        frame.begin_forward_pass()?;
        frame.draw_forward(&self.cube, &self.cube_material, spin)?;
        frame.draw_forward(&self.ground, &self.ground_material, ground)?;
        frame.end_forward_pass()?;

        if self.outline {
            frame.begin_fill_pass()?;
            frame.draw_fill(&self.cube, spin)?;
            frame.end_fill_pass()?;
        }

        frame.run_post_chain(&self.chain)?;
        if self.outline {
            frame.begin_post_pass()?;
            frame.draw_post(PostStep::Outline)?;
            frame.end_post_pass()?;
        }

        frame.present()?;
        let stats = frame.end()?;
        self.renderer.swap_buffers()?;

        self.frames += 1;
        if self.frames % 300 == 0 {
            log::debug!(
                "Frame {}: {} draws, {} passes, {} lights culled",
                self.frames,
                stats.draw_calls,
                stats.passes,
                self.renderer.lights_culled()
            );
        }
        Ok(())
    }
}

/// Vertical gradient from horizon to zenith on every face of a cubemap.
fn make_sky(renderer: &mut Renderer<VulkanDevice>) -> RenderResult<Texture> {
    let horizon = [200u8, 210, 225, 255];
    let zenith = [40u8, 90, 170, 255];
    let mut data = Vec::with_capacity((SKY_SIZE * SKY_SIZE * 4 * 6) as usize);
    for face in 0..6 {
        for y in 0..SKY_SIZE {
            let t = match face {
                2 => 1.0,
                3 => 0.0,
                _ => 1.0 - y as f32 / (SKY_SIZE - 1) as f32,
            };
            for _ in 0..SKY_SIZE {
                data.extend(
                    horizon
                        .iter()
                        .zip(zenith)
                        .map(|(&h, z)| (h as f32 + (z as f32 - h as f32) * t) as u8),
                );
            }
        }
    }
    renderer.make_texture(&TextureDesc {
        label: "sky",
        width: SKY_SIZE,
        height: SKY_SIZE,
        format: TextureFormat::Rgba8Unorm,
        kind: TextureKind::Cube,
        data: Some(&data),
    })
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let event_loop = EventLoop::new().expect("failed to create event loop");
    let window = WindowBuilder::new()
        .with_title("Spinning cube")
        .with_inner_size(PhysicalSize::new(args.width, args.height))
        .with_resizable(false)
        .build(&event_loop)
        .expect("failed to create window");

    let mut demo = Demo::new(window, &args).or_abort();
    let max_frames = args.max_frames;

    event_loop
        .run(move |event, elwt| match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => elwt.exit(),
                WindowEvent::RedrawRequested => {
                    demo.draw().or_abort();
                    if max_frames.is_some_and(|max| demo.frames >= max) {
                        elwt.exit();
                    }
                }
                _ => {}
            },
            Event::AboutToWait => demo.window.request_redraw(),
            Event::LoopExiting => {
                if let Err(e) = demo.renderer.flush() {
                    log::warn!("Flush on exit failed: {e}");
                }
            }
            _ => {}
        })
        .expect("event loop failed");
}
