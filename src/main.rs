use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use arm::prelude::*;
use clap::Parser;
use engine::renderer::Renderer;
use telemetry::{Delivery, Subscription, spawn_subscriber};
use tracing::{error, info, warn};
use viewer::ArmRenderer;
use winit::event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy};

mod arm;
mod config;
mod engine;
mod telemetry;
mod viewer;

#[derive(clap::Parser)]
struct Opts {
    /// Arm definition file. The built-in arm is used if none is given.
    #[arg(long)]
    definition: Option<PathBuf>,

    /// Address of the telemetry publisher (e.g. "127.0.0.1:1883"). Without it the arm stays in
    /// its rest pose.
    #[arg(long)]
    telemetry: Option<String>,

    /// Channel carrying the joint angles.
    #[arg(long, default_value = "robot/joints")]
    channel: String,

    /// Draw boxes instead of loading the geometry files.
    #[arg(long)]
    placeholder_geometry: bool,

    /// Log debug messages, including every dropped telemetry message.
    #[arg(short, long)]
    verbose: bool,
}

enum AppEvent {
    /// Every joint's geometry, or the error that stopped loading.
    GeometryLoaded(Result<Vec<GeometryResource>, LoadError>),
    Telemetry(Delivery),
    TelemetryClosed,
}

enum App {
    Uninitialized {
        opts: Opts,
        definition: ArmDefinition,
        proxy: EventLoopProxy<AppEvent>,
    },
    Initialized {
        window: Arc<winit::window::Window>,

        renderer: ArmRenderer,

        definition: ArmDefinition,

        scheduler: UpdateScheduler,

        /// `None` until every geometry is loaded.
        tree: Option<KinematicTree>,
    },
    /// Something fatal happened and the event loop is shutting down.
    Failed,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop) {
        *self = App::Failed;
        event_loop.exit();
    }
}

impl winit::application::ApplicationHandler<AppEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let App::Uninitialized {
            opts,
            definition,
            proxy,
        } = self
        else {
            return;
        };

        event_loop.set_control_flow(winit::event_loop::ControlFlow::Poll);

        let attributes = winit::window::WindowAttributes::default()
            .with_title("Arm Viewer")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 800));

        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                error!("Could not create the main window: {err}");
                return self.fail(event_loop);
            }
        };

        let renderer = match Renderer::new(Arc::clone(&window)) {
            Ok(renderer) => ArmRenderer::new(renderer),
            Err(err) => {
                error!("Could not initialize rendering: {err}");
                return self.fail(event_loop);
            }
        };

        if let Err(err) = spawn_geometry_loader(opts, definition, proxy.clone()) {
            error!("Could not start loading geometry: {err}");
            return self.fail(event_loop);
        }

        if let Some(addr) = opts.telemetry.clone() {
            if let Err(err) = spawn_telemetry(addr, opts.channel.clone(), proxy.clone()) {
                warn!("Could not start the telemetry subscription: {err}");
            }
        } else {
            info!("No telemetry address given, showing the rest pose.");
        }

        info!("Application initialized!");

        *self = App::Initialized {
            window,
            renderer,
            definition: definition.clone(),
            scheduler: UpdateScheduler::new(definition.angle_units),
            tree: None,
        };
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: AppEvent) {
        let App::Initialized {
            window,
            renderer,
            definition,
            scheduler,
            tree,
        } = self
        else {
            return;
        };

        match event {
            AppEvent::GeometryLoaded(Ok(geometries)) => match definition.build_tree(geometries) {
                Ok(new_tree) => {
                    renderer.set_arm(&new_tree);
                    *tree = Some(new_tree);
                    info!("Arm ready.");
                    window.request_redraw();
                }
                Err(err) => {
                    error!("Could not assemble the arm: {err}");
                    self.fail(event_loop);
                }
            },

            AppEvent::GeometryLoaded(Err(err)) => {
                error!("Could not load the arm geometry: {err}");
                self.fail(event_loop);
            }

            AppEvent::Telemetry(delivery) => {
                // Dropped messages are logged and counted by the scheduler.
                let _ = scheduler.on_telemetry(&delivery.payload, delivery.sequence, tree.as_ref());
            }

            AppEvent::TelemetryClosed => {
                info!(
                    "Telemetry ended, holding the last pose. ({})",
                    scheduler.stats()
                );
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: winit::window::WindowId,
        event: winit::event::WindowEvent,
    ) {
        use winit::event::WindowEvent;

        let App::Initialized {
            window,
            renderer,
            scheduler,
            tree,
            ..
        } = self
        else {
            return;
        };

        if window_id != window.id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }

            WindowEvent::Resized(winit::dpi::PhysicalSize { width, height }) => {
                renderer.resize(width, height);
                window.request_redraw();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && !event.repeat {
                    match event.physical_key {
                        PhysicalKey::Code(KeyCode::KeyG) => {
                            renderer.show_gizmos = !renderer.show_gizmos;
                        }
                        PhysicalKey::Code(KeyCode::Escape) => event_loop.exit(),
                        _ => {}
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                match tree {
                    Some(tree) => {
                        if let Err(err) = scheduler.tick(tree, renderer) {
                            error!("Could not apply pose: {err}");
                        }
                    }
                    None => renderer.draw_idle(),
                }

                window.request_redraw();
            }

            _ => {}
        }
    }
}

/// Load every joint's geometry off the event loop thread and post the result back.
fn spawn_geometry_loader(
    opts: &Opts,
    definition: &ArmDefinition,
    proxy: EventLoopProxy<AppEvent>,
) -> std::io::Result<()> {
    let requests = definition.geometry_requests();
    let placeholder = opts.placeholder_geometry;
    let scale = definition.geometry_scale;
    // Geometry paths are relative to the definition file.
    let root = opts
        .definition
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_default();

    std::thread::Builder::new()
        .name("geometry".to_string())
        .spawn(move || {
            let result = if placeholder {
                pollster::block_on(load_arm_geometries(&PlaceholderLoader::default(), &requests))
            } else {
                pollster::block_on(load_arm_geometries(&StlLoader::new(root, scale), &requests))
            };

            let _ = proxy.send_event(AppEvent::GeometryLoaded(result));
        })?;

    Ok(())
}

fn spawn_telemetry(
    addr: String,
    channel: String,
    proxy: EventLoopProxy<AppEvent>,
) -> std::io::Result<()> {
    let closed = proxy.clone();

    spawn_subscriber(
        move || Subscription::connect(&addr, channel),
        move |delivery| proxy.send_event(AppEvent::Telemetry(delivery)).is_ok(),
        move || {
            let _ = closed.send_event(AppEvent::TelemetryClosed);
        },
    )?;

    Ok(())
}

fn main() -> ExitCode {
    let opts = Opts::parse();

    tracing_subscriber::fmt()
        .with_max_level(if opts.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let definition = match &opts.definition {
        Some(path) => match ArmDefinition::load(path) {
            Ok(definition) => definition,
            Err(err) => {
                error!("{err}");
                return ExitCode::FAILURE;
            }
        },
        None => ArmDefinition::default(),
    };

    let event_loop = match EventLoop::<AppEvent>::with_user_event().build() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            error!("Could not create the event loop: {err}");
            return ExitCode::FAILURE;
        }
    };

    let proxy = event_loop.create_proxy();
    let mut app = App::Uninitialized {
        opts,
        definition,
        proxy,
    };

    if let Err(err) = event_loop.run_app(&mut app) {
        error!("Event loop error: {err}");
        return ExitCode::FAILURE;
    }

    if matches!(app, App::Failed) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
