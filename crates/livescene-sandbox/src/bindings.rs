//! Host functions exposed to scene scripts.
//!
//! This is the whole capability surface: scripts can reach the rendering
//! backend, the container, and the frame scheduler only through the
//! functions registered here.

use std::sync::{
    Arc, Mutex, OnceLock, PoisonError, Weak,
    atomic::{AtomicBool, Ordering},
};

use livescene_core::{
    BackendError, DomNodeId, LoopToken, NodeId, OwnedResources, RenderHost,
    render::{
        CameraSpec, Color, FrameCallback, GeometrySpec, LightSpec, MaterialKind, MaterialSpec,
        RendererOptions, TransformOp, Vec3,
    },
};
use rhai::{AST, Dynamic, Engine, EvalAltResult, FnPtr, INT, Map};

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Script handle to a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneRef(pub NodeId);

/// Script handle to a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraRef(pub NodeId);

/// Script handle to a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererRef(pub NodeId);

/// Script handle to orbit controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlsRef(pub NodeId);

/// A mesh or light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef(pub NodeId);

/// A renderer's surface node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomRef(pub DomNodeId);

/// The container the scene renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerRef;

trait Transformable: Clone + Send + Sync + 'static {
    fn node(&self) -> NodeId;
}

impl Transformable for ObjectRef {
    fn node(&self) -> NodeId {
        self.0
    }
}

impl Transformable for CameraRef {
    fn node(&self) -> NodeId {
        self.0
    }
}

/// State shared by the host functions of one evaluation.
pub(crate) struct RunContext {
    pub(crate) host: RenderHost,
    ledger: Mutex<OwnedResources>,
    sealed: AtomicBool,
    pub(crate) engine: OnceLock<Weak<Engine>>,
    pub(crate) ast: OnceLock<Arc<AST>>,
}

impl RunContext {
    pub(crate) fn new(host: RenderHost) -> Self {
        Self {
            host,
            ledger: Mutex::default(),
            sealed: AtomicBool::new(false),
            engine: OnceLock::new(),
            ast: OnceLock::new(),
        }
    }

    /// Record a resource allocation. Allocation is only allowed during setup.
    fn allocate<T>(
        &self,
        what: &str,
        f: impl FnOnce(&mut OwnedResources) -> Result<T, BackendError>,
    ) -> ScriptResult<T> {
        if self.sealed.load(Ordering::SeqCst) {
            return Err(format!("{what} is only available while the scene is being set up").into());
        }
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut ledger).map_err(host_err)
    }

    /// End setup and hand over everything allocated so far.
    pub(crate) fn seal(&self) -> OwnedResources {
        self.sealed.store(true, Ordering::SeqCst);
        std::mem::take(&mut *self.ledger.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

fn host_err(e: BackendError) -> Box<EvalAltResult> {
    e.to_string().into()
}

/// Scripts may pass either `1` or `1.0` where a number is expected.
#[allow(clippy::cast_precision_loss)]
fn num(value: &Dynamic) -> ScriptResult<f64> {
    if let Ok(f) = value.as_float() {
        return Ok(f);
    }
    value
        .as_int()
        .map(|i| i as f64)
        .map_err(|t| format!("expected a number, got {t}").into())
}

fn vec3(x: &Dynamic, y: &Dynamic, z: &Dynamic) -> ScriptResult<Vec3> {
    Ok(Vec3::new(num(x)?, num(y)?, num(z)?))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pixels(value: &Dynamic) -> ScriptResult<u32> {
    Ok(num(value)?.round().clamp(0.0, f64::from(u32::MAX)) as u32)
}

fn segments(value: INT) -> u32 {
    u32::try_from(value.max(1)).unwrap_or(u32::MAX)
}

/// Register every host type and function with `engine`.
pub(crate) fn register(engine: &mut Engine, ctx: &Arc<RunContext>) {
    engine
        .register_type_with_name::<SceneRef>("Scene")
        .register_type_with_name::<CameraRef>("Camera")
        .register_type_with_name::<RendererRef>("Renderer")
        .register_type_with_name::<ControlsRef>("Controls")
        .register_type_with_name::<ObjectRef>("Object3D")
        .register_type_with_name::<DomRef>("DomElement")
        .register_type_with_name::<ContainerRef>("Container")
        .register_type_with_name::<GeometrySpec>("Geometry")
        .register_type_with_name::<MaterialSpec>("Material")
        .register_type_with_name::<LoopToken>("LoopToken");

    register_scene(engine, ctx);
    register_camera(engine, ctx);
    register_renderer(engine, ctx);
    register_objects(engine, ctx);
    register_transforms::<ObjectRef>(engine, ctx);
    register_transforms::<CameraRef>(engine, ctx);
    register_container(engine, ctx);
    register_loop(engine, ctx);
}

fn register_scene(engine: &mut Engine, ctx: &Arc<RunContext>) {
    let c = Arc::clone(ctx);
    engine.register_fn("new_scene", move || -> ScriptResult<SceneRef> {
        c.host.backend.create_scene().map(SceneRef).map_err(host_err)
    });

    let c = Arc::clone(ctx);
    engine.register_fn(
        "add",
        move |scene: &mut SceneRef, object: ObjectRef| -> ScriptResult<()> {
            c.host.backend.add_child(scene.0, object.0).map_err(host_err)
        },
    );

    let c = Arc::clone(ctx);
    engine.register_fn(
        "add",
        move |scene: &mut SceneRef, camera: CameraRef| -> ScriptResult<()> {
            c.host.backend.add_child(scene.0, camera.0).map_err(host_err)
        },
    );

    let c = Arc::clone(ctx);
    engine.register_fn(
        "set_background",
        move |scene: &mut SceneRef, color: INT| -> ScriptResult<()> {
            c.host
                .backend
                .set_background(scene.0, Color::from_int(color))
                .map_err(host_err)
        },
    );
}

fn register_camera(engine: &mut Engine, ctx: &Arc<RunContext>) {
    let c = Arc::clone(ctx);
    engine.register_fn(
        "perspective_camera",
        move |fov: Dynamic, aspect: Dynamic, near: Dynamic, far: Dynamic| -> ScriptResult<CameraRef> {
            let spec = CameraSpec {
                fov: num(&fov)?,
                aspect: num(&aspect)?,
                near: num(&near)?,
                far: num(&far)?,
            };
            c.host.backend.create_camera(spec).map(CameraRef).map_err(host_err)
        },
    );

    let c = Arc::clone(ctx);
    engine.register_fn(
        "set_aspect",
        move |camera: &mut CameraRef, aspect: Dynamic| -> ScriptResult<()> {
            c.host
                .backend
                .set_camera_aspect(camera.0, num(&aspect)?)
                .map_err(host_err)
        },
    );

    let c = Arc::clone(ctx);
    engine.register_fn(
        "update_projection_matrix",
        move |camera: &mut CameraRef| -> ScriptResult<()> {
            c.host.backend.update_projection(camera.0).map_err(host_err)
        },
    );

    let c = Arc::clone(ctx);
    engine.register_fn(
        "orbit_controls",
        move |camera: CameraRef, renderer: RendererRef| -> ScriptResult<ControlsRef> {
            c.host
                .backend
                .create_controls(camera.0, renderer.0)
                .map(ControlsRef)
                .map_err(host_err)
        },
    );

    let c = Arc::clone(ctx);
    engine.register_fn("update", move |controls: &mut ControlsRef| -> ScriptResult<()> {
        c.host.backend.update_controls(controls.0).map_err(host_err)
    });
}

fn create_renderer(ctx: &RunContext, options: RendererOptions) -> ScriptResult<RendererRef> {
    ctx.allocate("new_renderer", |ledger| {
        let id = ctx.host.backend.create_renderer(options)?;
        ledger.renderers.push(id);
        Ok(RendererRef(id))
    })
}

fn register_renderer(engine: &mut Engine, ctx: &Arc<RunContext>) {
    let c = Arc::clone(ctx);
    engine.register_fn("new_renderer", move || {
        create_renderer(&c, RendererOptions::default())
    });

    let c = Arc::clone(ctx);
    engine.register_fn("new_renderer", move |options: Map| {
        let antialias = options
            .get("antialias")
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(false);
        create_renderer(&c, RendererOptions { antialias })
    });

    let c = Arc::clone(ctx);
    engine.register_fn(
        "set_size",
        move |renderer: &mut RendererRef, width: Dynamic, height: Dynamic| -> ScriptResult<()> {
            c.host
                .backend
                .set_renderer_size(renderer.0, pixels(&width)?, pixels(&height)?)
                .map_err(host_err)
        },
    );

    let c = Arc::clone(ctx);
    engine.register_fn(
        "render",
        move |renderer: &mut RendererRef, scene: SceneRef, camera: CameraRef| -> ScriptResult<()> {
            c.host
                .backend
                .render(renderer.0, scene.0, camera.0)
                .map_err(host_err)
        },
    );

    let c = Arc::clone(ctx);
    let dom_element = move |renderer: &mut RendererRef| -> ScriptResult<DomRef> {
        c.host
            .backend
            .dom_element(renderer.0)
            .map(DomRef)
            .map_err(host_err)
    };
    engine.register_fn("dom_element", dom_element.clone());
    engine.register_get("dom_element", dom_element);
}

fn register_objects(engine: &mut Engine, ctx: &Arc<RunContext>) {
    engine.register_fn(
        "box_geometry",
        |width: Dynamic, height: Dynamic, depth: Dynamic| -> ScriptResult<GeometrySpec> {
            Ok(GeometrySpec::Box {
                width: num(&width)?,
                height: num(&height)?,
                depth: num(&depth)?,
            })
        },
    );
    engine.register_fn(
        "sphere_geometry",
        |radius: Dynamic, width_segments: INT, height_segments: INT| -> ScriptResult<GeometrySpec> {
            Ok(GeometrySpec::Sphere {
                radius: num(&radius)?,
                width_segments: segments(width_segments),
                height_segments: segments(height_segments),
            })
        },
    );
    engine.register_fn(
        "plane_geometry",
        |width: Dynamic, height: Dynamic| -> ScriptResult<GeometrySpec> {
            Ok(GeometrySpec::Plane {
                width: num(&width)?,
                height: num(&height)?,
            })
        },
    );

    engine.register_fn("basic_material", |color: INT| MaterialSpec {
        kind: MaterialKind::Basic,
        color: Color::from_int(color),
    });
    engine.register_fn("standard_material", |color: INT| MaterialSpec {
        kind: MaterialKind::Standard,
        color: Color::from_int(color),
    });

    let c = Arc::clone(ctx);
    engine.register_fn(
        "mesh",
        move |geometry: GeometrySpec, material: MaterialSpec| -> ScriptResult<ObjectRef> {
            c.host
                .backend
                .create_mesh(geometry, material)
                .map(ObjectRef)
                .map_err(host_err)
        },
    );

    let lights: [(&str, fn(Color, f64) -> LightSpec); 3] = [
        ("ambient_light", |color, intensity| LightSpec::Ambient { color, intensity }),
        ("directional_light", |color, intensity| LightSpec::Directional { color, intensity }),
        ("point_light", |color, intensity| LightSpec::Point { color, intensity }),
    ];
    for (name, make) in lights {
        let c = Arc::clone(ctx);
        engine.register_fn(
            name,
            move |color: INT, intensity: Dynamic| -> ScriptResult<ObjectRef> {
                let light = make(Color::from_int(color), num(&intensity)?);
                c.host.backend.create_light(light).map(ObjectRef).map_err(host_err)
            },
        );
    }
}

fn register_transforms<T: Transformable>(engine: &mut Engine, ctx: &Arc<RunContext>) {
    let ops: [(&str, fn(Vec3) -> TransformOp); 4] = [
        ("set_position", TransformOp::SetPosition),
        ("set_rotation", TransformOp::SetRotation),
        ("set_scale", TransformOp::SetScale),
        ("look_at", TransformOp::LookAt),
    ];
    for (name, op) in ops {
        let c = Arc::clone(ctx);
        engine.register_fn(
            name,
            move |target: &mut T, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
                c.host
                    .backend
                    .update_transform(target.node(), op(vec3(&x, &y, &z)?))
                    .map_err(host_err)
            },
        );
    }

    let axes: [(&str, fn(f64) -> Vec3); 3] = [
        ("rotate_x", |d| Vec3::new(d, 0.0, 0.0)),
        ("rotate_y", |d| Vec3::new(0.0, d, 0.0)),
        ("rotate_z", |d| Vec3::new(0.0, 0.0, d)),
    ];
    for (name, axis) in axes {
        let c = Arc::clone(ctx);
        engine.register_fn(
            name,
            move |target: &mut T, delta: Dynamic| -> ScriptResult<()> {
                c.host
                    .backend
                    .update_transform(target.node(), TransformOp::Rotate(axis(num(&delta)?)))
                    .map_err(host_err)
            },
        );
    }
}

fn register_container(engine: &mut Engine, ctx: &Arc<RunContext>) {
    let c = Arc::clone(ctx);
    engine.register_fn(
        "append_child",
        move |_container: ContainerRef, node: DomRef| -> ScriptResult<()> {
            c.allocate("append_child", |ledger| {
                c.host.surface.attach(node.0)?;
                if !ledger.attached.contains(&node.0) {
                    ledger.attached.push(node.0);
                }
                Ok(())
            })
        },
    );
}

fn register_loop(engine: &mut Engine, ctx: &Arc<RunContext>) {
    let c = Arc::clone(ctx);
    engine.register_fn("start_loop", move |callback: FnPtr| -> ScriptResult<LoopToken> {
        let engine = c
            .engine
            .get()
            .and_then(Weak::upgrade)
            .ok_or("start_loop called outside an evaluation")?;
        let ast = c
            .ast
            .get()
            .cloned()
            .ok_or("start_loop called outside an evaluation")?;

        c.allocate("start_loop", |ledger| {
            let frame: FrameCallback = Box::new(move || {
                callback
                    .call::<Dynamic>(&engine, &ast, ())
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            });
            let token = c.host.scheduler.start(frame);
            ledger.loops.push(token);
            Ok(token)
        })
    });
}
