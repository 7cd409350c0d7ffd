//! Evaluate scene code into a [`RenderSession`].

use std::sync::Arc;

use livescene_core::{
    LoopToken, RenderHost, RenderSession, SandboxError, SceneSandbox, SessionId,
};
use rhai::{Dynamic, Scope};

use crate::{
    bindings::{self, CameraRef, ContainerRef, ControlsRef, RendererRef, RunContext, SceneRef},
    engine::{SandboxLimits, create_engine},
};

/// Bindings read back from the script scope after evaluation.
struct Bound {
    scene: SceneRef,
    camera: CameraRef,
    renderer: RendererRef,
    controls: Option<ControlsRef>,
    animation_id: Option<LoopToken>,
}

impl Bound {
    fn from_scope(scope: &Scope<'_>) -> Result<Self, SandboxError> {
        Ok(Self {
            scene: scope
                .get_value::<SceneRef>("scene")
                .ok_or(SandboxError::MissingBinding("scene"))?,
            camera: scope
                .get_value::<CameraRef>("camera")
                .ok_or(SandboxError::MissingBinding("camera"))?,
            renderer: scope
                .get_value::<RendererRef>("renderer")
                .ok_or(SandboxError::MissingBinding("renderer"))?,
            controls: scope.get_value::<ControlsRef>("controls"),
            animation_id: scope.get_value::<LoopToken>("animation_id"),
        })
    }
}

/// Runs scene code in an embedded script engine.
///
/// Every run gets a fresh engine and scope, so nothing leaks from one piece
/// of code to the next. Scripts see these variables:
///
/// - `container`, `width`, `height`: the render container and its size
/// - `scene`, `camera`, `renderer`: must be assigned by the code
/// - `controls`, `animation_id`: optional
#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    limits: SandboxLimits,
}

impl ScriptSandbox {
    /// Create a sandbox with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sandbox with custom limits.
    #[must_use]
    pub const fn with_limits(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    fn evaluate(&self, code: &str, ctx: &Arc<RunContext>) -> Result<Bound, SandboxError> {
        let mut engine = create_engine(&self.limits);
        bindings::register(&mut engine, ctx);
        let engine = Arc::new(engine);
        let _ = ctx.engine.set(Arc::downgrade(&engine));

        let ast = engine
            .compile(code)
            .map_err(|e| SandboxError::Compile(e.to_string()))?;
        let ast = Arc::new(ast);
        let _ = ctx.ast.set(Arc::clone(&ast));

        let size = ctx.host.surface.size();
        let mut scope = Scope::new();
        scope
            .push_constant("container", ContainerRef)
            .push_constant("width", f64::from(size.width))
            .push_constant("height", f64::from(size.height))
            .push_dynamic("scene", Dynamic::UNIT)
            .push_dynamic("camera", Dynamic::UNIT)
            .push_dynamic("renderer", Dynamic::UNIT)
            .push_dynamic("controls", Dynamic::UNIT)
            .push_dynamic("animation_id", Dynamic::UNIT);

        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        Bound::from_scope(&scope)
    }
}

impl SceneSandbox for ScriptSandbox {
    fn run(&self, code: &str, host: &RenderHost) -> Result<RenderSession, SandboxError> {
        let ctx = Arc::new(RunContext::new(host.clone()));
        let outcome = self.evaluate(code, &ctx);
        let resources = ctx.seal();

        let bound = match outcome {
            Ok(bound) => bound,
            Err(e) => {
                tracing::warn!(
                    loops = resources.loops.len(),
                    renderers = resources.renderers.len(),
                    "Scene code failed, releasing its resources: {e}"
                );
                host.release(&resources);
                return Err(e);
            }
        };

        let loop_token = bound
            .animation_id
            .or_else(|| resources.loops.first().copied());
        let dom_node = host
            .backend
            .dom_element(bound.renderer.0)
            .ok()
            .filter(|dom| resources.attached.contains(dom));

        let session = RenderSession {
            id: SessionId::default(),
            scene: bound.scene.0,
            camera: bound.camera.0,
            renderer: bound.renderer.0,
            controls: bound.controls.map(|c| c.0),
            loop_token,
            dom_node,
            resources,
        };
        tracing::debug!(scene = %session.scene, "Scene code evaluated");
        Ok(session)
    }
}
