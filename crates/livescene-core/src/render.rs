//! Interface to the rendering library and the render surface.
//!
//! Generated scene code never talks to these traits directly; the sandbox
//! exposes a fixed set of script functions that forward here.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Handle to an object owned by the rendering backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Handle to a node attached to the render surface (a renderer's canvas).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomNodeId(pub u64);

/// Opaque handle to a running animation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoopToken(pub u64);

/// Identity of an installed render session.
///
/// Zero until the session is installed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for DomNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dom#{}", self.0)
    }
}

impl fmt::Display for LoopToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loop#{}", self.0)
    }
}

/// 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    /// Build a color from a script integer such as `0xff0000`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub const fn from_int(value: i64) -> Self {
        Self((value & 0x00FF_FFFF) as u32)
    }
}

/// Point or direction in scene space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Perspective camera parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSpec {
    pub fov: f64,
    pub aspect: f64,
    pub near: f64,
    pub far: f64,
}

/// Renderer construction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RendererOptions {
    pub antialias: bool,
}

/// Geometry a mesh is built from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum GeometrySpec {
    Box { width: f64, height: f64, depth: f64 },
    Sphere { radius: f64, width_segments: u32, height_segments: u32 },
    Plane { width: f64, height: f64 },
}

/// Shading model of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    Basic,
    Standard,
}

/// Material applied to a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialSpec {
    pub kind: MaterialKind,
    pub color: Color,
}

/// Light source added to a scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "light", rename_all = "snake_case")]
pub enum LightSpec {
    Ambient { color: Color, intensity: f64 },
    Directional { color: Color, intensity: f64 },
    Point { color: Color, intensity: f64 },
}

/// Transform update applied to a scene object or camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum TransformOp {
    SetPosition(Vec3),
    SetRotation(Vec3),
    Rotate(Vec3),
    SetScale(Vec3),
    LookAt(Vec3),
}

/// Container dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either side is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width over height.
    #[must_use]
    pub fn aspect(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

/// Rendering backend error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Unknown object: {0}")]
    UnknownNode(NodeId),
    #[error("{node} is not a {expected}")]
    WrongKind { node: NodeId, expected: &'static str },
    #[error("Renderer {0} has been disposed")]
    Disposed(NodeId),
    #[error("Surface node not attached: {0}")]
    NotAttached(DomNodeId),
    #[error("Backend error: {0}")]
    Internal(String),
}

/// The 3D rendering library, reduced to what scene code may call.
pub trait RenderBackend: Send + Sync {
    /// Create an empty scene graph root.
    fn create_scene(&self) -> Result<NodeId, BackendError>;
    /// Create a perspective camera.
    fn create_camera(&self, spec: CameraSpec) -> Result<NodeId, BackendError>;
    /// Create a renderer with its own surface node.
    fn create_renderer(&self, options: RendererOptions) -> Result<NodeId, BackendError>;
    /// Create orbit controls for `camera`.
    fn create_controls(&self, camera: NodeId, renderer: NodeId) -> Result<NodeId, BackendError>;
    /// Create a mesh from a geometry and a material.
    fn create_mesh(
        &self,
        geometry: GeometrySpec,
        material: MaterialSpec,
    ) -> Result<NodeId, BackendError>;
    /// Create a light.
    fn create_light(&self, light: LightSpec) -> Result<NodeId, BackendError>;

    /// Attach `child` under `parent`.
    fn add_child(&self, parent: NodeId, child: NodeId) -> Result<(), BackendError>;
    /// Set the scene's clear color.
    fn set_background(&self, scene: NodeId, color: Color) -> Result<(), BackendError>;
    /// Apply a transform to an object or camera.
    fn update_transform(&self, node: NodeId, op: TransformOp) -> Result<(), BackendError>;

    /// Change the camera's aspect ratio without recomputing the projection.
    fn set_camera_aspect(&self, camera: NodeId, aspect: f64) -> Result<(), BackendError>;
    /// Recompute the camera projection from its current parameters.
    fn update_projection(&self, camera: NodeId) -> Result<(), BackendError>;

    /// Resize the renderer's drawing buffer.
    fn set_renderer_size(&self, renderer: NodeId, width: u32, height: u32)
    -> Result<(), BackendError>;
    /// Surface node the renderer draws into.
    fn dom_element(&self, renderer: NodeId) -> Result<DomNodeId, BackendError>;
    /// Draw one frame of `scene` from `camera`.
    fn render(&self, renderer: NodeId, scene: NodeId, camera: NodeId) -> Result<(), BackendError>;
    /// Advance controls by one frame.
    fn update_controls(&self, controls: NodeId) -> Result<(), BackendError>;
    /// Release the renderer's graphics resources.
    fn dispose_renderer(&self, renderer: NodeId) -> Result<(), BackendError>;
}

/// The container element the scene renders into.
pub trait RenderSurface: Send + Sync {
    /// Current measured size.
    fn size(&self) -> SurfaceSize;
    /// Attach a surface node to the container.
    fn attach(&self, node: DomNodeId) -> Result<(), BackendError>;
    /// Remove a surface node from the container.
    fn detach(&self, node: DomNodeId) -> Result<(), BackendError>;
}

/// Per-frame callback driven by a [`FrameScheduler`].
pub type FrameCallback = Box<dyn FnMut() -> Result<(), String> + Send>;

/// Animation-frame scheduling.
pub trait FrameScheduler: Send + Sync {
    /// Run `frame` once per frame until cancelled.
    fn start(&self, frame: FrameCallback) -> LoopToken;
    /// Stop a loop. Unknown tokens are ignored.
    fn cancel(&self, token: LoopToken);
}

/// Everything a render session allocated from the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedResources {
    pub loops: Vec<LoopToken>,
    pub renderers: Vec<NodeId>,
    pub attached: Vec<DomNodeId>,
}

impl OwnedResources {
    /// True if nothing was allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty() && self.renderers.is_empty() && self.attached.is_empty()
    }
}

/// The rendering library, container, and frame scheduler used by sessions.
#[derive(Clone)]
pub struct RenderHost {
    pub backend: Arc<dyn RenderBackend>,
    pub surface: Arc<dyn RenderSurface>,
    pub scheduler: Arc<dyn FrameScheduler>,
}

impl RenderHost {
    /// Bundle the backend, surface, and scheduler.
    #[must_use]
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        surface: Arc<dyn RenderSurface>,
        scheduler: Arc<dyn FrameScheduler>,
    ) -> Self {
        Self {
            backend,
            surface,
            scheduler,
        }
    }

    /// Release resources: cancel loops, dispose renderers, then detach nodes.
    ///
    /// Individual failures are logged and do not stop the release.
    pub fn release(&self, resources: &OwnedResources) {
        for token in &resources.loops {
            self.scheduler.cancel(*token);
        }
        for renderer in &resources.renderers {
            if let Err(e) = self.backend.dispose_renderer(*renderer) {
                tracing::warn!(%renderer, "Failed to dispose renderer: {e}");
            }
        }
        for node in &resources.attached {
            if let Err(e) = self.surface.detach(*node) {
                tracing::warn!(%node, "Failed to detach surface node: {e}");
            }
        }
    }
}

impl fmt::Debug for RenderHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderHost").finish_non_exhaustive()
    }
}

/// One live scene: the bound scene/camera/renderer plus what it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSession {
    /// Assigned on install.
    pub id: SessionId,
    pub scene: NodeId,
    pub camera: NodeId,
    pub renderer: NodeId,
    pub controls: Option<NodeId>,
    /// Loop the code reported as its animation loop.
    pub loop_token: Option<LoopToken>,
    /// The renderer's surface node, if the code attached it.
    pub dom_node: Option<DomNodeId>,
    /// Every loop, renderer, and attached node created for this session.
    pub resources: OwnedResources,
}
