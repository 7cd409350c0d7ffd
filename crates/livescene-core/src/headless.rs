//! Headless host: an in-memory scene graph, a sized container, and a
//! manually stepped frame scheduler.
//!
//! Used by the console client and as the deterministic host in tests.
//! All three can share a [`Journal`] that records host calls in order.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;

use crate::render::{
    BackendError, CameraSpec, Color, DomNodeId, FrameCallback, FrameScheduler, GeometrySpec,
    LightSpec, LoopToken, MaterialSpec, NodeId, RenderBackend, RenderSurface, RendererOptions,
    SurfaceSize, TransformOp, Vec3,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Host call recorded by the headless host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    RendererCreated(NodeId),
    RendererDisposed(NodeId),
    NodeAttached(DomNodeId),
    NodeDetached(DomNodeId),
    LoopStarted(LoopToken),
    LoopCancelled(LoopToken),
}

/// Shared, ordered record of host events.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<HostEvent>>>);

impl Journal {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn record(&self, event: HostEvent) {
        lock(&self.0).push(event);
    }

    /// All events so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<HostEvent> {
        lock(&self.0).clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&HostEvent) -> bool) -> usize {
        lock(&self.0).iter().filter(|e| pred(e)).count()
    }

    /// Forget every recorded event.
    pub fn clear(&self) {
        lock(&self.0).clear();
    }
}

/// Camera parameters as last set by scene code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraState {
    pub spec: CameraSpec,
    /// Aspect ratio the projection was last computed with.
    pub projection_aspect: f64,
}

/// Renderer state, including how many frames it has drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RendererState {
    pub options: RendererOptions,
    pub size: SurfaceSize,
    pub dom: DomNodeId,
    pub disposed: bool,
    pub frames: u64,
}

/// What a scene-graph node is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Scene { background: Option<Color> },
    Camera(CameraState),
    Renderer(RendererState),
    Controls { camera: NodeId, updates: u64 },
    Mesh { geometry: GeometrySpec, material: MaterialSpec },
    Light(LightSpec),
}

/// Position, rotation, scale, and look-at target of a node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
    pub target: Option<Vec3>,
}

/// One object in the in-memory scene graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub kind: NodeKind,
    pub transform: Transform,
    pub children: Vec<NodeId>,
}

#[derive(Default)]
struct Graph {
    next_id: u64,
    nodes: HashMap<NodeId, Node>,
}

impl Graph {
    fn insert(&mut self, kind: NodeKind) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(
            id,
            Node {
                kind,
                transform: Transform {
                    scale: Vec3::new(1.0, 1.0, 1.0),
                    ..Transform::default()
                },
                children: Vec::new(),
            },
        );
        id
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, BackendError> {
        self.nodes.get_mut(&id).ok_or(BackendError::UnknownNode(id))
    }

    fn camera_mut(&mut self, id: NodeId) -> Result<&mut CameraState, BackendError> {
        match &mut self.get_mut(id)?.kind {
            NodeKind::Camera(state) => Ok(state),
            _ => Err(BackendError::WrongKind {
                node: id,
                expected: "camera",
            }),
        }
    }

    fn renderer_mut(&mut self, id: NodeId) -> Result<&mut RendererState, BackendError> {
        match &mut self.get_mut(id)?.kind {
            NodeKind::Renderer(state) if state.disposed => Err(BackendError::Disposed(id)),
            NodeKind::Renderer(state) => Ok(state),
            _ => Err(BackendError::WrongKind {
                node: id,
                expected: "renderer",
            }),
        }
    }

    fn expect_kind(
        &self,
        id: NodeId,
        expected: &'static str,
        pred: impl Fn(&NodeKind) -> bool,
    ) -> Result<(), BackendError> {
        let node = self.nodes.get(&id).ok_or(BackendError::UnknownNode(id))?;
        if pred(&node.kind) {
            Ok(())
        } else {
            Err(BackendError::WrongKind { node: id, expected })
        }
    }
}

/// In-memory rendering backend.
#[derive(Default)]
pub struct HeadlessBackend {
    graph: Mutex<Graph>,
    journal: Option<Journal>,
}

impl HeadlessBackend {
    /// Create a backend without a journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that records renderer events to `journal`.
    #[must_use]
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            graph: Mutex::default(),
            journal: Some(journal),
        }
    }

    fn record(&self, event: HostEvent) {
        if let Some(journal) = &self.journal {
            journal.record(event);
        }
    }

    /// Snapshot of a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<Node> {
        lock(&self.graph).nodes.get(&id).cloned()
    }

    /// Camera state of `id`, if it is a camera.
    #[must_use]
    pub fn camera(&self, id: NodeId) -> Option<CameraState> {
        match self.node(id)?.kind {
            NodeKind::Camera(state) => Some(state),
            _ => None,
        }
    }

    /// Renderer state of `id`, if it is a renderer.
    #[must_use]
    pub fn renderer(&self, id: NodeId) -> Option<RendererState> {
        match self.node(id)?.kind {
            NodeKind::Renderer(state) => Some(state),
            _ => None,
        }
    }

    /// Renderers that have not been disposed.
    #[must_use]
    pub fn live_renderers(&self) -> Vec<NodeId> {
        let graph = lock(&self.graph);
        let mut ids: Vec<NodeId> = graph
            .nodes
            .iter()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Renderer(r) if !r.disposed))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// JSON dump of a node and its descendants.
    #[must_use]
    pub fn describe(&self, root: NodeId) -> serde_json::Value {
        let graph = lock(&self.graph);
        describe_node(&graph, root)
    }
}

fn describe_node(graph: &Graph, id: NodeId) -> serde_json::Value {
    let Some(node) = graph.nodes.get(&id) else {
        return serde_json::Value::Null;
    };
    let children: Vec<_> = node
        .children
        .iter()
        .map(|child| describe_node(graph, *child))
        .collect();
    serde_json::json!({
        "id": id.0,
        "node": node.kind,
        "transform": node.transform,
        "children": children,
    })
}

impl RenderBackend for HeadlessBackend {
    fn create_scene(&self) -> Result<NodeId, BackendError> {
        Ok(lock(&self.graph).insert(NodeKind::Scene { background: None }))
    }

    fn create_camera(&self, spec: CameraSpec) -> Result<NodeId, BackendError> {
        Ok(lock(&self.graph).insert(NodeKind::Camera(CameraState {
            spec,
            projection_aspect: spec.aspect,
        })))
    }

    fn create_renderer(&self, options: RendererOptions) -> Result<NodeId, BackendError> {
        let id = {
            let mut graph = lock(&self.graph);
            // A renderer's surface node mirrors its node id.
            let dom = DomNodeId(graph.next_id + 1);
            graph.insert(NodeKind::Renderer(RendererState {
                options,
                size: SurfaceSize::default(),
                dom,
                disposed: false,
                frames: 0,
            }))
        };
        self.record(HostEvent::RendererCreated(id));
        Ok(id)
    }

    fn create_controls(&self, camera: NodeId, renderer: NodeId) -> Result<NodeId, BackendError> {
        let mut graph = lock(&self.graph);
        graph.camera_mut(camera)?;
        graph.renderer_mut(renderer)?;
        Ok(graph.insert(NodeKind::Controls { camera, updates: 0 }))
    }

    fn create_mesh(
        &self,
        geometry: GeometrySpec,
        material: MaterialSpec,
    ) -> Result<NodeId, BackendError> {
        Ok(lock(&self.graph).insert(NodeKind::Mesh { geometry, material }))
    }

    fn create_light(&self, light: LightSpec) -> Result<NodeId, BackendError> {
        Ok(lock(&self.graph).insert(NodeKind::Light(light)))
    }

    fn add_child(&self, parent: NodeId, child: NodeId) -> Result<(), BackendError> {
        let mut graph = lock(&self.graph);
        graph.expect_kind(parent, "scene", |k| matches!(k, NodeKind::Scene { .. }))?;
        graph.expect_kind(child, "scene object", |k| {
            matches!(k, NodeKind::Mesh { .. } | NodeKind::Light(_) | NodeKind::Camera(_))
        })?;
        let children = &mut graph.get_mut(parent)?.children;
        if !children.contains(&child) {
            children.push(child);
        }
        Ok(())
    }

    fn set_background(&self, scene: NodeId, color: Color) -> Result<(), BackendError> {
        match &mut lock(&self.graph).get_mut(scene)?.kind {
            NodeKind::Scene { background } => {
                *background = Some(color);
                Ok(())
            }
            _ => Err(BackendError::WrongKind {
                node: scene,
                expected: "scene",
            }),
        }
    }

    fn update_transform(&self, node: NodeId, op: TransformOp) -> Result<(), BackendError> {
        let mut graph = lock(&self.graph);
        let transform = &mut graph.get_mut(node)?.transform;
        match op {
            TransformOp::SetPosition(v) => transform.position = v,
            TransformOp::SetRotation(v) => transform.rotation = v,
            TransformOp::Rotate(d) => {
                transform.rotation.x += d.x;
                transform.rotation.y += d.y;
                transform.rotation.z += d.z;
            }
            TransformOp::SetScale(v) => transform.scale = v,
            TransformOp::LookAt(v) => transform.target = Some(v),
        }
        Ok(())
    }

    fn set_camera_aspect(&self, camera: NodeId, aspect: f64) -> Result<(), BackendError> {
        lock(&self.graph).camera_mut(camera)?.spec.aspect = aspect;
        Ok(())
    }

    fn update_projection(&self, camera: NodeId) -> Result<(), BackendError> {
        let mut graph = lock(&self.graph);
        let state = graph.camera_mut(camera)?;
        state.projection_aspect = state.spec.aspect;
        Ok(())
    }

    fn set_renderer_size(
        &self,
        renderer: NodeId,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError> {
        lock(&self.graph).renderer_mut(renderer)?.size = SurfaceSize::new(width, height);
        Ok(())
    }

    fn dom_element(&self, renderer: NodeId) -> Result<DomNodeId, BackendError> {
        Ok(lock(&self.graph).renderer_mut(renderer)?.dom)
    }

    fn render(&self, renderer: NodeId, scene: NodeId, camera: NodeId) -> Result<(), BackendError> {
        let mut graph = lock(&self.graph);
        graph.expect_kind(scene, "scene", |k| matches!(k, NodeKind::Scene { .. }))?;
        graph.camera_mut(camera)?;
        graph.renderer_mut(renderer)?.frames += 1;
        Ok(())
    }

    fn update_controls(&self, controls: NodeId) -> Result<(), BackendError> {
        match &mut lock(&self.graph).get_mut(controls)?.kind {
            NodeKind::Controls { updates, .. } => {
                *updates += 1;
                Ok(())
            }
            _ => Err(BackendError::WrongKind {
                node: controls,
                expected: "controls",
            }),
        }
    }

    fn dispose_renderer(&self, renderer: NodeId) -> Result<(), BackendError> {
        lock(&self.graph).renderer_mut(renderer)?.disposed = true;
        self.record(HostEvent::RendererDisposed(renderer));
        Ok(())
    }
}

/// Container with a settable size.
pub struct HeadlessSurface {
    size: Mutex<SurfaceSize>,
    attached: Mutex<Vec<DomNodeId>>,
    journal: Option<Journal>,
}

impl HeadlessSurface {
    /// Create a surface measuring `size`.
    #[must_use]
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            size: Mutex::new(size),
            attached: Mutex::default(),
            journal: None,
        }
    }

    /// Create a surface that records attach and detach to `journal`.
    #[must_use]
    pub fn with_journal(size: SurfaceSize, journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new(size)
        }
    }

    /// Simulate the container being resized.
    pub fn set_size(&self, size: SurfaceSize) {
        *lock(&self.size) = size;
    }

    /// Nodes currently attached, in attach order.
    #[must_use]
    pub fn attached(&self) -> Vec<DomNodeId> {
        lock(&self.attached).clone()
    }

    fn record(&self, event: HostEvent) {
        if let Some(journal) = &self.journal {
            journal.record(event);
        }
    }
}

impl RenderSurface for HeadlessSurface {
    fn size(&self) -> SurfaceSize {
        *lock(&self.size)
    }

    fn attach(&self, node: DomNodeId) -> Result<(), BackendError> {
        {
            let mut attached = lock(&self.attached);
            if attached.contains(&node) {
                return Ok(());
            }
            attached.push(node);
        }
        self.record(HostEvent::NodeAttached(node));
        Ok(())
    }

    fn detach(&self, node: DomNodeId) -> Result<(), BackendError> {
        {
            let mut attached = lock(&self.attached);
            let pos = attached
                .iter()
                .position(|n| *n == node)
                .ok_or(BackendError::NotAttached(node))?;
            attached.remove(pos);
        }
        self.record(HostEvent::NodeDetached(node));
        Ok(())
    }
}

type SharedCallback = Arc<Mutex<FrameCallback>>;

/// Frame scheduler that only advances when told to.
#[derive(Default)]
pub struct ManualScheduler {
    next_token: Mutex<u64>,
    loops: Mutex<Vec<(LoopToken, SharedCallback)>>,
    journal: Option<Journal>,
}

impl ManualScheduler {
    /// Create a scheduler with no loops.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scheduler that records loop starts and cancels to `journal`.
    #[must_use]
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    /// Tokens of loops still running.
    #[must_use]
    pub fn active(&self) -> Vec<LoopToken> {
        lock(&self.loops).iter().map(|(t, _)| *t).collect()
    }

    /// Run one frame of every active loop.
    ///
    /// A loop whose callback fails is stopped, like a throwing animation
    /// frame callback. Returns the number of callbacks run.
    pub fn tick(&self) -> usize {
        let loops: Vec<_> = lock(&self.loops).clone();
        let mut failed = Vec::new();
        for (token, callback) in &loops {
            let result = {
                let mut frame = lock(callback);
                (*frame)()
            };
            if let Err(e) = result {
                tracing::warn!(%token, "Frame callback failed, stopping loop: {e}");
                failed.push(*token);
            }
        }
        lock(&self.loops).retain(|(t, _)| !failed.contains(t));
        loops.len()
    }

    fn record(&self, event: HostEvent) {
        if let Some(journal) = &self.journal {
            journal.record(event);
        }
    }
}

impl FrameScheduler for ManualScheduler {
    fn start(&self, frame: FrameCallback) -> LoopToken {
        let token = {
            let mut next = lock(&self.next_token);
            *next += 1;
            LoopToken(*next)
        };
        lock(&self.loops).push((token, Arc::new(Mutex::new(frame))));
        self.record(HostEvent::LoopStarted(token));
        token
    }

    fn cancel(&self, token: LoopToken) {
        let removed = {
            let mut loops = lock(&self.loops);
            let before = loops.len();
            loops.retain(|(t, _)| *t != token);
            loops.len() != before
        };
        if removed {
            self.record(HostEvent::LoopCancelled(token));
        }
    }
}
