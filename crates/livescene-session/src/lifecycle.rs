//! Ownership of the single live render session.

use livescene_core::{BackendError, RenderHost, RenderSession, SessionId, SurfaceSize};

/// Holds at most one [`RenderSession`] and mediates every change to it.
#[derive(Debug)]
pub struct RenderLifecycle {
    host: RenderHost,
    current: Option<RenderSession>,
    installed: u64,
}

impl RenderLifecycle {
    /// Create a lifecycle with no live session.
    #[must_use]
    pub const fn new(host: RenderHost) -> Self {
        Self {
            host,
            current: None,
            installed: 0,
        }
    }

    /// Host the sessions render into.
    #[must_use]
    pub const fn host(&self) -> &RenderHost {
        &self.host
    }

    /// The live session, if any.
    #[must_use]
    pub const fn current(&self) -> Option<&RenderSession> {
        self.current.as_ref()
    }

    /// Replace the live session, tearing down the previous one first.
    ///
    /// Sessions are numbered in install order, starting at 1.
    pub fn install(&mut self, mut session: RenderSession) {
        self.teardown_current();
        self.installed += 1;
        session.id = SessionId(self.installed);
        tracing::debug!(session = %session.id, "Installing render session");
        self.current = Some(session);
    }

    /// Cancel the loop, dispose the renderer, and detach the surface node.
    ///
    /// Returns true if a session was torn down.
    pub fn teardown_current(&mut self) -> bool {
        let Some(session) = self.current.take() else {
            return false;
        };
        tracing::debug!(session = %session.id, "Tearing down render session");

        if let Some(token) = session.loop_token {
            self.host.scheduler.cancel(token);
        }
        if let Err(e) = self.host.backend.dispose_renderer(session.renderer) {
            tracing::warn!(session = %session.id, "Failed to dispose renderer: {e}");
        }
        if let Some(node) = session.dom_node {
            if let Err(e) = self.host.surface.detach(node) {
                tracing::warn!(session = %session.id, "Failed to detach surface node: {e}");
            }
        }

        // Anything else the code created but did not bind.
        let mut rest = session.resources;
        rest.loops.retain(|t| Some(*t) != session.loop_token);
        rest.renderers.retain(|r| *r != session.renderer);
        rest.attached.retain(|n| Some(*n) != session.dom_node);
        if !rest.is_empty() {
            self.host.release(&rest);
        }
        true
    }

    /// Match the live session to the container's current size.
    ///
    /// No-op without a session or while the container has no area.
    ///
    /// # Errors
    /// Returns error if the backend rejects the camera or renderer update.
    pub fn on_resize(&self) -> Result<(), BackendError> {
        let size = self.host.surface.size();
        self.resize_to(size)
    }

    /// Apply `size` to the live session's camera and renderer.
    ///
    /// # Errors
    /// Returns error if the backend rejects the camera or renderer update.
    pub fn resize_to(&self, size: SurfaceSize) -> Result<(), BackendError> {
        let Some(session) = &self.current else {
            return Ok(());
        };
        if size.is_empty() {
            tracing::debug!("Container has no area, skipping resize");
            return Ok(());
        }
        let backend = &self.host.backend;
        backend.set_camera_aspect(session.camera, size.aspect())?;
        backend.update_projection(session.camera)?;
        backend.set_renderer_size(session.renderer, size.width, size.height)
    }
}

impl Drop for RenderLifecycle {
    fn drop(&mut self) {
        self.teardown_current();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use livescene_core::{
        FrameScheduler, OwnedResources, RenderBackend, RenderSurface,
        headless::{HeadlessBackend, HeadlessSurface, HostEvent, Journal, ManualScheduler},
        render::{CameraSpec, RendererOptions},
    };

    use super::*;

    struct Fixture {
        backend: Arc<HeadlessBackend>,
        surface: Arc<HeadlessSurface>,
        scheduler: Arc<ManualScheduler>,
        journal: Journal,
        host: RenderHost,
    }

    fn fixture() -> Fixture {
        let journal = Journal::new();
        let backend = Arc::new(HeadlessBackend::with_journal(journal.clone()));
        let surface = Arc::new(HeadlessSurface::with_journal(
            SurfaceSize::new(400, 200),
            journal.clone(),
        ));
        let scheduler = Arc::new(ManualScheduler::with_journal(journal.clone()));
        let host = RenderHost::new(backend.clone(), surface.clone(), scheduler.clone());
        Fixture {
            backend,
            surface,
            scheduler,
            journal,
            host,
        }
    }

    /// Build a session the way scene code would: attached renderer plus a loop.
    fn session(fx: &Fixture) -> RenderSession {
        let scene = fx.backend.create_scene().unwrap();
        let camera = fx
            .backend
            .create_camera(CameraSpec {
                fov: 75.0,
                aspect: 1.0,
                near: 0.1,
                far: 1000.0,
            })
            .unwrap();
        let renderer = fx
            .backend
            .create_renderer(RendererOptions::default())
            .unwrap();
        let dom = fx.backend.dom_element(renderer).unwrap();
        fx.surface.attach(dom).unwrap();
        let token = fx.scheduler.start(Box::new(|| Ok(())));

        RenderSession {
            id: SessionId::default(),
            scene,
            camera,
            renderer,
            controls: None,
            loop_token: Some(token),
            dom_node: Some(dom),
            resources: OwnedResources {
                loops: vec![token],
                renderers: vec![renderer],
                attached: vec![dom],
            },
        }
    }

    #[test]
    fn test_install_tears_down_previous_first() {
        let fx = fixture();
        let mut lifecycle = RenderLifecycle::new(fx.host.clone());

        let first = session(&fx);
        lifecycle.install(first.clone());
        let second = session(&fx);
        fx.journal.clear();
        lifecycle.install(second.clone());

        assert_eq!(
            fx.journal.events(),
            vec![
                HostEvent::LoopCancelled(first.loop_token.unwrap()),
                HostEvent::RendererDisposed(first.renderer),
                HostEvent::NodeDetached(first.dom_node.unwrap()),
            ]
        );
        let current = lifecycle.current().unwrap();
        assert_eq!(current.renderer, second.renderer);
        assert_eq!(current.id, SessionId(2));
        assert_eq!(fx.surface.attached(), vec![second.dom_node.unwrap()]);
        assert_eq!(fx.scheduler.active(), vec![second.loop_token.unwrap()]);
        assert_eq!(fx.backend.live_renderers(), vec![second.renderer]);
    }

    #[test]
    fn test_sessions_numbered_in_install_order() {
        let fx = fixture();
        let mut lifecycle = RenderLifecycle::new(fx.host.clone());

        for expected in 1..=3 {
            lifecycle.install(session(&fx));
            assert_eq!(lifecycle.current().unwrap().id, SessionId(expected));
        }
        lifecycle.teardown_current();
        lifecycle.install(session(&fx));
        assert_eq!(lifecycle.current().unwrap().id, SessionId(4));
    }

    #[test]
    fn test_teardown_releases_unbound_resources() {
        let fx = fixture();
        let mut lifecycle = RenderLifecycle::new(fx.host.clone());

        let mut live = session(&fx);
        let stray = fx.scheduler.start(Box::new(|| Ok(())));
        live.resources.loops.push(stray);
        lifecycle.install(live);

        assert!(lifecycle.teardown_current());
        assert!(fx.scheduler.active().is_empty());
        assert!(fx.surface.attached().is_empty());
        assert!(fx.backend.live_renderers().is_empty());
        assert!(!lifecycle.teardown_current());
    }

    #[test]
    fn test_resize_is_idempotent() {
        let fx = fixture();
        let mut lifecycle = RenderLifecycle::new(fx.host.clone());
        let live = session(&fx);
        lifecycle.install(live.clone());

        fx.surface.set_size(SurfaceSize::new(1024, 512));
        lifecycle.on_resize().unwrap();
        let camera = fx.backend.camera(live.camera).unwrap();
        let renderer = fx.backend.renderer(live.renderer).unwrap();

        for _ in 0..10 {
            lifecycle.on_resize().unwrap();
        }
        assert_eq!(fx.backend.camera(live.camera).unwrap(), camera);
        assert_eq!(fx.backend.renderer(live.renderer).unwrap(), renderer);
        assert!((camera.spec.aspect - 2.0).abs() < f64::EPSILON);
        assert!((camera.projection_aspect - 2.0).abs() < f64::EPSILON);
        assert_eq!(renderer.size, SurfaceSize::new(1024, 512));
    }

    #[test]
    fn test_resize_without_session_or_area_is_noop() {
        let fx = fixture();
        let mut lifecycle = RenderLifecycle::new(fx.host.clone());
        lifecycle.on_resize().unwrap();

        let live = session(&fx);
        lifecycle.install(live.clone());
        let before = fx.backend.camera(live.camera).unwrap();
        lifecycle.resize_to(SurfaceSize::new(0, 300)).unwrap();
        assert_eq!(fx.backend.camera(live.camera).unwrap(), before);
    }

    #[test]
    fn test_drop_tears_down() {
        let fx = fixture();
        let mut lifecycle = RenderLifecycle::new(fx.host.clone());
        lifecycle.install(session(&fx));
        drop(lifecycle);
        assert!(fx.scheduler.active().is_empty());
        assert!(fx.surface.attached().is_empty());
    }
}
