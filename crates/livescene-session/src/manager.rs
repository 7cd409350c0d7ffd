//! Session manager: turns user intents into requests and live scenes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use livescene_core::{
    BackendError, ClipboardError, ClipboardSink, FailureOrigin, GenerationRequest,
    GenerationResponse, GenerationTransport, NoticeStore, RenderHost, RenderSession,
    SandboxError, SceneSandbox, SessionPhase, UiState,
};
use tokio::sync::watch;

use crate::lifecycle::RenderLifecycle;

const EMPTY_GENERATE_PROMPT: &str = "Please enter a description of the 3D scene you want to create.";
const EMPTY_MODIFY_PROMPT: &str = "Please enter a description of how you want to modify the scene.";
const NOTHING_TO_COPY: &str = "No code to copy yet.";
const COPY_FAILED: &str = "Failed to copy code to clipboard.";
const COPIED: &str = "Copied!";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Why an intent did not produce a new scene.
///
/// Every variant has already been reported through the notice store.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    #[error("Empty prompt")]
    Validation,
    #[error("Modification is locked until a scene has been generated")]
    Locked,
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Scene code failed: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("A newer request superseded this one")]
    Superseded,
    #[error("No code to copy")]
    NothingToCopy,
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] ClipboardError),
    #[error("Resize failed: {0}")]
    Render(#[from] BackendError),
}

struct Inner {
    phase: SessionPhase,
    source_code: Option<String>,
    /// Number of the most recently dispatched request.
    latest_request: u64,
}

/// Orchestrates generation, evaluation, and the live render session.
pub struct SessionManager<T, X>
where
    T: GenerationTransport,
    X: SceneSandbox,
{
    transport: T,
    sandbox: X,
    inner: Mutex<Inner>,
    lifecycle: Mutex<RenderLifecycle>,
    ui: watch::Sender<UiState>,
    notices: Arc<NoticeStore>,
    clipboard: Arc<dyn ClipboardSink>,
}

impl<T, X> SessionManager<T, X>
where
    T: GenerationTransport,
    X: SceneSandbox,
{
    /// Create a new session manager.
    #[must_use]
    pub fn new(
        transport: T,
        sandbox: X,
        host: RenderHost,
        clipboard: Arc<dyn ClipboardSink>,
    ) -> Self {
        let (ui, _) = watch::channel(UiState::default());
        Self {
            transport,
            sandbox,
            inner: Mutex::new(Inner {
                phase: SessionPhase::Idle,
                source_code: None,
                latest_request: 0,
            }),
            lifecycle: Mutex::new(RenderLifecycle::new(host)),
            ui,
            notices: Arc::new(NoticeStore::new()),
            clipboard,
        }
    }

    /// The transport requests go through.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Current UI state.
    #[must_use]
    pub fn ui_state(&self) -> UiState {
        *self.ui.borrow()
    }

    /// Subscribe to UI state changes.
    #[must_use]
    pub fn subscribe_ui(&self) -> watch::Receiver<UiState> {
        self.ui.subscribe()
    }

    /// Current session phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        lock(&self.inner).phase
    }

    /// Code of the most recent successful response.
    #[must_use]
    pub fn source_code(&self) -> Option<String> {
        lock(&self.inner).source_code.clone()
    }

    /// User-visible notices.
    #[must_use]
    pub fn notices(&self) -> Arc<NoticeStore> {
        Arc::clone(&self.notices)
    }

    /// The session currently on screen.
    #[must_use]
    pub fn current_session(&self) -> Option<RenderSession> {
        lock(&self.lifecycle).current().cloned()
    }

    /// Generate a new scene from `prompt`.
    ///
    /// # Errors
    /// Returns error if the prompt is blank, the request fails, or the
    /// returned code cannot be evaluated.
    pub async fn on_generate_intent(&self, prompt: &str) -> Result<(), IntentError> {
        let Ok(request) = GenerationRequest::generate(prompt) else {
            self.notices.validation(EMPTY_GENERATE_PROMPT);
            return Err(IntentError::Validation);
        };
        self.dispatch(request, SessionPhase::AwaitingGenerate).await
    }

    /// Modify the current scene code according to `prompt`.
    ///
    /// # Errors
    /// Returns error if no scene has been generated yet, the prompt is blank,
    /// the request fails, or the returned code cannot be evaluated.
    pub async fn on_modify_intent(&self, prompt: &str) -> Result<(), IntentError> {
        if !self.ui_state().modification_unlocked {
            tracing::debug!("Modify requested before any scene was generated");
            return Err(IntentError::Locked);
        }
        let base_code = self.source_code().unwrap_or_default();
        let Ok(request) = GenerationRequest::modify(prompt, base_code) else {
            self.notices.validation(EMPTY_MODIFY_PROMPT);
            return Err(IntentError::Validation);
        };
        self.dispatch(request, SessionPhase::AwaitingModify).await
    }

    /// Copy the current scene code to the clipboard.
    ///
    /// # Errors
    /// Returns error if there is no code yet or the clipboard write fails.
    pub async fn on_copy_intent(&self) -> Result<(), IntentError> {
        let Some(code) = self.source_code().filter(|c| !c.is_empty()) else {
            self.notices.failure(NOTHING_TO_COPY);
            return Err(IntentError::NothingToCopy);
        };
        match self.clipboard.write_text(&code).await {
            Ok(()) => {
                self.notices.info(COPIED);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Clipboard write failed: {e}");
                self.notices.failure(COPY_FAILED);
                Err(e.into())
            }
        }
    }

    /// Match the live scene to the container size.
    ///
    /// # Errors
    /// Returns error if the rendering backend rejects the update.
    pub fn on_resize_intent(&self) -> Result<(), IntentError> {
        lock(&self.lifecycle).on_resize()?;
        Ok(())
    }

    async fn dispatch(
        &self,
        request: GenerationRequest,
        phase: SessionPhase,
    ) -> Result<(), IntentError> {
        let seq = {
            let mut inner = lock(&self.inner);
            inner.latest_request += 1;
            inner.phase = phase;
            inner.latest_request
        };
        self.ui.send_modify(|ui| ui.loading = true);
        tracing::info!(seq, kind = ?request.kind(), "Dispatching generation request");

        let response = self.transport.submit(request).await;

        let mut inner = lock(&self.inner);
        if inner.latest_request != seq {
            tracing::debug!(
                seq,
                latest = inner.latest_request,
                "Dropping response to superseded request"
            );
            return Err(IntentError::Superseded);
        }
        let result = self.apply(&mut inner, response);
        inner.phase = SessionPhase::Idle;
        drop(inner);

        self.ui.send_modify(|ui| {
            ui.loading = false;
            if result.is_ok() {
                ui.modification_unlocked = true;
            }
        });
        result
    }

    fn apply(&self, inner: &mut Inner, response: GenerationResponse) -> Result<(), IntentError> {
        let code = match response {
            GenerationResponse::Success { code } => code,
            GenerationResponse::Failure { message, origin } => {
                tracing::warn!(?origin, "Generation failed: {message}");
                return Err(match origin {
                    FailureOrigin::Service => {
                        self.notices.failure(format!("Error: {message}"));
                        IntentError::Generation(message)
                    }
                    FailureOrigin::Transport => {
                        self.notices.failure(message.clone());
                        IntentError::Transport(message)
                    }
                });
            }
        };
        inner.source_code = Some(code.clone());

        let mut lifecycle = lock(&self.lifecycle);
        // The old scene goes first, so failing code leaves nothing running.
        lifecycle.teardown_current();
        match self.sandbox.run(&code, lifecycle.host()) {
            Ok(session) => {
                lifecycle.install(session);
                if let Some(live) = lifecycle.current() {
                    tracing::info!(session = %live.id, "Scene installed");
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Scene code failed: {e}");
                self.notices
                    .failure(format!("Error rendering the scene: {e}"));
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use livescene_core::{
        ChannelState, MemoryClipboard, Notice, SurfaceSize,
        headless::{HeadlessBackend, HeadlessSurface, HostEvent, Journal, ManualScheduler},
    };
    use livescene_sandbox::ScriptSandbox;
    use tokio::sync::Notify;

    use super::*;

    /// Transport that answers from a queue and records what it was sent.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<(GenerationResponse, Option<Arc<Notify>>)>>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedTransport {
        fn reply(&self, response: GenerationResponse) {
            lock(&self.replies).push_back((response, None));
        }

        /// Queue a reply that is only delivered once `gate` is notified.
        fn reply_after(&self, response: GenerationResponse, gate: Arc<Notify>) {
            lock(&self.replies).push_back((response, Some(gate)));
        }

        fn seen(&self) -> Vec<GenerationRequest> {
            lock(&self.seen).clone()
        }
    }

    #[async_trait]
    impl GenerationTransport for ScriptedTransport {
        async fn submit(&self, request: GenerationRequest) -> GenerationResponse {
            lock(&self.seen).push(request);
            let next = lock(&self.replies).pop_front();
            let Some((response, gate)) = next else {
                return GenerationResponse::transport_failure("no reply queued");
            };
            if let Some(gate) = gate {
                gate.notified().await;
            }
            response
        }

        fn state(&self) -> ChannelState {
            ChannelState::Open
        }
    }

    struct BrokenClipboard;

    #[async_trait]
    impl ClipboardSink for BrokenClipboard {
        async fn write_text(&self, _text: &str) -> Result<(), ClipboardError> {
            Err(ClipboardError::Unavailable("denied".to_string()))
        }
    }

    fn cube_code(color: &str) -> String {
        format!(
            r"
            scene = new_scene();
            camera = perspective_camera(75, width / height, 0.1, 1000);
            camera.set_position(0, 0, 5);
            renderer = new_renderer();
            renderer.set_size(width, height);
            container.append_child(renderer.dom_element);
            let cube = mesh(box_geometry(1, 1, 1), basic_material({color}));
            scene.add(cube);
            animation_id = start_loop(|| {{
                cube.rotate_y(0.01);
                renderer.render(scene, camera);
            }});
            "
        )
    }

    struct Harness {
        manager: Arc<SessionManager<Arc<ScriptedTransport>, ScriptSandbox>>,
        transport: Arc<ScriptedTransport>,
        backend: Arc<HeadlessBackend>,
        surface: Arc<HeadlessSurface>,
        scheduler: Arc<ManualScheduler>,
        journal: Journal,
    }

    fn harness_with(clipboard: Arc<dyn ClipboardSink>) -> Harness {
        let journal = Journal::new();
        let backend = Arc::new(HeadlessBackend::with_journal(journal.clone()));
        let surface = Arc::new(HeadlessSurface::with_journal(
            SurfaceSize::new(800, 600),
            journal.clone(),
        ));
        let scheduler = Arc::new(ManualScheduler::with_journal(journal.clone()));
        let host = RenderHost::new(backend.clone(), surface.clone(), scheduler.clone());
        let transport = Arc::new(ScriptedTransport::default());
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&transport),
            ScriptSandbox::new(),
            host,
            clipboard,
        ));
        Harness {
            manager,
            transport,
            backend,
            surface,
            scheduler,
            journal,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryClipboard::new()))
    }

    #[tokio::test]
    async fn test_blank_prompt_is_never_dispatched() {
        let h = harness();
        for prompt in ["", "   ", "\n\t"] {
            assert!(matches!(
                h.manager.on_generate_intent(prompt).await,
                Err(IntentError::Validation)
            ));
        }
        assert!(h.transport.seen().is_empty());
        assert!(!h.manager.ui_state().loading);
        assert_eq!(
            h.manager.notices().last(),
            Some(Notice::Validation(EMPTY_GENERATE_PROMPT.to_string()))
        );
    }

    #[tokio::test]
    async fn test_blank_modify_prompt_is_never_dispatched() {
        let h = harness();
        h.transport.reply(GenerationResponse::success(cube_code("0xff0000")));
        h.manager.on_generate_intent("a red cube").await.unwrap();
        let live = h.manager.current_session().unwrap();

        for prompt in ["", "   ", "\n\t"] {
            assert!(matches!(
                h.manager.on_modify_intent(prompt).await,
                Err(IntentError::Validation)
            ));
        }
        assert_eq!(h.transport.seen().len(), 1);
        assert!(!h.manager.ui_state().loading);
        assert!(h.manager.ui_state().modification_unlocked);
        assert_eq!(h.manager.current_session(), Some(live));
        assert_eq!(
            h.manager.notices().last(),
            Some(Notice::Validation(EMPTY_MODIFY_PROMPT.to_string()))
        );
    }

    #[tokio::test]
    async fn test_red_cube_then_make_it_blue() {
        let h = harness();
        let red = cube_code("0xff0000");
        let blue = cube_code("0x0000ff");

        h.transport.reply(GenerationResponse::success(red.clone()));
        h.manager.on_generate_intent("a red cube").await.unwrap();
        assert!(h.manager.ui_state().modification_unlocked);
        let first = h.manager.current_session().unwrap();
        let first_loop = first.loop_token.unwrap();
        assert_eq!(h.scheduler.active(), vec![first_loop]);

        h.transport.reply(GenerationResponse::success(blue.clone()));
        h.manager.on_modify_intent("make it blue").await.unwrap();

        let seen = h.transport.seen();
        assert_eq!(seen[1].prompt(), "make it blue");
        assert_eq!(seen[1].base_code(), Some(red.as_str()));

        let second = h.manager.current_session().unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(h.manager.source_code(), Some(blue));
        assert_eq!(
            h.journal
                .count(|e| *e == HostEvent::LoopCancelled(first_loop)),
            1
        );
        assert_eq!(h.scheduler.active(), vec![second.loop_token.unwrap()]);
        assert_eq!(h.surface.attached(), vec![second.dom_node.unwrap()]);
        assert_eq!(h.backend.live_renderers(), vec![second.renderer]);
        assert_eq!(h.manager.phase(), SessionPhase::Idle);
        assert!(!h.manager.ui_state().loading);
    }

    #[tokio::test]
    async fn test_teardown_precedes_every_install() {
        let h = harness();
        for n in 0..4 {
            h.transport
                .reply(GenerationResponse::success(cube_code(&n.to_string())));
            h.manager.on_generate_intent("cube").await.unwrap();
        }

        let events = h.journal.events();
        let created = events
            .iter()
            .filter(|e| matches!(e, HostEvent::RendererCreated(_)))
            .count();
        let disposed = events
            .iter()
            .filter(|e| matches!(e, HostEvent::RendererDisposed(_)))
            .count();
        assert_eq!(created, 4);
        assert_eq!(disposed, 3);
        assert_eq!(h.surface.attached().len(), 1);
        assert_eq!(h.scheduler.active().len(), 1);

        // Each renderer after the first is created only once the previous one is gone.
        let mut live = 0;
        for event in events {
            match event {
                HostEvent::RendererCreated(_) => {
                    assert_eq!(live, 0);
                    live += 1;
                }
                HostEvent::RendererDisposed(_) => live -= 1,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_service_failure_keeps_modification_locked() {
        let h = harness();
        h.transport
            .reply(GenerationResponse::service_failure("model unavailable"));

        let err = h.manager.on_generate_intent("a red cube").await.unwrap_err();
        assert!(matches!(err, IntentError::Generation(msg) if msg == "model unavailable"));
        assert_eq!(
            h.manager.notices().last(),
            Some(Notice::Failure("Error: model unavailable".to_string()))
        );
        let ui = h.manager.ui_state();
        assert!(!ui.loading);
        assert!(!ui.modification_unlocked);
        assert!(matches!(
            h.manager.on_modify_intent("make it blue").await,
            Err(IntentError::Locked)
        ));
        assert_eq!(h.transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_shows_generic_text() {
        let h = harness();
        h.transport.reply(GenerationResponse::transport_failure(
            "An error occurred while generating the scene. Please try again.",
        ));

        let err = h.manager.on_generate_intent("a red cube").await.unwrap_err();
        assert!(matches!(err, IntentError::Transport(_)));
        assert_eq!(
            h.manager.notices().last().unwrap().text(),
            "An error occurred while generating the scene. Please try again."
        );
    }

    #[tokio::test]
    async fn test_throwing_code_leaves_no_session() {
        let h = harness();
        h.transport
            .reply(GenerationResponse::success(cube_code("0xff0000")));
        h.manager.on_generate_intent("a red cube").await.unwrap();
        let first = h.manager.current_session().unwrap();

        h.transport.reply(GenerationResponse::success(
            r#"renderer = new_renderer(); throw "bad scene";"#,
        ));
        let err = h.manager.on_modify_intent("break it").await.unwrap_err();
        assert!(matches!(err, IntentError::Sandbox(SandboxError::Runtime(_))));

        assert!(h.manager.current_session().is_none());
        assert!(h.backend.live_renderers().is_empty());
        assert!(h.surface.attached().is_empty());
        assert!(h.scheduler.active().is_empty());
        assert_eq!(
            h.journal
                .count(|e| *e == HostEvent::LoopCancelled(first.loop_token.unwrap())),
            1
        );
        assert!(
            h.manager
                .notices()
                .last()
                .unwrap()
                .text()
                .starts_with("Error rendering the scene: ")
        );
        // Still unlocked from the first success.
        assert!(h.manager.ui_state().modification_unlocked);
        assert!(!h.manager.ui_state().loading);
    }

    #[tokio::test]
    async fn test_first_attempt_sandbox_error_stays_locked() {
        let h = harness();
        h.transport
            .reply(GenerationResponse::success("scene = new_scene(;"));

        let err = h.manager.on_generate_intent("a red cube").await.unwrap_err();
        assert!(matches!(err, IntentError::Sandbox(SandboxError::Compile(_))));
        assert!(!h.manager.ui_state().modification_unlocked);
        assert_eq!(h.manager.source_code().as_deref(), Some("scene = new_scene(;"));
    }

    #[tokio::test]
    async fn test_superseded_response_is_dropped() {
        let h = harness();
        let gate = Arc::new(Notify::new());
        h.transport
            .reply_after(GenerationResponse::success(cube_code("0xff0000")), Arc::clone(&gate));
        h.transport
            .reply(GenerationResponse::success(cube_code("0x00ff00")));

        let manager = Arc::clone(&h.manager);
        let slow = tokio::spawn(async move { manager.on_generate_intent("slow").await });
        while h.transport.seen().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(h.manager.ui_state().loading);

        h.manager.on_generate_intent("fast").await.unwrap();
        gate.notify_one();
        assert!(matches!(slow.await.unwrap(), Err(IntentError::Superseded)));

        assert_eq!(h.manager.source_code(), Some(cube_code("0x00ff00")));
        assert_eq!(h.backend.live_renderers().len(), 1);
        assert!(!h.manager.ui_state().loading);
    }

    #[tokio::test]
    async fn test_copy_code() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let h = harness_with(clipboard.clone());

        assert!(matches!(
            h.manager.on_copy_intent().await,
            Err(IntentError::NothingToCopy)
        ));
        assert_eq!(
            h.manager.notices().last(),
            Some(Notice::Failure(NOTHING_TO_COPY.to_string()))
        );

        let code = cube_code("0xff0000");
        h.transport.reply(GenerationResponse::success(code.clone()));
        h.manager.on_generate_intent("a red cube").await.unwrap();
        h.manager.on_copy_intent().await.unwrap();
        assert_eq!(clipboard.contents(), Some(code));
        assert_eq!(
            h.manager.notices().last(),
            Some(Notice::Info(COPIED.to_string()))
        );
    }

    #[tokio::test]
    async fn test_copy_reports_clipboard_failure() {
        let h = harness_with(Arc::new(BrokenClipboard));
        h.transport
            .reply(GenerationResponse::success(cube_code("0xff0000")));
        h.manager.on_generate_intent("a red cube").await.unwrap();

        assert!(matches!(
            h.manager.on_copy_intent().await,
            Err(IntentError::Clipboard(_))
        ));
        assert_eq!(
            h.manager.notices().last(),
            Some(Notice::Failure(COPY_FAILED.to_string()))
        );
    }

    #[tokio::test]
    async fn test_resize_follows_container() {
        let h = harness();
        h.manager.on_resize_intent().unwrap();

        h.transport
            .reply(GenerationResponse::success(cube_code("0xff0000")));
        h.manager.on_generate_intent("a red cube").await.unwrap();
        let session = h.manager.current_session().unwrap();

        h.surface.set_size(SurfaceSize::new(300, 300));
        h.manager.on_resize_intent().unwrap();
        h.manager.on_resize_intent().unwrap();

        let camera = h.backend.camera(session.camera).unwrap();
        assert!((camera.projection_aspect - 1.0).abs() < f64::EPSILON);
        assert_eq!(
            h.backend.renderer(session.renderer).unwrap().size,
            SurfaceSize::new(300, 300)
        );
    }

    #[tokio::test]
    async fn test_ui_updates_are_observable() {
        let h = harness();
        let mut ui = h.manager.subscribe_ui();
        h.transport
            .reply(GenerationResponse::success(cube_code("0xff0000")));
        h.manager.on_generate_intent("a red cube").await.unwrap();

        assert!(ui.has_changed().unwrap());
        assert_eq!(
            *ui.borrow_and_update(),
            UiState {
                loading: false,
                modification_unlocked: true,
            }
        );
    }
}
