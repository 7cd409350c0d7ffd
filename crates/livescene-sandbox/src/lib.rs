//! Script sandbox for generated scene code.
//!
//! Scene code is a rhai script. It only sees a fixed set of host functions
//! (scene graph, camera, renderer, controls, animation loop) plus the
//! container, and must assign `scene`, `camera` and `renderer`.

mod bindings;
pub mod engine;
pub mod sandbox;

pub use engine::SandboxLimits;
pub use sandbox::ScriptSandbox;
