//! Script engine construction and limits.

use rhai::{Engine, module_resolvers::DummyModuleResolver};
use serde::{Deserialize, Serialize};

/// Evaluation limits applied to every run.
///
/// A zero `max_operations` / `max_string_size` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_operations: u64,
    pub max_string_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_call_levels: 64,
            max_expr_depth: 256,
            max_operations: 0,
            max_string_size: 0,
        }
    }
}

/// Create a bare engine: limits applied, no module imports, no `eval`.
pub(crate) fn create_engine(limits: &SandboxLimits) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_operations(limits.max_operations);
    engine.set_max_string_size(limits.max_string_size);

    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");

    engine.on_print(|text| {
        tracing::info!("[scene] {text}");
    });
    engine.on_debug(|text, source, pos| {
        let loc = match (source, pos) {
            (Some(src), pos) if !pos.is_none() => format!(" ({src}:{pos})"),
            (Some(src), _) => format!(" ({src})"),
            (None, pos) if !pos.is_none() => format!(" ({pos})"),
            _ => String::new(),
        };
        tracing::debug!("[scene]{loc} {text}");
    });

    engine
}
