//! Mock generation service.
//!
//! Run with: cargo run -p livescene-mock-service [ADDR]
//!
//! Serves `/ws`, `/generate`, and `/modify` on `127.0.0.1:8000` by default.
//! Prompts are matched against a few keywords (colors, shapes, "faster",
//! "slower") to build a scene script.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use livescene_core::{GeneratorError, SceneGenerator};
use livescene_transport::service::create_service_router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const COLORS: &[(&str, &str)] = &[
    ("red", "0xff0000"),
    ("green", "0x00ff00"),
    ("blue", "0x0000ff"),
    ("yellow", "0xffff00"),
    ("purple", "0x800080"),
    ("orange", "0xffa500"),
    ("white", "0xffffff"),
];

const SPIN: f64 = 0.01;

fn color_in(prompt: &str) -> Option<&'static str> {
    let prompt = prompt.to_lowercase();
    COLORS
        .iter()
        .find(|(name, _)| prompt.contains(name))
        .map(|(_, hex)| *hex)
}

fn geometry_in(prompt: &str) -> &'static str {
    let prompt = prompt.to_lowercase();
    if prompt.contains("sphere") || prompt.contains("ball") {
        "sphere_geometry(1, 32, 16)"
    } else if prompt.contains("plane") || prompt.contains("floor") {
        "plane_geometry(2, 2)"
    } else {
        "box_geometry(1, 1, 1)"
    }
}

fn scene_script(geometry: &str, color: &str, spin: f64) -> String {
    format!(
        r"scene = new_scene();
scene.set_background(0x111111);

camera = perspective_camera(75, width / height, 0.1, 1000);
camera.set_position(0, 0, 5);

renderer = new_renderer(#{{ antialias: true }});
renderer.set_size(width, height);
container.append_child(renderer.dom_element);

controls = orbit_controls(camera, renderer);

let subject = mesh({geometry}, standard_material({color}));
scene.add(subject);
scene.add(ambient_light(0xffffff, 0.4));
let sun = directional_light(0xffffff, 1.0);
sun.set_position(5, 5, 5);
scene.add(sun);

animation_id = start_loop(|| {{
    subject.rotate_x({spin});
    subject.rotate_y({spin});
    controls.update();
    renderer.render(scene, camera);
}});
"
    )
}

/// Replace the hex literal following the first `_material(`.
fn recolor(code: &str, color: &str) -> Option<String> {
    let start = code.find("_material(")? + "_material(".len();
    let len = code[start..].find(')')?;
    Some(format!("{}{color}{}", &code[..start], &code[start + len..]))
}

/// Scale every `rotate_*` step by `factor`.
fn respin(code: &str, factor: f64) -> Option<String> {
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    let mut changed = false;
    while let Some(pos) = rest.find(".rotate_") {
        let open = pos + rest[pos..].find('(')? + 1;
        let close = open + rest[open..].find(')')?;
        let step: f64 = rest[open..close].trim().parse().ok()?;
        out.push_str(&rest[..open]);
        out.push_str(&(step * factor).to_string());
        rest = &rest[close..];
        changed = true;
    }
    out.push_str(rest);
    changed.then_some(out)
}

struct CannedGenerator;

#[async_trait]
impl SceneGenerator for CannedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        let color = color_in(prompt).unwrap_or("0x44aa88");
        tracing::info!(prompt, color, "generate");
        Ok(scene_script(geometry_in(prompt), color, SPIN))
    }

    async fn modify(&self, prompt: &str, original_code: &str) -> Result<String, GeneratorError> {
        tracing::info!(prompt, "modify");
        let lower = prompt.to_lowercase();
        let modified = if let Some(color) = color_in(prompt) {
            recolor(original_code, color)
        } else if lower.contains("faster") {
            respin(original_code, 2.0)
        } else if lower.contains("slower") {
            respin(original_code, 0.5)
        } else {
            None
        };
        modified.ok_or_else(|| {
            GeneratorError::Failed(format!("Could not apply the modification: {prompt}"))
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let addr: SocketAddr = match std::env::args().nth(1) {
        Some(arg) => arg.parse().with_context(|| format!("Invalid address: {arg}"))?,
        None => SocketAddr::from(([127, 0, 0, 1], 8000)),
    };

    let app = create_service_router(Arc::new(CannedGenerator));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Generation service listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
