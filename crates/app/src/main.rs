//! Entry point for objview.
//! Logging + CLI flags -> SceneConfig -> window (or headless) run.

use anyhow::Result;
use corelib::{
    Vec3,
    camera::Camera,
    config::{SceneConfig, ShaderPaths},
};

fn parse_backend_arg() -> wgpu::Backends {
    // Accept: --gpu-backend=auto|vulkan|dx12|metal|gl
    let mut backends = wgpu::Backends::all(); // default = auto
    for arg in std::env::args() {
        if let Some(val) = arg.strip_prefix("--gpu-backend=") {
            backends = match val.to_ascii_lowercase().as_str() {
                "auto" => wgpu::Backends::all(),
                "vulkan" | "vk" => wgpu::Backends::VULKAN,
                "dx12" | "d3d12" => wgpu::Backends::DX12,
                "metal" | "mtl" => wgpu::Backends::METAL,
                "gl" | "opengl" | "gles" => wgpu::Backends::GL,
                other => {
                    log::warn!("Unknown backend '{other}', falling back to auto.");
                    wgpu::Backends::all()
                }
            };
        }
    }
    backends
}

fn parse_size_args() -> (u32, u32) {
    let mut w: Option<u32> = None;
    let mut h: Option<u32> = None;

    for arg in std::env::args() {
        if let Some(v) = arg.strip_prefix("--size=") {
            if let Some((sw, sh)) = v.split_once('x').or_else(|| v.split_once('X')) {
                if let (Ok(pw), Ok(ph)) = (sw.parse::<u32>(), sh.parse::<u32>()) {
                    w = Some(pw);
                    h = Some(ph);
                }
            }
        } else if let Some(v) = arg.strip_prefix("--width=") {
            if let Ok(pw) = v.parse::<u32>() {
                w = Some(pw);
            }
        } else if let Some(v) = arg.strip_prefix("--height=") {
            if let Ok(ph) = v.parse::<u32>() {
                h = Some(ph);
            }
        }
    }

    let ww = w.unwrap_or(1280).max(1);
    let hh = h.unwrap_or(720).max(1);
    (ww, hh)
}

/// `x,y,z` -> Vec3.
fn parse_vec3(value: &str) -> Option<Vec3> {
    let mut parts = value.split(',').map(|p| p.trim().parse::<f32>());
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y)), Some(Ok(z)), None) => Some(Vec3::new(x, y, z)),
        _ => None,
    }
}

fn parse_scene_args<I: IntoIterator<Item = String>>(args: I) -> SceneConfig {
    let mut config = SceneConfig::default();
    let mut shaders = ShaderPaths::default();
    let mut camera = Camera::default();

    for arg in args {
        if let Some(v) = arg.strip_prefix("--obj=") {
            config = config.with_mesh_path(v);
        } else if let Some(v) = arg.strip_prefix("--vertex-shader=") {
            shaders.vertex = v.into();
        } else if let Some(v) = arg.strip_prefix("--fragment-shader=") {
            shaders.fragment = v.into();
        } else if let Some(v) = arg.strip_prefix("--eye=") {
            match parse_vec3(v) {
                Some(eye) => camera = camera.with_eye(eye),
                None => log::warn!("Ignoring --eye={v}: expected x,y,z"),
            }
        } else if let Some(v) = arg.strip_prefix("--target=") {
            match parse_vec3(v) {
                Some(target) => camera = camera.with_target(target),
                None => log::warn!("Ignoring --target={v}: expected x,y,z"),
            }
        }
    }

    config.with_shaders(shaders).with_camera(camera)
}

/// `--headless` [`--frames=N`] -> Some(frames).
fn parse_headless_args() -> Option<u32> {
    let mut headless = false;
    let mut frames = 1u32;
    for arg in std::env::args() {
        if arg == "--headless" {
            headless = true;
        } else if let Some(v) = arg.strip_prefix("--frames=") {
            match v.parse::<u32>() {
                Ok(n) => frames = n,
                Err(_) => log::warn!("Bad frame count '{v}', drawing one frame."),
            }
        }
    }
    headless.then_some(frames)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let chosen = parse_backend_arg();
    let (width, height) = parse_size_args();
    let config = parse_scene_args(std::env::args().skip(1));
    log::info!(
        "Starting objview. Backend: {:?}, window_size={}x{}, mesh={}",
        chosen,
        width,
        height,
        config.mesh_path.display()
    );

    match parse_headless_args() {
        Some(frames) => platform::run_headless(config, width, height, frames)?,
        None => platform::run_with_renderer(chosen, width, height, config)?,
    }

    log::info!("Graceful shutdown. Bye!");
    Ok(())
}
