//! Ember Engine demos
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p ember-demo -- <DEMO> [OPTIONS]
//! ```
//!
//! ## Demos
//!
//! - `simple-window`: Clear-only window
//! - `simple-shape`: One white triangle
//! - `depth-test`: Three overlapping triangles at two depths
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod scenes;

use anyhow::{bail, Context};
use ember_app::{Engine, EngineConfig};

use crate::scenes::Demo;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let (demo, config) = parse_args(&args)?;

    let mut engine = Engine::new(config)?;
    engine.load_scene(&demo.scene())?;
    let stats = engine.run()?;
    tracing::info!(demo = demo.name(), frames = stats.presented, "Demo finished");
    Ok(())
}

fn parse_args(args: &[String]) -> anyhow::Result<(Demo, EngineConfig)> {
    let name = &args[0];
    let Some(demo) = Demo::from_name(name) else {
        bail!("Unknown demo '{name}' (run with --help for the list)");
    };

    let mut config = EngineConfig::new(demo.title()).with_size(WIDTH, HEIGHT);
    let mut rest = args[1..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--vsync" => config = config.with_vsync(true),
            "--no-msaa" => config = config.with_msaa(false),
            "--no-depth" => config = config.with_depth(false),
            "--validation" => config = config.with_validation(true),
            "--frames-in-flight" => {
                let frames = rest
                    .next()
                    .context("--frames-in-flight needs a value")?
                    .parse::<usize>()
                    .context("--frames-in-flight must be a positive integer")?;
                config = config.with_frames_in_flight(frames.max(1));
            }
            other => bail!("Unknown option '{other}'"),
        }
    }

    Ok((demo, config))
}

fn print_help() {
    eprintln!(
        "Ember Engine demos

USAGE:
    cargo run -p ember-demo -- <DEMO> [OPTIONS]

DEMOS:
    simple-window           Clear-only window
    simple-shape            One white triangle
    depth-test              Three overlapping triangles at two depths

OPTIONS:
    --vsync                 Force FIFO presentation
    --no-msaa               Disable multisampling
    --no-depth              Disable the depth buffer
    --validation            Enable Vulkan validation layers
    --frames-in-flight <N>  Frames recorded ahead of the GPU (default: one per image)
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_demo_and_options() {
        let (demo, config) =
            parse_args(&args(&["depth-test", "--vsync", "--frames-in-flight", "2"])).unwrap();
        assert_eq!(demo, Demo::DepthTest);
        assert!(config.vsync);
        assert_eq!(config.frames_in_flight, Some(2));
        assert_eq!(config.title, "Ember - Depth Test");
    }

    #[test]
    fn rejects_unknown_input() {
        assert!(parse_args(&args(&["spinning-cube"])).is_err());
        assert!(parse_args(&args(&["simple-shape", "--fast"])).is_err());
        assert!(parse_args(&args(&["simple-shape", "--frames-in-flight"])).is_err());
    }
}
