use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::PathBuf;

use chip8_host::display::{Geometry, RecordingSurface, TermSurface};
use chip8_host::input::{ScriptedInput, TermInput};
use chip8_host::logging::set_up_logging;
use chip8_host::{HostConfig, Runtime, Session};

/// Run a CHIP-8 program on an interpreter compiled to wasm.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// the compiled interpreter module
    #[arg(long, default_value = "rusty_chip_bg.wasm")]
    module: PathBuf,

    /// program image to load
    rom: PathBuf,

    /// TOML file with export names and run settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// frames per second
    #[arg(long)]
    frame_rate: Option<u32>,

    /// stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// seed for the module's random numbers
    #[arg(long)]
    seed: Option<u64>,

    /// no terminal canvas, no keyboard
    #[arg(long)]
    headless: bool,
}

impl Args {
    fn host_config(&self) -> anyhow::Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => HostConfig::from_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => HostConfig::default(),
        };
        if let Some(rate) = self.frame_rate {
            config.frame_rate = rate;
        }
        if self.max_frames.is_some() {
            config.max_frames = self.max_frames;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        config.headless |= self.headless;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    set_up_logging();
    let args = Args::parse();
    let config = args.host_config()?;

    let rom = fs::read(&args.rom).with_context(|| format!("reading {}", args.rom.display()))?;
    let runtime = Runtime::from_file(&args.module, &config)
        .with_context(|| format!("loading module {}", args.module.display()))?;

    let summary = if config.headless {
        let mut session = Session::new(runtime, RecordingSurface::new(), ScriptedInput::idle(), config)?;
        session.run(&rom)?
    } else {
        let input = TermInput::new()?;
        let surface = TermSurface::new(Geometry::CHIP8)?;
        let mut session = Session::new(runtime, surface, input, config)?;
        let summary = session.run(&rom)?;
        // leave the shell prompt below the last frame
        drop(session);
        println!();
        summary
    };

    eprintln!(
        "{} frames; {}",
        summary.frames,
        if summary.exited {
            "program exited"
        } else if summary.quit {
            "quit"
        } else {
            "frame limit reached"
        }
    );
    Ok(())
}
