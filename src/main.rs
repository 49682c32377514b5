use clap::Parser;
use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chip8_harness::config::{DEFAULT_CELL_SIZE, DEFAULT_FRAME_RATE, DEFAULT_STEPS_PER_TICK};
use chip8_harness::display::TermSurface;
use chip8_harness::driver::PacedClock;
use chip8_harness::input::{Keymap, TermInput};
use chip8_harness::loader::fetch_program;
use chip8_harness::memory::{FRAMEBUFFER_HEIGHT, FRAMEBUFFER_WIDTH};
use chip8_harness::sound::{Mute, Sound, Speaker, DEFAULT_PITCH};
use chip8_harness::{Chip8Interpreter, Harness, HarnessConfig};

#[derive(Parser, Debug)]
#[command(
    name = "chip8-harness",
    version,
    about = "Run a CHIP-8 program in the terminal",
    long_about = "Run a CHIP-8 program in the terminal.\n\nKeys 0123/qwer/asdf/zxcv are hex keys 0-F, row by row. Esc or ctrl-c quits.\nSet RUST_LOG (e.g. RUST_LOG=debug) together with --log-file to see what the harness is doing."
)]
struct Cli {
    /// Program image to load at 0x200.
    rom: PathBuf,

    /// Instructions executed per rendered frame.
    #[arg(long, default_value_t = DEFAULT_STEPS_PER_TICK)]
    steps_per_tick: usize,

    /// Surface pixels per machine pixel.
    #[arg(long, default_value_t = DEFAULT_CELL_SIZE)]
    cell_size: u32,

    /// Frames per second.
    #[arg(long, default_value_t = DEFAULT_FRAME_RATE)]
    fps: u32,

    /// Show the register panel next to the screen.
    #[arg(long)]
    diagnostics: bool,

    /// Play the tone through the PC speaker.
    #[arg(long)]
    sound: bool,

    /// Tone frequency in Hz, with --sound.
    #[arg(long, default_value_t = DEFAULT_PITCH)]
    pitch: u16,

    /// Stop after this many frames.
    #[arg(long)]
    ticks: Option<u64>,

    /// Write logs here instead of stderr (stderr fights with the screen).
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(File::create(path)?))
            .init(),
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    // the read runs while the terminal is being set up
    let pending = fetch_program(&cli.rom);

    let config = HarnessConfig::default()
        .steps_per_tick(cli.steps_per_tick)
        .cell_size(cli.cell_size)
        .frame_rate(cli.fps)
        .diagnostics(cli.diagnostics)
        .sound(cli.sound)
        .max_ticks(cli.ticks);
    let mut harness = Harness::create(Chip8Interpreter::new(), Keymap::default(), config);
    harness.start()?;
    harness.await_program(pending)?;
    info!(rom = %cli.rom.display(), "starting");

    let mut sound: Box<dyn Sound> = if cli.sound {
        Box::new(Speaker::with_pitch(cli.pitch))
    } else {
        Box::new(Mute)
    };
    let mut clock = PacedClock::new(cli.fps);
    let result = {
        let mut surface = TermSurface::new(
            FRAMEBUFFER_WIDTH as u32,
            FRAMEBUFFER_HEIGHT as u32,
            cli.cell_size,
        )?;
        let mut input = TermInput::new(cli.fps)?;
        harness.run(&mut surface, sound.as_mut(), &mut input, &mut clock)
    };

    // shove some junk on stdout to stop the cli messing up the last frame
    for _ in 0..(FRAMEBUFFER_HEIGHT / 2 + 4) {
        println!();
    }
    result?;
    Ok(())
}
