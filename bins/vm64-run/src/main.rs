//! `vm64-run <image>`: load a flat binary image into guest RAM at physical
//! offset 0 and run it until HLT or a step budget is exceeded.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, Context};
use tracing_subscriber::EnvFilter;
use vm64_core::Cpu;
use vm64_devices::{Framebuffer, GpuControl, Keyboard, SharedKeyboard};

/// Vector the sample keyboard device raises when it has a pending byte.
const KEYBOARD_VECTOR: u16 = 11;

/// Default RAM size: 1 MiB, enough headroom for a small test image plus the
/// reserved supervisor stack page.
const DEFAULT_RAM_CAPACITY: u64 = 1024 * 1024;

/// Default step budget before the loader gives up waiting for a HLT.
const DEFAULT_MAX_STEPS: u64 = 1_000_000;

#[derive(Parser, Debug)]
#[command(name = "vm64-run", version, about = "Run a flat binary image on the vm64 emulator core")]
struct Cli {
    /// Path to the flat binary image to load at physical offset 0.
    image: PathBuf,

    /// Guest RAM capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_RAM_CAPACITY)]
    ram: u64,

    /// Abort with an error if no HLT has executed after this many steps.
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: u64,
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> eyre::Result<()> {
    install_tracing();
    let cli = Cli::parse();

    let image = fs::read(&cli.image)
        .wrap_err_with(|| format!("reading image {}", cli.image.display()))?;

    let mut cpu = Cpu::new(cli.ram)?;
    cpu.ram.load_image(&image)?;

    let keyboard = Arc::new(Keyboard::new());
    cpu.mmio.register(Box::new(SharedKeyboard(keyboard.clone())));
    cpu.mmio.register(Box::new(GpuControl::new()));
    cpu.mmio.register(Box::new(Framebuffer::new()));

    tracing::info!(bytes = image.len(), ram = cli.ram, "loaded image");

    let mut steps: u64 = 0;
    loop {
        if cpu.halted.load(Ordering::Relaxed) {
            tracing::info!("halt flag set by host, stopping");
            break;
        }
        if cpu.paused.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }

        if keyboard.take_pending() {
            let outcome = cpu.irc.raise(&mut cpu.regs, &cpu.ram, KEYBOARD_VECTOR)?;
            if outcome == vm64_core::interrupt::RaiseOutcome::TripleFault {
                tracing::warn!("triple fault raising keyboard interrupt, resetting CPU");
                cpu.reset();
            }
        }

        let continue_running = cpu.step()?;
        cpu.publish_snapshot();
        if !continue_running {
            tracing::info!(steps, "HLT reached");
            break;
        }
        steps += 1;
        if steps > cli.max_steps {
            return Err(eyre!("timeout: no HLT after {} steps", cli.max_steps));
        }
    }

    Ok(())
}
