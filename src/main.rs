//! CLI entry point for fgen
//!
//! ```bash
//! fgen idn --resource GPIB0::10::INSTR
//! fgen config > fgen.toml
//! fgen catalog --json
//! fgen set frequency 1000
//! fgen set waveform squ
//! fgen upload 0 kick.wav --name KICK --points 4096
//! fgen delete KICK
//! fgen note 69
//! fgen --simulate upload 1 pad.wav
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use fgen::instrument::note_status;
use fgen::{Instrument, NoteOn};
use fgen_core::{logging, FgenConfig};
use fgen_driver_hp33120a::{Param, ParamKind};

#[derive(Parser)]
#[command(name = "fgen")]
#[command(about = "Control an HP 33120A function/arbitrary waveform generator", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// VISA resource, overrides the configuration
    #[arg(long, global = true)]
    resource: Option<String>,

    /// Run against the built-in simulator instead of VISA
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,

    /// Print the *IDN? response
    Idn,

    /// List resident waveforms
    Catalog {
        #[arg(long)]
        json: bool,
    },

    /// Set one parameter, e.g. `set frequency 440` or `set am-source ext`
    Set { param: String, value: String },

    /// Upload a WAV file into an ARB slot and play it
    Upload {
        slot: usize,
        wav: PathBuf,
        /// Waveform name stored on the instrument
        #[arg(long)]
        name: Option<String>,
        /// Target point count (8..=16000)
        #[arg(long)]
        points: Option<usize>,
    },

    /// Delete a user waveform from non-volatile memory
    Delete { name: String },

    /// Tune the carrier to a MIDI note
    Note {
        note: u8,
        #[arg(long, default_value = "100")]
        velocity: u8,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FgenConfig::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => FgenConfig::load().context("Failed to load configuration")?,
    };
    if let Some(resource) = &cli.resource {
        config.instrument.resource = resource.clone();
    }
    // No instrument needed to dump the configuration
    if matches!(cli.command, Commands::Config) {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let instrument = if cli.simulate {
        Instrument::simulated(config)?.0
    } else {
        Instrument::open(config)?
    };
    instrument.set_log_sink(Some(Arc::new(|line: &str| println!("  {}", line))));
    instrument.connect()?;

    let result = run(&instrument, cli.command);
    instrument.flush_callbacks();
    instrument.shutdown();
    result
}

fn run(instrument: &Instrument, command: Commands) -> Result<()> {
    let driver = instrument.driver();
    match command {
        Commands::Config => print!("{}", instrument.config().to_toml_string()?),
        Commands::Idn => {
            let idn = driver.query_idn()?;
            if idn.is_empty() {
                bail!("Instrument did not answer *IDN?");
            }
            println!("{}", idn);
        }
        Commands::Catalog { json } => {
            let catalog = driver.waveform_catalog()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                println!("Standard: {}", catalog.standard.join(", "));
                println!("Built-in: {}", catalog.builtin.join(", "));
                println!("User:     {}", catalog.user.join(", "));
                println!("Volatile: {}", if catalog.volatile { "loaded" } else { "empty" });
                match driver.free_slots()? {
                    Some(free) => println!("Free non-volatile slots: {}", free),
                    None => println!("Free non-volatile slots: unknown"),
                }
            }
        }
        Commands::Set { param, value } => {
            let kind: ParamKind = param.parse()?;
            let param = Param::parse(kind, &value)?;
            driver
                .set_param(param)
                .with_context(|| format!("Failed to set {}", kind))?;
            println!("{} = {}", kind, value);
        }
        Commands::Upload {
            slot,
            wav,
            name,
            points,
        } => {
            let arb = instrument.arb();
            if let Some(name) = name {
                arb.set_slot_name(slot, &name)?;
            }
            if let Some(points) = points {
                arb.set_point_count(slot, points)?;
            }
            let message = instrument.upload_file(slot, &wav)?;
            println!("{}", message);
        }
        Commands::Delete { name } => {
            instrument
                .arb()
                .delete_from_device(&name)
                .with_context(|| format!("Failed to delete {}", name))?;
            println!("Deleted {}", name.to_ascii_uppercase());
        }
        Commands::Note { note, velocity } => {
            let Some(hz) = instrument.note_on(NoteOn { note, velocity }) else {
                bail!("Note {} ignored (velocity 0 or not connected)", note);
            };
            println!("{}", note_status(note, hz));
            // Let the pipeline worker apply the post before shutdown
            std::thread::sleep(instrument.config().pipeline.wake_interval() * 2);
        }
    }
    Ok(())
}
