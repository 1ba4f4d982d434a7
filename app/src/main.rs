use std::io::{self, BufWriter, Write};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use common::*;
use ucode::*;

#[derive(Parser)]
#[command(name = "lutrom", version, about = "Generates the control store ROM for the microcoded CPU")]
struct Cli {
    /// Log more to stderr (-v info, -vv debug, -vvv trace). RUST_LOG wins if set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every non-zero entry as grouped binary
    Listing {
        /// Append the decoded micro-operations to each line
        #[arg(long)]
        annotate: bool,
    },
    /// Print the full table as a Logisim v2.0 raw image
    Logisim,
    /// Print the instruction table
    Isa,
    /// Print version and table statistics
    Info,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_isa<W: Write>(w: &mut W) -> anyhow::Result<()> {
    for (opcode, program) in isa()? {
        writeln!(w, "{:02x} {:<8} {} step(s)", opcode as u8, opcode.to_string(), program.len())?;
        for (step, word) in program.slot().iter().enumerate() {
            if step > program.len() + 1 {
                break;
            }
            writeln!(w, "    {}: {:08x} {}", step, word.bits(), word.mnemonics())?;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    match cli.command {
        Command::Listing { annotate } => {
            let store = ucode().context("building control store")?;
            render::write_listing(&store, &mut out, annotate).context("writing listing")?;
        }
        Command::Logisim => {
            let store = ucode().context("building control store")?;
            render::write_logisim(&store, &mut out).context("writing logisim image")?;
        }
        Command::Isa => print_isa(&mut out)?,
        Command::Info => {
            let store = ucode().context("building control store")?;
            writeln!(out, "ucode v{}.{}.{}", MAJOR_VERSION, MINOR_VERSION, PATCH_VERSION)?;
            writeln!(out, "fingerprint: {:08x}", store.fingerprint())?;
            writeln!(out, "populated:   {} / {}", store.populated(), ROM_SIZE)?;
        }
    }

    out.flush()?;
    Ok(())
}
