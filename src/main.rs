//! byteport command line
//!
//! Usage: `byteport <build|disasm|asm|run> ...`

use std::{
    fs,
    path::{Path, PathBuf},
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use byteport::{asm, Bytecode, FilePorts, PortBus, PortVm, RegisterPorts};

#[derive(Parser, Debug)]
#[command(name = "byteport")]
#[command(about = "Compile device control programs and run them against a port bus")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a source file to a byte stream
    Build {
        /// Program source
        source: PathBuf,

        /// Output file, defaults to the source path with a `.bin` or `.bits` extension
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write one `0`/`1` line per byte instead of raw bytes
        #[arg(long)]
        bits: bool,
    },
    /// Print the assembly listing of a program
    Disasm {
        /// Source, `.bin`, `.bits` or `.asm` file
        input: PathBuf,
    },
    /// Assemble a listing to a byte stream
    Asm {
        listing: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        bits: bool,
    },
    /// Run a program until Ctrl+C, or for a number of passes
    Run {
        /// Source, `.bin`, `.bits` or `.asm` file
        input: PathBuf,

        /// Directory with one file per port. Without it ports live in memory.
        #[arg(long, env = "BYTEPORT_PORTS_DIR")]
        ports_dir: Option<PathBuf>,

        /// Number of passes, each ending at a jump. Runs until Ctrl+C when absent.
        #[arg(long)]
        passes: Option<u64>,

        /// Preset an in-memory port, as PORT=VALUE
        #[arg(long = "set", value_parser = parse_port_value)]
        presets: Vec<(u8, u8)>,

        /// Reset an in-memory port to zero after every read
        #[arg(long)]
        clear_on_read: Vec<u8>,
    },
}

/// Initialize logging. `RUST_LOG` overrides the default `info` filter.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() {
    init_logging();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build {
            source,
            output,
            bits,
        } => build(&source, output, bits),
        Commands::Disasm { input } => disasm(&input),
        Commands::Asm {
            listing,
            output,
            bits,
        } => assemble(&listing, output, bits),
        Commands::Run {
            input,
            ports_dir,
            passes,
            presets,
            clear_on_read,
        } => run(&input, ports_dir, passes, &presets, &clear_on_read),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn build(source: &Path, output: Option<PathBuf>, bits: bool) -> anyhow::Result<()> {
    let text = fs::read_to_string(source)
        .with_context(|| format!("failed to read '{}'", source.display()))?;
    let bytecode = byteport::compile(&text)
        .with_context(|| format!("failed to compile '{}'", source.display()))?;
    write_output(source, output, &bytecode, bits)
}

fn disasm(input: &Path) -> anyhow::Result<()> {
    let bytecode = load(input)?;
    print!("{}", asm::listing(&bytecode)?);
    Ok(())
}

fn assemble(listing: &Path, output: Option<PathBuf>, bits: bool) -> anyhow::Result<()> {
    let text = fs::read_to_string(listing)
        .with_context(|| format!("failed to read '{}'", listing.display()))?;
    let bytecode = asm::assemble(&text)
        .with_context(|| format!("failed to assemble '{}'", listing.display()))?;
    write_output(listing, output, &bytecode, bits)
}

fn run(
    input: &Path,
    ports_dir: Option<PathBuf>,
    passes: Option<u64>,
    presets: &[(u8, u8)],
    clear_on_read: &[u8],
) -> anyhow::Result<()> {
    let bytecode = load(input)?;

    match ports_dir {
        Some(dir) => {
            if !presets.is_empty() || !clear_on_read.is_empty() {
                bail!("--set and --clear-on-read only apply to in-memory ports");
            }
            let ports = FilePorts::open(&dir)
                .with_context(|| format!("failed to open ports in '{}'", dir.display()))?;
            info!("Using port files in {}", dir.display());
            execute(bytecode, ports, passes)?;
        }
        None => {
            if passes.is_none() {
                bail!("in-memory ports need --passes, use --ports-dir to drive a device");
            }
            let mut ports = RegisterPorts::default();
            for &port in clear_on_read {
                if !ports.set_clear_on_read(port) {
                    bail!("port {port} is not bound");
                }
            }
            for &(port, value) in presets {
                if !ports.set(port, value) {
                    bail!("port {port} is not bound");
                }
            }
            let ports = execute(bytecode, ports, passes)?;
            for write in ports.writes() {
                println!("port {} <- {}", write.port, write.value);
            }
        }
    }

    Ok(())
}

fn execute<P: PortBus>(bytecode: Bytecode, ports: P, passes: Option<u64>) -> anyhow::Result<P> {
    let mut vm = PortVm::new(bytecode, ports)?;
    match passes {
        Some(passes) => vm.run_passes(passes)?,
        None => {
            let stop = stop_on_ctrl_c()?;
            info!("Running until Ctrl+C");
            vm.run_until(&stop)?;
        }
    }

    info!("Finished {} passes in {} cycles", vm.passes(), vm.cycles());
    for (name, value) in vm.variables() {
        println!("{name} = {value}");
    }

    Ok(vm.into_ports())
}

/// Flag raised once Ctrl+C is received.
fn stop_on_ctrl_c() -> anyhow::Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start signal runtime")?;

    thread::spawn(move || {
        runtime.block_on(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("Failed to setup Ctrl+C handler: {}", e);
                return;
            }
            info!("Ctrl+C received, stopping");
            flag.store(true, Ordering::SeqCst);
        });
    });

    Ok(stop)
}

/// Read a program, picking the format from the file extension.
fn load(path: &Path) -> anyhow::Result<Bytecode> {
    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let read_text = || {
        fs::read_to_string(path).with_context(|| format!("failed to read '{}'", path.display()))
    };

    let bytecode = match extension {
        "bin" => {
            let code =
                fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
            Bytecode::from_raw(code)?
        }
        "bits" => Bytecode::from_bit_string(&read_text()?)?,
        "asm" => asm::assemble(&read_text()?)?,
        _ => byteport::compile(&read_text()?)?,
    };

    info!("Loaded {} ({} bytes)", path.display(), bytecode.len());
    Ok(bytecode)
}

fn write_output(
    input: &Path,
    output: Option<PathBuf>,
    bytecode: &Bytecode,
    bits: bool,
) -> anyhow::Result<()> {
    let output =
        output.unwrap_or_else(|| input.with_extension(if bits { "bits" } else { "bin" }));
    if output == input {
        bail!("output would overwrite '{}'", input.display());
    }

    let written = if bits {
        fs::write(&output, bytecode.to_bit_string())
    } else {
        fs::write(&output, &bytecode.code)
    };
    written.with_context(|| format!("failed to write '{}'", output.display()))?;

    info!("Wrote {} bytes to {}", bytecode.len(), output.display());
    Ok(())
}

fn parse_port_value(text: &str) -> anyhow::Result<(u8, u8)> {
    let (port, value) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("expected PORT=VALUE, got '{text}'"))?;
    let value = match value.strip_prefix("0b") {
        Some(bits) => u8::from_str_radix(bits, 2),
        None => value.parse(),
    }
    .with_context(|| format!("invalid port value '{value}'"))?;
    Ok((port.parse().context("invalid port number")?, value))
}
