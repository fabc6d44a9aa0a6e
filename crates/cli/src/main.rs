//! Hart scheduler simulator CLI.
//!
//! This binary runs a scripted workload on a simulated node. It performs:
//! 1. **Configuration:** Loads a JSON config file or uses built-in defaults.
//! 2. **Workload:** Lays out static segments and the heap, then queues the main thread.
//! 3. **Run:** Ticks the scheduler until termination or the cycle limit, then prints
//!    the requested statistics sections. A fatal error, including a workload that
//!    cannot be laid out, is printed with the segment layout and exits with code 1.

use std::process;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hartsim_core::Simulator;
use hartsim_core::common::SimError;
use hartsim_core::config::{BackendKind, Config};
use hartsim_core::sim::{RunOutcome, ScriptedExecutor, Workload};
use hartsim_core::soc::memory::remote::{LoopbackLink, RemoteLink};
use hartsim_core::stats::STATS_SECTIONS;

#[derive(Parser, Debug)]
#[command(
    name = "sim",
    author,
    version,
    about = "Multi-core hart scheduler and memory subsystem simulator",
    long_about = "Run a scripted workload against the segment registry, translator, \
                  exclusive-access table and hart scheduler.\n\nExamples:\n  \
                  sim run -w workload.json\n  \
                  sim run -w workload.json -c node.json --max-cycles 100000 --stats memory,threads\n  \
                  sim check -c node.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a workload to completion.
    Run {
        /// Workload file (JSON).
        #[arg(short, long)]
        workload: String,

        /// Configuration file (JSON); defaults are used when omitted.
        #[arg(short, long)]
        config: Option<String>,

        /// Stop after this many ticks.
        #[arg(long)]
        max_cycles: Option<u64>,

        /// Comma-separated statistics sections to print (summary, cores, memory, threads).
        #[arg(long, value_delimiter = ',')]
        stats: Vec<String>,

        /// Print the segment layout after the run.
        #[arg(long)]
        dump_segments: bool,
    },

    /// Validate a configuration file and print the effective memory layout.
    Check {
        /// Configuration file (JSON).
        #[arg(short, long)]
        config: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run {
            workload,
            config,
            max_cycles,
            stats,
            dump_segments,
        } => cmd_run(&workload, config.as_deref(), max_cycles, &stats, dump_segments),
        Commands::Check { config } => cmd_check(&config),
    };
    process::exit(code);
}

fn load_config(path: Option<&str>) -> Result<Config, SimError> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None => Ok(Config::default()),
    }
}

fn cmd_check(path: &str) -> i32 {
    match Config::from_file(path) {
        Ok(config) => {
            let mem = &config.memory;
            println!("configuration ok: {path}");
            println!("  backend        {:?}", mem.backend);
            println!("  mem_size       {} bytes", mem.mem_size);
            println!("  page_size      {} bytes", mem.page_size);
            println!("  tlb_size       {} entries", mem.tlb_size);
            println!("  max_heap_size  {} bytes", mem.heap_limit());
            println!("  stack_size     {} bytes", mem.stack_size);
            match &mem.scratchpad {
                Some(pad) => println!(
                    "  scratchpad     {:#x} + {} bytes in {}-byte chunks",
                    pad.base, pad.size, pad.chunk_size
                ),
                None => println!("  scratchpad     none"),
            }
            for range in &mem.dump_ranges {
                println!(
                    "  dump {:<9} {:#x} + {} bytes -> {}",
                    range.name,
                    range.base,
                    range.size,
                    mem.dump_dir.display()
                );
            }
            println!(
                "  cores x harts  {} x {}",
                config.scheduler.num_cores, config.scheduler.num_harts
            );
            0
        }
        Err(err) => {
            eprintln!("configuration error: {err}");
            1
        }
    }
}

fn cmd_run(
    workload_path: &str,
    config_path: Option<&str>,
    max_cycles: Option<u64>,
    sections: &[String],
    dump_segments: bool,
) -> i32 {
    if let Some(bad) = sections.iter().find(|s| !STATS_SECTIONS.contains(&s.as_str())) {
        eprintln!("unknown stats section '{bad}', expected one of {STATS_SECTIONS:?}");
        return 1;
    }
    match run(workload_path, config_path, max_cycles, sections, dump_segments) {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "run failed");
            1
        }
    }
}

fn run(
    workload_path: &str,
    config_path: Option<&str>,
    max_cycles: Option<u64>,
    sections: &[String],
    dump_segments: bool,
) -> Result<(), SimError> {
    let config = load_config(config_path)?;
    let workload = Workload::from_file(workload_path)?;
    let programs = workload.program_set()?;

    let link: Option<Box<dyn RemoteLink>> = match config.memory.backend {
        BackendKind::Remote => Some(Box::new(LoopbackLink::new(config.memory.mem_size)?)),
        BackendKind::Local | BackendKind::Controller => None,
    };
    let executors = ScriptedExecutor::for_cores(config.scheduler.num_cores, &programs);
    let mut sim = Simulator::from_config(&config, link, executors)?;
    let main = workload.install(&mut sim, &programs)?;
    info!(main = %main, workload = workload_path, "starting run");

    let outcome = sim.run(max_cycles)?;
    match outcome {
        RunOutcome::Finished { cycles } => println!("\n[*] Finished after {cycles} cycles"),
        RunOutcome::CycleLimit { cycles } => println!("\n[*] Stopped at cycle limit ({cycles} cycles)"),
    }
    if dump_segments {
        println!("{}", sim.memory().dump_segments());
    }
    let mut stats = sim.stats().clone();
    stats.mem = sim.memory().stats();
    stats.print_sections(sections);
    Ok(())
}
