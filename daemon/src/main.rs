//! sockprobe - TCP socket state probe
//!
//! Generates BCC probe sources from a YAML configuration, loads them on the
//! `sock:inet_sock_set_state` family of tracepoints and exports the selected
//! per-connection fields.
//!
//! ## Usage
//!
//! ```bash
//! # Print the generated probe sources
//! ./sockprobe --config sockprobe.yaml render
//!
//! # Write them out for compiling ahead of time
//! ./sockprobe --config sockprobe.yaml render --output-dir build/
//!
//! # Compile, load and stream records for 60 seconds
//! sudo ./sockprobe --config sockprobe.yaml run --duration 60
//!
//! # Use objects compiled ahead of time
//! sudo ./sockprobe --config sockprobe.yaml run --object-dir build/
//!
//! # List the built-in fields
//! ./sockprobe fields
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use sockprobe::{
    catalog,
    collector::{self, CollectorStats, RecordCollector},
    config::{Config, ProbePlan},
    events::{local_hostname, EventReader},
    layout::RecordLayout,
    loader::{write_sources, CommandCompiler, PrebuiltObjects, ProbeCompiler, ProbeLoader},
};
use sockprobe_kernel::{synthesize, ProbeSource};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    signal,
    sync::{mpsc, Mutex},
    time::{sleep, Instant},
};

/// Configurable TCP socket probe using eBPF
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[clap(short, long, default_value = "sockprobe.yaml")]
    config: PathBuf,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print or write the generated probe sources
    Render {
        /// Only render the tracepoint at this index
        #[clap(short, long)]
        tracepoint: Option<usize>,

        /// Write `<entry>.c` files here instead of printing
        #[clap(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Load the probes and export records
    Run {
        /// Duration to run the probes (in seconds, 0 = infinite)
        #[clap(short, long, default_value_t = 0)]
        duration: u64,

        /// Directory of `<entry>.o` objects compiled ahead of time
        #[clap(long)]
        object_dir: Option<PathBuf>,

        /// Where intermediate sources and objects are written
        #[clap(long, default_value = "/tmp/sockprobe")]
        work_dir: PathBuf,

        /// Capacity of the record channel between readers and exporters
        #[clap(long, default_value_t = 4096)]
        channel_size: usize,

        /// Progress reporting interval in seconds
        #[clap(long, default_value_t = 10)]
        progress_interval: u64,
    },

    /// List the built-in fields
    Fields,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    match args.command {
        Command::Fields => {
            print_fields();
            Ok(())
        }
        Command::Render {
            tracepoint,
            output_dir,
        } => {
            let config = Config::load(&args.config)?;
            render(&config, tracepoint, output_dir)
        }
        Command::Run {
            duration,
            object_dir,
            work_dir,
            channel_size,
            progress_interval,
        } => {
            print_banner();
            let config = Config::load(&args.config)?;
            let compiler: Box<dyn ProbeCompiler> = match object_dir {
                Some(dir) => Box::new(PrebuiltObjects::new(dir)),
                None => Box::new(CommandCompiler::new(
                    config.compiler.command.clone(),
                    work_dir,
                )?),
            };
            run(
                &config,
                compiler.as_ref(),
                duration,
                channel_size,
                progress_interval,
                args.verbose,
            )
            .await
        }
    }
}

fn render(config: &Config, tracepoint: Option<usize>, output_dir: Option<PathBuf>) -> Result<()> {
    let mut plans = config.probe_plans()?;

    if let Some(index) = tracepoint {
        if index >= plans.len() {
            bail!(
                "tracepoint #{} does not exist, the config has {}",
                index,
                plans.len()
            );
        }
        plans = vec![plans.swap_remove(index)];
    }

    let sources: Vec<ProbeSource> = plans.iter().map(|plan| synthesize(&plan.spec)).collect();

    match output_dir {
        Some(dir) => {
            for path in write_sources(&dir, &sources)? {
                info!("Wrote {:?}", path);
            }
        }
        None => {
            for source in &sources {
                println!("// {}", source.symbols.entry());
                println!("{}", source.text);
            }
        }
    }

    Ok(())
}

async fn run(
    config: &Config,
    compiler: &dyn ProbeCompiler,
    duration: u64,
    channel_size: usize,
    progress_interval: u64,
    verbose: bool,
) -> Result<()> {
    let plans = config.probe_plans()?;
    if plans.is_empty() {
        bail!("No tracepoints configured");
    }

    info!("Starting sockprobe...");
    info!(
        "   Duration: {} seconds",
        if duration == 0 {
            "infinite".to_string()
        } else {
            duration.to_string()
        }
    );
    info!("   Probes: {}", plans.len());

    let mut collector = RecordCollector::from_config(config)?;
    for plan in &plans {
        collector.route(plan.index, plan.egress.as_deref())?;
    }
    let collector = Arc::new(Mutex::new(collector));

    let (tx, rx) = mpsc::channel(channel_size.max(1));
    let reader = EventReader::new(tx, local_hostname(), verbose);

    // Loaded probes stay attached for as long as they are alive
    let mut loaders = Vec::with_capacity(plans.len());
    for plan in &plans {
        loaders.push(start_probe(plan, compiler, &reader)?);
    }
    drop(reader);

    info!("Collecting records...");

    let collector_task = tokio::spawn(collector::run(Arc::clone(&collector), rx));
    collector::spawn_progress_reporter(Arc::clone(&collector), progress_interval);

    let start_time = Instant::now();
    if duration > 0 {
        tokio::select! {
            _ = sleep(Duration::from_secs(duration)) => {
                info!("Duration reached, shutting down...");
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down...");
            }
        }
    } else {
        signal::ctrl_c().await?;
        info!("Interrupted, shutting down...");
    }

    // Detach probes
    drop(loaders);
    collector_task.abort();

    let mut collector = collector.lock().await;
    collector.flush()?;
    print_summary(collector.stats(), start_time.elapsed().as_secs());

    Ok(())
}

fn start_probe(
    plan: &ProbePlan,
    compiler: &dyn ProbeCompiler,
    reader: &EventReader,
) -> Result<ProbeLoader> {
    let source = synthesize(&plan.spec);
    let tracepoint = &plan.spec.tracepoint;

    let mut loader = ProbeLoader::compile_and_load(compiler, source)
        .with_context(|| format!("probe #{}", plan.index))?;
    loader.attach(&tracepoint.category, &tracepoint.name)?;

    for (family, channel) in loader.take_channels()? {
        let fields = plan
            .records
            .get(&family)
            .with_context(|| format!("probe #{} has no {} record layout", plan.index, family))?;
        let layout = RecordLayout::new(fields)
            .with_context(|| format!("probe #{} {} record", plan.index, family))?;
        reader.spawn_cpu_readers(plan.index, family, layout, channel)?;
    }

    Ok(loader)
}

fn print_banner() {
    println!(
        r#"
╔═══════════════════════════════════════════════════╗
║          sockprobe - TCP socket probe             ║
╚═══════════════════════════════════════════════════╝
    "#
    );
}

fn print_fields() {
    for entry in catalog::entries() {
        println!("{:<16} {}", entry.name, entry.help);
    }
}

fn print_summary(stats: &CollectorStats, elapsed_secs: u64) {
    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  Total records:  {}", stats.total_records());
    info!("  Export errors:  {}", stats.export_errors);
    info!("  Duration:       {} seconds", elapsed_secs);
    info!("");
    info!("  Records per probe:");
    for (probe, count) in &stats.records {
        info!("    #{:<4} {:>10}", probe, count);
    }
    info!("");
    info!("============================================");
}
