//! Tintexport - TINT dataset tool
//!
//! Compares spike timestamps of two datasets, prints dataset summaries, and
//! resynthesizes acquired unit-mode datasets into continuous ones.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tintexport::{
    Classification, Comparator, EpochKind, MatchScope, MismatchReport, Settings, TintDataset,
    TintWriter,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "tintexport")]
#[command(about = "Export and assess Axona TINT datasets")]
#[command(version)]
struct Cli {
    /// JSON settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Unit,
    Tetrode,
}

impl From<ScopeArg> for MatchScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Unit => MatchScope::Unit,
            ScopeArg::Tetrode => MatchScope::Tetrode,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Match spike timestamps of an exported dataset against the original
    Compare {
        /// Settings file of the original dataset
        original: PathBuf,

        /// Settings file of the exported dataset
        exported: PathBuf,

        /// Largest offset in samples counted as a match
        #[arg(short, long)]
        tolerance: Option<u64>,

        /// Match within units or across whole tetrodes
        #[arg(short, long, value_enum)]
        scope: Option<ScopeArg>,

        /// Report format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Also list every mismatched spike (text format)
        #[arg(long)]
        records: bool,
    },

    /// Print the layout and epochs of a dataset
    Inspect {
        /// Settings file of the dataset
        set: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Rewrite a unit-mode dataset with a continuous waveform per tetrode
    Resynthesize {
        /// Settings file of the input dataset
        input: PathBuf,

        /// Settings file to create
        output: PathBuf,

        /// Reference settings file (defaults to the input's)
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Noise generator seed
        #[arg(long)]
        seed: Option<u64>,

        /// Write tetrodes one after another
        #[arg(long)]
        serial: bool,
    },
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Cannot load settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

fn run_compare(
    settings: Settings,
    original: &Path,
    exported: &Path,
    format: OutputFormat,
    records: bool,
) -> Result<()> {
    let comparator = Comparator::new(settings.compare);
    let report = comparator.compare(original, exported)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report, records),
    }
    Ok(())
}

fn print_report(report: &MismatchReport, records: bool) {
    let stats = &report.statistics;
    println!(
        "Tolerance: {} samples, scope: {:?}",
        report.tolerance_samples, report.scope
    );
    println!(
        "Spikes: {} original, {} exported, {} matched",
        stats.original_spikes, stats.exported_spikes, stats.matched
    );
    println!("Match rate: {:.2}%", stats.match_rate * 100.0);
    if let (Some(mean), Some(median)) = (stats.mean_abs_offset, stats.median_abs_offset) {
        println!("Absolute offset: mean {mean:.3}, median {median:.1} samples");
    }
    println!(
        "Spurious: {} in synthesized epochs, {} elsewhere",
        stats.spurious_in_synthesized, stats.spurious_elsewhere
    );
    println!();
    println!(
        "{:>7} {:>8} {:>8} {:>7} {:>7} {:>7} {:>8} {:>6} {:>10}",
        "tetrode", "original", "exported", "exact", "shifted", "missing", "spurious", "multi", "stderr"
    );
    for t in &report.tetrodes {
        println!(
            "{:>7} {:>8} {:>8} {:>7} {:>7} {:>7} {:>8} {:>6} {:>10}",
            t.tetrode,
            t.original_spikes,
            t.exported_spikes,
            t.exact,
            t.shifted,
            t.missing,
            t.spurious,
            t.snippets_with_multiple_spikes,
            t.stderr_offset
                .map_or_else(|| "-".to_string(), |se| format!("{se:.4}")),
        );
    }

    if records {
        println!();
        for r in report
            .records
            .iter()
            .filter(|r| r.classification != Classification::Exact)
        {
            let fmt = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
            println!(
                "T{} unit {:>3} {:<8?} original {:>10} exported {:>10} offset {:>4}{}",
                r.tetrode,
                r.unit_id,
                r.classification,
                fmt(r.original_timestamp),
                fmt(r.exported_timestamp),
                r.offset_samples
                    .map_or_else(|| "-".to_string(), |o| o.to_string()),
                if r.in_synthesized { " (synthesized)" } else { "" }
            );
        }
    }
}

fn run_inspect(set: &Path, format: OutputFormat) -> Result<()> {
    let dataset = TintDataset::open(set)?;
    let trace = dataset.epoch_trace()?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&trace)?);
        return Ok(());
    }

    println!("Dataset: {}", set.display());
    println!(
        "Sample rate: {} Hz, {} samples ({} s)",
        trace.sample_rate,
        trace.total_samples,
        dataset.duration_secs()
    );
    for data in dataset.tetrode_data() {
        let epochs = trace.epochs(data.tetrode);
        let count = |kind: EpochKind| epochs.iter().filter(|e| e.kind == kind).count();
        println!(
            "Tetrode {}: {} channels, {} spikes, {} units, epochs: {} continuous, {} crossing, {} gap, {} synthesized",
            data.tetrode,
            data.layout.num_chans,
            data.spikes.len(),
            data.unit_labels().len(),
            count(EpochKind::Continuous),
            count(EpochKind::Crossing),
            count(EpochKind::Gap),
            count(EpochKind::Synthesized),
        );
    }
    Ok(())
}

fn run_resynthesize(
    mut settings: Settings,
    input: &Path,
    output: &Path,
    reference: Option<&Path>,
    seed: Option<u64>,
    serial: bool,
) -> Result<()> {
    if let Some(seed) = seed {
        settings.export.seed = seed;
    }
    if serial {
        settings.export.parallel_tetrodes = false;
    }

    let dataset = TintDataset::open(input)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }

    let writer = TintWriter::new(settings.export);
    let summary = writer.write(&dataset, &dataset, output, reference.unwrap_or(input))?;

    for t in &summary.tetrodes {
        let synthesized: u64 = t
            .epochs
            .iter()
            .filter(|e| e.kind == EpochKind::Synthesized)
            .map(|e| e.length_samples)
            .sum();
        println!(
            "Tetrode {}: {} spikes, {} units, {:.1}% synthesized",
            t.tetrode,
            t.spike_count,
            t.units.len(),
            100.0 * synthesized as f64 / summary.total_samples.max(1) as f64
        );
    }
    println!("Wrote {}", summary.set_path.display());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tintexport=info".parse()?)
                .add_directive("tintexport_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;
    info!(version = tintexport::VERSION, "tintexport starting");

    match cli.command {
        Commands::Compare {
            original,
            exported,
            tolerance,
            scope,
            format,
            records,
        } => {
            if let Some(tolerance) = tolerance {
                settings.compare.tolerance_samples = tolerance;
            }
            if let Some(scope) = scope {
                settings.compare.scope = scope.into();
            }
            run_compare(settings, &original, &exported, format, records)
        }
        Commands::Inspect { set, format } => run_inspect(&set, format),
        Commands::Resynthesize {
            input,
            output,
            reference,
            seed,
            serial,
        } => {
            if input == output {
                bail!("Output {} would overwrite the input dataset", output.display());
            }
            run_resynthesize(settings, &input, &output, reference.as_deref(), seed, serial)
        }
    }
}
