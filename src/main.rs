use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use reappointment_trends::{
    export_outcome, insert_run, list_runs, load_path, open_database, render_text,
    AnalysisConfig, ReappointmentPipeline, VERSION,
};

#[derive(Parser, Debug)]
#[command(name = "reappointment-trends", author, version, about = "Government reappointment trend analysis", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full analysis on a CSV file or a directory of yearly CSVs
    Analyze {
        /// Appointments CSV file or directory
        #[arg(short, long, value_name = "PATH")]
        input: PathBuf,

        /// TOML configuration file
        #[arg(short, long, value_name = "FILE", env = "REAPPOINTMENT_CONFIG")]
        config: Option<PathBuf>,

        /// Directory for exported tables
        #[arg(short, long, value_name = "DIR", default_value = "output")]
        output_dir: PathBuf,

        /// Also store the run in this SQLite database
        #[arg(long, value_name = "FILE")]
        db: Option<PathBuf>,

        /// Volume floor for the yearly maximum (overrides config)
        #[arg(long, value_name = "COUNT")]
        min_total: Option<u64>,
    },

    /// Write a default configuration file
    InitConfig {
        #[arg(short, long, value_name = "FILE", default_value = "reappointment.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List analysis runs stored in a database
    Runs {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!("reappointment-trends v{}", VERSION);

    let result = match cli.command {
        Command::Analyze {
            input,
            config,
            output_dir,
            db,
            min_total,
        } => run_analyze(&input, config.as_deref(), &output_dir, db.as_deref(), min_total),
        Command::InitConfig { path, force } => run_init_config(&path, force),
        Command::Runs { db } => run_list_runs(&db),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

fn run_analyze(
    input: &Path,
    config_path: Option<&Path>,
    output_dir: &Path,
    db_path: Option<&Path>,
    min_total: Option<u64>,
) -> Result<()> {
    println!("📊 Reappointment Trends v{}", VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Configuration
    let mut config = AnalysisConfig::load_or_default(config_path)?;
    if let Some(floor) = min_total {
        config.selection.min_total = floor;
    }
    config.validate()?;

    // 2. Load records
    println!("\n📂 Loading records from {}...", input.display());
    let records = load_path(input)?;
    println!("✓ Loaded {} records", records.len());

    // 3. Run pipeline
    println!("\n🔁 Marking reappointments and aggregating...");
    let outcome = ReappointmentPipeline::new(config.clone()).run(&records);
    println!("✓ {}", outcome.summary());

    // 4. Report
    println!("\n{}", render_text(&outcome));

    // 5. Export (always, even if the trend failed)
    println!("💾 Exporting tables...");
    let written = export_outcome(&outcome, output_dir)?;
    println!("✓ Wrote {} files to {}", written.len(), output_dir.display());

    // 6. Persist
    if let Some(db_path) = db_path {
        println!("\n🗄️  Storing run...");
        let conn = open_database(db_path)?;
        match insert_run(&conn, &outcome, &records, &config, &input.display().to_string())? {
            Some(run) => println!("✓ Stored run {}", run.run_id),
            None => println!("✓ Identical run already stored, skipped"),
        }
    }

    // 7. A failed trend fit is still a failed analysis
    if let Err(e) = &outcome.trend {
        return Err(e.clone()).context("Trend estimation failed");
    }

    println!("\n✅ Analysis complete");
    Ok(())
}

fn run_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        eprintln!("⚠️  {} already exists. Use --force to overwrite.", path.display());
        std::process::exit(1);
    }

    let content = AnalysisConfig::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✅ Created {} with default settings.", path.display());
    Ok(())
}

fn run_list_runs(db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        eprintln!("❌ Database not found: {}", db_path.display());
        eprintln!("   Run: reappointment-trends analyze --input <PATH> --db {}", db_path.display());
        std::process::exit(1);
    }

    let conn = open_database(db_path)?;
    let runs = list_runs(&conn)?;

    println!("🗄️  {} runs in {}", runs.len(), db_path.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for run in runs {
        let years = match (run.first_year, run.last_year) {
            (Some(first), Some(last)) => format!("{}-{}", first, last),
            _ => "-".to_string(),
        };
        let trend = run
            .trend_direction
            .or(run.trend_error)
            .unwrap_or_default();

        println!(
            "{}  {}  {:>7} records  {:>9}  {}",
            &run.created_at[..19.min(run.created_at.len())],
            run.run_id,
            run.input_records,
            years,
            trend
        );
        println!("   source: {}", run.source);
    }

    Ok(())
}
