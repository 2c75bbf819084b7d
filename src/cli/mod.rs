//! # CLI Module
//!
//! Command-line interface over a stored ML artifact database.
//!
//! ## Usage
//! ```bash
//! # Summarize stored artifacts
//! ml-sync status
//!
//! # Re-cluster every stored embedding
//! ml-sync cluster --min-input-size 10 --epsilon 0.5
//!
//! # JSON output
//! ml-sync status --output json
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use photo_ml_sync::core::config::ClusteringConfig;
use photo_ml_sync::core::ml_file::{MlFile, MlLibraryData};
use photo_ml_sync::core::pipeline::{ClusteringOutcome, ClusteringStage};
use photo_ml_sync::core::services::DbscanClusterer;
use photo_ml_sync::core::store::{MlStore, SqliteMlStore, StoreStats};
use photo_ml_sync::core::VersionedMethod;
use photo_ml_sync::error::{MlSyncError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Photo ML Sync - inspect and re-cluster stored face artifacts
#[derive(Parser, Debug)]
#[command(name = "ml-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarize stored artifacts and the last clustering
    Status {
        /// Artifact database path
        #[arg(long)]
        store: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },
    /// Cluster every stored embedding and save the result
    Cluster {
        /// Artifact database path
        #[arg(long)]
        store: Option<PathBuf>,

        /// Skip clustering below this many embeddings
        #[arg(long)]
        min_input_size: Option<usize>,

        /// Neighbourhood radius on unit-length embeddings
        #[arg(long)]
        epsilon: Option<f32>,

        /// Minimum neighbourhood size of a core face
        #[arg(long)]
        min_cluster_size: Option<usize>,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
    /// Minimal output (counts only)
    Minimal,
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status { store, output } => run_status(&open_store(store)?, output),
        Commands::Cluster {
            store,
            min_input_size,
            epsilon,
            min_cluster_size,
            output,
        } => {
            let defaults = ClusteringConfig::default();
            let config = ClusteringConfig {
                min_input_size: min_input_size.unwrap_or(defaults.min_input_size),
                epsilon: epsilon.unwrap_or(defaults.epsilon),
                min_cluster_size: min_cluster_size.unwrap_or(defaults.min_cluster_size),
            };
            run_cluster(&open_store(store)?, &config, output)
        }
    }
}

fn open_store(path: Option<PathBuf>) -> Result<SqliteMlStore> {
    let path = path.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photo-ml-sync")
            .join("ml.db")
    });
    Ok(SqliteMlStore::open(&path)?)
}

/// Stage name to method to number of files produced with it
type MethodCounts = BTreeMap<&'static str, BTreeMap<String, usize>>;

fn method_counts(files: &[MlFile]) -> MethodCounts {
    let mut counts = MethodCounts::new();
    for file in files {
        let stages: [(&'static str, Option<&VersionedMethod>); 5] = [
            ("text", file.text_detection_method.as_ref()),
            ("detection", file.face_detection_method.as_ref()),
            ("crop", file.face_crop_method.as_ref()),
            ("alignment", file.face_alignment_method.as_ref()),
            ("embedding", file.face_embedding_method.as_ref()),
        ];
        for (stage, method) in stages {
            if let Some(method) = method {
                *counts
                    .entry(stage)
                    .or_default()
                    .entry(method.to_string())
                    .or_default() += 1;
            }
        }
    }
    counts
}

fn run_status(store: &SqliteMlStore, output: OutputFormat) -> Result<()> {
    let files = store
        .file_ids()?
        .into_iter()
        .filter_map(|id| store.get_ml_file(id).transpose())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let stats = StoreStats::from_files(&files);
    let methods = method_counts(&files);
    let library = store.get_library_data()?;

    match output {
        OutputFormat::Pretty => print_pretty_status(store, &stats, &methods, &library),
        OutputFormat::Json => {
            let output = serde_json::json!({
                "store": store.path(),
                "files": stats.files,
                "faces": stats.faces,
                "embedded_faces": stats.embedded_faces,
                "methods": methods,
                "clustering": clustering_json(&library),
            });
            print_json(&output)?;
        }
        OutputFormat::Minimal => {
            println!("{} {} {}", stats.files, stats.faces, stats.embedded_faces);
        }
    }
    Ok(())
}

fn clustering_json(library: &MlLibraryData) -> serde_json::Value {
    match &library.face_clustering_results {
        Some(result) => serde_json::json!({
            "method": library.face_clustering_method.as_ref().map(|m| m.to_string()),
            "faces": result.labels.len(),
            "clusters": result.cluster_count(),
            "noise": result.noise().len(),
            "clustered_at": library.clustered_at,
        }),
        None => serde_json::Value::Null,
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| MlSyncError::Config(format!("failed to render JSON: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn print_pretty_status(
    store: &SqliteMlStore,
    stats: &StoreStats,
    methods: &MethodCounts,
    library: &MlLibraryData,
) {
    let term = Term::stderr();
    print_header(&term);

    term.write_line(&format!(
        "  {} {}",
        style("Store:").dim(),
        store.path().display()
    ))
    .ok();
    term.write_line(&format!("  {} files with artifacts", style(stats.files).cyan()))
        .ok();
    term.write_line(&format!(
        "  {} faces, {} with embeddings",
        style(stats.faces).cyan(),
        style(stats.embedded_faces).cyan()
    ))
    .ok();
    term.write_line("").ok();

    if !methods.is_empty() {
        term.write_line(&format!("{}", style("Methods:").bold().underlined()))
            .ok();
        for (stage, found) in methods {
            for (method, count) in found {
                term.write_line(&format!(
                    "  {:<10} {} ({} files)",
                    stage,
                    style(method).yellow(),
                    count
                ))
                .ok();
            }
        }
        term.write_line("").ok();
    }

    match &library.face_clustering_results {
        Some(result) => {
            let method = library
                .face_clustering_method
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            term.write_line(&format!(
                "  {} {} clusters, {} noise faces of {} ({})",
                style("Clustering:").bold(),
                style(result.cluster_count()).cyan(),
                result.noise().len(),
                result.labels.len(),
                style(method).dim()
            ))
            .ok();
            if let Some(at) = library.clustered_at {
                term.write_line(&format!(
                    "  {} {}",
                    style("Clustered at:").dim(),
                    at.format("%Y-%m-%d %H:%M:%S UTC")
                ))
                .ok();
            }
        }
        None => {
            term.write_line(&format!(
                "  {} {}",
                style("Clustering:").bold(),
                style("never run").dim()
            ))
            .ok();
        }
    }
}

fn run_cluster(store: &SqliteMlStore, config: &ClusteringConfig, output: OutputFormat) -> Result<()> {
    let start_time = Instant::now();
    let term = Term::stderr();

    if matches!(output, OutputFormat::Pretty) {
        print_header(&term);
    }

    let spinner = if matches!(output, OutputFormat::Pretty) {
        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(spinner_style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Clustering faces");
        Some(pb)
    } else {
        None
    };

    let faces = store.get_all_faces_map()?;
    let mut library = store.get_library_data()?;
    let clusterer = DbscanClusterer::new();
    let outcome = ClusteringStage::new(&clusterer, config).run(&faces, &mut library);

    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }

    let outcome = outcome?;
    if matches!(outcome, ClusteringOutcome::Completed { .. }) {
        store.put_library_data(&library)?;
    }
    let duration_ms = start_time.elapsed().as_millis() as u64;

    match output {
        OutputFormat::Pretty => print_pretty_cluster(&term, &outcome, duration_ms),
        OutputFormat::Json => {
            let event = serde_json::to_value(outcome.event())
                .map_err(|e| MlSyncError::Config(format!("failed to render JSON: {}", e)))?;
            print_json(&serde_json::json!({
                "outcome": event,
                "duration_ms": duration_ms,
            }))?;
        }
        OutputFormat::Minimal => match outcome {
            ClusteringOutcome::Skipped { input_size, .. } => println!("skipped {}", input_size),
            ClusteringOutcome::Completed {
                clusters, noise, ..
            } => println!("{} {}", clusters, noise),
        },
    }
    Ok(())
}

fn print_pretty_cluster(term: &Term, outcome: &ClusteringOutcome, duration_ms: u64) {
    match outcome {
        ClusteringOutcome::Skipped {
            input_size,
            min_input_size,
        } => {
            term.write_line(&format!(
                "{} Clustering skipped: {} embeddings, at least {} needed",
                style("!").yellow().bold(),
                style(input_size).cyan(),
                min_input_size
            ))
            .ok();
            term.write_line(&format!(
                "  {}",
                style("The stored clustering was left unchanged.").dim()
            ))
            .ok();
        }
        ClusteringOutcome::Completed {
            input_size,
            clusters,
            noise,
        } => {
            term.write_line(&format!(
                "{} Clustering Complete",
                style("✓").green().bold()
            ))
            .ok();
            term.write_line("").ok();
            term.write_line(&format!(
                "  {} faces clustered in {:.1}s",
                style(input_size).cyan(),
                duration_ms as f64 / 1000.0
            ))
            .ok();
            term.write_line(&format!("  {} clusters", style(clusters).cyan()))
                .ok();
            term.write_line(&format!("  {} noise faces", style(noise).dim()))
                .ok();
        }
    }
}

fn print_header(term: &Term) {
    term.write_line(&format!(
        "{} {}",
        style("Photo ML Sync").bold().cyan(),
        style(concat!("v", env!("CARGO_PKG_VERSION"))).dim()
    ))
    .ok();
    term.write_line("").ok();
}
