//! CLI command definitions, routing, and tracing setup.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use kbexport_core::{
    BatchConfig, BatchReport, BookTree, ExportProgress, ExportReport, export_all,
};
use kbexport_markdown::{ConvertOptions, Converter, HtmlConverter};
use kbexport_shared::{AppConfig, init_config, load_config, load_config_from};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbexport: mirror exported knowledge bases as Markdown folders.
#[derive(Parser)]
#[command(
    name = "kbexport",
    version,
    about = "Convert exported knowledge-base archives into mirrored Markdown trees.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.kbexport/kbexport.toml.
    #[arg(long, global = true, env = "KBEXPORT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also write logs (without colors) to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Export every knowledge base under the input directory.
    Export {
        /// Directory holding one subdirectory per knowledge base.
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory receiving the Markdown trees.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export only this knowledge base (repeatable).
        #[arg(long = "kb")]
        kb: Vec<String>,

        /// Number of knowledge bases exported at the same time.
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Keep existing content of the output directory.
        #[arg(long)]
        keep_output: bool,
    },

    /// Print the resolved path of every table-of-contents node without exporting.
    Tree {
        /// Knowledge-base directory containing the manifest.
        kb_dir: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

    let filter = match cli.verbose {
        0 => "kbexport=info",
        1 => "kbexport=debug",
        _ => "kbexport=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let console = match cli.log_format {
        LogFormat::Text => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    let file = match &cli.log_file {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| eyre!("cannot create log file '{}': {e}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Export {
            input,
            output,
            kb,
            jobs,
            keep_output,
        } => {
            let config = resolve_config(config_path)?;
            let mut batch = BatchConfig::from_app_config(&config);
            if let Some(input) = input {
                batch.input_root = input;
            }
            if let Some(output) = output {
                batch.output_root = output;
            }
            if let Some(jobs) = jobs {
                batch.concurrency = jobs.max(1);
            }
            batch.only = kb;
            batch.reset_output = !keep_output;

            cmd_export(batch, ConvertOptions::from(&config.markdown)).await
        }
        Command::Tree { kb_dir } => cmd_tree(&kb_dir, &resolve_config(config_path)?),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

/// Load `--config` when given, else the default config file.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_export(batch: BatchConfig, options: ConvertOptions) -> Result<()> {
    info!(
        input = %batch.input_root.display(),
        output = %batch.output_root.display(),
        jobs = batch.concurrency,
        "exporting knowledge bases"
    );

    let converter: Arc<dyn Converter> = Arc::new(HtmlConverter::new(options));
    let progress = Arc::new(CliProgress::new());

    let report = export_all(batch, converter, progress.clone()).await;
    progress.finish();
    let report = report?;

    print_summary(&report);

    let failed = report.failed().count();
    if failed > 0 {
        return Err(eyre!(
            "{failed} of {} knowledge bases failed to export",
            report.outcomes.len()
        ));
    }
    Ok(())
}

fn print_summary(report: &BatchReport) {
    println!();
    println!(
        "  Export started {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(r) => println!(
                "  OK    {:<24} {} written, {} links, {} unsupported, {} unmatched, {:.1}s",
                outcome.name,
                r.documents_written,
                r.links_recorded,
                r.unsupported_recorded,
                r.path_misses,
                r.elapsed.as_secs_f64()
            ),
            Err(e) => println!("  FAIL  {:<24} {e}", outcome.name),
        }
    }
    println!(
        "  {} succeeded, {} failed in {:.1}s",
        report.succeeded().count(),
        report.failed().count(),
        report.elapsed.as_secs_f64()
    );
    println!();
}

fn cmd_tree(kb_dir: &Path, config: &AppConfig) -> Result<()> {
    let tree = BookTree::load(&kb_dir.join(&config.export.manifest_file))?;

    if let Some(name) = tree.name() {
        println!("{name}");
    }
    for (node, path) in tree.entries() {
        let target = match &node.id {
            Some(id) => tree
                .resolve_document_path(id)
                .map(|p| format!("{p}.md"))
                .unwrap_or_default(),
            None => node.url.clone().unwrap_or_default(),
        };
        let marker = if node.has_children { "/" } else { "" };
        println!("  {:<6} {path}{marker}  {target}", node.node_type.to_string());
    }
    println!("  {} nodes", tree.len());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ExportProgress for CliProgress {
    fn kb_started(&self, name: &str, documents: usize) {
        self.spinner
            .set_message(format!("{name}: {documents} documents"));
    }

    fn document_exported(&self, kb: &str, path: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("{kb}: [{current}/{total}] {path}"));
    }

    fn kb_finished(&self, name: &str, result: &kbexport_shared::Result<ExportReport>) {
        match result {
            Ok(report) => self.spinner.println(format!(
                "  done  {name} ({} documents)",
                report.documents_written
            )),
            Err(e) => self.spinner.println(format!("  error {name}: {e}")),
        }
    }
}
