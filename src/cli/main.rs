use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use exif_stamp::config::Config;
use exif_stamp::exif::{self, BackendKind};
use exif_stamp::pipeline::{self, Batch, CollectOptions, RunSummary};
use exif_stamp::report::ReportFormat;
use exif_stamp::stamp::overlay::{Anchor, OutputLayout};

/// Input folder used when none is given anywhere.
const DEFAULT_INPUT_DIR: &str = "IMAGES_IN";

#[derive(Parser, Debug)]
#[command(
    name = "exif-stamp",
    version,
    about = "Stamp capture metadata onto images and collect it into an xlsx/txt report"
)]
struct Cli {
    /// Folder of images to process (default: config input_dir, then ./IMAGES_IN)
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Output folder for annotated images and the report (default: <INPUT>_OUT)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Quarantine folder for files that fail (default: <INPUT>_ERROR)
    #[arg(short = 'e', long = "error-dir", value_name = "DIR")]
    error_dir: Option<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Report format: xlsx or txt
    #[arg(long, value_name = "FORMAT")]
    format: Option<ReportFormat>,

    /// Panel corner: top-left, top-right, bottom-left or bottom-right
    #[arg(long, value_name = "CORNER")]
    anchor: Option<Anchor>,

    /// Put annotated images under MM-DD-YYYY folders named after the capture date
    #[arg(long)]
    dated: bool,

    /// Delete each source image once its annotated copy is written
    #[arg(long)]
    delete_source: bool,

    /// Also write every raw tag to <name>_metadata.txt
    #[arg(long)]
    raw_dump: bool,

    /// Extraction backend: nom-exif or exiftool
    #[arg(long, value_name = "BACKEND")]
    backend: Option<BackendKind>,

    /// Empty the output and quarantine folders before processing
    #[arg(long)]
    clear_output: bool,

    /// Skip writing the aggregate report
    #[arg(long)]
    no_report: bool,

    /// Display the tags of every input image and exit
    #[arg(long = "show-tags")]
    show_tags: bool,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded config.
    fn apply(&self, config: &mut Config) {
        if let Some(ref dir) = self.output {
            config.output.output_dir = Some(dir.clone());
        }
        if let Some(ref dir) = self.error_dir {
            config.output.error_dir = Some(dir.clone());
        }
        if let Some(format) = self.format {
            config.report.format = format;
        }
        if let Some(anchor) = self.anchor {
            config.overlay.anchor = anchor;
        }
        if let Some(backend) = self.backend {
            config.extraction.backend = backend;
        }
        if self.dated {
            config.output.layout = OutputLayout::Dated;
        }
        if self.delete_source {
            config.output.delete_source = true;
        }
        if self.raw_dump {
            config.report.write_raw_metadata = true;
        }
        if self.no_report {
            config.report.enabled = false;
        }
    }
}

fn init_logging(verbose: bool, log_file: Option<&str>) -> Result<()> {
    let log_level = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level));
    builder.format_timestamp(None);
    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle --init
    if cli.init {
        init_logging(cli.verbose, None)?;
        let config = Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    // Load config; the log file location lives in it
    let mut config = Config::load(cli.config.as_deref())?;
    init_logging(cli.verbose, config.output.log_file.as_deref())?;
    if !Config::exists(cli.config.as_deref()) {
        log::warn!("Config file not found. Using defaults (run `exif-stamp --init` to create one).");
    }
    cli.apply(&mut config);
    config.validate()?;

    let input = cli
        .input
        .clone()
        .or_else(|| config.output.input_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT_DIR));
    if !input.is_dir() {
        anyhow::bail!("Input directory does not exist: {}", input.display());
    }

    // Handle --show-tags
    if cli.show_tags {
        let options = CollectOptions {
            include_heif: config.extraction.include_heif,
            exclude_dirs: Vec::new(),
        };
        let images = pipeline::collect_images(&input, &options);
        if images.is_empty() {
            anyhow::bail!("No supported image files found in {}", input.display());
        }
        let backend = exif::build_backend(&config.extraction);
        for image_path in &images {
            print_tags(image_path, backend.as_ref(), &config);
        }
        return Ok(());
    }

    let batch = Batch::new(config, &input)?;

    if cli.clear_output {
        for dir in [batch.output_dir(), batch.error_dir()] {
            pipeline::clear_directory(dir)
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
        }
    }

    let images = batch.images();
    if images.is_empty() {
        anyhow::bail!("No supported image files found in {}", input.display());
    }
    log::info!("Found {} image(s) to process", images.len());
    log::info!("Backend: {}", batch.backend_name());

    let mut summary = batch.run();
    retry_report(&batch, &mut summary);
    print_summary(&summary, batch.error_dir());

    Ok(())
}

/// Offer to retry a failed report write while the user closes the file.
fn retry_report(batch: &Batch, summary: &mut RunSummary) {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return;
    }
    while let Some(ref err) = summary.report_error {
        if !err.is_retryable() {
            return;
        }
        print!("{YELLOW}{err}{RESET}\nPress Enter to retry, or type q to skip: ");
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer).is_err() || answer.trim().eq_ignore_ascii_case("q") {
            return;
        }
        match batch.write_report(&summary.records) {
            Ok(path) => {
                summary.report = Some(path);
                summary.report_error = None;
            }
            Err(e) => summary.report_error = Some(e),
        }
    }
}

fn print_summary(summary: &RunSummary, error_dir: &Path) {
    log::info!(
        "Done: {} succeeded, {} failed, {} skipped out of {} images",
        summary.processed,
        summary.failures.len(),
        summary.skipped.len(),
        summary.total
    );
    for path in &summary.skipped {
        log::warn!("Skipped (no decoder): {}", path.display());
    }
    if let Some(ref report) = summary.report {
        log::info!("Report: {}", report.display());
    }
    if let Some(ref err) = summary.report_error {
        log::error!("Report not written: {err}");
    }
    if !summary.failures.is_empty() {
        println!();
        println!("  {BOLD}Failed files{RESET} {DIM}(moved to {}){RESET}", error_dir.display());
        println!("  {DIM}{}{RESET}", "─".repeat(70));
        for failure in &summary.failures {
            let name = failure
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            print_row(&name, &failure.reason);
            if failure.quarantined.is_none() {
                print_row("", "(could not be moved)");
            }
        }
        println!();
    }
}

// ANSI color codes
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Print raw and normalized tags for a file.
fn print_tags(path: &Path, backend: &dyn exif::TagBackend, config: &Config) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    let tags = match backend.read_tags(path) {
        Ok(tags) => tags,
        Err(e) => {
            println!("  {YELLOW}{e:#}{RESET}");
            println!();
            return;
        }
    };

    if tags.is_empty() {
        println!("  {DIM}(no EXIF metadata found){RESET}");
        println!();
        return;
    }

    println!("  {BOLD}Raw tags ({}){RESET}", backend.name());
    println!("  {DIM}{}{RESET}", "─".repeat(70));
    for (tag, value) in &tags {
        print_row(tag, &value.to_string());
    }
    println!();

    println!("  {BOLD}Annotation{RESET}");
    println!("  {DIM}{}{RESET}", "─".repeat(70));
    match backend.normalize(&tags) {
        Ok(metadata) => {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let text = pipeline::annotation_text(&filename, &metadata, config.report.gps_precision);
            for line in text.lines() {
                match line.split_once(": ") {
                    Some((tag, val)) => print_row(tag, val),
                    None => print_row("", line),
                }
            }
        }
        Err(e) => println!("  {YELLOW}{e}{RESET}"),
    }
    println!();
}

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : " = 25 chars + 2 leading spaces).
const INDENT: &str = "                           ";

/// Print a single row in the tag display table.
fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}
