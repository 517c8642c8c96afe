//! CLI binary for edgequake-pdf2table.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdf2table::{
    inspect, AggregateStore, BatchProgressCallback, BatchStatus, BatchSummary,
    BoundingBoxRelative, DocumentExtraction, ExtractionConfig, Extractor, PdfSource, Preset,
    PresetStore, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the batch, one log line per document.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(None),
        })
    }

    fn elapsed(&self) -> String {
        let secs = self
            .started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting from {total} documents…"))
        ));
    }

    fn on_document_start(&self, _index: usize, _total: usize, name: &str) {
        if let Ok(mut t) = self.started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_document_complete(
        &self,
        index: usize,
        total: usize,
        name: &str,
        status: BatchStatus,
        rows: usize,
    ) {
        let mark = match status {
            BatchStatus::Ok => green("✓"),
            _ => yellow("∅"),
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {}  {}  {}",
            mark,
            index + 1,
            total,
            name,
            dim(&format!("{rows} rows")),
            self.elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        // Keep one line per document.
        let msg = match error.char_indices().nth(80) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {}  {}  {}",
            red("✗"),
            index + 1,
            total,
            name,
            red(&msg),
            self.elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} ok  {} empty  {} error",
            if summary.error == 0 { green("✔") } else { cyan("⚠") },
            bold(&summary.ok.to_string()),
            summary.empty,
            if summary.error == 0 {
                summary.error.to_string()
            } else {
                red(&summary.error.to_string())
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract the BOM in the top-right corner of page 1 (CSV on stdout)
  pdf2table extract drawing.pdf --bbox 0.55,0.05,0.98,0.45

  # Same region from a saved preset, full JSON result
  pdf2table extract drawing.pdf --preset bom-a3 --json

  # Batch: every PDF, one region, CSV exports in out/
  pdf2table batch scans/*.pdf --preset bom-a3 --out-dir out

  # Check where a box lands before spending a model call
  pdf2table preview drawing.pdf --page 2 --bbox 0.55,0.05,0.98,0.45 -o preview.png

  # Page count (no API key needed)
  pdf2table inspect drawing.pdf

  # Manage presets
  pdf2table presets add --id bom-a3 --name "BOM A3" --bbox 0.55,0.05,0.98,0.45
  pdf2table presets list

BOUNDING BOXES:
  x0,y0,x1,y1 as fractions of page width/height, origin top-left.
  0 <= x0 < x1 <= 1 and 0 <= y0 < y1 <= 1.

OUTPUTS:
  Crop/<stem>_p<page>_crop.jpg          crop sent to the model (JPEG q95)
  out/all_extracted_<timestamp>.csv     batch rows + _source_pdf/_page_idx/_table_name
  out/batch_report_<timestamp>.csv      document,status,rows,error

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory or file of the pdfium shared library
"#;

/// Extract tables from a region of scanned PDF pages using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2table",
    version,
    about = "Extract tables from a region of scanned PDF pages using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// LLM model ID (e.g. gemini-2.0-flash, gpt-4.1-mini).
    #[arg(long, global = true, env = "PDF2TABLE_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama.
    #[arg(long, global = true, env = "PDF2TABLE_PROVIDER")]
    provider: Option<String>,

    /// Extraction render DPI (72–600).
    #[arg(long, global = true, env = "PDF2TABLE_DPI", default_value_t = 400,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// DPI of the single retry when the extraction render fails.
    #[arg(long, global = true, env = "PDF2TABLE_FALLBACK_DPI", default_value_t = 340)]
    fallback_dpi: u32,

    /// Per-call model timeout in seconds (0 waits indefinitely).
    #[arg(long, global = true, env = "PDF2TABLE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Max model output tokens per crop.
    #[arg(long, global = true, env = "PDF2TABLE_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "PDF2TABLE_PASSWORD")]
    password: Option<String>,

    /// Directory for saved crops.
    #[arg(long, global = true, env = "PDF2TABLE_CROP_DIR", default_value = "Crop")]
    crop_dir: PathBuf,

    /// Do not save crops to disk.
    #[arg(long, global = true, env = "PDF2TABLE_NO_SAVE_CROPS")]
    no_save_crops: bool,

    /// Preset file.
    #[arg(long, global = true, env = "PDF2TABLE_PRESETS", default_value = "config/presets.json")]
    presets: PathBuf,

    /// pdfium shared library (directory or file).
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2TABLE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2TABLE_QUIET")]
    quiet: bool,
}

/// Where to crop: an explicit box or a saved preset.
#[derive(Args, Debug, Clone)]
#[group(multiple = false)]
struct RegionArgs {
    /// Relative box x0,y0,x1,y1.
    #[arg(long, allow_hyphen_values = true)]
    bbox: Option<BoundingBoxRelative>,

    /// Preset id from the preset file.
    #[arg(long)]
    preset: Option<String>,
}

impl RegionArgs {
    fn resolve(&self, store: &PresetStore) -> Result<Option<BoundingBoxRelative>> {
        if let Some(b) = self.bbox {
            return Ok(Some(b));
        }
        let Some(ref id) = self.preset else {
            return Ok(None);
        };
        let preset = store
            .get(id)
            .with_context(|| format!("Failed to read presets from {}", store.path().display()))?
            .with_context(|| format!("No preset with id '{id}' in {}", store.path().display()))?;
        Ok(Some(preset.bbox().with_context(|| {
            format!("Preset '{id}' has an invalid box")
        })?))
    }

    fn require(&self, store: &PresetStore) -> Result<BoundingBoxRelative> {
        self.resolve(store)?
            .context("A region is required: pass --bbox x0,y0,x1,y1 or --preset ID")
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the table in a region of one page.
    Extract {
        pdf: PathBuf,

        /// Page number (1-indexed).
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        page: u64,

        #[command(flatten)]
        region: RegionArgs,

        /// Print the full result as JSON instead of CSV rows.
        #[arg(long)]
        json: bool,
    },

    /// Extract the same region from many PDFs and export CSVs.
    Batch {
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,

        /// Page number (1-indexed).
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        page: u64,

        #[command(flatten)]
        region: RegionArgs,

        /// Directory for the row and ledger CSVs.
        #[arg(long, env = "PDF2TABLE_OUT_DIR", default_value = "out")]
        out_dir: PathBuf,

        /// Disable progress bar.
        #[arg(long, env = "PDF2TABLE_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Render a page preview and show where a region lands.
    Preview {
        pdf: PathBuf,

        /// Page number (1-indexed).
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        page: u64,

        #[command(flatten)]
        region: RegionArgs,

        /// Write the preview PNG here.
        #[arg(short, long, default_value = "preview.png")]
        output: PathBuf,
    },

    /// Print the page count of a PDF.
    Inspect {
        pdf: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// List or edit saved regions.
    Presets {
        #[command(subcommand)]
        action: Option<PresetAction>,
    },
}

#[derive(Subcommand, Debug)]
enum PresetAction {
    /// List presets (active only unless --all).
    List {
        #[arg(long)]
        all: bool,
    },
    /// Add or replace a preset.
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// global, template or document.
        #[arg(long, default_value = "global")]
        scope: String,
        #[arg(long, allow_hyphen_values = true)]
        bbox: BoundingBoxRelative,
    },
    Enable {
        id: String,
    },
    Disable {
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // The batch progress bar carries the feedback; keep library logs quiet
    // while it is shown.
    let batch_bar = matches!(cli.command, Command::Batch { no_progress: false, .. }) && !g.quiet;
    let filter = if g.verbose {
        "debug"
    } else if g.quiet || batch_bar {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let presets = PresetStore::new(&g.presets);

    match &cli.command {
        Command::Extract {
            pdf,
            page,
            region,
            json,
        } => {
            let bbox = region.require(&presets)?;
            let config = build_config(g, None)?;
            let extractor = Extractor::new(config).context("Startup failed")?;
            extractor.check_credentials().await.context("Startup failed")?;
            let source = PdfSource::from_path(pdf).context("Cannot open PDF")?;

            let result = extractor
                .process_document(&source, page_index(*page), &bbox)
                .await
                .context("Extraction failed")?;

            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).context("Failed to serialise result")?
                );
            } else {
                write_rows_csv(&result).context("Failed to write to stdout")?;
            }
            if !g.quiet {
                report_extraction(&result);
            }
        }

        Command::Batch {
            pdfs,
            page,
            region,
            out_dir,
            no_progress,
        } => {
            let bbox = region.require(&presets)?;
            let progress: Option<ProgressCallback> = if g.quiet || *no_progress {
                None
            } else {
                Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
            };
            let config = build_config(g, progress)?;
            let extractor = Extractor::new(config).context("Startup failed")?;
            extractor.check_credentials().await.context("Startup failed")?;

            let mut store = AggregateStore::new();
            let summary = extractor
                .run_batch_paths(pdfs, page_index(*page), &bbox, &mut store)
                .await
                .context("Batch failed")?;

            let rows_path = store.export_rows(out_dir).context("Row export failed")?;
            let ledger_path = store.export_ledger(out_dir).context("Ledger export failed")?;

            if !g.quiet {
                if *no_progress {
                    eprintln!(
                        "{} ok, {} empty, {} error",
                        summary.ok, summary.empty, summary.error
                    );
                }
                eprintln!("   rows   → {}", bold(&rows_path.display().to_string()));
                eprintln!("   ledger → {}", bold(&ledger_path.display().to_string()));
            }
        }

        Command::Preview {
            pdf,
            page,
            region,
            output,
        } => {
            let bbox = region.resolve(&presets)?;
            let config = build_config(g, None)?;
            let extractor = Extractor::new(config).context("Startup failed")?;
            let source = PdfSource::from_path(pdf).context("Cannot open PDF")?;

            let preview = extractor
                .preview(&source, page_index(*page), bbox.as_ref())
                .await
                .context("Preview failed")?;
            save_png(&preview.pair.preview.image, output)?;

            if !g.quiet {
                let (hd, pv) = (&preview.pair.high_res, &preview.pair.preview);
                eprintln!(
                    "{} {}  ({}x{} @ {} DPI; extraction image {}x{} @ {} DPI)",
                    green("✔"),
                    bold(&output.display().to_string()),
                    pv.width(),
                    pv.height(),
                    pv.dpi,
                    hd.width(),
                    hd.height(),
                    hd.dpi,
                );
                if let (Some(p), Some(h)) = (preview.preview_region, preview.high_res_region) {
                    eprintln!(
                        "   region: preview ({},{})-({},{})  extraction ({},{})-({},{})",
                        p.x0, p.y0, p.x1, p.y1, h.x0, h.y0, h.x1, h.y1
                    );
                }
            }
        }

        Command::Inspect { pdf, json } => {
            let config = build_config(g, None)?;
            let source = PdfSource::from_path(pdf).context("Cannot open PDF")?;
            let pages = inspect(&source, &config)
                .await
                .context("Failed to inspect PDF")?;
            if *json {
                println!(
                    "{}",
                    serde_json::json!({ "file": source.name(), "pages": pages })
                );
            } else {
                println!("File:   {}", source.name());
                println!("Pages:  {}", pages);
            }
        }

        Command::Presets { action } => match action.as_ref().unwrap_or(&PresetAction::List { all: false }) {
            PresetAction::List { all } => {
                let listed = if *all {
                    presets.load()
                } else {
                    presets.list_active()
                };
                let list = listed.context("Failed to read presets")?;
                if list.is_empty() {
                    eprintln!("{}", dim("No presets saved"));
                }
                for p in list {
                    println!(
                        "{:<16} {:<32} {}{}",
                        p.id,
                        p.label(),
                        p.bbox_rel,
                        if p.active { String::new() } else { dim("  (inactive)") }
                    );
                }
            }
            PresetAction::Add {
                id,
                name,
                scope,
                bbox,
            } => {
                let mut preset = Preset::new(id.clone(), name.clone(), *bbox);
                preset.scope = scope.clone();
                presets.upsert(preset).context("Failed to save preset")?;
                eprintln!("{} saved preset {}", green("✔"), bold(id));
            }
            PresetAction::Enable { id } => {
                presets.set_active(id, true).context("Failed to save preset")?;
            }
            PresetAction::Disable { id } => {
                presets.set_active(id, false).context("Failed to save preset")?;
            }
        },
    }

    Ok(())
}

/// 1-indexed CLI page → 0-indexed library page.
///
/// Every `--page` flag is parsed with `range(1..)`, so `page >= 1` here.
fn page_index(page: u64) -> usize {
    (page - 1) as usize
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(g: &GlobalArgs, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .process_dpi(g.dpi)
        .fallback_dpi(g.fallback_dpi)
        .max_tokens(g.max_tokens)
        .api_timeout_secs((g.api_timeout > 0).then_some(g.api_timeout))
        .crop_dir(&g.crop_dir)
        .save_crops(!g.no_save_crops);

    if let Some(ref m) = g.model {
        builder = builder.model(m);
    }
    if let Some(ref p) = g.provider {
        builder = builder.provider_name(p);
    }
    if let Some(ref pwd) = g.password {
        builder = builder.password(pwd);
    }
    if let Some(ref lib) = g.pdfium_lib {
        builder = builder.pdfium_library_path(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Consolidated rows as CSV on stdout, table tag last.
fn write_rows_csv(result: &DocumentExtraction) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout().lock());
    let mut header: Vec<&str> = result.columns.iter().map(String::as_str).collect();
    header.push("_table");
    writer.write_record(&header)?;

    for row in &result.rows {
        let mut record: Vec<String> = result
            .columns
            .iter()
            .map(|c| match row.fields.get(c) {
                None | Some(serde_json::Value::Null) => String::new(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        record.push(row.table.clone());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn report_extraction(result: &DocumentExtraction) {
    let status = if result.is_empty {
        yellow("∅ empty")
    } else {
        green(&format!("✔ {} rows", result.rows.len()))
    };
    eprintln!(
        "{}  {}  {}",
        status,
        bold(&result.artifacts.table_name),
        dim(&format!(
            "{} page {} @ {} DPI",
            result.document_name,
            result.page_index + 1,
            result.render_dpi
        )),
    );
    if let Some(ref path) = result.artifacts.crop_path {
        eprintln!("   crop → {}", dim(&path.display().to_string()));
    }
}

fn save_png(img: &image::DynamicImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    img.save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write {}", path.display()))
}
