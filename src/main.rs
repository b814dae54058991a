use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use docx_comment_threads::config::{init_default_config, RunConfig};
use docx_comment_threads::export::write_rows;
use docx_comment_threads::pipeline::CommentThreadPipeline;
use docx_comment_threads::progress::ConsoleProgress;
use docx_comment_threads::report::render_threads;

#[derive(Parser, Debug)]
#[command(name = "docx-comment-threads")]
#[command(about = "Extract DOCX review comment threads with their section heading and requirement id", long_about = None)]
struct Args {
    /// Write a default comment-threads.toml, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory for --init-config (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config with --init-config
    #[arg(long)]
    force: bool,

    /// Input .docx
    #[arg(value_name = "DOCX")]
    input: Option<PathBuf>,

    /// Output rows file (default: <input_stem>.threads.<format>)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Row format: json or tsv
    #[arg(long)]
    format: Option<String>,

    /// Threads to print to stdout (0 = none)
    #[arg(long, value_name = "N")]
    print: Option<usize>,

    /// Config file path (default: search for comment-threads.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// No stage log on stderr
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let input = match args.input {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            return Ok(());
        }
    };

    let cfg = RunConfig::from_paths_and_args(&input, args.output, args.config, args.format, args.print)
        .context("build config")?;
    if let Some(p) = cfg.config_path.as_ref() {
        progress.info(format!("config: {}", p.display()));
    }

    let bytes = std::fs::read(&input).with_context(|| format!("read docx: {}", input.display()))?;
    let pipeline = CommentThreadPipeline::new(&cfg.extract, &progress);
    let (extraction, digest) = pipeline
        .extract_bytes(bytes)
        .with_context(|| format!("extract comments: {}", input.display()))?;

    let rows = extraction.rows(&cfg.extract);
    let source = input
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    write_rows(&cfg.output, cfg.format, source, &digest, &rows)?;
    progress.info(format!("wrote {} row(s): {}", rows.len(), cfg.output.display()));

    if cfg.print_threads > 0 {
        print!(
            "{}",
            render_threads(&extraction.threads, cfg.print_threads, &cfg.extract.unknown_author)
        );
    }

    progress.info(format!(
        "threads: {}, comments: {}, paragraphs: {} (headings: {}), anchored: {}, with heading: {}, with requirement: {}",
        extraction.threads.len(),
        extraction.comment_count,
        extraction.paragraph_count,
        extraction.heading_count,
        extraction.anchored_count(),
        extraction.with_heading_count(),
        extraction.with_requirement_count()
    ));
    Ok(())
}
