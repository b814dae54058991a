use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::Deserialize;

use crate::docx::locate::{
    RequirementPattern, DEFAULT_REQUIREMENT_MAX_DIGITS, DEFAULT_REQUIREMENT_PREFIX,
};

pub const CONFIG_FILENAME: &str = "comment-threads.toml";
pub const CONFIG_ENV: &str = "COMMENT_THREADS_CONFIG";

pub const DEFAULT_MARKER_TOKEN: &str = "[[COMMENT]]";
pub const DEFAULT_UNKNOWN_AUTHOR: &str = "Unknown";
pub const DEFAULT_PRINT_THREADS: usize = 5;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub extract: ExtractSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ExtractSection {
    /// Inserted before the first run inside a comment's range.
    #[serde(default)]
    pub marker_token: Option<String>,
    #[serde(default)]
    pub requirement_prefix: Option<String>,
    #[serde(default)]
    pub requirement_max_digits: Option<usize>,
    #[serde(default)]
    pub unknown_author: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct OutputSection {
    /// "json" or "tsv".
    #[serde(default)]
    pub format: Option<String>,
    /// Anchor column carries the marked rendition when true, plain text otherwise.
    #[serde(default)]
    pub prefer_marked_text: Option<bool>,
    #[serde(default)]
    pub print_threads: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Tsv,
}

impl OutputFormat {
    pub fn parse(s: Option<&str>) -> anyhow::Result<Self> {
        match s.unwrap_or("json").trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "tsv" => Ok(Self::Tsv),
            other => Err(anyhow!("unknown output format: {other} (expected json or tsv)")),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Tsv => "tsv",
        }
    }
}

/// Settings the extraction core needs.
#[derive(Clone, Debug)]
pub struct ExtractOptions {
    pub marker_token: String,
    pub unknown_author: String,
    pub requirement: RequirementPattern,
    pub prefer_marked_text: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            marker_token: DEFAULT_MARKER_TOKEN.to_string(),
            unknown_author: DEFAULT_UNKNOWN_AUTHOR.to_string(),
            requirement: RequirementPattern::default(),
            prefer_marked_text: true,
        }
    }
}

/// Fully resolved run settings: config file values under command-line overrides.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub config_path: Option<PathBuf>,
    pub extract: ExtractOptions,
    pub format: OutputFormat,
    pub output: PathBuf,
    pub print_threads: usize,
}

impl RunConfig {
    pub fn from_paths_and_args(
        input: &Path,
        output: Option<PathBuf>,
        config_path: Option<PathBuf>,
        format: Option<String>,
        print_threads: Option<usize>,
    ) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            }
        }

        let ex = &file_cfg.extract;
        let requirement = RequirementPattern::new(
            ex.requirement_prefix
                .as_deref()
                .unwrap_or(DEFAULT_REQUIREMENT_PREFIX),
            ex.requirement_max_digits
                .unwrap_or(DEFAULT_REQUIREMENT_MAX_DIGITS),
        )
        .context("requirement pattern")?;
        let extract = ExtractOptions {
            marker_token: non_empty(ex.marker_token.as_deref())
                .unwrap_or(DEFAULT_MARKER_TOKEN)
                .to_string(),
            unknown_author: non_empty(ex.unknown_author.as_deref())
                .unwrap_or(DEFAULT_UNKNOWN_AUTHOR)
                .to_string(),
            requirement,
            prefer_marked_text: file_cfg.output.prefer_marked_text.unwrap_or(true),
        };

        let format = OutputFormat::parse(format.as_deref().or(file_cfg.output.format.as_deref()))?;
        let output = output.unwrap_or_else(|| default_output_for(input, format));
        let print_threads = print_threads
            .or(file_cfg.output.print_threads)
            .unwrap_or(DEFAULT_PRINT_THREADS);

        Ok(Self {
            config_path: cfg_file.filter(|p| p.exists()),
            extract,
            format,
            output,
            print_threads,
        })
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

pub fn default_output_for(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("{stem}.threads.{}", format.extension()))
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text).with_context(|| format!("config: {}", path.display()))
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    toml::from_str(text).context("parse config toml")
}

pub const DEFAULT_CONFIG_TOML: &str = r#"# docx-comment-threads configuration.
# Command-line flags override these values.

[extract]
# Token inserted before the first run inside a comment's range.
marker_token = "[[COMMENT]]"
# Requirement ids: <prefix> followed by 1..=requirement_max_digits digits, any case.
requirement_prefix = "DSS"
requirement_max_digits = 3
# Shown for comments without an author.
unknown_author = "Unknown"

[output]
# "json" or "tsv"
format = "json"
# Anchor column: marked paragraph text when true, plain text when false.
prefer_marked_text = true
# Threads shown in the console report.
print_threads = 5
"#;

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);
    if cfg_path.exists() && !force {
        return Err(anyhow!(
            "config already exists: {} (use --force to overwrite)",
            cfg_path.display()
        ));
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let cfg = parse_config(DEFAULT_CONFIG_TOML).expect("parse default");
        assert_eq!(cfg.extract.requirement_prefix.as_deref(), Some("DSS"));
        assert_eq!(cfg.extract.requirement_max_digits, Some(3));
        assert_eq!(cfg.output.format.as_deref(), Some("json"));
        assert_eq!(cfg.output.print_threads, Some(5));
    }

    #[test]
    fn sections_are_optional() {
        let cfg = parse_config("[output]\nformat = \"tsv\"\n").expect("parse");
        assert!(cfg.extract.marker_token.is_none());
        assert_eq!(
            OutputFormat::parse(cfg.output.format.as_deref()).expect("format"),
            OutputFormat::Tsv
        );
        assert!(parse_config("[extract]\nrequirement_max_digits = \"x\"\n").is_err());
    }

    #[test]
    fn output_format_and_default_path() {
        assert_eq!(OutputFormat::parse(None).expect("default"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse(Some(" TSV ")).expect("tsv"), OutputFormat::Tsv);
        assert!(OutputFormat::parse(Some("xlsx")).is_err());
        assert_eq!(
            default_output_for(Path::new("in/review.docx"), OutputFormat::Tsv),
            Path::new("in").join("review.threads.tsv")
        );
    }

    #[test]
    fn args_override_file_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg_path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &cfg_path,
            "[extract]\nrequirement_prefix = \"REQ\"\nunknown_author = \"?\"\n[output]\nformat = \"tsv\"\nprint_threads = 2\n",
        )
        .expect("write cfg");
        let input = dir.path().join("doc.docx");

        let rc = RunConfig::from_paths_and_args(&input, None, Some(cfg_path.clone()), None, None)
            .expect("run config");
        assert_eq!(rc.format, OutputFormat::Tsv);
        assert_eq!(rc.print_threads, 2);
        assert_eq!(rc.extract.unknown_author, "?");
        assert_eq!(rc.extract.requirement.find("req12").as_deref(), Some("REQ12"));
        assert_eq!(rc.output, dir.path().join("doc.threads.tsv"));

        let rc = RunConfig::from_paths_and_args(
            &input,
            None,
            Some(cfg_path),
            Some("json".to_string()),
            Some(0),
        )
        .expect("run config");
        assert_eq!(rc.format, OutputFormat::Json);
        assert_eq!(rc.print_threads, 0);
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p = init_default_config(dir.path(), false).expect("init");
        assert!(p.exists());
        assert!(init_default_config(dir.path(), false).is_err());
        assert!(init_default_config(dir.path(), true).is_ok());
    }
}
