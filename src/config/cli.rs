use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the mdtools binary.
#[derive(Debug, Parser)]
#[command(
    name = "mdtools",
    version,
    about = "Markdown preview, binding and export tools"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MDTOOLS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render a markdown file to an HTML fragment.
    Render(RenderArgs),
    /// Export a markdown file as html, rich_text, markdown or standalone.
    Export(ExportArgs),
    /// Merge several markdown files into one.
    Bind(BindArgs),
    /// Re-render a file whenever it changes.
    Watch(WatchArgs),
    /// Serve render requests as JSON lines on stdin/stdout.
    Worker(WorkerArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DiagramOverrides {
    /// Override the Mermaid CLI executable path used for diagram rendering.
    #[arg(long = "mermaid-cli-path", value_name = "PATH")]
    pub mermaid_cli_path: Option<PathBuf>,

    /// Override the directory used to cache rendered Mermaid diagrams.
    #[arg(long = "mermaid-cache-dir", value_name = "PATH")]
    pub mermaid_cache_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommandOverrides {
    #[command(flatten)]
    pub diagrams: DiagramOverrides,

    /// Override the preview theme (light|dark).
    #[arg(long = "theme", value_name = "THEME")]
    pub theme: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the edit debounce window.
    #[arg(long = "debounce-ms", value_name = "MILLIS")]
    pub debounce_ms: Option<u64>,

    /// Abandon renders that take longer than this; 0 disables the limit.
    #[arg(long = "render-timeout-ms", value_name = "MILLIS")]
    pub render_timeout_ms: Option<u64>,

    /// Override the fenced-code language tag treated as diagram source.
    #[arg(long = "diagram-marker", value_name = "TAG")]
    pub diagram_marker: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: CommandOverrides,

    /// Markdown file to render; `-` reads stdin.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Write the fragment here instead of stdout.
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub overrides: CommandOverrides,

    /// Markdown file to export.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Export format (html|rich_text|markdown|standalone).
    #[arg(long, default_value = "html", value_name = "FORMAT")]
    pub format: String,

    /// Directory receiving the exported file.
    #[arg(long = "out-dir", default_value = ".", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub out_dir: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct BindArgs {
    #[command(flatten)]
    pub overrides: CommandOverrides,

    /// Markdown files to merge, in order.
    #[arg(value_name = "FILE", required = true, num_args = 1.., value_hint = ValueHint::FilePath)]
    pub inputs: Vec<PathBuf>,

    /// Separator between parts (rule|blank|newline).
    #[arg(long, default_value = "rule", value_name = "STYLE")]
    pub style: String,

    /// Directory receiving the merged file.
    #[arg(long = "out-dir", default_value = ".", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub out_dir: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub overrides: CommandOverrides,

    /// Markdown file to watch.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// File receiving the activated preview after every render.
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// How often the input is checked for changes.
    #[arg(long = "poll-ms", default_value_t = 250, value_name = "MILLIS")]
    pub poll_ms: u64,

    /// Skip diagram activation.
    #[arg(long = "no-diagrams", action = clap::ArgAction::SetTrue)]
    pub no_diagrams: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub overrides: CommandOverrides,
}

impl Command {
    pub fn overrides(&self) -> &CommandOverrides {
        match self {
            Command::Render(args) => &args.overrides,
            Command::Export(args) => &args.overrides,
            Command::Bind(args) => &args.overrides,
            Command::Watch(args) => &args.overrides,
            Command::Worker(args) => &args.overrides,
        }
    }
}
