// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_arguments)]

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, info, warn};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use bookwai::app_config::{self, Config, TranslateMode};
use bookwai::app_controller::{Controller, RunOptions};
use bookwai::translation::ExportMode;

/// CLI Wrapper for TranslateMode to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliTranslateMode {
    Api,
    Token,
    Both,
}

impl From<CliTranslateMode> for TranslateMode {
    fn from(cli_mode: CliTranslateMode) -> Self {
        match cli_mode {
            CliTranslateMode::Api => TranslateMode::Api,
            CliTranslateMode::Token => TranslateMode::Token,
            CliTranslateMode::Both => TranslateMode::Both,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// CLI Wrapper for ExportMode to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliExportMode {
    Translation,
    Summary,
    Combined,
}

impl From<CliExportMode> for ExportMode {
    fn from(cli_mode: CliExportMode) -> Self {
        match cli_mode {
            CliExportMode::Translation => ExportMode::Translation,
            CliExportMode::Summary => ExportMode::Summary,
            CliExportMode::Combined => ExportMode::Combined,
        }
    }
}

/// Options shared by every command that loads the configuration
#[derive(Parser, Debug, Clone)]
struct CommonArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", global = true)]
    config_path: String,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,

    /// Project state file (defaults to <BOOK>.bookwai.json)
    #[arg(long, global = true)]
    state: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate every pending chapter of a book with the worker pool
    Translate(TranslateArgs),

    /// Translate a single chapter
    Chapter {
        /// Book text file
        #[arg(value_name = "BOOK")]
        input_path: PathBuf,

        /// Chapter id (1-based)
        #[arg(value_name = "ID")]
        unit_id: String,

        /// Channel selection
        #[arg(long, value_enum)]
        mode: Option<CliTranslateMode>,
    },

    /// Summarise a translated chapter
    Summarize {
        /// Book text file
        #[arg(value_name = "BOOK")]
        input_path: PathBuf,

        /// Chapter id (1-based)
        #[arg(value_name = "ID")]
        unit_id: String,
    },

    /// List the chapters of a book and their translation status
    Chapters {
        /// Book text file
        #[arg(value_name = "BOOK")]
        input_path: PathBuf,
    },

    /// List the session credentials known to the backend
    Credentials,

    /// Export stored translations as a plain-text book
    Export {
        /// Book text file
        #[arg(value_name = "BOOK")]
        input_path: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// What to export
        #[arg(long, value_enum, default_value = "translation")]
        what: CliExportMode,

        /// Book title (defaults to the file name)
        #[arg(long)]
        title: Option<String>,

        /// Book author
        #[arg(long, default_value = "")]
        author: String,
    },

    /// Generate shell completions for bookwai
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct TranslateArgs {
    /// Book text file with `=== Title ===` chapter headers
    #[arg(value_name = "BOOK")]
    input_path: PathBuf,

    /// Channel selection
    #[arg(long, value_enum)]
    mode: Option<CliTranslateMode>,

    /// Number of api workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Model name to use for translation
    #[arg(short, long)]
    model: Option<String>,

    /// Source language code (e.g., 'zh', 'en')
    #[arg(short, long)]
    source_language: Option<String>,

    /// Target language code (e.g., 'vi', 'fr')
    #[arg(short, long)]
    target_language: Option<String>,

    /// Chapter ids to leave out
    #[arg(short = 'x', long = "exclude", value_delimiter = ',')]
    excluded: Vec<String>,

    /// Translate chapters again even when a translation exists
    #[arg(short, long)]
    retranslate: bool,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

/// BookWAI - batch book translation with AI
///
/// Splits a book into chapters and translates them with a pool of workers
/// over a stateless api channel and per-credential session channels.
#[derive(Parser, Debug)]
#[command(name = "bookwai")]
#[command(version = "1.0.0")]
#[command(about = "AI-powered batch book translation")]
#[command(long_about = "BookWAI splits a book into chapters and translates them through a translation relay.

EXAMPLES:
    bookwai translate novel.txt                     # Translate pending chapters
    bookwai translate --mode both -w 3 novel.txt    # Api workers plus session workers
    bookwai translate -x 3,4 -r novel.txt           # Retranslate all but chapters 3 and 4
    bookwai chapter novel.txt 12                    # Translate chapter 12 only
    bookwai summarize novel.txt 12                  # Summarise translated chapter 12
    bookwai export novel.txt -o novel.vi.txt        # Write the translated book
    bookwai completions bash > bookwai.bash         # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    common: CommonArgs,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI colour for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let color = Self::color_for_level(record.level());
            let _ = writeln!(
                std::io::stderr(),
                "{}{} {:<5} {}\x1B[0m",
                color,
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Info until the config is loaded
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(shell, &mut cmd, "bookwai", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = load_config(&cli.common)?;
    let state = cli.common.state.as_deref();

    match cli.command {
        Commands::Translate(args) => {
            if let Some(mode) = args.mode {
                config.mode = mode.into();
            }
            if let Some(workers) = args.workers {
                config.batch.api_workers = workers;
            }
            if let Some(model) = args.model {
                config.model = model;
            }
            if let Some(source) = args.source_language {
                config.source_language = source;
            }
            if let Some(target) = args.target_language {
                config.target_language = target;
            }
            config.validate().context("Configuration validation failed")?;

            let options = RunOptions {
                excluded: args.excluded,
                retranslate_existing: args.retranslate.then_some(true),
                state_path: cli.common.state.clone(),
                show_progress: !args.no_progress,
            };
            let controller = Controller::with_config(config)?;
            match controller.translate_book(&args.input_path, &options).await? {
                Some(report) if report.missing() > 0 => {
                    warn!(
                        "{} chapter(s) still untranslated, rerun to retry them",
                        report.missing()
                    );
                }
                Some(_) => info!("All selected chapters translated"),
                None => info!("Nothing to translate"),
            }
        }
        Commands::Chapter {
            input_path,
            unit_id,
            mode,
        } => {
            if let Some(mode) = mode {
                config.mode = mode.into();
            }
            let controller = Controller::with_config(config)?;
            let result = controller.translate_unit(&input_path, &unit_id, state).await?;
            println!("{}", result.text);
        }
        Commands::Summarize { input_path, unit_id } => {
            let controller = Controller::with_config(config)?;
            let summary = controller.summarize_unit(&input_path, &unit_id, state).await?;
            println!("{}", summary.text);
        }
        Commands::Chapters { input_path } => {
            let controller = Controller::with_config(config)?;
            for (unit, translated) in controller.list_units(&input_path, state)? {
                let mark = if translated { "x" } else { " " };
                println!("[{}] {:>4}  {}", mark, unit.id, unit.title);
            }
        }
        Commands::Credentials => {
            let controller = Controller::with_config(config)?;
            let (all, distinct) = controller.list_credentials().await?;
            for credential in &all {
                let state = if distinct.iter().any(|d| d.id == credential.id) {
                    "usable"
                } else if credential.is_usable() {
                    "duplicate"
                } else {
                    "unusable"
                };
                println!("{:<12} {:<10} {}", credential.id, state, credential.display_name());
            }
            println!("{} distinct usable credential(s)", distinct.len());
        }
        Commands::Export {
            input_path,
            output,
            what,
            title,
            author,
        } => {
            let controller = Controller::with_config(config)?;
            let path = controller.export(&input_path, what.into(), &output, title.as_deref(), &author, state)?;
            info!("Book written to {:?}", path);
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Load `conf.json`, creating it with defaults when missing
fn load_config(common: &CommonArgs) -> Result<Config> {
    let config_path = &common.config_path;
    let mut config = if Path::new(config_path).exists() {
        let file = File::open(config_path).context(format!("Failed to open config file: {}", config_path))?;

        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context(format!("Failed to parse config file: {}", config_path))?
    } else {
        warn!("Config file not found at '{}', creating default config.", config_path);

        let config = Config::default();
        let config_json =
            serde_json::to_string_pretty(&config).context("Failed to serialize default config to JSON")?;
        std::fs::write(config_path, config_json)
            .context(format!("Failed to write default config to file: {}", config_path))?;
        config
    };

    if let Some(log_level) = &common.log_level {
        config.log_level = log_level.clone().into();
    }
    log::set_max_level(config.log_level.to_level_filter());

    config.validate().context("Configuration validation failed")?;
    Ok(config)
}
