use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use modekit::config::{self, ConfigManager, LoggingConfig};
use modekit::modes::{self, Mode, ModeOptions};

#[derive(Parser)]
#[command(name = "modekit")]
#[command(about = "Config-driven LLM modes on top of a local Ollama server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Write the default config.yml (never overwrites an existing file).
    Init {
        /// Config file path (default: MODEKIT_CONFIG_PATH, ./config.yml or ~/.modekit/config.yml)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run a mode: prompt, chat, rag, agent or evaluate. Asks for one when omitted.
    Run {
        /// Mode to run
        mode: Option<String>,

        /// Config file path (default: MODEKIT_CONFIG_PATH, ./config.yml or ~/.modekit/config.yml)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Memory type for chat: buffer, window, token or summary (default from config)
        #[arg(long, short, value_name = "TYPE")]
        memory: Option<String>,

        /// In chat mode, run the scripted demo of the four memory types.
        #[arg(long)]
        demo: bool,
    },

    /// List the models available on the Ollama server.
    Models {
        /// Config file path (default: MODEKIT_CONFIG_PATH, ./config.yml or ~/.modekit/config.yml)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            init_logging(&LoggingConfig::default());
            println!("modekit {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            init_logging(&LoggingConfig::default());
            if let Err(e) = run_init(config) {
                fail("init", e, false);
            }
        }
        Some(Commands::Run {
            mode,
            config,
            memory,
            demo,
        }) => {
            let (config, to_file) = load(config);
            let options = ModeOptions { memory, demo };
            if let Err(e) = run(mode, &config, &options).await {
                fail("run", e, to_file);
            }
        }
        Some(Commands::Models { config }) => {
            let (config, to_file) = load(config);
            if let Err(e) = run_models(&config).await {
                fail("models", e, to_file);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

/// Load config and set up logging from it. Exits on a config error.
fn load(path: Option<PathBuf>) -> (ConfigManager, bool) {
    match config::load_config(path) {
        Ok((config, path)) => {
            let to_file = init_logging(config.logging());
            log::debug!("loaded config from {}", path.display());
            (config, to_file)
        }
        Err(e) => {
            init_logging(&LoggingConfig::default());
            fail("config", e, false);
        }
    }
}

/// RUST_LOG wins over `logging.level`. With `logging.file` set, lines are appended there.
/// Returns whether logs go to a file.
fn init_logging(logging: &LoggingConfig) -> bool {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(logging.level.as_str()),
    );
    let mut to_file = false;
    if let Some(path) = &logging.file {
        match open_log_file(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
                to_file = true;
            }
            Err(e) => eprintln!("cannot open log file {}: {}", path.display(), e),
        }
    }
    builder.init();
    to_file
}

fn open_log_file(path: &std::path::Path) -> io::Result<std::fs::File> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

fn fail(what: &str, e: anyhow::Error, to_file: bool) -> ! {
    log::error!("{} failed: {:#}", what, e);
    if to_file {
        eprintln!("{} failed: {:#}", what, e);
    }
    std::process::exit(1);
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let path = modekit::init::init_config(&path)?;
    println!("initialized configuration at {}", path.display());
    Ok(())
}

async fn run(mode: Option<String>, config: &ConfigManager, options: &ModeOptions) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stdout = io::stdout();

    let mode = match mode {
        Some(m) => m,
        None => {
            writeln!(stdout, "{}", modes::MODE_MENU)?;
            stdout.flush()?;
            let mut line = String::new();
            input.read_line(&mut line)?;
            line
        }
    };
    let mode: Mode = mode.parse()?;
    modes::run_mode(mode, config, options, &mut input, &mut stdout).await?;
    Ok(())
}

async fn run_models(config: &ConfigManager) -> anyhow::Result<()> {
    let client = modekit::llm::LlmClient::new(config);
    let models = client.list_models().await?;
    if models.is_empty() {
        println!("no models found; pull one with `ollama pull {}`", client.model());
        return Ok(());
    }
    for m in models {
        let marker = if m.name == client.model() { "*" } else { " " };
        match m.size {
            Some(size) => println!("{} {} ({:.1} GB)", marker, m.name, size as f64 / 1e9),
            None => println!("{} {}", marker, m.name),
        }
    }
    Ok(())
}
