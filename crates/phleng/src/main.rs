//! phleng - Thai traditional melody generator
//!
//! Subcommands:
//! - `phleng serve` - HTTP chat sessions with MIDI/WAV downloads
//! - `phleng chat` - the same conversation on the terminal
//! - `phleng render <file>` - ABC notation to MIDI and WAV
//! - `phleng check <file>` - report output-rule and parse findings
//! - `phleng models` - list the model picker
//! - `phleng config` - show the effective configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phleng::render::Renderer;
use phleng::{extract, telemetry, web, AudioRenderer, Studio};
use phlengconf::PhlengConfig;

#[derive(Parser)]
#[command(name = "phleng")]
#[command(about = "Compose traditional Thai melodies with a language model")]
#[command(version)]
struct Cli {
    /// Config file to load instead of ./phleng.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to bind (overrides [bind] http_port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides [bind] host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Chat on the terminal
    Chat {
        /// Model id from `phleng models`
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Render an ABC file (or a saved reply with a fenced block)
    Render {
        file: PathBuf,

        /// Base name for the output files (default: the T: title)
        #[arg(long)]
        name: Option<String>,
    },

    /// Check an ABC file against the output rules
    Check { file: PathBuf },

    /// List configured models
    Models,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = PhlengConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let guard = telemetry::init(&config.telemetry).context("Failed to initialize telemetry")?;
    tracing::debug!(files = ?sources.files, env = ?sources.env_overrides, "Configuration loaded");

    let config = Arc::new(config);
    let result = run(cli.command, config, &sources).await;

    guard.shutdown();
    result
}

async fn run(command: Commands, config: Arc<PhlengConfig>, sources: &phlengconf::ConfigSources) -> Result<()> {
    match command {
        Commands::Serve { port, host } => {
            let port = port.unwrap_or(config.bind.http_port);
            let host = host.unwrap_or_else(|| config.bind.host.clone());
            let studio = Arc::new(Studio::from_config(config));
            web::serve(web::AppState::new(studio), &host, port).await
        }

        Commands::Chat { model } => {
            let model = model.unwrap_or_else(|| config.agent.default_model.clone());
            let studio = Studio::from_config(config);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            phleng::console::run_chat(&studio, &model, stdin, tokio::io::stdout()).await
        }

        Commands::Render { file, name } => {
            let (notation, title) = read_notation(&file)?;
            let base = name.or(title).unwrap_or_else(|| file_stem(&file));
            let renderer = AudioRenderer::from_config(&config.paths);
            let artifacts = renderer.render(&notation, &base).await?;
            println!("MIDI: {}", artifacts.midi.display());
            println!("WAV:  {}", artifacts.wav.display());
            Ok(())
        }

        Commands::Check { file } => {
            let (notation, _) = read_notation(&file)?;
            let report = abc::check_contract(&notation);
            for finding in &report.feedback {
                println!("{finding}");
            }
            if let Some(measures) = report.measures {
                println!("{} voice(s), {} bar(s)", report.voices.len(), measures);
            }
            let errors = report.violations().count();
            if errors > 0 {
                anyhow::bail!("{} rule violation(s) in {}", errors, file.display());
            }
            println!("ok");
            Ok(())
        }

        Commands::Models => {
            for model in &config.models {
                let marker = if model.id == config.agent.default_model { "*" } else { " " };
                println!("{} {:<20} {:<20} ${}", marker, model.id, model.display_name, model.api_key_env);
            }
            Ok(())
        }

        Commands::Config => {
            for file in &sources.files {
                println!("# from {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# from ${var}");
            }
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Read notation from a file. A saved model reply is accepted too, in
/// which case its fenced block is used and its title returned.
fn read_notation(path: &Path) -> Result<(String, Option<String>)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if text.contains("```") {
        let composition = extract::extract_from_text(&text)
            .with_context(|| format!("No usable notation block in {}", path.display()))?;
        return Ok((composition.body, Some(composition.title)));
    }

    let title = text
        .lines()
        .find_map(|l| l.strip_prefix("T:"))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    Ok((text, title))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "untitled".to_string())
}
