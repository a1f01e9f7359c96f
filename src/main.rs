use std::path::Path;

use anyhow::Result;
use clap::Parser;

use babyup_gateway::settings;

#[derive(Parser, Debug)]
#[command(
    name = "babyup-gateway",
    version,
    about = "Serve localized baby growth reports written by an LLM provider"
)]
struct Cli {
    /// Address to listen on (default from settings: 0.0.0.0:8787)
    #[arg(short = 'a', long = "addr")]
    addr: Option<String>,

    /// Provider to use (openrouter, siliconflow, openai, claude)
    #[arg(short = 'p', long = "provider")]
    provider: Option<String>,

    /// Model id passed to the provider (overrides the provider default)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    babyup_gateway::logging::init(cli.verbose)?;

    let mut settings = settings::load_settings(cli.read_settings.as_deref().map(Path::new))?;
    settings.apply_env_overrides(settings::get_env);
    if let Some(addr) = cli.addr {
        settings.addr = addr;
    }
    if let Some(provider) = cli.provider {
        settings.provider = provider;
    }
    if let Some(model) = cli.model {
        settings.model = Some(model);
    }

    babyup_gateway::run(settings).await
}
