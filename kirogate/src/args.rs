use std::path::PathBuf;

use clap::Parser;

/// Anthropic/OpenAI-compatible gateway in front of CodeWhisperer.
#[derive(Debug, Parser)]
#[command(name = "kirogate", version)]
pub struct Args {
    /// Path to a .env file to load before reading configuration.
    /// Without this flag, a `.env` in the working directory is used if present.
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Listen port; overrides PORT from the environment.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log filter, e.g. `info` or `gateway=debug,server=debug`.
    #[arg(long, default_value = "info")]
    pub log: String,
}
