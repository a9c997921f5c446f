use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "edgegate", version, about = "Token-gated HTTP/WebSocket edge proxy")]
pub struct Cli {
    /// Listen port (overrides the PORT environment variable)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Upstream base URL (overrides TARGET_HOST)
    #[arg(short, long)]
    pub target_host: Option<String>,

    /// Comma-separated origin allowlist (overrides ALLOWED_ORIGINS)
    #[arg(long)]
    pub allowed_origins: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
