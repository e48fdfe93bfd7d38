use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relay-server", about = "Event enrichment pipe")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipe and the HTTP API
    Serve(ConfigArgs),
    /// Validate a config file and exit
    Check(ConfigArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "RELAY_CONFIG")]
    pub config: String,
}
