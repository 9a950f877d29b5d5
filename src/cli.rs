use clap::Parser;

pub const DEFAULT_MAX_TIME: u64 = 100;

#[derive(Parser, Debug)]
#[command(version, about = "procreaper kills MySQL processes that run longer than a threshold, optionally through an SSH tunnel", long_about = None)]
pub(crate) struct ReaperCli {
    /// config file in toml format
    #[arg(short, long)]
    pub config: String,
    /// kill processes living longer than max-time seconds
    #[arg(short = 't', long, default_value_t = DEFAULT_MAX_TIME)]
    pub max_time: u64,
    /// debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
}
