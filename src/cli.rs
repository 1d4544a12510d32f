use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "shardmq", about)]
pub struct Cli {
    /// Path to the TOML config file.
    /// Falls back to SHARDMQ_CONFIG, then config/shardmq.toml.
    #[arg(long)]
    pub config: Option<String>,

    /// Tokio worker threads
    #[arg(long, default_value_t = default_workers())]
    pub workers: usize,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}
