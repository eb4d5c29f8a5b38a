use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// merchx: fetch normalized product data from multiple upstream providers.
#[derive(Debug, Parser)]
#[command(name = "merchx", version, about)]
pub struct Cli {
    /// Path to a JSON engine configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch one product by identifier.
    Product(ProductArgs),
    /// Search products by keyword.
    Search(SearchArgs),
    /// Fetch many products by identifier.
    Products(ProductsArgs),
    /// Test configured provider connections.
    TestConnection(ConnectionArgs),
    /// Show provider quota information.
    Quota,
    /// Background queue operations.
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Cache operations.
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Debug, Args)]
pub struct ProductArgs {
    /// Product identifier (ASIN).
    pub asin: String,

    /// Marketplace code, e.g. US or DE.
    #[arg(long)]
    pub marketplace: Option<String>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Search keyword.
    pub keyword: String,

    #[arg(long)]
    pub marketplace: Option<String>,

    /// Result page, starting at 1.
    #[arg(long, default_value_t = 1)]
    pub page: u32,
}

#[derive(Debug, Args)]
pub struct ProductsArgs {
    /// Product identifiers.
    #[arg(required = true)]
    pub asins: Vec<String>,

    #[arg(long)]
    pub marketplace: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// Restrict the test to one provider.
    #[arg(long)]
    pub provider: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Enqueue a job.
    Add(QueueAddArgs),
    /// Run one processing pass.
    Process(QueueProcessArgs),
    /// Show a batch's progress.
    Status(QueueStatusArgs),
    /// Reset failed jobs to pending.
    Retry(QueueRetryArgs),
    /// Queue-wide statistics.
    Stats,
}

#[derive(Debug, Args)]
pub struct QueueAddArgs {
    /// Job action, e.g. import_product.
    pub action: String,

    /// JSON payload for the job.
    pub payload: String,

    /// Job priority (0-100).
    #[arg(long)]
    pub priority: Option<u8>,

    /// Run a processing pass right after enqueueing.
    #[arg(long)]
    pub process_now: bool,
}

#[derive(Debug, Args)]
pub struct QueueProcessArgs {
    /// Maximum jobs to pick up this pass.
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct QueueStatusArgs {
    pub batch_id: String,
}

#[derive(Debug, Args)]
pub struct QueueRetryArgs {
    /// Restrict the reset to one batch.
    #[arg(long)]
    pub batch_id: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Hit/miss/write statistics.
    Stats,
    /// Entry count and byte totals per cache type.
    Size,
    /// Clear the cache, optionally only entries carrying a tag.
    Clear(CacheClearArgs),
}

#[derive(Debug, Args)]
pub struct CacheClearArgs {
    /// Invalidate only entries carrying this tag.
    #[arg(long)]
    pub tag: Option<String>,
}
