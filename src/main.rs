//! Bucketry CLI entry point.

use bucketry_lib::cli::{self, Cli};
use bucketry_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
