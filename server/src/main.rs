//! Palaver Server – Einstiegspunkt

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    palaver_server::ausfuehren().await
}
