//! Watcher binary that tails every configured network for distributor events.

use std::io;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = chain_watch_monitor::run().await {
        eprintln!("[chain-watch] fatal: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}
