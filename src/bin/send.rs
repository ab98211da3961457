use anyhow::{bail, Context, Result};
use multipath_session::network::install_crypto_provider;
use multipath_session::SessionManager;
use std::net::SocketAddr;
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<()> {
    install_crypto_provider();

    // Parse command line arguments: <remote addr> [bytes] [local listen addr]
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        bail!("usage: {} <remote addr> [bytes] [listen addr]", args[0]);
    }
    let remote: SocketAddr = args[1].parse().context("invalid remote address")?;
    let total: usize = match args.get(2) {
        Some(n) => n.parse().context("invalid byte count")?,
        None => 1024 * 1024,
    };
    let listen: SocketAddr = match args.get(3) {
        Some(addr) => addr.parse().context("invalid listen address")?,
        None => "0.0.0.0:0".parse()?,
    };

    println!("Multipath Session - Sender");
    println!("==========================\n");
    println!("Remote:  {}", remote);
    println!("Payload: {} bytes\n", total);

    let manager = SessionManager::bind(vec![listen]).await?;
    let session = manager.connect(remote).await?;
    println!(
        "Session {} established over {} path(s)",
        session.id(),
        session.path_count()
    );

    let payload: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
    let start = Instant::now();
    let written = session.write(&payload).await?;
    session.close().await?;
    let elapsed = start.elapsed();

    println!(
        "\nSent {} bytes in {:.2?} ({:.2} MB/s)",
        written,
        elapsed,
        written as f64 / elapsed.as_secs_f64().max(f64::EPSILON) / 1_000_000.0
    );
    for stats in session.path_stats() {
        println!(
            "  path {} -> {}: {} bytes ({:?})",
            stats.path_id, stats.remote_addr, stats.bytes_sent, stats.status
        );
    }

    manager.shutdown().await;
    Ok(())
}
