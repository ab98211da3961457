use anyhow::{Context, Result};
use multipath_session::network::install_crypto_provider;
use multipath_session::SessionManager;
use std::net::SocketAddr;
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<()> {
    install_crypto_provider();

    // Every argument is a listen address; each one becomes a path
    let mut listen: Vec<SocketAddr> = std::env::args()
        .skip(1)
        .map(|arg| arg.parse::<SocketAddr>().context("invalid listen address"))
        .collect::<Result<_>>()?;
    if listen.is_empty() {
        listen = vec!["127.0.0.1:5001".parse()?, "127.0.0.1:5002".parse()?];
    }

    println!("Multipath Session - Receiver");
    println!("============================\n");

    let manager = SessionManager::bind(listen).await?;
    for addr in manager.local_addrs() {
        println!("Listening on {}", addr);
    }
    println!();

    loop {
        let session = manager.accept().await?;
        println!("Session {} accepted", session.id());

        tokio::spawn(async move {
            let start = Instant::now();
            let mut buf = vec![0u8; 64 * 1024];
            let mut received = 0usize;

            loop {
                match session.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => received += n,
                    Err(e) => {
                        println!("Session {} failed: {}", session.id(), e);
                        return;
                    }
                }
            }

            println!(
                "Session {} finished: {} bytes in {:.2?}",
                session.id(),
                received,
                start.elapsed()
            );
            for stats in session.path_stats() {
                println!(
                    "  path {} <- {}: {} bytes",
                    stats.path_id, stats.remote_addr, stats.bytes_received
                );
            }
            let _ = session.close().await;
        });
    }
}
