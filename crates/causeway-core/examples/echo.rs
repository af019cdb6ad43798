//! Echo demo.
//!
//! Terminal 1: `cargo run --example echo -- server 127.0.0.1:7846`
//! Terminal 2: `cargo run --example echo -- client 127.0.0.1:7846`
//!
//! The client dials the server, both sides authenticate with freshly
//! generated Ed25519 identities, and every payload the client sends on the
//! `"echo"` protocol comes back on the same connection.

use std::sync::Arc;
use std::time::Duration;

use causeway_core::{
    Connection, ConnectionRegistry, DialOpts, HostInfo, Mux, Server, dial,
};
use causeway_crypto::{Crypto, SigningKey};
use causeway_transport::TcpMessageStream;
use rand_core::OsRng;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let role = args.next().unwrap_or_default();
    let address = args.next().unwrap_or_else(|| "127.0.0.1:7846".to_string());

    match role.as_str() {
        "server" => run_server(&address).await,
        "client" => run_client(&address).await,
        _ => {
            eprintln!("usage: echo <server|client> [address]");
            Ok(())
        }
    }
}

async fn run_server(address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let signing_key = SigningKey::generate(&mut OsRng);
    let host = HostInfo::new(address.parse()?, signing_key.verifying_key())
        .with_metadata("role", "echo-server");
    let crypto = Crypto::ed25519(signing_key);

    let mux: Arc<Mux<TcpMessageStream>> = Arc::new(Mux::new());
    mux.handle("echo", |message| {
        Box::pin(async move {
            println!("echo <- {}", String::from_utf8_lossy(&message.data));
            message
                .respond(message.data.clone(), "echo", None, None)
                .await;
        })
    })?;

    let registry: Arc<ConnectionRegistry<TcpMessageStream>> = Arc::new(ConnectionRegistry::new());

    let server = Server::new(host, crypto);
    server.on_connection({
        let mux = Arc::clone(&mux);
        let registry = Arc::clone(&registry);
        move |connection: Arc<Connection<TcpMessageStream>>| {
            let mux_handler: Arc<dyn causeway_core::RequestHandler<TcpMessageStream>> =
                Arc::clone(&mux) as Arc<dyn causeway_core::RequestHandler<TcpMessageStream>>;
            connection.handle(mux_handler);
            if let Err(err) = registry.add(Arc::clone(&connection)) {
                eprintln!("duplicate peer rejected: {err}");
                return;
            }
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let id = connection.id();
                if let Err(err) = Arc::clone(&connection).start().await {
                    eprintln!("peer {} failed: {err}", id.short());
                }
                let _ = registry.delete(&id).await;
            });
        }
    });

    server.listen(address).await?;
    Ok(())
}

async fn run_client(address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let signing_key = SigningKey::generate(&mut OsRng);
    let host = HostInfo::new("127.0.0.1:0".parse()?, signing_key.verifying_key())
        .with_metadata("role", "echo-client");
    let crypto = Crypto::ed25519(signing_key);

    let connection = dial(address, &host, DialOpts::default(), crypto).await?;
    println!(
        "connected to {} ({})",
        connection.address(),
        connection.id().short()
    );

    let mux: Arc<Mux<TcpMessageStream>> = Arc::new(Mux::new());
    mux.handle("echo", |message| {
        Box::pin(async move {
            println!("echo -> {}", String::from_utf8_lossy(&message.data));
        })
    })?;
    connection.handle(mux);

    let runner = tokio::spawn(Arc::clone(&connection).start());

    for line in ["ping", "causeway", "goodbye"] {
        connection
            .send(line.as_bytes().to_vec(), "echo", None, None)
            .await;
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    connection.close().await;
    runner.await??;
    Ok(())
}
