use clap::Parser;
use log::{error, info};
use server::{Server, ServerConfig};
use std::net::SocketAddr;

/// Main-method of the application.
/// Parses command-line arguments, binds the listener and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8000")]
        port: u16,
    }

    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: set RUST_LOG=info (or debug) to see server logs");
    }
    env_logger::init();

    let args = Args::parse();
    let bind_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let server = Server::bind(&ServerConfig { bind_addr }).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
