//! Demo CLI: bootstrap against a seed node and fetch one key, printing
//! either the decoded value or the failure taxonomy.

use clap::Parser;
use pkv_client::codec::Value;
use pkv_client::{ClusterClientConfig, Error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pkv-bench", about = "Fetch one key from a pkv cluster")]
struct Args {
    /// Seed node host.
    #[arg(long)]
    host: String,

    /// Seed node port.
    #[arg(long)]
    port: u16,

    /// Store name.
    #[arg(long)]
    store: String,

    /// Key, read as raw UTF-8 bytes.
    #[arg(long)]
    key: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let cluster = pkv_client::Cluster::new(args.host, args.port, ClusterClientConfig::default());
    cluster.connect().await?;

    let store = cluster.store(args.store);
    match store.get(&Value::Bytes(args.key.into_bytes())).await {
        Ok(value) => {
            println!("{value:?}");
            Ok(())
        }
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    }
}

fn print_error(err: &Error) {
    eprintln!("request failed: {err}");
}
