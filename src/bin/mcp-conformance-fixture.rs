//! Reference MCP tool server for exercising the conformance harness.
//!
//! Serves newline-delimited JSON-RPC on stdio, or on TCP with `--listen`.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use mcp_conformance::fixture::{FixtureOptions, FixtureServer};

#[derive(Parser)]
#[command(name = "mcp-conformance-fixture")]
#[command(about = "Reference MCP tool server with echo, system-info, failing and slow tools")]
#[command(version)]
struct Cli {
    /// Listen for TCP connections on this address instead of using stdio
    #[arg(long)]
    listen: Option<String>,

    /// Never answer `initialize`
    #[arg(long)]
    hang_on_initialize: bool,

    /// Advertise an empty tool catalog
    #[arg(long)]
    empty_catalog: bool,

    /// Paginate `tools/list` with this many tools per page
    #[arg(long)]
    page_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let server = FixtureServer::new(FixtureOptions {
        hang_on_initialize: cli.hang_on_initialize,
        empty_catalog: cli.empty_catalog,
        page_size: cli.page_size,
    });

    match cli.listen {
        Some(address) => {
            let listener = TcpListener::bind(&address)
                .await
                .with_context(|| format!("cannot listen on {address}"))?;
            eprintln!("listening on {}", listener.local_addr()?);
            server.serve_tcp(listener).await?;
        },
        None => server.serve(tokio::io::stdin(), tokio::io::stdout()).await?,
    }
    Ok(())
}
