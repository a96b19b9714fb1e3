//! Manual/local test harness around the `echbridge` library: parses flags
//! into a `ClientConfig`, starts the bridge, and runs until interrupted.
//!
//! Config-file loading and CLI plumbing live here rather than in the
//! library. It exists so the library's public control surface can be
//! exercised without an embedding application.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use clap::Parser;
use echbridge::{Client, ClientConfig, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "echbridge", about = "Local multi-protocol ECH proxy bridge")]
struct Cli {
	/// Local address the SOCKS5/HTTP proxy listens on.
	#[arg(long, default_value = "127.0.0.1:1080")]
	listen: SocketAddr,

	/// Gateway address, `host:port[/path]`.
	#[arg(long)]
	server: String,

	/// Pin the gateway's TCP dial to this IP, bypassing DNS resolution of
	/// `server`'s host (TLS SNI/verification still use the host).
	#[arg(long)]
	server_ip: Option<IpAddr>,

	/// Opaque token offered as the sole Sec-WebSocket-Protocol value; empty
	/// means no subprotocol is offered.
	#[arg(long, default_value = "")]
	token: String,

	/// DNS server for the ECH bootstrap query: `host:port` for classic UDP,
	/// or a host/URL for DNS-over-HTTPS.
	#[arg(long, default_value = "dns.alidns.com/dns-query")]
	dns_server: String,

	/// Domain queried for the HTTPS RR carrying the ECH config list.
	#[arg(long, default_value = "cloudflare-ech.com")]
	ech_domain: String,

	/// Maximum WS dial attempts per tunnel.
	#[arg(long, default_value_t = 2)]
	max_retries: u32,
}

impl From<Cli> for ClientConfig {
	fn from(cli: Cli) -> Self {
		ClientConfig {
			server_addr: cli.server,
			server_ip: cli.server_ip,
			token: cli.token,
			dns_server: cli.dns_server,
			ech_domain: cli.ech_domain,
			listen_addr: cli.listen,
			max_retries: cli.max_retries,
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.init();

	let cli = Cli::parse();
	let listen_addr = cli.listen;
	let config = ClientConfig::from(cli);

	let client = Client::new(config).context("invalid client configuration")?;
	tracing::info!(version = %client.get_version(), "starting echbridge");
	client.set_log_sink(|level, message| match level {
		Level::Info => tracing::info!(target: "echbridge::sink", "{message}"),
		Level::Error => tracing::error!(target: "echbridge::sink", "{message}"),
	});

	client.start(Some(listen_addr)).await.context("failed to start bridge")?;
	tracing::info!(status = client.get_status().await, "bridge running");

	tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
	client.stop().await.context("failed to stop bridge")?;
	Ok(())
}
