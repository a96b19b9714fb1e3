//! HTTPS-RR bootstrap: resolves the gateway domain's ECH config list via a
//! plain UDP DNS query or, when `dns_server` names an HTTPS endpoint, DoH.

mod doh;
mod wire;

use tokio::net::UdpSocket;
use tokio::time::{Duration, timeout};

use crate::error::BootstrapError;

const UDP_TIMEOUT: Duration = Duration::from_secs(5);

/// Looks up the HTTPS RR for `domain` against `dns_server`, returning the
/// `ech` SvcParam value as base64 text, per the RR parser's return contract.
///
/// `dns_server` selects the transport: a bare `host:port` (or `host`, which
/// defaults to port 53) is queried over UDP; anything that looks like a DoH
/// endpoint (contains a `/` path component or an explicit scheme) is queried
/// over HTTPS per RFC 8484.
pub async fn query_https_record(domain: &str, dns_server: &str) -> Result<String, BootstrapError> {
	let query = wire::build_query(domain);
	let response = if is_doh_endpoint(dns_server) {
		doh::query(dns_server, &query).await?
	} else {
		query_udp(dns_server, &query).await?
	};
	wire::parse_https_answer(&response).ok_or(BootstrapError::NoEchConfig)
}

fn is_doh_endpoint(dns_server: &str) -> bool {
	dns_server.contains("://") || dns_server.contains('/')
}

async fn query_udp(dns_server: &str, query: &[u8]) -> Result<Vec<u8>, BootstrapError> {
	let addr = if dns_server.contains(':') && !dns_server.starts_with('[') {
		dns_server.to_string()
	} else {
		format!("{dns_server}:53")
	};
	let socket = UdpSocket::bind("0.0.0.0:0")
		.await
		.map_err(BootstrapError::DnsQuery)?;
	socket.connect(&addr).await.map_err(BootstrapError::DnsQuery)?;
	socket.send(query).await.map_err(BootstrapError::DnsQuery)?;

	let mut buf = vec![0u8; 4096];
	let len = timeout(UDP_TIMEOUT, socket.recv(&mut buf))
		.await
		.map_err(|_| BootstrapError::DnsQuery(std::io::Error::new(std::io::ErrorKind::TimedOut, "DNS query timed out")))?
		.map_err(BootstrapError::DnsQuery)?;
	buf.truncate(len);
	Ok(buf)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detects_doh_vs_udp_server_strings() {
		assert!(is_doh_endpoint("dns.alidns.com/dns-query"));
		assert!(is_doh_endpoint("https://cloudflare-dns.com/dns-query"));
		assert!(!is_doh_endpoint("8.8.8.8"));
		assert!(!is_doh_endpoint("8.8.8.8:53"));
	}
}
