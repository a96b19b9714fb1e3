use std::net::{IpAddr, SocketAddr};

use crate::error::ConfigError;

/// `server_addr` parsed into its three logical parts: `host`, `port`, and an
/// optional path (defaulting to `/`) used when composing the `wss://` URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerAddr {
	pub host: String,
	pub port: u16,
	pub path: String,
}

impl ServerAddr {
	pub fn authority(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

/// Parses `server_addr` of the form `host:port[/path]` into its parts.
///
/// This is the `validate_server_addr` helper from the public control surface:
/// host and port are mandatory, path defaults to `/`.
pub fn validate_server_addr(addr: &str) -> Result<ServerAddr, ConfigError> {
	let (authority, path) = match addr.find('/') {
		Some(idx) => (&addr[..idx], addr[idx..].to_string()),
		None => (addr, "/".to_string()),
	};
	let (host, port) = authority.rsplit_once(':').ok_or_else(|| {
		ConfigError::InvalidServerAddr(addr.to_string(), "missing port".to_string())
	})?;
	if host.is_empty() {
		return Err(ConfigError::InvalidServerAddr(
			addr.to_string(),
			"missing host".to_string(),
		));
	}
	let port: u16 = port.parse().map_err(|_| {
		ConfigError::InvalidServerAddr(addr.to_string(), format!("invalid port {port:?}"))
	})?;
	Ok(ServerAddr {
		host: host.to_string(),
		port,
		path,
	})
}

/// Immutable configuration for one bridge client instance.
///
/// Constructed once by the embedder; every field is read-only after
/// construction. There is no persisted state and no file format owned by
/// the core — this is purely an in-memory value.
#[derive(Clone, Debug)]
pub struct ClientConfig {
	pub server_addr: String,
	pub server_ip: Option<IpAddr>,
	pub token: String,
	pub dns_server: String,
	pub ech_domain: String,
	pub listen_addr: SocketAddr,
	pub max_retries: u32,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			server_addr: String::new(),
			server_ip: None,
			token: String::new(),
			dns_server: "dns.alidns.com/dns-query".to_string(),
			ech_domain: "cloudflare-ech.com".to_string(),
			listen_addr: "127.0.0.1:1080".parse().expect("valid default listen addr"),
			max_retries: 2,
		}
	}
}

impl ClientConfig {
	/// Validates `server_addr` and returns the parsed form, surfacing any
	/// `ConfigError` before `Client::new` accepts the configuration.
	pub fn parsed_server_addr(&self) -> Result<ServerAddr, ConfigError> {
		validate_server_addr(&self.server_addr)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_published_values() {
		let cfg = ClientConfig::default();
		assert_eq!(cfg.dns_server, "dns.alidns.com/dns-query");
		assert_eq!(cfg.ech_domain, "cloudflare-ech.com");
		assert_eq!(cfg.listen_addr, "127.0.0.1:1080".parse().unwrap());
		assert_eq!(cfg.max_retries, 2);
	}

	#[test]
	fn parses_host_port() {
		let addr = validate_server_addr("example.com:443").unwrap();
		assert_eq!(addr.host, "example.com");
		assert_eq!(addr.port, 443);
		assert_eq!(addr.path, "/");
	}

	#[test]
	fn parses_host_port_path() {
		let addr = validate_server_addr("example.com:443/ws").unwrap();
		assert_eq!(addr.host, "example.com");
		assert_eq!(addr.port, 443);
		assert_eq!(addr.path, "/ws");
	}

	#[test]
	fn rejects_missing_port() {
		assert!(validate_server_addr("example.com").is_err());
	}

	#[test]
	fn rejects_missing_host() {
		assert!(validate_server_addr(":443").is_err());
	}
}
