//! TLS 1.3 + Encrypted Client Hello outbound dialing, with optional IP pinning.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use rustls::client::{EchConfig, EchMode};
use rustls::pki_types::{DnsName, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::error::TlsError;

/// Loads the platform trust store, mirroring `agentgateway`'s use of
/// `rustls-native-certs` rather than a bundled webpki root set.
pub fn system_root_store() -> Result<RootCertStore, TlsError> {
	let result = rustls_native_certs::load_native_certs();
	for err in &result.errors {
		tracing::warn!(%err, "error loading a native certificate, continuing with the rest");
	}
	let mut roots = RootCertStore::empty();
	for cert in result.certs {
		roots
			.add(cert)
			.map_err(|e| TlsError::RootStore(e.to_string()))?;
	}
	if roots.is_empty() {
		return Err(TlsError::RootStore("no system root certificates found".to_string()));
	}
	Ok(roots)
}

fn supported_hpke_suites() -> &'static [&'static dyn rustls::crypto::hpke::Hpke] {
	rustls::crypto::aws_lc_rs::hpke::ALL_SUPPORTED_SUITES
}

/// Builds the TLS 1.3 client config used to dial the gateway: ECH is
/// mandatory (no cleartext/ECH-less fallback), `min_version` is pinned to
/// 1.3 (a requirement of ECH itself), and roots come from the system trust
/// store.
pub fn build_ech_client_config(ech_config_list: &[u8]) -> Result<ClientConfig, TlsError> {
	if ech_config_list.is_empty() {
		return Err(TlsError::InvalidEchConfig("ECH config list is empty".to_string()));
	}
	let roots = system_root_store()?;
	let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
	let ech_config = EchConfig::new(ech_config_list.to_vec().into(), supported_hpke_suites())
		.map_err(|e| TlsError::InvalidEchConfig(e.to_string()))?;
	let config = ClientConfig::builder_with_provider(provider)
		.with_ech(EchMode::from(ech_config))
		.map_err(|e| TlsError::InvalidEchConfig(e.to_string()))?
		.with_root_certificates(roots)
		.with_no_client_auth();
	Ok(config)
}

/// Dials the gateway TCP+TLS endpoint.
///
/// `host`/`port` are always used for TLS SNI and certificate validation.
/// When `pin_ip` is set, the TCP connection is redirected to it while TLS
/// identity keeps using `host` — IP-pinning layered on top of ECH.
pub async fn dial(
	host: &str,
	port: u16,
	pin_ip: Option<IpAddr>,
	config: Arc<ClientConfig>,
) -> Result<TlsStream<TcpStream>, TlsError> {
	let dial_addr: SocketAddr = match pin_ip {
		Some(ip) => (ip, port).into(),
		None => tokio::net::lookup_host((host, port))
			.await?
			.next()
			.ok_or_else(|| TlsError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")))?,
	};
	debug!(host, port, ?dial_addr, "dialing gateway");
	let tcp = TcpStream::connect(dial_addr).await?;
	let server_name = ServerName::DnsName(
		DnsName::try_from(host.to_string())
			.map_err(|_| TlsError::Verification(format!("invalid hostname {host:?}")))?,
	);
	let connector = TlsConnector::from(config);
	let stream = connector.connect(server_name, tcp).await.map_err(|e| {
		if e.to_string().contains("ECH") {
			TlsError::EchRejected
		} else {
			TlsError::Io(e)
		}
	})?;
	Ok(stream)
}
