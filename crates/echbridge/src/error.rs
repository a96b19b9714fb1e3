use thiserror::Error;

/// `server_addr` failed to parse, or a required field was missing.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("invalid server address {0:?}: {1}")]
	InvalidServerAddr(String, String),
	#[error("invalid listen address {0:?}: {1}")]
	InvalidListenAddr(String, String),
}

/// ECH bootstrap (DNS query + HTTPS RR parse) failed.
#[derive(Debug, Error)]
pub enum BootstrapError {
	#[error("ECH config not loaded")]
	NotLoaded,
	#[error("DNS query failed: {0}")]
	DnsQuery(#[from] std::io::Error),
	#[error("DoH request failed: {0}")]
	Doh(#[from] reqwest::Error),
	#[error("no ECH config published for domain")]
	NoEchConfig,
	#[error("invalid base64 in ECH config: {0}")]
	Base64(#[from] base64::DecodeError),
}

/// TLS/ECH handshake failure.
#[derive(Debug, Error)]
pub enum TlsError {
	#[error("failed to load system trust roots: {0}")]
	RootStore(String),
	#[error("invalid ECH config list: {0}")]
	InvalidEchConfig(String),
	#[error("server rejected ECH")]
	EchRejected,
	#[error("certificate verification failed: {0}")]
	Verification(String),
	#[error("TLS handshake failed: {0}")]
	Handshake(#[from] rustls::Error),
	#[error("TLS handshake failed: {0}")]
	Io(#[from] std::io::Error),
}

/// Failure to establish the outbound WebSocket tunnel.
#[derive(Debug, Error)]
pub enum DialError {
	#[error("TCP connect failed: {0}")]
	Tcp(std::io::Error),
	#[error(transparent)]
	Tls(#[from] TlsError),
	#[error("WebSocket handshake failed: {0}")]
	Handshake(String),
	#[error("WebSocket handshake timed out")]
	HandshakeTimeout,
	#[error("exceeded max retries")]
	MaxRetriesExceeded,
}

/// Malformed or unsupported SOCKS5/HTTP proxy traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("unsupported SOCKS version {0:#x}")]
	UnsupportedSocksVersion(u8),
	#[error("unsupported SOCKS command {0:#x}")]
	UnsupportedSocksCommand(u8),
	#[error("unsupported SOCKS address type {0:#x}")]
	UnsupportedSocksAtyp(u8),
	#[error("malformed HTTP request line")]
	MalformedRequestLine,
	#[error("missing Host header")]
	MissingHost,
	#[error("unsupported HTTP method {0:?}")]
	UnsupportedMethod(String),
	#[error("unexpected gateway response: {0:?}")]
	UnexpectedGatewayResponse(String),
	#[error("gateway returned error: {0}")]
	GatewayError(String),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Start/Stop called against the wrong `ListenerState`.
#[derive(Debug, Error)]
pub enum LifecycleError {
	#[error("client is already running")]
	AlreadyRunning,
	#[error("client is not running")]
	NotRunning,
}

/// Top-level error returned by the public control surface.
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Bootstrap(#[from] BootstrapError),
	#[error(transparent)]
	Tls(#[from] TlsError),
	#[error(transparent)]
	Dial(#[from] DialError),
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	#[error(transparent)]
	Lifecycle(#[from] LifecycleError),
}

/// Classifies an I/O error as a routine teardown rather than a loggable failure,
/// per the NormalClose taxonomy: closed/reset/broken-pipe/EOF are not errors.
pub fn is_normal_close(err: &std::io::Error) -> bool {
	use std::io::ErrorKind::*;
	matches!(
		err.kind(),
		NotConnected | BrokenPipe | ConnectionReset | ConnectionAborted | UnexpectedEof
	) || {
		let msg = err.to_string();
		msg.contains("use of closed network connection")
			|| msg.contains("broken pipe")
			|| msg.contains("connection reset by peer")
			|| msg.contains("normal closure")
	}
}
