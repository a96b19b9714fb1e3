//! TLS-tunnelled WebSocket client: opens a WSS connection to the gateway,
//! with ECH-aware retry on stale configs.

mod frame;
mod handshake;

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

pub use frame::Message;

use crate::config::ServerAddr;
use crate::ech::EchStore;
use crate::error::{DialError, TlsError};
use crate::tls;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const ECH_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// The read half of an established WS connection, reassembling frames into
/// complete [`Message`]s.
pub struct WsReader {
	read_half: ReadHalf<TlsStream<TcpStream>>,
	decoder: frame::FrameDecoder,
	pending: VecDeque<Message>,
}

impl WsReader {
	/// Returns the next complete message, reading from the underlying TLS
	/// stream as needed. An EOF from the gateway surfaces as `UnexpectedEof`.
	pub async fn recv(&mut self) -> std::io::Result<Message> {
		loop {
			if let Some(message) = self.pending.pop_front() {
				return Ok(message);
			}
			let mut buf = [0u8; 8192];
			let n = self.read_half.read(&mut buf).await?;
			if n == 0 {
				return Err(std::io::Error::new(
					std::io::ErrorKind::UnexpectedEof,
					"gateway closed the WebSocket connection",
				));
			}
			let mut messages = self.decoder.feed(&buf[..n]);
			if !messages.is_empty() {
				let first = messages.remove(0);
				self.pending.extend(messages);
				return Ok(first);
			}
		}
	}
}

/// The write half of an established WS connection. Every write here must go
/// through a single owner (a serializing writer task in the tunnel engine)
/// since PING and data frames can originate from different tasks.
pub struct WsWriter {
	write_half: WriteHalf<TlsStream<TcpStream>>,
}

impl WsWriter {
	async fn send(&mut self, bytes: Vec<u8>) -> std::io::Result<()> {
		self.write_half.write_all(&bytes).await?;
		self.write_half.flush().await
	}

	pub async fn send_text(&mut self, payload: &str) -> std::io::Result<()> {
		self.send(frame::encode_text(payload)).await
	}

	pub async fn send_binary(&mut self, payload: &[u8]) -> std::io::Result<()> {
		self.send(frame::encode_binary(payload)).await
	}

	pub async fn send_ping(&mut self) -> std::io::Result<()> {
		self.send(frame::encode_ping()).await
	}

	pub async fn send_close(&mut self) -> std::io::Result<()> {
		self.send(frame::encode_close()).await
	}
}

pub struct WsConnection {
	pub reader: WsReader,
	pub writer: WsWriter,
}

async fn dial_once(
	server_addr: &ServerAddr,
	pin_ip: Option<IpAddr>,
	token: &str,
	ech_store: &EchStore,
) -> Result<WsConnection, DialError> {
	let ech_bytes = ech_store
		.get()
		.ok_or_else(|| DialError::Tls(TlsError::InvalidEchConfig("ECH config not loaded".to_string())))?;
	let tls_config = Arc::new(tls::build_ech_client_config(&ech_bytes)?);

	let attempt = async {
		let mut stream = tls::dial(&server_addr.host, server_addr.port, pin_ip, tls_config).await?;
		handshake::upgrade(&mut stream, &server_addr.host, &server_addr.path, token).await?;
		Ok::<_, DialError>(stream)
	};
	let stream = timeout(HANDSHAKE_TIMEOUT, attempt)
		.await
		.map_err(|_| DialError::HandshakeTimeout)??;

	let (read_half, write_half) = tokio::io::split(stream);
	Ok(WsConnection {
		reader: WsReader {
			read_half,
			decoder: frame::FrameDecoder::new(),
			pending: VecDeque::new(),
		},
		writer: WsWriter { write_half },
	})
}

/// Dials the gateway, retrying up to `max_retries` attempts. Any attempt
/// whose error text mentions "ECH" is treated as a stale ECH config: the
/// store is refreshed and the attempt is retried after a 1s backoff before
/// the next attempt is spent.
pub async fn dial(
	server_addr: &ServerAddr,
	pin_ip: Option<IpAddr>,
	token: &str,
	ech_store: &EchStore,
	max_retries: u32,
) -> Result<WsConnection, DialError> {
	let attempts = max_retries.max(1);
	for attempt in 0..attempts {
		match dial_once(server_addr, pin_ip, token, ech_store).await {
			Ok(conn) => return Ok(conn),
			Err(err) => {
				tracing::debug!(attempt, %err, "gateway dial attempt failed");
				if err.to_string().contains("ECH") {
					let _ = ech_store.refresh().await;
					tokio::time::sleep(ECH_RETRY_BACKOFF).await;
				}
				if attempt + 1 == attempts {
					return Err(DialError::MaxRetriesExceeded);
				}
			},
		}
	}
	Err(DialError::MaxRetriesExceeded)
}
