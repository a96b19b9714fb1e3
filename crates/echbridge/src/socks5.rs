//! SOCKS5 server-side handshake and CONNECT (RFC 1928).
//!
//! Only unauthenticated CONNECT is supported — no BIND, no UDP ASSOCIATE, no
//! auth methods beyond "none".

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::client::SharedState;
use crate::error::ProtocolError;
use crate::tunnel::{self, Mode};

const VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_COMMAND_NOT_SUPPORTED: [u8; 10] = [0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
const REPLY_ATYP_NOT_SUPPORTED: [u8; 10] = [0x05, 0x08, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

pub async fn handle(mut stream: TcpStream, peer: SocketAddr, state: Arc<SharedState>) {
	match negotiate(&mut stream).await {
		Ok(target) => {
			tunnel::run(stream, peer, Mode::Socks5, target, Vec::new(), state).await;
		},
		Err(err) => {
			state.log.error(format!("{peer}: SOCKS5 handshake failed: {err}"));
		},
	}
}

async fn negotiate(stream: &mut TcpStream) -> Result<String, ProtocolError> {
	let version = stream.read_u8().await?;
	if version != VERSION {
		return Err(ProtocolError::UnsupportedSocksVersion(version));
	}

	let nmethods = stream.read_u8().await?;
	let mut methods = vec![0u8; nmethods as usize];
	stream.read_exact(&mut methods).await?;
	// No authentication is the only method offered, regardless of what the
	// client advertises — same minimal-subset stance as the corpus's peers.
	stream.write_all(&[VERSION, 0x00]).await?;

	let mut header = [0u8; 4];
	stream.read_exact(&mut header).await?;
	let [req_version, cmd, _rsv, atyp] = header;
	if req_version != VERSION {
		return Err(ProtocolError::UnsupportedSocksVersion(req_version));
	}
	if cmd != CMD_CONNECT {
		stream.write_all(&REPLY_COMMAND_NOT_SUPPORTED).await.ok();
		return Err(ProtocolError::UnsupportedSocksCommand(cmd));
	}

	let host = match atyp {
		ATYP_IPV4 => {
			let mut octets = [0u8; 4];
			stream.read_exact(&mut octets).await?;
			Ipv4Addr::from(octets).to_string()
		},
		ATYP_DOMAIN => {
			let len = stream.read_u8().await?;
			let mut buf = vec![0u8; len as usize];
			stream.read_exact(&mut buf).await?;
			String::from_utf8_lossy(&buf).into_owned()
		},
		ATYP_IPV6 => {
			let mut octets = [0u8; 16];
			stream.read_exact(&mut octets).await?;
			format!("[{}]", Ipv6Addr::from(octets))
		},
		other => {
			stream.write_all(&REPLY_ATYP_NOT_SUPPORTED).await.ok();
			return Err(ProtocolError::UnsupportedSocksAtyp(other));
		},
	};

	let port = stream.read_u16().await?;
	Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::net::TcpListener;

	#[tokio::test]
	async fn negotiates_domain_connect_target() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let client = tokio::spawn(async move {
			let mut conn = TcpStream::connect(addr).await.unwrap();
			conn.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
			let mut greet_reply = [0u8; 2];
			conn.read_exact(&mut greet_reply).await.unwrap();
			assert_eq!(greet_reply, [0x05, 0x00]);

			let mut req = vec![0x05, 0x01, 0x00, 0x03, 0x0B];
			req.extend_from_slice(b"example.com");
			req.extend_from_slice(&443u16.to_be_bytes());
			conn.write_all(&req).await.unwrap();
		});

		let (mut server, _) = listener.accept().await.unwrap();
		let target = negotiate(&mut server).await.unwrap();
		assert_eq!(target, "example.com:443");
		client.await.unwrap();
	}

	#[tokio::test]
	async fn ipv6_target_is_bracketed() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let mut conn = TcpStream::connect(addr).await.unwrap();
			conn.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
			let mut greet_reply = [0u8; 2];
			conn.read_exact(&mut greet_reply).await.unwrap();

			let mut req = vec![0x05, 0x01, 0x00, 0x04];
			req.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
			req.extend_from_slice(&443u16.to_be_bytes());
			conn.write_all(&req).await.unwrap();
		});

		let (mut server, _) = listener.accept().await.unwrap();
		let target = negotiate(&mut server).await.unwrap();
		assert_eq!(target, "[::1]:443");
	}

	#[tokio::test]
	async fn rejects_bind_command() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let mut conn = TcpStream::connect(addr).await.unwrap();
			conn.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
			let mut greet_reply = [0u8; 2];
			conn.read_exact(&mut greet_reply).await.unwrap();
			conn.write_all(&[0x05, 0x02, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await.unwrap();
		});

		let (mut server, _) = listener.accept().await.unwrap();
		let err = negotiate(&mut server).await.unwrap_err();
		assert!(matches!(err, ProtocolError::UnsupportedSocksCommand(0x02)));
	}
}
