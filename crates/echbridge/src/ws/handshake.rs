//! The WebSocket opening handshake (RFC 6455 §4): a plain HTTP/1.1 Upgrade
//! request/response exchanged over the already-established TLS stream.
//!
//! Hand-rolled in the same spirit as `agentgateway`'s raw HTTP/1 CONNECT
//! handshake in `client::connect_tunnel` ("the raw HTTP/1 usage here looks
//! pretty sketchy, hyper itself is doing this so it's probably sufficient").

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::DialError;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

fn generate_key() -> String {
	let mut raw = [0u8; 16];
	rand::rng().fill_bytes(&mut raw);
	BASE64.encode(raw)
}

fn accept_hash(key: &str) -> String {
	let mut hasher = Sha1::new();
	hasher.update(key.as_bytes());
	hasher.update(WS_GUID.as_bytes());
	BASE64.encode(hasher.finalize())
}

/// Performs the client-side WS Upgrade handshake over `stream`, requesting
/// `subprotocol` (Sec-WebSocket-Protocol) when non-empty. Returns once the
/// `101 Switching Protocols` response and its terminating blank line have
/// been consumed.
pub async fn upgrade<S>(
	stream: &mut S,
	host: &str,
	path: &str,
	subprotocol: &str,
) -> Result<(), DialError>
where
	S: AsyncReadExt + AsyncWriteExt + Unpin,
{
	let key = generate_key();
	let mut request = format!(
		"GET {path} HTTP/1.1\r\n\
		 Host: {host}\r\n\
		 Upgrade: websocket\r\n\
		 Connection: Upgrade\r\n\
		 Sec-WebSocket-Key: {key}\r\n\
		 Sec-WebSocket-Version: 13\r\n"
	);
	if !subprotocol.is_empty() {
		request.push_str(&format!("Sec-WebSocket-Protocol: {subprotocol}\r\n"));
	}
	request.push_str("\r\n");

	stream
		.write_all(request.as_bytes())
		.await
		.map_err(|e| DialError::Handshake(e.to_string()))?;

	let response = read_response_head(stream).await?;
	validate_response(&response, &key)
}

/// Reads bytes one at a time until the terminating `\r\n\r\n` of the
/// response headers; the handshake response has no body, so anything past
/// the blank line belongs to the first WS frame and must not be consumed.
async fn read_response_head<S>(stream: &mut S) -> Result<String, DialError>
where
	S: AsyncReadExt + Unpin,
{
	let mut buf = Vec::with_capacity(512);
	let mut byte = [0u8; 1];
	loop {
		let n = stream
			.read(&mut byte)
			.await
			.map_err(|e| DialError::Handshake(e.to_string()))?;
		if n == 0 {
			return Err(DialError::Handshake("connection closed during handshake".to_string()));
		}
		buf.push(byte[0]);
		if buf.ends_with(b"\r\n\r\n") {
			break;
		}
		if buf.len() > 16 * 1024 {
			return Err(DialError::Handshake("handshake response too large".to_string()));
		}
	}
	Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn validate_response(response: &str, key: &str) -> Result<(), DialError> {
	let mut lines = response.split("\r\n");
	let status_line = lines
		.next()
		.ok_or_else(|| DialError::Handshake("empty handshake response".to_string()))?;
	if !status_line.contains("101") {
		return Err(DialError::Handshake(format!("unexpected status line {status_line:?}")));
	}

	let mut accept = None;
	for line in lines {
		if let Some((name, value)) = line.split_once(':') {
			if name.trim().eq_ignore_ascii_case("sec-websocket-accept") {
				accept = Some(value.trim().to_string());
			}
		}
	}
	let accept = accept.ok_or_else(|| DialError::Handshake("missing Sec-WebSocket-Accept".to_string()))?;
	if accept != accept_hash(key) {
		return Err(DialError::Handshake("Sec-WebSocket-Accept mismatch".to_string()));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accept_hash_matches_rfc6455_example() {
		// RFC 6455 §1.3 worked example.
		assert_eq!(accept_hash("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
	}

	#[test]
	fn validates_101_response_with_matching_accept() {
		let key = "dGhlIHNhbXBsZSBub25jZQ==";
		let response = "HTTP/1.1 101 Switching Protocols\r\n\
			Upgrade: websocket\r\n\
			Connection: Upgrade\r\n\
			Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
		assert!(validate_response(response, key).is_ok());
	}

	#[test]
	fn rejects_non_101_status() {
		let response = "HTTP/1.1 404 Not Found\r\n\r\n";
		assert!(validate_response(response, "whatever").is_err());
	}

	#[test]
	fn rejects_mismatched_accept() {
		let response = "HTTP/1.1 101 Switching Protocols\r\n\
			Sec-WebSocket-Accept: bogus\r\n\r\n";
		assert!(validate_response(response, "dGhlIHNhbXBsZSBub25jZQ==").is_err());
	}
}
