//! RFC 6455 WebSocket frame encoding/decoding.
//!
//! Outbound frames are always client-masked per RFC 6455 §5.1; this side is
//! hand-rolled because the corpus's one use of `websocket_sans_io`
//! (`agentgateway`'s pass-through frame parser) only exercises that crate's
//! decoder, never an encoder. Inbound frames reuse the same crate's
//! `WebsocketFrameDecoder` the way that parser does, so the dependency still
//! earns its place for the read side.

use bytes::{Bytes, BytesMut};
use rand::RngCore;
use websocket_sans_io::{FrameInfo, Opcode, WebsocketFrameDecoder, WebsocketFrameEvent};

/// One complete WebSocket message as handed to/from the tunnel engine.
#[derive(Debug, Clone)]
pub enum Message {
	Text(String),
	Binary(Bytes),
	Ping(Bytes),
	Pong(Bytes),
	Close,
}

fn opcode_byte(opcode: u8, fin: bool) -> u8 {
	(if fin { 0x80 } else { 0x00 }) | opcode
}

/// Encodes `payload` as a single-frame, masked client message with the given
/// opcode (RFC 6455 §5.2). Control frames (close/ping/pong) are always sent
/// unfragmented, and so is every data frame this client produces.
fn encode_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(payload.len() + 14);
	out.push(opcode_byte(opcode, true));

	let len = payload.len();
	if len < 126 {
		out.push(0x80 | len as u8);
	} else if len <= u16::MAX as usize {
		out.push(0x80 | 126);
		out.extend_from_slice(&(len as u16).to_be_bytes());
	} else {
		out.push(0x80 | 127);
		out.extend_from_slice(&(len as u64).to_be_bytes());
	}

	let mut mask = [0u8; 4];
	rand::rng().fill_bytes(&mut mask);
	out.extend_from_slice(&mask);
	out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
	out
}

pub fn encode_text(payload: &str) -> Vec<u8> {
	encode_frame(0x1, payload.as_bytes())
}

pub fn encode_binary(payload: &[u8]) -> Vec<u8> {
	encode_frame(0x2, payload)
}

pub fn encode_close() -> Vec<u8> {
	encode_frame(0x8, &[])
}

pub fn encode_ping() -> Vec<u8> {
	encode_frame(0x9, &[])
}

pub fn encode_pong(payload: &[u8]) -> Vec<u8> {
	encode_frame(0xA, payload)
}

/// Accumulates bytes read from the gateway connection into complete
/// [`Message`]s, delegating frame-boundary tracking to
/// `websocket_sans_io::WebsocketFrameDecoder`.
pub struct FrameDecoder {
	inner: WebsocketFrameDecoder,
	payload: BytesMut,
}

impl Default for FrameDecoder {
	fn default() -> Self {
		Self {
			inner: WebsocketFrameDecoder::new(),
			payload: BytesMut::new(),
		}
	}
}

impl FrameDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Feeds newly-read bytes into the decoder, returning every message that
	/// became complete as a result (usually zero or one, but a single read
	/// may straddle more than one frame).
	pub fn feed(&mut self, data: &[u8]) -> Vec<Message> {
		let mut messages = Vec::new();
		let mut rest = data.to_vec();
		loop {
			if rest.is_empty() {
				break;
			}
			let Ok(outcome) = self.inner.add_data(&mut rest) else {
				break;
			};
			let consumed = outcome.consumed_bytes;
			match outcome.event {
				Some(WebsocketFrameEvent::PayloadChunk { .. }) => {
					self.payload.extend_from_slice(&rest[..consumed]);
				},
				Some(WebsocketFrameEvent::End {
					frame_info: FrameInfo { fin: true, .. },
					original_opcode,
				}) => {
					let body = self.payload.split().freeze();
					if let Some(message) = finish_message(original_opcode, body) {
						messages.push(message);
					}
				},
				_ => {},
			}
			if consumed == 0 {
				break;
			}
			rest.drain(..consumed);
		}
		messages
	}
}

fn finish_message(opcode: Opcode, body: Bytes) -> Option<Message> {
	match opcode {
		Opcode::Text => Some(Message::Text(String::from_utf8_lossy(&body).into_owned())),
		Opcode::Binary => Some(Message::Binary(body)),
		Opcode::Ping => Some(Message::Ping(body)),
		Opcode::Pong => Some(Message::Pong(body)),
		Opcode::Close => Some(Message::Close),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encodes_masked_text_frame() {
		let frame = encode_text("hi");
		assert_eq!(frame[0], 0x81); // FIN + text opcode
		assert_eq!(frame[1] & 0x80, 0x80); // masked
		assert_eq!(frame[1] & 0x7F, 2); // payload length
	}

	#[test]
	fn encodes_long_payload_with_16_bit_length() {
		let payload = vec![0u8; 200];
		let frame = encode_binary(&payload);
		assert_eq!(frame[1] & 0x7F, 126);
	}
}
