//! HTTP/1.1 proxy FSM (RFC 7230): CONNECT tunneling and absolute-URI
//! forwarding.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::client::SharedState;
use crate::error::ProtocolError;
use crate::tunnel::{self, Mode};

const MAX_BODY_LEN: u64 = 10 * 1024 * 1024;
const STRIPPED_HEADERS: [&str; 2] = ["proxy-connection", "proxy-authorization"];

struct ParsedRequest {
	method: String,
	target: String,
	version: String,
	headers: Vec<(String, String)>, // (lowercased name, raw "Name: value" line)
}

enum Outcome {
	Connect { target: String },
	Proxy { target: String, first_frame: Vec<u8> },
	UnsupportedMethod,
	BadRequest,
}

pub async fn handle(mut stream: TcpStream, peer: std::net::SocketAddr, state: Arc<SharedState>) {
	let outcome = match parse_and_build(&mut stream).await {
		Ok(outcome) => outcome,
		Err(err) => {
			state.log.error(format!("{peer}: HTTP proxy request failed: {err}"));
			Outcome::BadRequest
		},
	};

	match outcome {
		Outcome::Connect { target } => {
			tunnel::run(stream, peer, Mode::HttpConnect, target, Vec::new(), state).await;
		},
		Outcome::Proxy { target, first_frame } => {
			tunnel::run(stream, peer, Mode::HttpProxy, target, first_frame, state).await;
		},
		Outcome::UnsupportedMethod => {
			stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n").await.ok();
		},
		Outcome::BadRequest => {
			stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await.ok();
		},
	}
}

async fn read_line(stream: &mut TcpStream) -> Result<String, ProtocolError> {
	let mut line = Vec::new();
	let mut byte = [0u8; 1];
	loop {
		let n = stream.read(&mut byte).await?;
		if n == 0 {
			return Err(ProtocolError::MalformedRequestLine);
		}
		if byte[0] == b'\n' {
			if line.last() == Some(&b'\r') {
				line.pop();
			}
			break;
		}
		line.push(byte[0]);
	}
	Ok(String::from_utf8_lossy(&line).into_owned())
}

async fn parse_request(stream: &mut TcpStream) -> Result<ParsedRequest, ProtocolError> {
	let request_line = read_line(stream).await?;
	let mut parts = request_line.split(' ');
	let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
		(Some(m), Some(t), Some(v), None) if !m.is_empty() && !t.is_empty() && !v.is_empty() => {
			(m.to_string(), t.to_string(), v.to_string())
		},
		_ => return Err(ProtocolError::MalformedRequestLine),
	};

	let mut headers = Vec::new();
	loop {
		let line = read_line(stream).await?;
		if line.is_empty() {
			break;
		}
		let Some((name, _)) = line.split_once(':') else {
			return Err(ProtocolError::MalformedRequestLine);
		};
		headers.push((name.trim().to_ascii_lowercase(), line));
	}

	Ok(ParsedRequest {
		method,
		target,
		version,
		headers,
	})
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
	headers.iter().find(|(key, _)| key == name).and_then(|(_, line)| line.split_once(':').map(|(_, v)| v.trim()))
}

async fn parse_and_build(stream: &mut TcpStream) -> Result<Outcome, ProtocolError> {
	let request = parse_request(stream).await?;
	let method_upper = request.method.to_ascii_uppercase();

	if method_upper == "CONNECT" {
		return Ok(Outcome::Connect { target: request.target });
	}

	const SUPPORTED: [&str; 8] = ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE"];
	if !SUPPORTED.contains(&method_upper.as_str()) {
		return Ok(Outcome::UnsupportedMethod);
	}

	let (authority, path) = if let Some(rest) = request.target.strip_prefix("http://") {
		match rest.find('/') {
			Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
			None => (rest.to_string(), "/".to_string()),
		}
	} else {
		let host = header_value(&request.headers, "host").ok_or(ProtocolError::MissingHost)?;
		(host.to_string(), request.target.clone())
	};
	let authority = if authority.contains(':') {
		authority
	} else {
		format!("{authority}:80")
	};

	let mut forwarded = format!("{method_upper} {path} {}\r\n", request.version).into_bytes();
	for (name, line) in &request.headers {
		if STRIPPED_HEADERS.contains(&name.as_str()) {
			continue;
		}
		forwarded.extend_from_slice(line.as_bytes());
		forwarded.extend_from_slice(b"\r\n");
	}
	forwarded.extend_from_slice(b"\r\n");

	if let Some(len) = header_value(&request.headers, "content-length").and_then(|v| v.parse::<u64>().ok())
		&& len > 0
		&& len < MAX_BODY_LEN
	{
		let mut body = vec![0u8; len as usize];
		stream.read_exact(&mut body).await?;
		forwarded.extend_from_slice(&body);
	}

	Ok(Outcome::Proxy {
		target: authority,
		first_frame: forwarded,
	})
}
