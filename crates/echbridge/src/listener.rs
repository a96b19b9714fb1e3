//! Accepts plain TCP clients and dispatches each connection to the SOCKS5 or
//! HTTP proxy FSM based on its first byte.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;

use crate::client::SharedState;
use crate::{http_proxy, socks5};

const SNIFF_TIMEOUT: Duration = Duration::from_secs(30);

/// First-byte dispatch rule: `0x05` is SOCKS5, the first letter of any
/// supported HTTP method takes the HTTP path, anything else is dropped
/// without side effect on other connections.
fn classify(first_byte: u8) -> Dispatch {
	match first_byte {
		0x05 => Dispatch::Socks5,
		b'C' | b'G' | b'P' | b'H' | b'D' | b'O' | b'T' => Dispatch::Http,
		_ => Dispatch::Drop,
	}
}

enum Dispatch {
	Socks5,
	Http,
	Drop,
}

/// Runs the accept loop until `shutdown` is signaled. Listener closure during
/// `Stop` is observed here as a normal termination, never logged as an error.
pub async fn run(listener: TcpListener, state: Arc<SharedState>, mut shutdown: watch::Receiver<bool>) {
	loop {
		tokio::select! {
			biased;
			_ = shutdown.changed() => {
				return;
			}
			accepted = listener.accept() => {
				match accepted {
					Ok((stream, peer)) => {
						let state = state.clone();
						tokio::spawn(async move {
							handle_connection(stream, peer, state).await;
						});
					}
					Err(err) => {
						if crate::error::is_normal_close(&err) {
							return;
						}
						state.log.error(format!("accept failed: {err}"));
					}
				}
			}
		}
	}
}

async fn handle_connection(mut stream: TcpStream, peer: std::net::SocketAddr, state: Arc<SharedState>) {
	let mut first_byte = [0u8; 1];
	let peeked = timeout(SNIFF_TIMEOUT, stream.peek(&mut first_byte)).await;
	let n = match peeked {
		Ok(Ok(n)) => n,
		Ok(Err(err)) => {
			if !crate::error::is_normal_close(&err) {
				state.log.error(format!("{peer}: read failed during protocol sniff: {err}"));
			}
			return;
		},
		Err(_) => {
			state.log.error(format!("{peer}: timed out waiting for first byte"));
			return;
		},
	};
	if n == 0 {
		return;
	}

	match classify(first_byte[0]) {
		Dispatch::Socks5 => socks5::handle(stream, peer, state).await,
		Dispatch::Http => http_proxy::handle(stream, peer, state).await,
		Dispatch::Drop => {
			state.log.info(format!("{peer}: dropped connection with unrecognized first byte {:#x}", first_byte[0]));
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_socks5_version_byte() {
		assert!(matches!(classify(0x05), Dispatch::Socks5));
	}

	#[test]
	fn classifies_http_method_first_letters() {
		for b in [b'C', b'G', b'P', b'H', b'D', b'O', b'T'] {
			assert!(matches!(classify(b), Dispatch::Http));
		}
	}

	#[test]
	fn drops_unrecognized_first_byte() {
		assert!(matches!(classify(b'X'), Dispatch::Drop));
	}
}
