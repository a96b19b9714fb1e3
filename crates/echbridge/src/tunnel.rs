//! Full-duplex tunnel engine: negotiates the target with the gateway over
//! WS, then pumps bytes between the TCP client and the WS connection until
//! either side signals completion.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::client::SharedState;
use crate::error::is_normal_close;
use crate::ws::{self, Message, WsConnection};

const PEEK_TIMEOUT: Duration = Duration::from_millis(100);
const PEEK_MAX_LEN: usize = 32 * 1024;
const COPY_CHUNK_LEN: usize = 32 * 1024;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Which front-end FSM produced this connection, governing the
/// success/failure response written back to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
	Socks5,
	HttpConnect,
	HttpProxy,
}

const SOCKS5_SUCCESS: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
const SOCKS5_FAILURE: [u8; 10] = [0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

impl Mode {
	fn success_reply(self) -> &'static [u8] {
		match self {
			Mode::Socks5 => &SOCKS5_SUCCESS,
			Mode::HttpConnect => b"HTTP/1.1 200 Connection Established\r\n\r\n",
			// The gateway's own response bytes are relayed verbatim; no
			// synthetic status line is written for plain proxied requests.
			Mode::HttpProxy => b"",
		}
	}

	fn failure_reply(self) -> &'static [u8] {
		match self {
			Mode::Socks5 => &SOCKS5_FAILURE,
			Mode::HttpConnect | Mode::HttpProxy => b"HTTP/1.1 502 Bad Gateway\r\n\r\n",
		}
	}
}

/// Drives one accepted TCP client through gateway negotiation and, on
/// success, the bidirectional copy loop. Consumes `client` either way.
pub async fn run(
	mut client: TcpStream,
	peer: SocketAddr,
	mode: Mode,
	target: String,
	mut first_frame: Vec<u8>,
	state: Arc<SharedState>,
) {
	let mut conn = match ws::dial(
		&state.server_addr,
		state.config.server_ip,
		&state.config.token,
		&state.ech_store,
		state.config.max_retries,
	)
	.await
	{
		Ok(conn) => conn,
		Err(err) => {
			state.log.error(format!("{peer}: gateway dial failed for {target}: {err}"));
			client.write_all(mode.failure_reply()).await.ok();
			return;
		},
	};

	if mode == Mode::Socks5 && first_frame.is_empty() {
		first_frame = opportunistic_peek(&mut client).await;
	}

	let control = format!("CONNECT:{target}|{}", String::from_utf8_lossy(&first_frame));
	if let Err(err) = conn.writer.send_text(&control).await {
		state.log.error(format!("{peer}: failed to send control message: {err}"));
		client.write_all(mode.failure_reply()).await.ok();
		return;
	}

	match conn.reader.recv().await {
		Ok(Message::Text(text)) if text == "CONNECTED" => {},
		Ok(Message::Text(text)) if text.starts_with("ERROR:") => {
			state.log.error(format!("{peer}: gateway rejected {target}: {text}"));
			client.write_all(mode.failure_reply()).await.ok();
			return;
		},
		Ok(other) => {
			state.log.error(format!("{peer}: unexpected gateway response for {target}: {other:?}"));
			client.write_all(mode.failure_reply()).await.ok();
			return;
		},
		Err(err) => {
			if !is_normal_close(&err) {
				state.log.error(format!("{peer}: gateway acceptance read failed: {err}"));
			}
			client.write_all(mode.failure_reply()).await.ok();
			return;
		},
	}

	let reply = mode.success_reply();
	if !reply.is_empty()
		&& let Err(err) = client.write_all(reply).await
	{
		if !is_normal_close(&err) {
			state.log.error(format!("{peer}: failed to write success reply: {err}"));
		}
		return;
	}

	pump(client, conn, peer, state).await;
}

/// SOCKS5's opportunistic pre-tunnel peek: gives the CONNECT control frame
/// a chance to carry the client's first application bytes (e.g. a TLS
/// ClientHello) so the gateway can dial out a round-trip earlier. Not
/// safety-critical: timing out just means an empty first frame.
async fn opportunistic_peek(client: &mut TcpStream) -> Vec<u8> {
	let mut buf = vec![0u8; PEEK_MAX_LEN];
	match tokio::time::timeout(PEEK_TIMEOUT, client.peek(&mut buf)).await {
		Ok(Ok(n)) if n > 0 => buf[..n].to_vec(),
		_ => Vec::new(),
	}
}

enum OutboundFrame {
	Ping,
	Binary(Bytes),
	/// The application-level `"CLOSE"` TEXT signal, not a native WS close
	/// frame.
	CloseSignal,
}

/// Spawns the keepalive, client->WS, and WS->client tasks and waits for the
/// first completion signal, then tears everything down.
async fn pump(client: TcpStream, conn: WsConnection, peer: SocketAddr, state: Arc<SharedState>) {
	let WsConnection { reader, mut writer } = conn;
	let (client_read, client_write) = tokio::io::split(client);

	// All WS writes — PING, data, and CLOSE — are serialized through this one
	// channel/task, since keepalive and the copy direction write concurrently.
	let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(64);
	let writer_task = tokio::spawn(async move {
		while let Some(frame) = out_rx.recv().await {
			let result = match frame {
				OutboundFrame::Ping => writer.send_ping().await,
				OutboundFrame::Binary(payload) => writer.send_binary(&payload).await,
				OutboundFrame::CloseSignal => writer.send_text("CLOSE").await,
			};
			if result.is_err() {
				break;
			}
		}
	});

	let keepalive_tx = out_tx.clone();
	let keepalive_task = tokio::spawn(async move {
		let mut ticker = interval(KEEPALIVE_INTERVAL);
		ticker.tick().await; // first tick fires immediately; skip it
		loop {
			ticker.tick().await;
			if keepalive_tx.send(OutboundFrame::Ping).await.is_err() {
				return;
			}
		}
	});

	let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

	let upload_done = done_tx.clone();
	let upload_tx = out_tx.clone();
	let upload_task = tokio::spawn(async move {
		client_to_ws(client_read, upload_tx).await;
		let _ = upload_done.send(()).await;
	});

	let download_done = done_tx.clone();
	let state_for_download = state.clone();
	let download_task = tokio::spawn(async move {
		ws_to_client(reader, client_write, state_for_download, peer).await;
		let _ = download_done.send(()).await;
	});
	drop(done_tx);

	done_rx.recv().await;

	keepalive_task.abort();
	upload_task.abort();
	download_task.abort();
	drop(out_tx);
	writer_task.abort();
}

async fn client_to_ws(mut client_read: ReadHalf<TcpStream>, out_tx: mpsc::Sender<OutboundFrame>) {
	let mut buf = vec![0u8; COPY_CHUNK_LEN];
	loop {
		match client_read.read(&mut buf).await {
			Ok(0) | Err(_) => {
				let _ = out_tx.send(OutboundFrame::CloseSignal).await;
				return;
			},
			Ok(n) => {
				if out_tx.send(OutboundFrame::Binary(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
					return;
				}
			},
		}
	}
}

async fn ws_to_client(
	mut reader: ws::WsReader,
	mut client_write: WriteHalf<TcpStream>,
	state: Arc<SharedState>,
	peer: SocketAddr,
) {
	loop {
		match reader.recv().await {
			Ok(Message::Text(text)) if text == "CLOSE" => return,
			// An unsolicited text frame that is neither CLOSE nor a protocol
			// reply is treated as payload and forwarded verbatim.
			Ok(Message::Text(text)) => {
				if client_write.write_all(text.as_bytes()).await.is_err() {
					return;
				}
			},
			Ok(Message::Binary(payload)) => {
				if client_write.write_all(&payload).await.is_err() {
					return;
				}
			},
			Ok(Message::Close) => return,
			Ok(Message::Ping(_) | Message::Pong(_)) => {},
			Err(err) => {
				if !is_normal_close(&err) {
					state.log.error(format!("{peer}: WS read failed: {err}"));
				}
				return;
			},
		}
	}
}
