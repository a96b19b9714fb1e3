//! Lifecycle supervision: Start/Stop/IsRunning over the listener, plus the
//! public control surface an embedder drives.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, ServerAddr};
use crate::ech::EchStore;
use crate::error::{Error, LifecycleError};
use crate::telemetry::{Level, LogSink};
use crate::{listener, ws};

/// State shared by every task spun up while the client is running: the
/// accept loop, each connection handler, and each tunnel.
pub(crate) struct SharedState {
	pub config: ClientConfig,
	pub server_addr: ServerAddr,
	pub ech_store: EchStore,
	pub log: LogSink,
}

enum ListenerInner {
	Idle,
	Running {
		local_addr: SocketAddr,
		shutdown: watch::Sender<bool>,
		task: JoinHandle<()>,
	},
}

/// One bridge client instance: owns its own `ECHStore` and `ListenerState`.
/// Multiple instances may coexist with no shared global state between them.
pub struct Client {
	shared: Arc<SharedState>,
	listener: Mutex<ListenerInner>,
}

impl Client {
	/// Validates `config.server_addr` and constructs a new, not-yet-started
	/// client instance.
	pub fn new(config: ClientConfig) -> Result<Self, Error> {
		let server_addr = config.parsed_server_addr()?;
		let ech_store = EchStore::new(config.ech_domain.clone(), config.dns_server.clone());
		Ok(Self {
			shared: Arc::new(SharedState {
				config,
				server_addr,
				ech_store,
				log: LogSink::new(),
			}),
			listener: Mutex::new(ListenerInner::Idle),
		})
	}

	/// Installs `sink`, atomically replacing any previously-installed one.
	/// Messages are routed to `tracing` when no sink has been installed.
	pub fn set_log_sink<F>(&self, sink: F)
	where
		F: Fn(Level, &str) + Send + Sync + 'static,
	{
		self.shared.log.set(sink);
	}

	/// Bootstraps the ECH config (one-shot DNS fetch) and opens the listener
	/// at `listen_addr`, or `config.listen_addr` if `None`.
	pub async fn start(&self, listen_addr: Option<SocketAddr>) -> Result<(), Error> {
		let mut guard = self.listener.lock().await;
		if matches!(*guard, ListenerInner::Running { .. }) {
			return Err(LifecycleError::AlreadyRunning.into());
		}

		self.shared.ech_store.refresh().await?;

		let addr = listen_addr.unwrap_or(self.shared.config.listen_addr);
		let tcp = TcpListener::bind(addr)
			.await
			.map_err(|e| crate::error::ConfigError::InvalidListenAddr(addr.to_string(), e.to_string()))?;
		let local_addr = tcp
			.local_addr()
			.map_err(|e| crate::error::ConfigError::InvalidListenAddr(addr.to_string(), e.to_string()))?;

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let shared = self.shared.clone();
		let task = tokio::spawn(async move {
			listener::run(tcp, shared, shutdown_rx).await;
		});

		self.shared.log.info(format!("listening on {local_addr}"));
		*guard = ListenerInner::Running {
			local_addr,
			shutdown: shutdown_tx,
			task,
		};
		Ok(())
	}

	/// Closes the listener, interrupting the accept loop. In-flight tunnels
	/// are left running; each terminates on its own.
	pub async fn stop(&self) -> Result<(), LifecycleError> {
		let mut guard = self.listener.lock().await;
		match std::mem::replace(&mut *guard, ListenerInner::Idle) {
			ListenerInner::Idle => {
				*guard = ListenerInner::Idle;
				Err(LifecycleError::NotRunning)
			},
			ListenerInner::Running { shutdown, .. } => {
				let _ = shutdown.send(true);
				self.shared.log.info("listener stopped");
				Ok(())
			},
		}
	}

	pub async fn is_running(&self) -> bool {
		matches!(*self.listener.lock().await, ListenerInner::Running { .. })
	}

	/// One-shot refresh + single dial attempt, used by embedders to validate
	/// connectivity without starting the listener.
	pub async fn test_connection(&self) -> Result<(), Error> {
		self.shared.ech_store.refresh().await?;
		let _conn = ws::dial(
			&self.shared.server_addr,
			self.shared.config.server_ip,
			&self.shared.config.token,
			&self.shared.ech_store,
			1,
		)
		.await?;
		Ok(())
	}

	pub async fn get_status(&self) -> &'static str {
		if self.is_running().await { "Running" } else { "Stopped" }
	}

	pub fn get_version(&self) -> String {
		bridge_core::version::BuildInfo::new().version
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_config() -> ClientConfig {
		ClientConfig {
			server_addr: "example.com:443".to_string(),
			listen_addr: "127.0.0.1:0".parse().unwrap(),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn stop_on_idle_client_fails_without_side_effects() {
		let client = Client::new(test_config()).unwrap();
		assert!(!client.is_running().await);
		let err = client.stop().await.unwrap_err();
		assert!(matches!(err, LifecycleError::NotRunning));
		assert!(!client.is_running().await);
	}

	#[tokio::test]
	async fn get_status_reflects_running_state() {
		let client = Client::new(test_config()).unwrap();
		assert_eq!(client.get_status().await, "Stopped");
	}

	#[test]
	fn new_rejects_invalid_server_addr() {
		let config = ClientConfig {
			server_addr: "not-a-valid-addr".to_string(),
			..Default::default()
		};
		assert!(Client::new(config).is_err());
	}
}
