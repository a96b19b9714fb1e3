//! Holds the most recently bootstrapped ECH config list, refreshable without
//! blocking readers (mirrors `agentgateway`'s `ArcSwap`-backed config caches).

use arc_swap::ArcSwap;
use bytes::Bytes;

use crate::dns;
use crate::error::BootstrapError;

/// The ECH config list for one gateway domain, loaded over DNS and swapped
/// in atomically on refresh. Readers never block a writer and vice versa.
pub struct EchStore {
	domain: String,
	dns_server: String,
	current: ArcSwap<Option<Bytes>>,
}

impl EchStore {
	pub fn new(domain: impl Into<String>, dns_server: impl Into<String>) -> Self {
		Self {
			domain: domain.into(),
			dns_server: dns_server.into(),
			current: ArcSwap::from_pointee(None),
		}
	}

	/// Returns the cached config list, if one has been loaded.
	pub fn get(&self) -> Option<Bytes> {
		self.current.load().as_ref().clone()
	}

	/// Queries DNS for a fresh ECH config list and stores it, returning a copy.
	///
	/// The RR parser returns the `ech` SvcParam value as base64 text; this
	/// is the one place it gets decoded back to the raw DNS-wire bytes the
	/// store and the TLS layer actually use.
	pub async fn refresh(&self) -> Result<Bytes, BootstrapError> {
		use base64::Engine;
		let encoded = dns::query_https_record(&self.domain, &self.dns_server).await?;
		let raw = base64::engine::general_purpose::STANDARD.decode(encoded)?;
		let bytes = Bytes::from(raw);
		self.current.store(std::sync::Arc::new(Some(bytes.clone())));
		Ok(bytes)
	}

	/// Returns the cached config, loading it from DNS first if absent.
	pub async fn load(&self) -> Result<Bytes, BootstrapError> {
		if let Some(bytes) = self.get() {
			return Ok(bytes);
		}
		self.refresh().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn starts_empty() {
		let store = EchStore::new("cloudflare-ech.com", "dns.alidns.com/dns-query");
		assert_eq!(store.get(), None);
	}
}
