use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// Severity for messages delivered through the [`LogSink`] capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
	Info,
	Error,
}

type SinkFn = dyn Fn(Level, &str) + Send + Sync;

/// A single-installer, atomically-replaceable logging capability.
///
/// When no sink is installed, messages are routed to `tracing` at the
/// matching level as an ad-hoc stderr-style default.
#[derive(Clone, Default)]
pub struct LogSink {
	inner: Arc<ArcSwapOption<SinkFn>>,
}

impl LogSink {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(ArcSwapOption::empty()),
		}
	}

	/// Installs `sink`, atomically replacing any previously-installed one.
	pub fn set<F>(&self, sink: F)
	where
		F: Fn(Level, &str) + Send + Sync + 'static,
	{
		self.inner.store(Some(Arc::new(sink)));
	}

	/// Removes any installed sink, reverting to the default `tracing` route.
	pub fn clear(&self) {
		self.inner.store(None);
	}

	pub fn info(&self, message: impl AsRef<str>) {
		self.log(Level::Info, message.as_ref());
	}

	pub fn error(&self, message: impl AsRef<str>) {
		self.log(Level::Error, message.as_ref());
	}

	pub fn log(&self, level: Level, message: &str) {
		match self.inner.load().as_deref() {
			Some(sink) => sink(level, message),
			None => match level {
				Level::Info => tracing::info!("{message}"),
				Level::Error => tracing::error!("{message}"),
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use super::*;

	#[test]
	fn default_sink_does_not_panic() {
		let sink = LogSink::new();
		sink.info("hello");
		sink.error("world");
	}

	#[test]
	fn installed_sink_receives_messages() {
		let sink = LogSink::new();
		let received: Arc<Mutex<Vec<(Level, String)>>> = Arc::new(Mutex::new(Vec::new()));
		let received2 = received.clone();
		sink.set(move |level, msg| received2.lock().unwrap().push((level, msg.to_string())));
		sink.info("connected");
		sink.error("boom");
		let got = received.lock().unwrap();
		assert_eq!(got[0], (Level::Info, "connected".to_string()));
		assert_eq!(got[1], (Level::Error, "boom".to_string()));
	}

	#[test]
	fn replacement_is_atomic_and_clear_reverts_to_default() {
		let sink = LogSink::new();
		let count = Arc::new(Mutex::new(0));
		let count2 = count.clone();
		sink.set(move |_, _| *count2.lock().unwrap() += 1);
		sink.info("one");
		sink.clear();
		sink.info("two"); // routed to tracing default, not counted
		assert_eq!(*count.lock().unwrap(), 1);
	}
}
