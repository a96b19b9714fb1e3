/// Build/version metadata surfaced through the public `get_version()` control call.
#[derive(Clone, Debug)]
pub struct BuildInfo {
	pub version: String,
}

impl BuildInfo {
	pub fn new() -> Self {
		Self {
			version: env!("CARGO_PKG_VERSION").to_string(),
		}
	}
}

impl Default for BuildInfo {
	fn default() -> Self {
		Self::new()
	}
}
