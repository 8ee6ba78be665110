use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::WikiError;
use crate::WikiResult;
use crate::serializer::Constraint;

/// Default maximum depth of nested template frames.
pub const DEFAULT_MAX_TEMPLATE_DEPTH: usize = 40;

/// Default number of polling rounds the pipeline may spend waiting on deferred
/// stages before the conversion is aborted.
pub const DEFAULT_MAX_POLL_ROUNDS: usize = 10_000;

/// Default number of polls a template fetch may stay pending before it is
/// rendered as an inline timeout error.
pub const DEFAULT_FETCH_TIMEOUT_POLLS: usize = 1_000;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] =
	["wikirt.toml", ".wikirt.toml", ".config/wikirt.toml"];

/// Configuration loaded from a `wikirt.toml` file.
///
/// ```toml
/// template_parameters_html = true
/// max_template_depth = 40
/// max_poll_rounds = 10000
/// fetch_timeout_polls = 1000
/// offset_type = "ucs2"
///
/// [separators]
/// default_min = 0
/// default_max = 2
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct WikiConfig {
	/// Render every template parameter to HTML and store it next to its
	/// wikitext in the argument-info record.
	#[serde(default)]
	pub template_parameters_html: bool,
	/// Maximum depth of the frame chain before expansion gives up with an
	/// inline error.
	#[serde(default = "default_max_template_depth")]
	pub max_template_depth: usize,
	/// Rounds of polling without completion before a deferred stage is
	/// treated as lost.
	#[serde(default = "default_max_poll_rounds")]
	pub max_poll_rounds: usize,
	/// Polls a template fetch may stay pending before it times out. Capped
	/// per nesting level by [`WikiConfig::fetch_budget`].
	#[serde(default = "default_fetch_timeout_polls")]
	pub fetch_timeout_polls: usize,
	/// Unit used for offsets exported into the page bundle.
	#[serde(default)]
	pub offset_type: OffsetType,
	/// Fallback separator bounds for boundaries where no handler has an
	/// opinion.
	#[serde(default)]
	pub separators: SeparatorConfig,
}

impl Default for WikiConfig {
	fn default() -> Self {
		Self {
			template_parameters_html: false,
			max_template_depth: DEFAULT_MAX_TEMPLATE_DEPTH,
			max_poll_rounds: DEFAULT_MAX_POLL_ROUNDS,
			fetch_timeout_polls: DEFAULT_FETCH_TIMEOUT_POLLS,
			offset_type: OffsetType::default(),
			separators: SeparatorConfig::default(),
		}
	}
}

/// The unit an offset is measured in.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetType {
	/// UTF-8 bytes.
	#[default]
	Byte,
	/// Unicode scalar values.
	Char,
	/// UTF-16 code units, as used by JavaScript consumers.
	Ucs2,
}

/// The global default gap between serialized units.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct SeparatorConfig {
	#[serde(default)]
	pub default_min: usize,
	#[serde(default = "default_separator_max")]
	pub default_max: usize,
}

impl Default for SeparatorConfig {
	fn default() -> Self {
		Self {
			default_min: 0,
			default_max: default_separator_max(),
		}
	}
}

impl SeparatorConfig {
	pub fn constraint(&self) -> Constraint {
		Constraint::new(self.default_min, self.default_max)
	}
}

fn default_max_template_depth() -> usize {
	DEFAULT_MAX_TEMPLATE_DEPTH
}

fn default_max_poll_rounds() -> usize {
	DEFAULT_MAX_POLL_ROUNDS
}

fn default_fetch_timeout_polls() -> usize {
	DEFAULT_FETCH_TIMEOUT_POLLS
}

fn default_separator_max() -> usize {
	2
}

impl WikiConfig {
	/// Polls a fetch started in a frame at `depth` may stay pending.
	///
	/// Each nesting level gets at most half the poll rounds left by its
	/// parent, so a chain of slow nested fetches times out before the run
	/// itself exhausts `max_poll_rounds`.
	pub fn fetch_budget(&self, depth: usize) -> usize {
		let share = u32::try_from(depth + 1)
			.ok()
			.and_then(|shift| self.max_poll_rounds.checked_shr(shift))
			.unwrap_or(0);
		self.fetch_timeout_polls.min(share)
	}

	/// Resolve the first config file that exists at `root`.
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if no config file exists.
	pub fn load(root: &Path) -> WikiResult<Option<WikiConfig>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		let content = std::fs::read_to_string(&config_path)?;
		Self::from_toml_str(&content).map(Some)
	}

	pub fn from_toml_str(content: &str) -> WikiResult<WikiConfig> {
		toml::from_str(content).map_err(|e| WikiError::ConfigParse(e.to_string()))
	}
}
