use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum WikiError {
	#[error(transparent)]
	#[diagnostic(code(wikirt::io_error))]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	#[diagnostic(code(wikirt::json))]
	Json(#[from] serde_json::Error),

	#[error("malformed source in {context}: {detail}")]
	#[diagnostic(
		code(wikirt::malformed_source),
		help("the tokenizer and serializer disagree about source offsets; this is a bug")
	)]
	MalformedSource { context: String, detail: String },

	#[error("failed to fetch `{title}`: {reason}")]
	#[diagnostic(code(wikirt::fetch))]
	Fetch { title: String, reason: String },

	#[error("call target `{0}` is neither a parser function nor a page title")]
	#[diagnostic(code(wikirt::ambiguous_target))]
	AmbiguousTarget(String),

	#[error("template loop detected: `{title}`")]
	#[diagnostic(
		code(wikirt::template_loop),
		help("a template transcludes itself through its own expansion")
	)]
	TemplateLoop { title: String },

	#[error("template expansion depth limit of {limit} exceeded")]
	#[diagnostic(
		code(wikirt::template_depth),
		help("raise `max_template_depth` in wikirt.toml")
	)]
	TemplateDepth { limit: usize },

	#[error("continuation for pipeline slot {slot} was lost")]
	#[diagnostic(
		code(wikirt::lost_continuation),
		help("a deferred stage never resolved; the document conversion was aborted")
	)]
	LostContinuation { slot: usize },

	#[error("token order violated: slot {slot} resolved after it was flushed")]
	#[diagnostic(code(wikirt::ordering_violation))]
	OrderingViolation { slot: usize },

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(wikirt::config_parse),
		help("check that wikirt.toml is valid TOML")
	)]
	ConfigParse(String),
}

impl WikiError {
	pub fn malformed(context: impl Into<String>, detail: impl Into<String>) -> Self {
		Self::MalformedSource {
			context: context.into(),
			detail: detail.into(),
		}
	}

	/// Errors which are contained to the token that produced them and rendered
	/// inline instead of aborting the document.
	pub fn is_contained(&self) -> bool {
		matches!(
			self,
			Self::Fetch { .. } | Self::TemplateLoop { .. } | Self::TemplateDepth { .. }
		)
	}
}

pub type WikiResult<T> = Result<T, WikiError>;
