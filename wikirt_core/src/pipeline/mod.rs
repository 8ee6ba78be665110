//! The token transform pipeline.
//!
//! Raw tokens flow through a [`TokenTransformManager`], which offers each
//! token to its registered stages in rank order. A stage either answers
//! immediately or hands back a [`Deferred`] that the manager polls until it
//! resolves. Output order always equals input order.

use std::cell::Cell;
use std::rc::Rc;
use std::task::Poll;

use crate::WikiResult;
use crate::config::WikiConfig;
use crate::fetch::TemplateSource;
use crate::frame::Frame;
use crate::tokens::Rank;
use crate::tokens::Token;
use crate::tokens::TokenKind;

pub use attributes::*;
pub use encapsulator::*;
pub use manager::*;
pub use parser_functions::*;
pub use templates::*;

mod attributes;
mod encapsulator;
mod manager;
mod parser_functions;
mod templates;

/// Per-conversion environment shared by every stage and nested pipeline.
pub struct Env {
	config: WikiConfig,
	source: Rc<dyn TemplateSource>,
	next_about: Cell<usize>,
}

impl Env {
	pub fn new(config: WikiConfig, source: Rc<dyn TemplateSource>) -> Self {
		Self {
			config,
			source,
			next_about: Cell::new(1),
		}
	}

	pub fn config(&self) -> &WikiConfig {
		&self.config
	}

	pub fn source(&self) -> &dyn TemplateSource {
		self.source.as_ref()
	}

	/// A fresh `about` id (`#mwt1`, `#mwt2`, ...) for a transclusion.
	pub fn new_about_id(&self) -> String {
		let id = self.next_about.get();
		self.next_about.set(id + 1);
		format!("#mwt{id}")
	}
}

/// What a stage sees besides the token itself.
pub struct StageContext<'a> {
	pub env: &'a Env,
	pub frame: &'a Rc<Frame>,
}

/// Which tokens a stage wants to be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFilter {
	Any,
	/// Any tag token.
	Tag,
	/// Tag tokens with this name.
	TagNamed(&'static str),
	Text,
	Comment,
	Newline,
	EndOfInput,
}

impl TokenFilter {
	pub fn matches(&self, token: &Token) -> bool {
		match self {
			TokenFilter::Any => true,
			TokenFilter::Tag => token.is_tag(),
			TokenFilter::TagNamed(name) => token.name() == Some(*name),
			TokenFilter::Text => matches!(token.kind, TokenKind::Text(_)),
			TokenFilter::Comment => matches!(token.kind, TokenKind::Comment(_)),
			TokenFilter::Newline => matches!(token.kind, TokenKind::Newline),
			TokenFilter::EndOfInput => token.is_end_of_input(),
		}
	}
}

/// The result of offering a token to a stage.
pub enum StageOutcome {
	/// Replace the token and continue with the next stage.
	Token(Token),
	/// Replace the token with any number of tokens, each of which continues
	/// with the stages after this one.
	Tokens(Vec<Token>),
	/// The stage needs more time. The manager polls the handle and splices
	/// the resolved tokens in at the original position.
	Pending(Box<dyn Deferred>),
}

/// A suspended stage.
pub trait Deferred {
	fn poll(&mut self, env: &Env) -> Poll<WikiResult<Vec<Token>>>;
}

/// A transform stage registered with a [`TokenTransformManager`].
pub trait TokenStage {
	fn name(&self) -> &'static str;
	fn rank(&self) -> Rank;
	fn filter(&self) -> TokenFilter;
	fn transform(&self, token: Token, cx: &StageContext<'_>) -> WikiResult<StageOutcome>;
}
