use std::rc::Rc;
use std::task::Poll;

use crate::CallTarget;
use crate::Deferred;
use crate::Document;
use crate::Env;
use crate::MemorySource;
use crate::Node;
use crate::NodeId;
use crate::PendingFetch;
use crate::Rank;
use crate::StageContext;
use crate::StageOutcome;
use crate::TemplateSource;
use crate::Token;
use crate::TokenFilter;
use crate::TokenKind;
use crate::TokenStage;
use crate::WikiConfig;
use crate::WikiError;
use crate::WikiResult;
use crate::lexer::tokenize;
use crate::parse_document;
use crate::serialize_document;

/// Templates shared by most tests.
pub fn templates() -> MemorySource {
	MemorySource::new()
		.with_page("Template:Greeting", "Hello, {{{1}}}!")
		.with_page("Template:Table", "{|\n|x\n|}")
		.with_page("Template:Outer", "[{{Inner|{{{1}}}}}]")
		.with_page("Template:Inner", "<{{{1}}}>")
		.with_page("Template:Loop", "a{{Loop}}b")
		.with_page("Template:Fallback", "{{{name|nobody}}}")
}

pub fn env_with(source: MemorySource) -> Env {
	Env::new(WikiConfig::default(), Rc::new(source))
}

pub fn test_env() -> Env {
	env_with(templates())
}

pub fn html_env() -> Env {
	let config = WikiConfig {
		template_parameters_html: true,
		..WikiConfig::default()
	};
	Env::new(config, Rc::new(templates()))
}

/// Parse `source` and serialize it straight back.
pub fn round_trip(env: &Env, source: &str) -> WikiResult<String> {
	let document = parse_document(env, source)?;
	serialize_document(env, &document, None)
}

/// The first token of `source`, which must be a call.
pub fn call_token(source: &str) -> WikiResult<Token> {
	tokenize(source)?
		.into_iter()
		.find(Token::is_template_token)
		.ok_or_else(|| WikiError::malformed("call_token", format!("no call in `{source}`")))
}

/// The classified target of the call at the start of `source`.
pub fn call_target(token: &Token) -> WikiResult<CallTarget> {
	let text = token
		.tag()
		.and_then(|tag| tag.attribs.first())
		.map(|kv| kv.k.to_text())
		.unwrap_or_default();
	CallTarget::classify(&text)
}

pub fn find_text(document: &Document, text: &str) -> Option<NodeId> {
	document
		.nodes()
		.into_iter()
		.find(|node| matches!(node, Node::Text { text: value, .. } if value == text))
		.map(Node::id)
}

pub fn transclusions(document: &Document) -> Vec<&Node> {
	document
		.nodes()
		.into_iter()
		.filter(|node| node.has_typeof("mw:Transclusion"))
		.collect()
}

pub fn texts(tokens: &[Token]) -> Vec<String> {
	tokens
		.iter()
		.filter_map(|token| {
			match &token.kind {
				TokenKind::Text(text) => Some(text.clone()),
				_ => None,
			}
		})
		.collect()
}

/// Holds every numeric text token back for as many polls as its value.
pub struct DelayStage;

struct Delay {
	remaining: usize,
	token: Option<Token>,
}

impl Deferred for Delay {
	fn poll(&mut self, _env: &Env) -> Poll<WikiResult<Vec<Token>>> {
		if self.remaining > 0 {
			self.remaining -= 1;
			return Poll::Pending;
		}

		Poll::Ready(Ok(self.token.take().into_iter().collect()))
	}
}

impl TokenStage for DelayStage {
	fn name(&self) -> &'static str {
		"Delay"
	}

	fn rank(&self) -> Rank {
		Rank::new(1.0)
	}

	fn filter(&self) -> TokenFilter {
		TokenFilter::Text
	}

	fn transform(&self, token: Token, _cx: &StageContext<'_>) -> WikiResult<StageOutcome> {
		let remaining = match &token.kind {
			TokenKind::Text(text) => text.parse().unwrap_or(0),
			_ => 0,
		};

		if remaining == 0 {
			return Ok(StageOutcome::Token(token));
		}

		Ok(StageOutcome::Pending(Box::new(Delay {
			remaining,
			token: Some(token),
		})))
	}
}

/// Appends a suffix to every text token.
pub struct SuffixStage {
	pub name: &'static str,
	pub rank: f64,
	pub suffix: &'static str,
}

impl TokenStage for SuffixStage {
	fn name(&self) -> &'static str {
		self.name
	}

	fn rank(&self) -> Rank {
		Rank::new(self.rank)
	}

	fn filter(&self) -> TokenFilter {
		TokenFilter::Text
	}

	fn transform(&self, mut token: Token, _cx: &StageContext<'_>) -> WikiResult<StageOutcome> {
		if let TokenKind::Text(text) = &mut token.kind {
			text.push_str(self.suffix);
		}
		Ok(StageOutcome::Token(token))
	}
}

/// Splits text tokens on whitespace.
pub struct SplitStage;

impl TokenStage for SplitStage {
	fn name(&self) -> &'static str {
		"Split"
	}

	fn rank(&self) -> Rank {
		Rank::new(1.0)
	}

	fn filter(&self) -> TokenFilter {
		TokenFilter::Text
	}

	fn transform(&self, token: Token, _cx: &StageContext<'_>) -> WikiResult<StageOutcome> {
		let TokenKind::Text(text) = &token.kind else {
			return Ok(StageOutcome::Token(token));
		};

		Ok(StageOutcome::Tokens(
			text.split_whitespace().map(Token::text).collect(),
		))
	}
}

/// Defers the text token `stall` forever.
pub struct StallStage;

struct NeverResolves;

impl Deferred for NeverResolves {
	fn poll(&mut self, _env: &Env) -> Poll<WikiResult<Vec<Token>>> {
		Poll::Pending
	}
}

impl TokenStage for StallStage {
	fn name(&self) -> &'static str {
		"Stall"
	}

	fn rank(&self) -> Rank {
		Rank::new(1.0)
	}

	fn filter(&self) -> TokenFilter {
		TokenFilter::Text
	}

	fn transform(&self, token: Token, _cx: &StageContext<'_>) -> WikiResult<StageOutcome> {
		if matches!(&token.kind, TokenKind::Text(text) if text == "stall") {
			return Ok(StageOutcome::Pending(Box::new(NeverResolves)));
		}
		Ok(StageOutcome::Token(token))
	}
}

/// A template source whose fetches never complete.
pub struct UnreachableSource;

struct NeverFetched;

impl PendingFetch for NeverFetched {
	fn poll(&mut self) -> Poll<WikiResult<String>> {
		Poll::Pending
	}
}

impl TemplateSource for UnreachableSource {
	fn fetch(&self, _title: &str) -> Box<dyn PendingFetch> {
		Box::new(NeverFetched)
	}
}
