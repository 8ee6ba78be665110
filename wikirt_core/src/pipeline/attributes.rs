use std::rc::Rc;
use std::task::Poll;

use tracing::debug;

use super::Deferred;
use super::Env;
use super::PipelineRun;
use super::StageContext;
use super::StageOutcome;
use super::TRANSCLUSION_END_TYPE;
use super::TRANSCLUSION_TYPE;
use super::TokenFilter;
use super::TokenStage;
use super::TokenTransformManager;
use crate::WikiResult;
use crate::frame::Frame;
use crate::tokens::Kv;
use crate::tokens::Rank;
use crate::tokens::Token;
use crate::tokens::Value;

/// Expands the keys and values of a tag's attributes, each of which may hold
/// nested calls, through a fresh pipeline scoped to that fragment.
pub struct AttributeTransformManager {
	frame: Rc<Frame>,
}

/// The result of [`AttributeTransformManager::expand`].
pub enum AttributeExpansion {
	/// Every attribute resolved without waiting.
	Ready(Vec<Kv>),
	/// At least one nested pipeline is still running.
	Pending(PendingAttributes),
}

/// One half of a key/value pair during expansion.
enum Side {
	Unchanged(Value),
	Running(PipelineRun),
	Finished(Vec<Token>),
}

impl Side {
	fn is_running(&self) -> bool {
		matches!(self, Side::Running(_))
	}

	fn poll(&mut self, env: &Env) -> WikiResult<()> {
		if let Side::Running(run) = self
			&& let Poll::Ready(result) = run.poll(env)
		{
			*self = Side::Finished(result?);
		}

		Ok(())
	}

	fn into_value(self) -> Value {
		match self {
			Side::Unchanged(value) => value,
			Side::Finished(tokens) => Value::from_tokens(strip_meta_tags(tokens)),
			// never committed while running
			Side::Running(run) => Value::from_tokens(strip_meta_tags(run.output().to_vec())),
		}
	}
}

struct ExpandingKv {
	original: Kv,
	key: Side,
	value: Side,
}

impl ExpandingKv {
	fn is_running(&self) -> bool {
		self.key.is_running() || self.value.is_running()
	}

	fn commit(self) -> Kv {
		Kv {
			k: self.key.into_value(),
			v: self.value.into_value(),
			..self.original
		}
	}
}

/// Attribute expansion waiting on nested pipelines.
pub struct PendingAttributes {
	kvs: Vec<ExpandingKv>,
}

impl PendingAttributes {
	/// Poll every running side once. Resolves with the attributes in their
	/// original order once all sides have finished.
	pub fn poll(&mut self, env: &Env) -> Poll<WikiResult<Vec<Kv>>> {
		for kv in &mut self.kvs {
			if let Err(error) = kv.key.poll(env).and_then(|()| kv.value.poll(env)) {
				return Poll::Ready(Err(error));
			}
		}

		if self.kvs.iter().any(ExpandingKv::is_running) {
			return Poll::Pending;
		}

		let kvs = std::mem::take(&mut self.kvs);
		Poll::Ready(Ok(kvs.into_iter().map(ExpandingKv::commit).collect()))
	}
}

impl AttributeTransformManager {
	pub fn new(frame: Rc<Frame>) -> Self {
		Self { frame }
	}

	/// Expand `attribs`. Pairs made only of plain text are passed through.
	/// Every other side is run through its own pipeline; the result is
	/// synchronous when all of those pipelines finish without waiting.
	pub fn expand(&self, env: &Env, attribs: Vec<Kv>) -> WikiResult<AttributeExpansion> {
		if !attribs.iter().any(Kv::needs_expansion) {
			return Ok(AttributeExpansion::Ready(attribs));
		}

		let manager = TokenTransformManager::with_default_stages(Rc::clone(&self.frame));
		let mut kvs = Vec::with_capacity(attribs.len());

		for kv in attribs {
			let key = self.start_side(env, &manager, &kv.k)?;
			let value = self.start_side(env, &manager, &kv.v)?;
			kvs.push(ExpandingKv {
				original: kv,
				key,
				value,
			});
		}

		let mut pending = PendingAttributes { kvs };

		if pending.kvs.iter().any(ExpandingKv::is_running) {
			debug!(
				attribs = pending.kvs.len(),
				"attribute expansion went asynchronous"
			);
			return Ok(AttributeExpansion::Pending(pending));
		}

		debug!(
			attribs = pending.kvs.len(),
			"attribute expansion completed synchronously"
		);
		match pending.poll(env) {
			Poll::Ready(result) => result.map(AttributeExpansion::Ready),
			Poll::Pending => Ok(AttributeExpansion::Pending(pending)),
		}
	}

	#[allow(clippy::unused_self)]
	fn start_side(
		&self,
		env: &Env,
		manager: &TokenTransformManager,
		value: &Value,
	) -> WikiResult<Side> {
		if !value.needs_expansion() {
			return Ok(Side::Unchanged(value.clone()));
		}

		let mut run = manager.start(env, value.clone().into_tokens())?;

		if run.is_complete() {
			Ok(Side::Finished(run.take_output()))
		} else {
			Ok(Side::Running(run))
		}
	}
}

/// Transclusion markers carry no meaning inside an attribute value.
fn strip_meta_tags(tokens: Vec<Token>) -> Vec<Token> {
	tokens
		.into_iter()
		.filter(|token| {
			!(token.name() == Some("meta")
				&& (token.has_typeof(TRANSCLUSION_TYPE) || token.has_typeof(TRANSCLUSION_END_TYPE)))
		})
		.collect()
}

/// Pipeline stage expanding nested calls inside tag attributes.
///
/// The token is checked out while its attributes expand and only committed
/// back once every attribute has resolved.
pub struct AttributeExpander;

impl AttributeExpander {
	pub const RANK: Rank = Rank::new(1.11);
}

impl TokenStage for AttributeExpander {
	fn name(&self) -> &'static str {
		"AttributeExpander"
	}

	fn rank(&self) -> Rank {
		Self::RANK
	}

	fn filter(&self) -> TokenFilter {
		TokenFilter::Tag
	}

	fn transform(&self, mut token: Token, cx: &StageContext<'_>) -> WikiResult<StageOutcome> {
		let Some(tag) = token.tag() else {
			return Ok(StageOutcome::Token(token));
		};

		// calls expand their own arguments
		if token.is_template_token() || !tag.attribs.iter().any(Kv::needs_expansion) {
			return Ok(StageOutcome::Token(token));
		}

		let checkout = tag.attribs.clone();
		let manager = AttributeTransformManager::new(Rc::clone(cx.frame));

		match manager.expand(cx.env, checkout)? {
			AttributeExpansion::Ready(attribs) => {
				commit(&mut token, attribs);
				Ok(StageOutcome::Token(token))
			}
			AttributeExpansion::Pending(pending) => {
				Ok(StageOutcome::Pending(Box::new(ExpandedTag { token, pending })))
			}
		}
	}
}

fn commit(token: &mut Token, attribs: Vec<Kv>) {
	if let Some(tag) = token.tag_mut() {
		tag.attribs = attribs;
	}
}

struct ExpandedTag {
	token: Token,
	pending: PendingAttributes,
}

impl Deferred for ExpandedTag {
	fn poll(&mut self, env: &Env) -> Poll<WikiResult<Vec<Token>>> {
		self.pending.poll(env).map(|result| {
			result.map(|attribs| {
				let mut token = self.token.clone();
				commit(&mut token, attribs);
				vec![token]
			})
		})
	}
}
