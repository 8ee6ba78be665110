use std::rc::Rc;
use std::task::Poll;

use tracing::debug;
use tracing::warn;

use super::AttributeExpansion;
use super::AttributeTransformManager;
use super::Deferred;
use super::EncapsulationJob;
use super::Env;
use super::PendingAttributes;
use super::PipelineRun;
use super::StageContext;
use super::StageOutcome;
use super::TemplateEncapsulator;
use super::TokenFilter;
use super::TokenStage;
use super::TokenTransformManager;
use super::evaluate_parser_function;
use super::is_parser_function;
use crate::WikiError;
use crate::WikiResult;
use crate::fetch::PendingFetch;
use crate::frame::Frame;
use crate::lexer::tokenize;
use crate::tokens::Kv;
use crate::tokens::Rank;
use crate::tokens::Token;

const TEMPLATE_NAMESPACE: &str = "Template:";
const INVALID_TITLE_CHARS: [char; 7] = ['[', ']', '{', '}', '|', '<', '>'];

/// What a `{{...}}` call refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
	/// A parser function such as `{{lc:Text}}`. `arg` is the text after the
	/// colon.
	Function { name: String, arg: String },
	/// A transcluded page.
	Template { title: String, href: String },
}

impl CallTarget {
	/// Classify the (expanded) target text of a call.
	pub fn classify(text: &str) -> WikiResult<Self> {
		let text = text.trim();

		if let Some((prefix, arg)) = text.split_once(':') {
			let name = prefix.trim().to_lowercase();

			if is_parser_function(&name) {
				return Ok(CallTarget::Function {
					name,
					arg: arg.to_string(),
				});
			}

			if name.starts_with('#') {
				return Err(WikiError::AmbiguousTarget(text.to_string()));
			}
		}

		let title = normalize_title(text)
			.ok_or_else(|| WikiError::AmbiguousTarget(text.to_string()))?;
		let href = format!("./{}", title.replace(' ', "_"));

		Ok(CallTarget::Template { title, href })
	}
}

/// Resolve a call target to a full page title. A leading colon selects the
/// main namespace, anything else without a namespace is a template.
fn normalize_title(text: &str) -> Option<String> {
	let (namespace, name) = match text.strip_prefix(':') {
		Some(rest) => ("", rest),
		None => {
			match text.get(..TEMPLATE_NAMESPACE.len()) {
				Some(prefix) if prefix.eq_ignore_ascii_case(TEMPLATE_NAMESPACE) => {
					(TEMPLATE_NAMESPACE, &text[TEMPLATE_NAMESPACE.len()..])
				}
				_ => (TEMPLATE_NAMESPACE, text),
			}
		}
	};

	let name = name.replace('_', " ");
	let name = name.split_whitespace().collect::<Vec<_>>().join(" ");

	if name.is_empty() || name.contains(INVALID_TITLE_CHARS) {
		return None;
	}

	let mut chars = name.chars();
	let first = chars.next()?;
	Some(format!(
		"{namespace}{}{}",
		first.to_uppercase(),
		chars.as_str()
	))
}

/// The inline error rendered in place of a call that could not be expanded.
fn error_tokens(error: &WikiError) -> Vec<Token> {
	vec![
		Token::tag_open("span", vec![Kv::new("typeof", "mw:Error")]),
		Token::text(error.to_string()),
		Token::tag_close("span"),
	]
}

/// The call's own source, used when it cannot be treated as a call at all.
fn literal_tokens(token: &Token) -> Vec<Token> {
	let mut text = Token::text(token.data.src.clone().unwrap_or_default());
	text.data.tsr = token.data.tsr;
	vec![text]
}

enum ExpansionState {
	Start,
	Attributes(PendingAttributes),
	Resolve,
	Fetching {
		target: CallTarget,
		title: String,
		fetch: Box<dyn PendingFetch>,
		/// Polls that returned `Pending` so far.
		polls: usize,
	},
	Expanding {
		target: CallTarget,
		run: PipelineRun,
	},
	Encapsulating(EncapsulationJob),
	Done,
}

/// The expansion of one `{{...}}` call, driven through attribute expansion,
/// target resolution, fetching, nested expansion and encapsulation.
struct TemplateExpansion {
	/// The call as written. Encapsulation records its arguments unexpanded.
	token: Token,
	/// The arguments once attribute expansion has finished.
	expanded: Option<Vec<Kv>>,
	frame: Rc<Frame>,
	state: ExpansionState,
}

impl TemplateExpansion {
	fn new(token: Token, frame: Rc<Frame>) -> Self {
		Self {
			token,
			expanded: None,
			frame,
			state: ExpansionState::Start,
		}
	}

	fn attribs(&self) -> &[Kv] {
		match &self.expanded {
			Some(attribs) => attribs,
			None => self.token.tag().map_or(&[], |tag| tag.attribs.as_slice()),
		}
	}

	fn set_attribs(&mut self, attribs: Vec<Kv>) {
		self.expanded = Some(attribs);
	}

	fn encapsulate(
		&self,
		env: &Env,
		target: &CallTarget,
		content: Vec<Token>,
	) -> WikiResult<ExpansionState> {
		TemplateEncapsulator::new(env, &self.frame, &self.token, target)
			.encapsulate(content)
			.map(ExpansionState::Encapsulating)
	}

	fn contain(&self, env: &Env, target: &CallTarget, error: WikiError) -> WikiResult<ExpansionState> {
		if !error.is_contained() {
			return Err(error);
		}

		warn!(
			target = %self.attribs().first().map(|kv| kv.k.to_text()).unwrap_or_default(),
			%error,
			"template expansion failed"
		);
		self.encapsulate(env, target, error_tokens(&error))
	}

	/// Classify the target and either evaluate it in place or start fetching
	/// the page it names.
	fn resolve(&self, env: &Env) -> WikiResult<ExpansionState> {
		let target_text = self
			.attribs()
			.first()
			.map(|kv| kv.k.to_text())
			.unwrap_or_default();
		let target = CallTarget::classify(&target_text)?;

		match &target {
			CallTarget::Function { name, arg } => {
				let args = self.attribs().get(1..).unwrap_or_default();
				let content = evaluate_parser_function(name, arg, args);
				self.encapsulate(env, &target, content)
			}
			CallTarget::Template { title, .. } => {
				if let Err(error) = self
					.frame
					.check_expansion(title, env.config().max_template_depth)
				{
					return self.contain(env, &target, error);
				}

				let fetch = env.source().fetch(title);
				let title = title.clone();
				Ok(ExpansionState::Fetching {
					target,
					title,
					fetch,
					polls: 0,
				})
			}
		}
	}

	fn start_nested(
		&self,
		env: &Env,
		title: &str,
		body: &str,
	) -> WikiResult<PipelineRun> {
		let args = self.attribs().get(1..).unwrap_or_default().to_vec();
		let child = self
			.frame
			.child(title, body, args, env.config().max_template_depth)?;
		let mut tokens = tokenize(body)?;
		tokens.retain(|token| !token.is_end_of_input());

		TokenTransformManager::with_default_stages(child).start(env, tokens)
	}

	/// Drive the expansion as far as it can go without waiting.
	fn advance(&mut self, env: &Env) -> Poll<WikiResult<Vec<Token>>> {
		loop {
			let state = std::mem::replace(&mut self.state, ExpansionState::Done);

			let next = match state {
				ExpansionState::Start => {
					let manager = AttributeTransformManager::new(Rc::clone(&self.frame));
					let attribs = self.attribs().to_vec();

					match manager.expand(env, attribs) {
						Ok(AttributeExpansion::Ready(attribs)) => {
							self.set_attribs(attribs);
							ExpansionState::Resolve
						}
						Ok(AttributeExpansion::Pending(pending)) => ExpansionState::Attributes(pending),
						Err(error) => return Poll::Ready(Err(error)),
					}
				}
				ExpansionState::Attributes(mut pending) => {
					match pending.poll(env) {
						Poll::Ready(Ok(attribs)) => {
							self.set_attribs(attribs);
							ExpansionState::Resolve
						}
						Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
						Poll::Pending => {
							self.state = ExpansionState::Attributes(pending);
							return Poll::Pending;
						}
					}
				}
				ExpansionState::Resolve => {
					match self.resolve(env) {
						// fetches always complete on a later poll
						Ok(next @ ExpansionState::Fetching { .. }) => {
							self.state = next;
							return Poll::Pending;
						}
						Ok(next) => next,
						Err(WikiError::AmbiguousTarget(text)) => {
							debug!(target = %text, "call target left as text");
							return Poll::Ready(Ok(literal_tokens(&self.token)));
						}
						Err(error) => return Poll::Ready(Err(error)),
					}
				}
				ExpansionState::Fetching {
					target,
					title,
					mut fetch,
					polls,
				} => {
					match fetch.poll() {
						Poll::Pending if polls + 1 >= env.config().fetch_budget(self.frame.depth()) => {
							debug!(%title, polls = polls + 1, "template fetch timed out");
							let error = WikiError::Fetch {
								title,
								reason: "timed out".to_string(),
							};
							match self.contain(env, &target, error) {
								Ok(next) => next,
								Err(error) => return Poll::Ready(Err(error)),
							}
						}
						Poll::Pending => {
							self.state = ExpansionState::Fetching {
								target,
								title,
								fetch,
								polls: polls + 1,
							};
							return Poll::Pending;
						}
						Poll::Ready(Ok(body)) => {
							debug!(%title, bytes = body.len(), "template fetched");
							match self.start_nested(env, &title, &body) {
								Ok(run) => ExpansionState::Expanding { target, run },
								Err(error) => {
									match self.contain(env, &target, error) {
										Ok(next) => next,
										Err(error) => return Poll::Ready(Err(error)),
									}
								}
							}
						}
						Poll::Ready(Err(error)) => {
							match self.contain(env, &target, error) {
								Ok(next) => next,
								Err(error) => return Poll::Ready(Err(error)),
							}
						}
					}
				}
				ExpansionState::Expanding { target, mut run } => {
					match run.poll(env) {
						Poll::Ready(Ok(content)) => {
							match self.encapsulate(env, &target, content) {
								Ok(next) => next,
								Err(error) => return Poll::Ready(Err(error)),
							}
						}
						Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
						Poll::Pending => {
							self.state = ExpansionState::Expanding { target, run };
							return Poll::Pending;
						}
					}
				}
				ExpansionState::Encapsulating(mut job) => {
					match job.poll(env) {
						Poll::Ready(result) => return Poll::Ready(result),
						Poll::Pending => {
							self.state = ExpansionState::Encapsulating(job);
							return Poll::Pending;
						}
					}
				}
				ExpansionState::Done => return Poll::Ready(Ok(vec![])),
			};

			self.state = next;
		}
	}
}

impl Deferred for TemplateExpansion {
	fn poll(&mut self, env: &Env) -> Poll<WikiResult<Vec<Token>>> {
		self.advance(env)
	}
}

/// Expands `{{...}}` calls: parser functions in place, templates by fetching
/// their source and running it through a nested pipeline.
pub struct TemplateHandler;

impl TemplateHandler {
	pub const RANK: Rank = Rank::new(1.1);
}

impl TokenStage for TemplateHandler {
	fn name(&self) -> &'static str {
		"TemplateHandler"
	}

	fn rank(&self) -> Rank {
		Self::RANK
	}

	fn filter(&self) -> TokenFilter {
		TokenFilter::TagNamed("template")
	}

	fn transform(&self, token: Token, cx: &StageContext<'_>) -> WikiResult<StageOutcome> {
		let mut expansion = TemplateExpansion::new(token, Rc::clone(cx.frame));

		match expansion.advance(cx.env) {
			Poll::Ready(result) => result.map(StageOutcome::Tokens),
			Poll::Pending => Ok(StageOutcome::Pending(Box::new(expansion))),
		}
	}
}

/// Substitutes `{{{name|default}}}` with the argument bound in the current
/// frame. Outside of any template the parameter stays literal text.
pub struct TemplateArgHandler;

impl TemplateArgHandler {
	pub const RANK: Rank = Rank::new(1.1);
}

fn substitute_arg(frame: &Frame, token: &Token, attribs: &[Kv]) -> Vec<Token> {
	let name = attribs
		.first()
		.map(|kv| kv.k.to_text())
		.unwrap_or_default();

	if let Some(tokens) = frame.arg(&name) {
		return tokens;
	}

	match attribs.get(1) {
		Some(default) => default.v.clone().into_tokens(),
		None => literal_tokens(token),
	}
}

impl TokenStage for TemplateArgHandler {
	fn name(&self) -> &'static str {
		"TemplateArgHandler"
	}

	fn rank(&self) -> Rank {
		Self::RANK
	}

	fn filter(&self) -> TokenFilter {
		TokenFilter::TagNamed("templatearg")
	}

	fn transform(&self, token: Token, cx: &StageContext<'_>) -> WikiResult<StageOutcome> {
		if cx.frame.is_root() {
			return Ok(StageOutcome::Tokens(literal_tokens(&token)));
		}

		let attribs = token
			.tag()
			.map(|tag| tag.attribs.clone())
			.unwrap_or_default();
		let manager = AttributeTransformManager::new(Rc::clone(cx.frame));

		match manager.expand(cx.env, attribs)? {
			AttributeExpansion::Ready(attribs) => {
				Ok(StageOutcome::Tokens(substitute_arg(cx.frame, &token, &attribs)))
			}
			AttributeExpansion::Pending(pending) => {
				Ok(StageOutcome::Pending(Box::new(ArgExpansion {
					token,
					frame: Rc::clone(cx.frame),
					pending,
				})))
			}
		}
	}
}

struct ArgExpansion {
	token: Token,
	frame: Rc<Frame>,
	pending: PendingAttributes,
}

impl Deferred for ArgExpansion {
	fn poll(&mut self, env: &Env) -> Poll<WikiResult<Vec<Token>>> {
		self.pending.poll(env).map(|result| {
			result.map(|attribs| substitute_arg(&self.frame, &self.token, &attribs))
		})
	}
}
