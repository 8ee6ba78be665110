use std::collections::VecDeque;
use std::rc::Rc;
use std::task::Poll;

use tracing::debug;
use tracing::trace;

use super::AttributeExpander;
use super::Deferred;
use super::Env;
use super::StageContext;
use super::StageOutcome;
use super::TemplateArgHandler;
use super::TemplateHandler;
use super::TokenStage;
use crate::WikiError;
use crate::WikiResult;
use crate::frame::Frame;
use crate::tokens::Rank;
use crate::tokens::Token;

/// Applies rank-ordered stages to a token stream while keeping the output in
/// input order.
#[derive(Clone)]
pub struct TokenTransformManager {
	stages: Vec<Rc<dyn TokenStage>>,
	frame: Rc<Frame>,
}

/// A position in the ordered output buffer.
enum Slot {
	Ready {
		seq: usize,
		token: Token,
	},
	Waiting {
		seq: usize,
		/// Index of the first stage the resolved tokens continue with.
		resume_at: usize,
		rank: Rank,
		stage: &'static str,
		deferred: Box<dyn Deferred>,
	},
}

impl Slot {
	fn seq(&self) -> usize {
		match self {
			Slot::Ready { seq, .. } | Slot::Waiting { seq, .. } => *seq,
		}
	}
}

impl TokenTransformManager {
	pub fn new(frame: Rc<Frame>) -> Self {
		Self {
			stages: vec![],
			frame,
		}
	}

	/// A manager with template expansion and attribute expansion registered.
	pub fn with_default_stages(frame: Rc<Frame>) -> Self {
		let mut manager = Self::new(frame);
		manager.add_stage(Rc::new(TemplateHandler));
		manager.add_stage(Rc::new(TemplateArgHandler));
		manager.add_stage(Rc::new(AttributeExpander));
		manager
	}

	/// Register a stage. Stages run in ascending rank, ties in registration
	/// order.
	pub fn add_stage(&mut self, stage: Rc<dyn TokenStage>) {
		let position = self
			.stages
			.iter()
			.position(|existing| existing.rank() > stage.rank())
			.unwrap_or(self.stages.len());
		self.stages.insert(position, stage);
	}

	pub fn frame(&self) -> &Rc<Frame> {
		&self.frame
	}

	pub fn stage_names(&self) -> Vec<&'static str> {
		self.stages.iter().map(|stage| stage.name()).collect()
	}

	/// Run the whole stream to completion, polling deferred stages until they
	/// resolve.
	pub fn process(&self, env: &Env, tokens: Vec<Token>) -> WikiResult<Vec<Token>> {
		let mut run = self.start(env, tokens)?;

		for _ in 0..=env.config().max_poll_rounds {
			if let Poll::Ready(result) = run.poll(env) {
				return result;
			}
		}

		Err(WikiError::LostContinuation {
			slot: run.first_waiting().unwrap_or_default(),
		})
	}

	/// Push every token through the synchronous part of the pipeline and
	/// return a run that can be polled for the rest.
	pub fn start(&self, env: &Env, tokens: Vec<Token>) -> WikiResult<PipelineRun> {
		let mut slots = vec![];

		for (seq, token) in tokens.into_iter().enumerate() {
			self.dispatch(env, seq, token, 0, &mut slots)?;
		}

		let mut run = PipelineRun {
			manager: self.clone(),
			slots: slots.into(),
			output: vec![],
			last_flushed: 0,
		};
		run.flush()?;
		Ok(run)
	}

	fn next_stage(&self, token: &Token, from: usize) -> Option<(usize, &Rc<dyn TokenStage>)> {
		self.stages
			.iter()
			.enumerate()
			.skip(from)
			.find(|(_, stage)| {
				stage.filter().matches(token) && token.rank.is_none_or(|rank| stage.rank() >= rank)
			})
	}

	/// Offer `token` to every eligible stage from index `from` onwards,
	/// pushing the resulting slots onto `out`.
	fn dispatch(
		&self,
		env: &Env,
		seq: usize,
		mut token: Token,
		from: usize,
		out: &mut Vec<Slot>,
	) -> WikiResult<()> {
		let cx = StageContext {
			env,
			frame: &self.frame,
		};
		let mut from = from;

		while let Some((index, stage)) = self.next_stage(&token, from) {
			trace!(
				stage = stage.name(),
				rank = %stage.rank(),
				token = token.kind.type_name(),
				"dispatching token"
			);
			from = index + 1;

			match stage.transform(token, &cx)? {
				StageOutcome::Token(next) => {
					token = next;
					stamp(&mut token, stage.rank());
				}
				StageOutcome::Tokens(tokens) => {
					for mut next in tokens {
						stamp(&mut next, stage.rank());
						self.dispatch(env, seq, next, from, out)?;
					}
					return Ok(());
				}
				StageOutcome::Pending(deferred) => {
					debug!(stage = stage.name(), seq, "stage deferred");
					out.push(Slot::Waiting {
						seq,
						resume_at: from,
						rank: stage.rank(),
						stage: stage.name(),
						deferred,
					});
					return Ok(());
				}
			}
		}

		out.push(Slot::Ready { seq, token });
		Ok(())
	}
}

fn stamp(token: &mut Token, rank: Rank) {
	token.rank = Some(token.rank.map_or(rank, |existing| existing.max(rank)));
}

/// An in-progress pipeline: a position-indexed slot buffer which is flushed
/// strictly left to right as deferred stages resolve.
///
/// A run is itself [`Deferred`], so nested pipelines compose with the stage
/// that started them.
pub struct PipelineRun {
	manager: TokenTransformManager,
	slots: VecDeque<Slot>,
	output: Vec<Token>,
	last_flushed: usize,
}

impl PipelineRun {
	pub fn is_complete(&self) -> bool {
		self.slots.is_empty()
	}

	/// Number of slots still waiting on a deferred stage.
	pub fn waiting(&self) -> usize {
		self.slots
			.iter()
			.filter(|slot| matches!(slot, Slot::Waiting { .. }))
			.count()
	}

	/// Input position of the first slot still waiting.
	pub fn first_waiting(&self) -> Option<usize> {
		self.slots.iter().find_map(|slot| {
			match slot {
				Slot::Waiting { seq, .. } => Some(*seq),
				Slot::Ready { .. } => None,
			}
		})
	}

	/// Tokens flushed so far. These never change once flushed.
	pub fn output(&self) -> &[Token] {
		&self.output
	}

	/// Take the flushed tokens, leaving the run empty.
	pub fn take_output(&mut self) -> Vec<Token> {
		std::mem::take(&mut self.output)
	}

	/// Move the ready prefix into the output.
	fn flush(&mut self) -> WikiResult<()> {
		while matches!(self.slots.front(), Some(Slot::Ready { .. })) {
			let Some(Slot::Ready { seq, token }) = self.slots.pop_front() else {
				break;
			};

			if seq < self.last_flushed {
				return Err(WikiError::OrderingViolation { slot: seq });
			}

			self.last_flushed = seq;
			self.output.push(token);
		}

		Ok(())
	}

	/// Poll every waiting slot once and splice resolved tokens in place.
	fn poll_round(&mut self, env: &Env) -> WikiResult<()> {
		let slots = std::mem::take(&mut self.slots);
		let mut next = Vec::with_capacity(slots.len());

		for slot in slots {
			let Slot::Waiting {
				seq,
				resume_at,
				rank,
				stage,
				mut deferred,
			} = slot
			else {
				next.push(slot);
				continue;
			};

			match deferred.poll(env) {
				Poll::Pending => {
					next.push(Slot::Waiting {
						seq,
						resume_at,
						rank,
						stage,
						deferred,
					});
				}
				Poll::Ready(result) => {
					let tokens = result?;
					debug!(stage, seq, tokens = tokens.len(), "deferred stage resolved");

					for mut token in tokens {
						stamp(&mut token, rank);
						self.manager
							.dispatch(env, seq, token, resume_at, &mut next)?;
					}
				}
			}
		}

		debug_assert!(next.windows(2).all(|pair| pair[0].seq() <= pair[1].seq()));
		self.slots = next.into();
		self.flush()
	}
}

impl Deferred for PipelineRun {
	fn poll(&mut self, env: &Env) -> Poll<WikiResult<Vec<Token>>> {
		if let Err(error) = self.poll_round(env) {
			return Poll::Ready(Err(error));
		}

		if self.is_complete() {
			Poll::Ready(Ok(self.take_output()))
		} else {
			Poll::Pending
		}
	}
}
