use std::collections::BTreeMap;
use std::rc::Rc;
use std::task::Poll;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::CallTarget;
use super::Deferred;
use super::Env;
use super::PipelineRun;
use super::TokenTransformManager;
use crate::WikiResult;
use crate::frame::Frame;
use crate::html::HtmlOptions;
use crate::html::inner_html;
use crate::lexer::tokenize_fragment;
use crate::source_range::KvSourceRange;
use crate::source_range::SourceRange;
use crate::tokens::Kv;
use crate::tokens::Token;
use crate::tokens::Value;
use crate::tree_builder::TreeBuilder;

pub const TRANSCLUSION_TYPE: &str = "mw:Transclusion";
pub const TRANSCLUSION_END_TYPE: &str = "mw:Transclusion/End";

/// The public description of a call: its target, its parameters and enough
/// about the original spacing to write the call back out unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgInfo {
	pub dict: TemplateDict,
	#[serde(rename = "paramInfos")]
	pub param_infos: Vec<ParamInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDict {
	pub target: TemplateTarget,
	#[serde(default)]
	pub params: BTreeMap<String, ParamValue>,
}

/// Exactly one of `function` and `href` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateTarget {
	pub wt: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub function: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub href: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamValue {
	pub wt: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub html: Option<String>,
	/// The key as written, when it differs from the resolved name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub key: Option<ParamKey>,
}

impl ParamValue {
	pub fn new(wt: impl Into<String>) -> Self {
		Self {
			wt: wt.into(),
			..Default::default()
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamKey {
	pub wt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamInfo {
	pub k: String,
	#[serde(default, rename = "srcOffsets", skip_serializing_if = "Option::is_none")]
	pub src_offsets: Option<KvSourceRange>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub named: bool,
	/// Non-standard spacing as `[key_pre, key_post, value_pre, value_post]`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub spc: Option<[String; 4]>,
}

impl ParamInfo {
	/// The spacing quad, defaulting to no spacing anywhere.
	pub fn spacing(&self) -> [&str; 4] {
		match &self.spc {
			Some([a, b, c, d]) => [a, b, c, d],
			None => ["", "", "", ""],
		}
	}
}

/// Split `text` into its leading and trailing whitespace. A run of only
/// whitespace counts as leading.
fn split_space(text: &str) -> (&str, &str) {
	let body = text.trim_start();
	let leading = &text[..text.len() - body.len()];
	let trailing = &body[body.trim_end().len()..];
	(leading, trailing)
}

/// Wraps the expansion of a single call in transclusion markers and records
/// how the call was written.
pub struct TemplateEncapsulator<'a> {
	env: &'a Env,
	frame: &'a Rc<Frame>,
	token: &'a Token,
	target: &'a CallTarget,
}

impl<'a> TemplateEncapsulator<'a> {
	/// `frame` is the frame the call was written in, so the token's source
	/// offsets index into its source text.
	pub fn new(env: &'a Env, frame: &'a Rc<Frame>, token: &'a Token, target: &'a CallTarget) -> Self {
		Self {
			env,
			frame,
			token,
			target,
		}
	}

	fn attribs(&self) -> &'a [Kv] {
		self.token.tag().map_or(&[], |tag| tag.attribs.as_slice())
	}

	pub fn arg_info(&self) -> WikiResult<ArgInfo> {
		self.collect_args().map(|(info, _)| info)
	}

	/// Build the argument info, along with the value of each recorded
	/// parameter in `param_infos` order.
	fn collect_args(&self) -> WikiResult<(ArgInfo, Vec<&'a Value>)> {
		let src = self.frame.src_text();
		let attribs = self.attribs();
		let mut params = BTreeMap::new();
		let mut param_infos = vec![];
		let mut values = vec![];
		let mut arg_index = 1;

		for kv in attribs.iter().skip(1) {
			let (k_src, v_src) = match kv.src_offsets {
				Some(offsets) => {
					(
						offsets.key.substr(src)?.to_string(),
						offsets.value.substr(src)?.to_string(),
					)
				}
				None => (kv.k.to_text(), kv.v.to_text()),
			};

			let k_wt = k_src.trim();
			// names holding markup keep their original text
			let k = kv
				.k
				.to_strict_text()
				.map_or_else(|| k_wt.to_string(), |k| k.trim().to_string());
			let positional = k.is_empty()
				&& kv
					.src_offsets
					.is_some_and(|offsets| offsets.has_zero_width_key());

			let (k, v) = if positional {
				let k = arg_index.to_string();
				arg_index += 1;
				(k, v_src.clone())
			} else {
				(k, v_src.trim().to_string())
			};

			if params.contains_key(&k) {
				continue;
			}

			let (key_pre, key_post) = split_space(&k_src);
			let (value_pre, value_post) = if positional {
				("", "")
			} else if v.is_empty() {
				("", v_src.as_str())
			} else {
				split_space(&v_src)
			};
			let spc = [key_pre, key_post, value_pre, value_post];
			let spc = spc
				.iter()
				.any(|space| !space.is_empty())
				.then(|| spc.map(ToString::to_string));

			let key = (!positional && k_wt != k).then(|| {
				ParamKey {
					wt: k_wt.to_string(),
				}
			});

			param_infos.push(ParamInfo {
				k: k.clone(),
				src_offsets: kv.src_offsets,
				named: !positional,
				spc,
			});
			values.push(&kv.v);
			params.insert(k, ParamValue {
				wt: v,
				html: None,
				key,
			});
		}

		let target_wt = match attribs.first() {
			Some(kv) => {
				match kv.src_offsets {
					Some(offsets) => offsets.key.substr(src)?.to_string(),
					None => kv.k.to_text(),
				}
			}
			None => String::new(),
		};

		let target = match self.target {
			CallTarget::Function { name, .. } => {
				TemplateTarget {
					wt: target_wt,
					function: Some(name.clone()),
					href: None,
				}
			}
			CallTarget::Template { href, .. } => {
				TemplateTarget {
					wt: target_wt,
					function: None,
					href: Some(href.clone()),
				}
			}
		};

		Ok((
			ArgInfo {
				dict: TemplateDict { target, params },
				param_infos,
			},
			values,
		))
	}

	fn start_marker(&self, about: &str) -> Token {
		let mut marker = Token::self_closing("meta", vec![
			Kv::new("typeof", TRANSCLUSION_TYPE),
			Kv::new("about", about),
		]);
		marker.data.tsr = self.token.data.tsr;
		marker.data.src.clone_from(&self.token.data.src);
		marker
	}

	fn end_marker(&self, about: &str) -> Token {
		let mut marker = Token::self_closing("meta", vec![
			Kv::new("typeof", TRANSCLUSION_END_TYPE),
			Kv::new("about", about),
		]);
		marker.data.tsr = self.token.data.tsr.map(|tsr| SourceRange::point(tsr.end));
		marker
	}

	/// Wrap `content` in a fresh pair of markers. Rendering parameters to
	/// HTML may need nested pipelines, so the result is a job to poll.
	pub fn encapsulate(&self, content: Vec<Token>) -> WikiResult<EncapsulationJob> {
		let about = self.env.new_about_id();
		let (mut arg_info, values) = self.collect_args()?;

		let mut tokens = Vec::with_capacity(content.len() + 2);
		tokens.push(self.start_marker(&about));
		tokens.extend(content.into_iter().map(|mut token| {
			token.data.tsr = None;
			token
		}));
		tokens.push(self.end_marker(&about));

		let mut renders = vec![];

		if self.env.config().template_parameters_html {
			for (info, value) in arg_info.param_infos.iter().zip(values) {
				let Some(param) = arg_info.dict.params.get_mut(&info.k) else {
					continue;
				};

				if value.is_simple() {
					param.html = Some(param.wt.clone());
				} else if is_bare_url(&param.wt) {
					param.html = Some(format!(
						"<a rel='mw:ExtLink' href='{}'>{}</a>",
						param.wt.replace('\'', "&#39;"),
						param.wt
					));
				} else {
					let base = info.src_offsets.map_or(0, |offsets| {
						offsets.value.start + info.spacing()[2].len()
					});
					let manager = TokenTransformManager::with_default_stages(Rc::clone(self.frame));
					let run = manager.start(self.env, tokenize_fragment(&param.wt, base)?)?;
					renders.push(ParamRender {
						key: info.k.clone(),
						run,
						tokens: None,
					});
				}
			}
		}

		Ok(EncapsulationJob {
			about,
			tokens,
			arg_info,
			renders,
		})
	}
}

/// `^https?://[^[\]{}\s]*$`
fn is_bare_url(text: &str) -> bool {
	text.strip_prefix("http://")
		.or_else(|| text.strip_prefix("https://"))
		.is_some_and(|rest| {
			!rest
				.chars()
				.any(|ch| ch.is_whitespace() || matches!(ch, '[' | ']' | '{' | '}'))
		})
}

struct ParamRender {
	key: String,
	run: PipelineRun,
	tokens: Option<Vec<Token>>,
}

/// Encapsulated tokens waiting on parameter HTML.
pub struct EncapsulationJob {
	about: String,
	tokens: Vec<Token>,
	arg_info: ArgInfo,
	renders: Vec<ParamRender>,
}

impl EncapsulationJob {
	pub fn about(&self) -> &str {
		&self.about
	}

	pub fn arg_info(&self) -> &ArgInfo {
		&self.arg_info
	}

	fn finish(&mut self) -> WikiResult<Vec<Token>> {
		for render in &mut self.renders {
			let tokens = render.tokens.take().unwrap_or_default();
			let mut fragment = TreeBuilder::inline_fragment(tokens)?;
			fragment.store.strip_dsr();
			let html = inner_html(&fragment, HtmlOptions {
				data_attributes: true,
			})?;

			if let Some(param) = self.arg_info.dict.params.get_mut(&render.key) {
				param.html = Some(html);
			}
		}

		let mut tokens = std::mem::take(&mut self.tokens);
		if let Some(start) = tokens.first_mut() {
			start.data.tmp.tplarginfo = Some(serde_json::to_string(&self.arg_info)?);
		}

		debug!(
			about = %self.about,
			target = %self.arg_info.dict.target.wt,
			tokens = tokens.len(),
			"encapsulated transclusion"
		);

		Ok(tokens)
	}
}

impl Deferred for EncapsulationJob {
	fn poll(&mut self, env: &Env) -> Poll<WikiResult<Vec<Token>>> {
		for render in &mut self.renders {
			if render.tokens.is_some() {
				continue;
			}

			match render.run.poll(env) {
				Poll::Ready(Ok(tokens)) => render.tokens = Some(tokens),
				Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
				Poll::Pending => {}
			}
		}

		if self.renders.iter().any(|render| render.tokens.is_none()) {
			return Poll::Pending;
		}

		Poll::Ready(self.finish())
	}
}
