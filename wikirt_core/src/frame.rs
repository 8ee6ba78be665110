use std::collections::BTreeMap;
use std::rc::Rc;

use crate::WikiError;
use crate::WikiResult;
use crate::tokens::Kv;
use crate::tokens::Token;
use crate::tokens::Value;
use crate::tokens::token_trim;

/// One level of template expansion context.
///
/// Frames form a chain from the innermost template being expanded up to the
/// page itself (the root frame, which has no parent and no title). A frame is
/// never mutated once created, so sibling expansions may share it freely.
#[derive(Debug)]
pub struct Frame {
	parent: Option<Rc<Frame>>,
	title: Option<String>,
	src_text: String,
	args: Vec<Kv>,
	depth: usize,
}

impl Frame {
	/// The page level frame.
	pub fn root(src_text: impl Into<String>) -> Rc<Self> {
		Rc::new(Self {
			parent: None,
			title: None,
			src_text: src_text.into(),
			args: vec![],
			depth: 0,
		})
	}

	/// Create the frame for expanding `title` with `args` (the call's
	/// arguments without its target). Fails when `title` is already being
	/// expanded further up the chain or the depth limit is reached.
	pub fn child(
		self: &Rc<Self>,
		title: &str,
		src_text: impl Into<String>,
		args: Vec<Kv>,
		max_depth: usize,
	) -> WikiResult<Rc<Self>> {
		self.check_expansion(title, max_depth)?;

		Ok(Rc::new(Self {
			parent: Some(Rc::clone(self)),
			title: Some(title.to_string()),
			src_text: src_text.into(),
			args,
			depth: self.depth + 1,
		}))
	}

	/// Check that expanding `title` from this frame is allowed.
	pub fn check_expansion(&self, title: &str, max_depth: usize) -> WikiResult<()> {
		if self.depth + 1 > max_depth {
			return Err(WikiError::TemplateDepth { limit: max_depth });
		}

		if self.ancestors().any(|frame| frame.title() == Some(title)) {
			return Err(WikiError::TemplateLoop {
				title: title.to_string(),
			});
		}

		Ok(())
	}

	/// This frame followed by each of its parents.
	pub fn ancestors(&self) -> impl Iterator<Item = &Frame> {
		std::iter::successors(Some(self), |frame| frame.parent.as_deref())
	}

	pub fn parent(&self) -> Option<&Rc<Frame>> {
		self.parent.as_ref()
	}

	pub fn title(&self) -> Option<&str> {
		self.title.as_deref()
	}

	/// The source text this frame's tokens were produced from.
	pub fn src_text(&self) -> &str {
		&self.src_text
	}

	pub fn args(&self) -> &[Kv] {
		&self.args
	}

	pub fn depth(&self) -> usize {
		self.depth
	}

	pub fn is_root(&self) -> bool {
		self.parent.is_none()
	}

	/// Resolve the argument bindings. Positional arguments are numbered from
	/// `1` in order of appearance, named values are trimmed and the first
	/// binding of a name wins.
	pub fn bindings(&self) -> BTreeMap<String, Value> {
		let mut bindings = BTreeMap::new();
		let mut index = 1;

		for kv in &self.args {
			let (name, value) = if kv.is_positional() {
				let name = index.to_string();
				index += 1;
				(name, kv.v.clone())
			} else {
				(kv.k.to_text().trim().to_string(), trim_value(&kv.v))
			};

			bindings.entry(name).or_insert(value);
		}

		bindings
	}

	/// The tokens bound to `name`, if any.
	pub fn arg(&self, name: &str) -> Option<Vec<Token>> {
		self.bindings()
			.remove(name.trim())
			.map(Value::into_tokens)
	}
}

fn trim_value(value: &Value) -> Value {
	match value {
		Value::Literal(text) => Value::Literal(text.trim().to_string()),
		Value::Tokens(tokens) => {
			let mut tokens = tokens.clone();
			token_trim(&mut tokens);
			Value::Tokens(tokens)
		}
	}
}
