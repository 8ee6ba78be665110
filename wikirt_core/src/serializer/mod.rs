//! Serialization of document trees back to wikitext.
//!
//! Every node kind has a [`NodeHandler`] that writes its markup and declares
//! how many newlines it needs around itself. The constraints meeting at a
//! boundary are intersected by [`SeparatorState`], which then keeps, adjusts
//! or synthesizes the whitespace between the two chunks.
//!
//! Selective serialization diffs the edited tree against the previous one
//! and copies every unmodified subtree from the previous source.

use tracing::debug;

use crate::WikiResult;
use crate::config::WikiConfig;
use crate::data_store::NodeData;
use crate::source_range::DomSourceRange;
use crate::tree::Document;
use crate::tree::Node;

pub use dom_diff::*;
pub use handlers::*;
pub use separators::*;

mod dom_diff;
mod handlers;
mod separators;

/// Writes a [`Document`] back to wikitext.
pub struct WikitextSerializer<'a> {
	config: &'a WikiConfig,
}

impl<'a> WikitextSerializer<'a> {
	pub fn new(config: &'a WikiConfig) -> Self {
		Self { config }
	}

	/// Serialize every node, keeping the original whitespace between nodes
	/// wherever the document still has its source.
	pub fn serialize(&self, document: &Document) -> WikiResult<String> {
		let state = SerializerState {
			config: self.config,
			document,
			previous: None,
			diff: None,
			source: document.source.as_deref(),
			selser: false,
			out: String::new(),
			separators: SeparatorState::default(),
		};

		state.run()
	}

	/// Serialize `document` as an edit of `previous`, copying the previous
	/// source for every subtree the edit left alone.
	pub fn serialize_selser(&self, document: &Document, previous: &Document) -> WikiResult<String> {
		let Some(source) = previous.source.as_deref() else {
			debug!("previous document has no source, serializing in full");
			return self.serialize(document);
		};

		let diff = diff_documents(previous, document);
		let state = SerializerState {
			config: self.config,
			document,
			previous: Some(previous),
			diff: Some(diff),
			source: Some(source),
			selser: true,
			out: String::new(),
			separators: SeparatorState::default(),
		};

		state.run()
	}
}

/// The state of one serialization pass.
pub struct SerializerState<'a> {
	config: &'a WikiConfig,
	document: &'a Document,
	previous: Option<&'a Document>,
	diff: Option<DomDiff>,
	/// The source that original offsets point into.
	source: Option<&'a str>,
	selser: bool,
	out: String,
	separators: SeparatorState,
}

impl<'a> SerializerState<'a> {
	fn run(mut self) -> WikiResult<String> {
		let document = self.document;
		self.serialize_node(&document.root, None)?;
		Ok(self.out)
	}

	pub fn mark(&self, node: &Node) -> DiffMark {
		self.diff
			.as_ref()
			.map_or(DiffMark::Unmodified, |diff| diff.mark(node.id()))
	}

	/// Whether the node has no counterpart in the original tree.
	pub fn is_new(&self, node: &Node) -> bool {
		self.mark(node) == DiffMark::Inserted
	}

	/// Whether the node's own markup must be regenerated.
	pub fn is_modified(&self, node: &Node) -> bool {
		matches!(self.mark(node), DiffMark::Modified | DiffMark::Inserted)
	}

	pub fn data(&self, node: &Node) -> Option<&'a NodeData> {
		self.document.data(node.id())
	}

	/// Where the node sat in the original source.
	pub fn original_range(&self, node: &Node) -> Option<DomSourceRange> {
		let data = match (&self.diff, self.previous) {
			(Some(diff), Some(previous)) => {
				let origin = diff.origin(node.id())?;
				previous.data(origin)
			}
			_ => self.data(node),
		};

		data.and_then(|data| data.parsoid.dsr)
	}

	/// Register a constraint on the next boundary.
	pub fn add_constraint(&mut self, constraint: Option<Constraint>, contributor: &'static str) {
		self.separators.add_constraint(constraint, contributor);
	}

	/// Write `text`, preceded by the separator for the pending boundary.
	/// `start` and `end` locate the text in the original source.
	pub fn emit_chunk(&mut self, text: &str, start: Option<usize>, end: Option<usize>, modified: bool) {
		let span = ChunkSpan::new(start, end, modified);
		let default = self.config.separators.constraint();
		let separator = self.separators.resolve(self.source, span, default);
		self.out.push_str(&separator);
		self.out.push_str(text);
	}

	/// Emit the opening markup of an element.
	pub fn emit_open(&mut self, node: &Node, text: &str) {
		let range = self.original_range(node);
		let modified = self.is_modified(node);
		self.emit_chunk(
			text,
			range.map(|range| range.start),
			range.map(|range| range.inner_start()),
			modified,
		);
	}

	/// Emit the closing markup of an element.
	pub fn emit_close(&mut self, node: &Node, text: &str) {
		let range = self.original_range(node);
		let modified = self.is_modified(node);
		self.emit_chunk(
			text,
			range.map(|range| range.inner_end()),
			range.map(|range| range.end),
			modified,
		);
	}

	/// Emit the complete markup of a node.
	pub fn emit_whole(&mut self, node: &Node, text: &str) {
		let range = self.original_range(node);
		let modified = self.is_modified(node);
		self.emit_chunk(
			text,
			range.map(|range| range.start),
			range.map(|range| range.end),
			modified,
		);
	}

	pub fn serialize_node(&mut self, node: &Node, parent: Option<&Node>) -> WikiResult<()> {
		if self.selser
			&& self.mark(node) == DiffMark::Unmodified
			&& let Some(range) = self.original_range(node)
			&& let Some(original) = self.source.and_then(|source| source.get(range.start..range.end))
		{
			debug!(node = %node.id(), start = range.start, end = range.end, "reusing original source");
			self.emit_chunk(original, Some(range.start), Some(range.end), false);
			return Ok(());
		}

		handler_for(node, parent).handle(node, self)
	}

	/// Serialize the children of `node`, registering the constraints on
	/// every boundary between them and around them.
	pub fn serialize_children(&mut self, node: &Node, handler: &dyn NodeHandler) -> WikiResult<()> {
		let mut prev: Option<&Node> = None;

		for child in node.children() {
			let child_handler = handler_for(child, Some(node));

			match prev {
				None => {
					let constraint = combine(
						handler.first_child(node, child, self),
						child_handler.before(child, Neighbor::Parent(node), self),
					);
					self.add_constraint(constraint, handler.name());
				}
				Some(prev) => {
					let prev_handler = handler_for(prev, Some(node));
					let constraint = combine(
						prev_handler.after(prev, Neighbor::Sibling(child), self),
						child_handler.before(child, Neighbor::Sibling(prev), self),
					);
					self.add_constraint(constraint, child_handler.name());
				}
			}

			self.serialize_node(child, Some(node))?;
			prev = Some(child);
		}

		if let Some(last) = prev {
			let last_handler = handler_for(last, Some(node));
			let constraint = combine(
				last_handler.after(last, Neighbor::Parent(node), self),
				handler.last_child(node, last, self),
			);
			self.add_constraint(constraint, handler.name());
		}

		Ok(())
	}
}
