use std::collections::BTreeMap;
use std::ops::Range;

use similar::DiffTag;
use similar::TextDiff;
use tracing::debug;

use crate::tree::Document;
use crate::tree::Node;
use crate::tree::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMark {
	/// The node and its whole subtree match the previous tree.
	Unmodified,
	/// The node's own content (text, name, attributes or transclusion data)
	/// changed.
	Modified,
	/// The node is unchanged but some descendant was edited, inserted or
	/// removed.
	ChildrenChanged,
	/// The node has no counterpart in the previous tree.
	Inserted,
}

/// The result of diffing an edited tree against the tree it was derived
/// from.
#[derive(Debug, Clone, Default)]
pub struct DomDiff {
	marks: BTreeMap<NodeId, DiffMark>,
	/// Maps nodes of the edited tree to their counterparts in the previous
	/// tree.
	origins: BTreeMap<NodeId, NodeId>,
}

impl DomDiff {
	pub fn mark(&self, id: NodeId) -> DiffMark {
		self.marks.get(&id).copied().unwrap_or(DiffMark::Inserted)
	}

	pub fn origin(&self, id: NodeId) -> Option<NodeId> {
		self.origins.get(&id).copied()
	}

	/// Whether anything changed at all.
	pub fn is_unchanged(&self, root: NodeId) -> bool {
		self.mark(root) == DiffMark::Unmodified
	}

	fn mark_inserted(&mut self, node: &Node) {
		for node in node.descendants() {
			self.marks.insert(node.id(), DiffMark::Inserted);
		}
	}

	fn settle(&mut self, id: NodeId, own_changed: bool, children_changed: bool) -> DiffMark {
		let mark = if own_changed {
			DiffMark::Modified
		} else if children_changed {
			DiffMark::ChildrenChanged
		} else {
			DiffMark::Unmodified
		};
		self.marks.insert(id, mark);
		mark
	}
}

/// Diff `next` against `previous`.
///
/// Node ids are only comparable within one document generation, so a tree
/// edited in place (a clone of `previous`) is matched by id while an
/// unrelated tree is matched by position and shape.
pub fn diff_documents(previous: &Document, next: &Document) -> DomDiff {
	let mut diff = DomDiff::default();

	if previous.generation() == next.generation() {
		let index: BTreeMap<NodeId, &Node> = previous
			.nodes()
			.into_iter()
			.map(|node| (node.id(), node))
			.collect();
		diff_keyed(&mut diff, &index, previous, next, &next.root);
	} else {
		debug!(
			previous = previous.generation(),
			next = next.generation(),
			"documents from different generations, matching by position"
		);
		diff_positional(&mut diff, previous, Some(&previous.root), next, &next.root);
	}

	diff
}

fn diff_keyed(
	diff: &mut DomDiff,
	index: &BTreeMap<NodeId, &Node>,
	previous: &Document,
	next: &Document,
	node: &Node,
) -> DiffMark {
	let Some(original) = index.get(&node.id()).copied() else {
		diff.mark_inserted(node);
		return DiffMark::Inserted;
	};
	diff.origins.insert(node.id(), original.id());

	let mut children_changed = original
		.children()
		.iter()
		.map(Node::id)
		.ne(node.children().iter().map(Node::id));
	for child in node.children() {
		if diff_keyed(diff, index, previous, next, child) != DiffMark::Unmodified {
			children_changed = true;
		}
	}

	let own_changed = !same_shape(previous, original, next, node);
	diff.settle(node.id(), own_changed, children_changed)
}

fn diff_positional(
	diff: &mut DomDiff,
	previous: &Document,
	original: Option<&Node>,
	next: &Document,
	node: &Node,
) -> DiffMark {
	let Some(original) = original.filter(|original| same_kind(original, node)) else {
		diff.mark_inserted(node);
		return DiffMark::Inserted;
	};
	diff.origins.insert(node.id(), original.id());

	let mut children_changed = original.children().len() != node.children().len();
	for (index, child) in node.children().iter().enumerate() {
		let counterpart = original.children().get(index);
		if diff_positional(diff, previous, counterpart, next, child) != DiffMark::Unmodified {
			children_changed = true;
		}
	}

	let own_changed = !same_shape(previous, original, next, node);
	diff.settle(node.id(), own_changed, children_changed)
}

fn same_kind(first: &Node, second: &Node) -> bool {
	match (first, second) {
		(Node::Element { name: a, .. }, Node::Element { name: b, .. }) => a == b,
		(Node::Text { .. }, Node::Text { .. }) | (Node::Comment { .. }, Node::Comment { .. }) => true,
		_ => false,
	}
}

/// Compare the node's own content, ignoring children.
fn same_shape(previous: &Document, original: &Node, next: &Document, node: &Node) -> bool {
	match (original, node) {
		(
			Node::Element {
				name: a,
				attrs: a_attrs,
				..
			},
			Node::Element {
				name: b,
				attrs: b_attrs,
				..
			},
		) => {
			let a_mw = previous.data(original.id()).and_then(|data| data.mw.as_ref());
			let b_mw = next.data(node.id()).and_then(|data| data.mw.as_ref());
			a == b && a_attrs == b_attrs && a_mw == b_mw
		}
		(Node::Text { text: a, .. }, Node::Text { text: b, .. })
		| (Node::Comment { text: a, .. }, Node::Comment { text: b, .. }) => a == b,
		_ => false,
	}
}

/// The byte range of `original` that differs from `regenerated`, or `None`
/// when they are identical.
pub fn changed_span(original: &str, regenerated: &str) -> Option<Range<usize>> {
	let diff = TextDiff::from_chars(original, regenerated);
	let mut span: Option<Range<usize>> = None;

	for op in diff.ops() {
		if op.tag() == DiffTag::Equal {
			continue;
		}

		let range = op.old_range();
		span = Some(match span {
			Some(span) => span.start.min(range.start)..span.end.max(range.end),
			None => range,
		});
	}

	let byte_offset = |index: usize| {
		original
			.char_indices()
			.nth(index)
			.map_or(original.len(), |(offset, _)| offset)
	};

	span.map(|span| byte_offset(span.start)..byte_offset(span.end))
}
