use std::fmt::Write;

use super::Constraint;
use super::SerializerState;
use crate::WikiError;
use crate::WikiResult;
use crate::data_store::NodeData;
use crate::pipeline::TRANSCLUSION_TYPE;
use crate::tree::Node;

/// The node on the other side of a boundary.
#[derive(Debug, Clone, Copy)]
pub enum Neighbor<'n> {
	Parent(&'n Node),
	Sibling(&'n Node),
}

/// Serializes one kind of node and declares the newline constraints around
/// it.
pub trait NodeHandler {
	fn name(&self) -> &'static str;

	fn handle(&self, node: &Node, state: &mut SerializerState<'_>) -> WikiResult<()>;

	/// Constraint between `node` and the previous sibling, or the start of
	/// its parent.
	fn before(&self, _node: &Node, _neighbor: Neighbor<'_>, _state: &SerializerState<'_>) -> Option<Constraint> {
		None
	}

	/// Constraint between `node` and the next sibling, or the end of its
	/// parent.
	fn after(&self, _node: &Node, _neighbor: Neighbor<'_>, _state: &SerializerState<'_>) -> Option<Constraint> {
		None
	}

	fn first_child(&self, _node: &Node, _child: &Node, _state: &SerializerState<'_>) -> Option<Constraint> {
		None
	}

	fn last_child(&self, _node: &Node, _child: &Node, _state: &SerializerState<'_>) -> Option<Constraint> {
		None
	}
}

/// Pick the handler for `node`. Comments directly inside the body are
/// block-level.
pub fn handler_for(node: &Node, parent: Option<&Node>) -> &'static dyn NodeHandler {
	match node {
		Node::Text { .. } => &InlineHandler,
		Node::Comment { .. } if parent.is_some_and(|parent| parent.is_element("body")) => {
			&BlockCommentHandler
		}
		Node::Comment { .. } => &InlineHandler,
		Node::Element { name, .. } => {
			if node.has_typeof(TRANSCLUSION_TYPE) {
				return if name == "div" {
					&TransclusionHandler { block: true }
				} else {
					&TransclusionHandler { block: false }
				};
			}

			match name.as_str() {
				"body" => &BodyHandler,
				"p" => &ParagraphHandler,
				"table" => &TableHandler,
				"tr" => &RowHandler,
				"td" | "th" => &CellHandler,
				_ => &InlineHandler,
			}
		}
	}
}

fn is_inline(node: &Node) -> bool {
	match node {
		Node::Text { .. } | Node::Comment { .. } => true,
		Node::Element { name, .. } => {
			!matches!(
				name.as_str(),
				"body" | "p" | "table" | "tr" | "td" | "th" | "div"
			)
		}
	}
}

/// New content gets at most one newline where original content may keep two.
fn max_newlines(node: &Node, state: &SerializerState<'_>) -> usize {
	if state.is_new(node) { 1 } else { 2 }
}

fn attributes_wikitext(node: &Node) -> String {
	let Node::Element { attrs, .. } = node else {
		return String::new();
	};

	let mut wikitext = String::new();
	for (key, value) in attrs {
		let _ = write!(wikitext, " {key}=\"{value}\"");
	}
	wikitext
}

/// Original markup stored for an unmodified node.
fn original_markup<'a>(
	node: &Node,
	state: &SerializerState<'a>,
	select: impl Fn(&'a NodeData) -> Option<&'a String>,
) -> Option<&'a str> {
	if state.is_modified(node) {
		return None;
	}
	state.data(node).and_then(select).map(String::as_str)
}

struct BodyHandler;

impl NodeHandler for BodyHandler {
	fn name(&self) -> &'static str {
		"body"
	}

	fn handle(&self, node: &Node, state: &mut SerializerState<'_>) -> WikiResult<()> {
		let range = state.original_range(node);
		if let Some(range) = range {
			state.emit_chunk("", Some(range.start), Some(range.start), false);
		}

		state.serialize_children(node, self)?;

		// flushes the trailing separator
		if let Some(range) = range {
			state.emit_chunk("", Some(range.end), Some(range.end), false);
		}

		Ok(())
	}
}

struct ParagraphHandler;

impl NodeHandler for ParagraphHandler {
	fn name(&self) -> &'static str {
		"p"
	}

	fn handle(&self, node: &Node, state: &mut SerializerState<'_>) -> WikiResult<()> {
		state.serialize_children(node, self)
	}

	fn before(&self, _node: &Node, neighbor: Neighbor<'_>, _state: &SerializerState<'_>) -> Option<Constraint> {
		match neighbor {
			Neighbor::Parent(_) => Some(Constraint::new(0, 2)),
			Neighbor::Sibling(prev) if prev.is_element("p") => Some(Constraint::new(2, 2)),
			Neighbor::Sibling(_) => Some(Constraint::new(1, 2)),
		}
	}

	fn after(&self, _node: &Node, neighbor: Neighbor<'_>, _state: &SerializerState<'_>) -> Option<Constraint> {
		match neighbor {
			Neighbor::Parent(_) => Some(Constraint::new(0, 2)),
			Neighbor::Sibling(next) if next.is_element("p") => Some(Constraint::new(2, 2)),
			Neighbor::Sibling(_) => Some(Constraint::new(1, 2)),
		}
	}
}

struct TableHandler;

impl NodeHandler for TableHandler {
	fn name(&self) -> &'static str {
		"table"
	}

	fn handle(&self, node: &Node, state: &mut SerializerState<'_>) -> WikiResult<()> {
		let open = original_markup(node, state, |data| data.parsoid.start_tag_src.as_ref())
			.map_or_else(|| format!("{{|{}", attributes_wikitext(node)), ToString::to_string);
		state.emit_open(node, &open);

		state.serialize_children(node, self)?;

		// an empty table still needs its markers on separate lines
		if node.children().is_empty() {
			state.add_constraint(Some(Constraint::new(1, 2)), self.name());
		}

		let data = state.data(node);
		let auto_inserted_end = data.is_some_and(|data| data.parsoid.auto_inserted_end);
		if auto_inserted_end && !state.is_modified(node) {
			return Ok(());
		}

		let close = original_markup(node, state, |data| data.parsoid.end_tag_src.as_ref())
			.unwrap_or("|}")
			.to_string();
		state.emit_close(node, &close);

		Ok(())
	}

	fn before(&self, _node: &Node, neighbor: Neighbor<'_>, _state: &SerializerState<'_>) -> Option<Constraint> {
		match neighbor {
			Neighbor::Parent(_) => Some(Constraint::new(0, 2)),
			Neighbor::Sibling(_) => Some(Constraint::new(1, 2)),
		}
	}

	fn after(&self, node: &Node, neighbor: Neighbor<'_>, state: &SerializerState<'_>) -> Option<Constraint> {
		match neighbor {
			Neighbor::Parent(_) => Some(Constraint::new(0, 2)),
			Neighbor::Sibling(next) if state.is_new(node) || state.is_new(next) => {
				Some(Constraint::new(0, 2))
			}
			Neighbor::Sibling(_) => Some(Constraint::new(1, 2)),
		}
	}

	fn first_child(&self, node: &Node, _child: &Node, state: &SerializerState<'_>) -> Option<Constraint> {
		Some(Constraint::new(1, max_newlines(node, state)))
	}

	fn last_child(&self, node: &Node, _child: &Node, state: &SerializerState<'_>) -> Option<Constraint> {
		Some(Constraint::new(1, max_newlines(node, state)))
	}
}

struct RowHandler;

impl RowHandler {
	fn is_implied(node: &Node, state: &SerializerState<'_>) -> bool {
		state
			.data(node)
			.is_some_and(|data| data.parsoid.auto_inserted_start)
	}
}

impl NodeHandler for RowHandler {
	fn name(&self) -> &'static str {
		"tr"
	}

	fn handle(&self, node: &Node, state: &mut SerializerState<'_>) -> WikiResult<()> {
		if !Self::is_implied(node, state) || state.is_modified(node) {
			let open = original_markup(node, state, |data| data.parsoid.start_tag_src.as_ref())
				.map_or_else(|| format!("|-{}", attributes_wikitext(node)), ToString::to_string);
			state.emit_open(node, &open);
		}

		state.serialize_children(node, self)
	}

	fn before(&self, node: &Node, _neighbor: Neighbor<'_>, state: &SerializerState<'_>) -> Option<Constraint> {
		Some(Constraint::new(1, max_newlines(node, state)))
	}

	fn after(&self, node: &Node, _neighbor: Neighbor<'_>, state: &SerializerState<'_>) -> Option<Constraint> {
		Some(Constraint::new(0, max_newlines(node, state)))
	}

	fn first_child(&self, node: &Node, _child: &Node, state: &SerializerState<'_>) -> Option<Constraint> {
		if Self::is_implied(node, state) && !state.is_modified(node) {
			return None;
		}
		Some(Constraint::new(1, max_newlines(node, state)))
	}
}

struct CellHandler;

impl NodeHandler for CellHandler {
	fn name(&self) -> &'static str {
		"td"
	}

	fn handle(&self, node: &Node, state: &mut SerializerState<'_>) -> WikiResult<()> {
		let open = state
			.data(node)
			.and_then(|data| data.parsoid.start_tag_src.as_deref())
			.unwrap_or(if node.is_element("th") { "!" } else { "|" })
			.to_string();
		state.emit_open(node, &open);

		state.serialize_children(node, self)
	}

	fn before(&self, node: &Node, neighbor: Neighbor<'_>, state: &SerializerState<'_>) -> Option<Constraint> {
		let max = max_newlines(node, state);
		let same_line = state
			.data(node)
			.and_then(|data| data.parsoid.start_tag_src.as_deref())
			.is_some_and(|src| src == "||" || src == "!!");

		match neighbor {
			Neighbor::Parent(_) => Some(Constraint::new(0, max)),
			Neighbor::Sibling(_) if same_line => Some(Constraint::new(0, 0)),
			Neighbor::Sibling(_) => Some(Constraint::new(1, max)),
		}
	}

	fn after(&self, node: &Node, _neighbor: Neighbor<'_>, state: &SerializerState<'_>) -> Option<Constraint> {
		Some(Constraint::new(0, max_newlines(node, state)))
	}

	fn first_child(&self, _node: &Node, _child: &Node, _state: &SerializerState<'_>) -> Option<Constraint> {
		Some(Constraint::new(0, 0))
	}
}

/// Text, inline comments and any other inline element.
struct InlineHandler;

impl NodeHandler for InlineHandler {
	fn name(&self) -> &'static str {
		"inline"
	}

	fn handle(&self, node: &Node, state: &mut SerializerState<'_>) -> WikiResult<()> {
		match node {
			Node::Text { text, .. } => {
				state.emit_whole(node, text);
				Ok(())
			}
			Node::Comment { text, .. } => {
				let comment = original_markup(node, state, |data| data.parsoid.src.as_ref())
					.map_or_else(|| format!("<!--{text}-->"), ToString::to_string);
				state.emit_whole(node, &comment);
				Ok(())
			}
			Node::Element { name, .. } => {
				state.emit_open(node, &format!("<{name}{}>", attributes_wikitext(node)));
				state.serialize_children(node, self)?;
				state.emit_close(node, &format!("</{name}>"));
				Ok(())
			}
		}
	}

	fn before(&self, _node: &Node, neighbor: Neighbor<'_>, _state: &SerializerState<'_>) -> Option<Constraint> {
		match neighbor {
			Neighbor::Sibling(prev) if is_inline(prev) => Some(Constraint::new(0, 0)),
			_ => None,
		}
	}

	fn after(&self, _node: &Node, neighbor: Neighbor<'_>, _state: &SerializerState<'_>) -> Option<Constraint> {
		match neighbor {
			Neighbor::Sibling(next) if is_inline(next) => Some(Constraint::new(0, 0)),
			_ => None,
		}
	}
}

/// A comment on a line of its own between blocks.
struct BlockCommentHandler;

impl NodeHandler for BlockCommentHandler {
	fn name(&self) -> &'static str {
		"comment"
	}

	fn handle(&self, node: &Node, state: &mut SerializerState<'_>) -> WikiResult<()> {
		InlineHandler.handle(node, state)
	}

	fn before(&self, _node: &Node, neighbor: Neighbor<'_>, _state: &SerializerState<'_>) -> Option<Constraint> {
		block_gap(neighbor)
	}

	fn after(&self, _node: &Node, neighbor: Neighbor<'_>, _state: &SerializerState<'_>) -> Option<Constraint> {
		block_gap(neighbor)
	}
}

fn block_gap(neighbor: Neighbor<'_>) -> Option<Constraint> {
	match neighbor {
		Neighbor::Parent(_) => Some(Constraint::new(0, 2)),
		Neighbor::Sibling(_) => Some(Constraint::new(1, 2)),
	}
}

struct TransclusionHandler {
	block: bool,
}

impl NodeHandler for TransclusionHandler {
	fn name(&self) -> &'static str {
		"transclusion"
	}

	fn handle(&self, node: &Node, state: &mut SerializerState<'_>) -> WikiResult<()> {
		let wikitext = match original_markup(node, state, |data| data.parsoid.src.as_ref()) {
			Some(src) => src.to_string(),
			None => {
				let data = state.data(node).ok_or_else(|| {
					WikiError::malformed("TransclusionHandler", format!("node {} has no data", node.id()))
				})?;
				transclusion_wikitext(data)?
			}
		};

		state.emit_whole(node, &wikitext);
		Ok(())
	}

	fn before(&self, node: &Node, neighbor: Neighbor<'_>, state: &SerializerState<'_>) -> Option<Constraint> {
		if self.block {
			return block_gap(neighbor);
		}
		InlineHandler.before(node, neighbor, state)
	}

	fn after(&self, node: &Node, neighbor: Neighbor<'_>, state: &SerializerState<'_>) -> Option<Constraint> {
		if self.block {
			return block_gap(neighbor);
		}
		InlineHandler.after(node, neighbor, state)
	}
}

/// Rebuild a call from its argument info. Recorded parameters keep their
/// order and spacing. Parameters added since are appended as `|name=value`
/// and removed ones are dropped.
///
/// A positional value is written bare only while it still lands on its own
/// index and contains no `=`. Otherwise its key is written out.
pub fn transclusion_wikitext(data: &NodeData) -> WikiResult<String> {
	let template = data
		.mw
		.as_ref()
		.and_then(|mw| mw.template())
		.ok_or_else(|| WikiError::malformed("transclusion_wikitext", "missing template data"))?;
	let infos = data.parsoid.pi.as_deref().unwrap_or_default();

	let mut wikitext = format!("{{{{{}", template.target.wt);
	let mut bare = 0usize;

	for info in infos {
		let Some(param) = template.params.get(&info.k) else {
			continue;
		};
		wikitext.push('|');

		if info.named {
			let [key_pre, key_post, value_pre, value_post] = info.spacing();
			let key = param.key.as_ref().map_or(info.k.as_str(), |key| key.wt.as_str());
			let _ = write!(
				wikitext,
				"{key_pre}{key}{key_post}={value_pre}{}{value_post}",
				param.wt
			);
		} else if info.k == (bare + 1).to_string() && !param.wt.contains('=') {
			bare += 1;
			wikitext.push_str(&param.wt);
		} else {
			let _ = write!(wikitext, "{}={}", info.k, param.wt);
		}
	}

	for (key, param) in &template.params {
		if infos.iter().any(|info| info.k == *key) {
			continue;
		}
		let _ = write!(wikitext, "|{key}={}", param.wt);
	}

	wikitext.push_str("}}");
	Ok(wikitext)
}
