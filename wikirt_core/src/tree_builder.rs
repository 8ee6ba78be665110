use crate::WikiResult;
use crate::data_store::DataMw;
use crate::data_store::DataMwPart;
use crate::data_store::DataParsoid;
use crate::data_store::DataStore;
use crate::data_store::NodeData;
use crate::pipeline::ArgInfo;
use crate::pipeline::TRANSCLUSION_END_TYPE;
use crate::pipeline::TRANSCLUSION_TYPE;
use crate::source_range::DomSourceRange;
use crate::source_range::SourceRange;
use crate::tokens::Tag;
use crate::tokens::Token;
use crate::tokens::TokenKind;
use crate::tokens::is_block_tag;
use crate::tree::Document;
use crate::tree::Node;

/// The `about` id of a transclusion start marker.
fn start_marker_about(token: &Token) -> Option<String> {
	match &token.kind {
		TokenKind::SelfClosing(tag) if tag.name == "meta" && token.has_typeof(TRANSCLUSION_TYPE) => {
			tag.attribute_text("about")
		}
		_ => None,
	}
}

fn is_end_marker(token: &Token, about: &str) -> bool {
	token.has_typeof(TRANSCLUSION_END_TYPE)
		&& token
			.tag()
			.and_then(|tag| tag.attribute_text("about"))
			.is_some_and(|value| value == about)
}

fn is_marker(token: &Token) -> bool {
	token.name() == Some("meta")
		&& (token.has_typeof(TRANSCLUSION_TYPE) || token.has_typeof(TRANSCLUSION_END_TYPE))
}

fn is_opening(token: &Token, names: &[&str]) -> bool {
	matches!(&token.kind, TokenKind::TagOpen(tag) if names.contains(&tag.name.as_str()))
}

fn is_table_close(token: &Token) -> bool {
	matches!(&token.kind, TokenKind::TagClose(tag) if tag.name == "table")
}

fn is_blank_text(token: &Token) -> bool {
	matches!(&token.kind, TokenKind::Text(text) if text.trim().is_empty())
}

fn attrs_of(tag: &Tag) -> Vec<(String, String)> {
	tag.attribs
		.iter()
		.map(|kv| (kv.k.to_text(), kv.v.to_text()))
		.collect()
}

/// The source range covered by a run of tokens, when both ends carry one.
fn span_of(tokens: &[Token]) -> Option<SourceRange> {
	let start = tokens.first()?.data.tsr?.start;
	let end = tokens.last()?.data.tsr?.end;
	Some(SourceRange::new(start, end.max(start)))
}

struct Cursor {
	tokens: Vec<Token>,
	pos: usize,
}

impl Cursor {
	fn new(tokens: Vec<Token>) -> Self {
		Self { tokens, pos: 0 }
	}

	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.pos)
	}

	fn peek_at(&self, offset: usize) -> Option<&Token> {
		self.tokens.get(self.pos + offset)
	}

	fn next(&mut self) -> Option<Token> {
		let token = self.tokens.get(self.pos).cloned();
		if token.is_some() {
			self.pos += 1;
		}
		token
	}

	/// Take a transclusion start marker and everything up to and including
	/// its end marker.
	fn take_group(&mut self) -> Vec<Token> {
		let Some(start) = self.next() else {
			return vec![];
		};
		let about = start_marker_about(&start).unwrap_or_default();
		let mut group = vec![start];

		while let Some(token) = self.next() {
			let done = is_end_marker(&token, &about);
			group.push(token);
			if done {
				break;
			}
		}

		group
	}

	/// Take inline tokens until `stop` matches, keeping transclusion groups
	/// whole.
	fn take_inline_run(&mut self, mut stop: impl FnMut(&Token) -> bool) -> Vec<Token> {
		let mut run = vec![];

		while let Some(token) = self.peek() {
			if stop(token) {
				break;
			}

			if start_marker_about(token).is_some() {
				run.extend(self.take_group());
			} else if let Some(token) = self.next() {
				run.push(token);
			}
		}

		run
	}

	/// Whether the token at `offset` starts a transclusion whose content opens
	/// with a block element.
	fn is_block_transclusion_at(&self, offset: usize) -> bool {
		self.peek_at(offset)
			.is_some_and(|token| start_marker_about(token).is_some())
			&& self.peek_at(offset + 1).is_some_and(|token| {
				matches!(&token.kind, TokenKind::TagOpen(tag) if is_block_tag(&tag.name))
			})
	}

	/// Whether the line starting at the cursor holds only comments and
	/// whitespace.
	fn is_comment_line(&self) -> bool {
		let line = self.tokens[self.pos..]
			.iter()
			.take_while(|token| !matches!(token.kind, TokenKind::Newline | TokenKind::EndOfInput));
		let mut has_comment = false;

		for token in line {
			match &token.kind {
				TokenKind::Comment(_) => has_comment = true,
				TokenKind::Text(text) if text.trim().is_empty() => {}
				_ => return false,
			}
		}

		has_comment
	}

	/// Whether the line starting at `offset` is blank.
	fn is_blank_line_at(&self, offset: usize) -> bool {
		match self.peek_at(offset) {
			None => true,
			Some(token) if matches!(token.kind, TokenKind::Newline | TokenKind::EndOfInput) => true,
			Some(token) if is_blank_text(token) => {
				self.peek_at(offset + 1).is_none_or(|next| {
					matches!(next.kind, TokenKind::Newline | TokenKind::EndOfInput)
				})
			}
			Some(_) => false,
		}
	}

	/// With the cursor on a newline inside a paragraph, whether the next line
	/// continues the paragraph.
	fn paragraph_continues(&self) -> bool {
		if self.is_blank_line_at(1) || self.is_block_transclusion_at(1) {
			return false;
		}

		self.peek_at(1)
			.is_some_and(|token| !is_opening(token, &["table"]))
	}
}

/// Builds a [`Document`] from the final, in-order token stream.
///
/// Paragraphs wrap runs of inline content and end at a blank line or block
/// content. Table tokens become `table`/`tr`/`td`/`th` elements and each
/// transclusion becomes a single opaque element. Nodes built from tokens
/// with source ranges record them as `dsr`.
pub struct TreeBuilder {
	store: DataStore,
	marker_depth: usize,
}

impl TreeBuilder {
	fn new() -> Self {
		Self {
			store: DataStore::new(),
			marker_depth: 0,
		}
	}

	/// Build the document for `source` from its expanded tokens.
	pub fn build(tokens: Vec<Token>, source: &str) -> WikiResult<Document> {
		let mut builder = Self::new();
		let mut cursor = Cursor::new(tokens);
		let children = builder.blocks(&mut cursor)?;
		let root = builder.element(
			"body",
			vec![],
			children,
			DataParsoid {
				dsr: Some(DomSourceRange::new(0, source.len(), 0, 0)),
				..Default::default()
			},
		);

		Ok(Document::from_parts(
			root,
			builder.store,
			Some(source.to_string()),
		))
	}

	/// Build a fragment without paragraph wrapping.
	pub fn inline_fragment(tokens: Vec<Token>) -> WikiResult<Document> {
		let mut builder = Self::new();
		let children = builder.inline_nodes(tokens)?;
		let root = builder.element("body", vec![], children, DataParsoid::default());

		Ok(Document::from_parts(root, builder.store, None))
	}

	fn element(
		&mut self,
		name: &str,
		attrs: Vec<(String, String)>,
		children: Vec<Node>,
		parsoid: DataParsoid,
	) -> Node {
		let id = self.store.put(NodeData { parsoid, mw: None });

		Node::Element {
			id,
			name: name.to_string(),
			attrs,
			children,
		}
	}

	fn comment(&mut self, token: &Token, text: &str) -> Node {
		let id = self.store.put(NodeData {
			parsoid: DataParsoid {
				dsr: token
					.data
					.tsr
					.map(|tsr| DomSourceRange::new(tsr.start, tsr.end, 0, 0)),
				src: token.data.src.clone(),
				..Default::default()
			},
			mw: None,
		});

		Node::Comment {
			id,
			text: text.to_string(),
		}
	}

	fn blocks(&mut self, cursor: &mut Cursor) -> WikiResult<Vec<Node>> {
		let mut nodes = vec![];

		while let Some(token) = cursor.peek() {
			match &token.kind {
				TokenKind::EndOfInput => {
					cursor.pos += 1;
					break;
				}
				TokenKind::Newline => cursor.pos += 1,
				TokenKind::TagOpen(tag) if tag.name == "table" => {
					let table = self.table(cursor)?;
					nodes.push(table);
				}
				TokenKind::Text(_) if cursor.is_blank_line_at(0) => cursor.pos += 1,
				TokenKind::Comment(_) if cursor.is_comment_line() => {
					while let Some(token) = cursor.peek() {
						if matches!(token.kind, TokenKind::Newline | TokenKind::EndOfInput) {
							break;
						}
						if let Some(token) = cursor.next()
							&& let TokenKind::Comment(text) = &token.kind
						{
							nodes.push(self.comment(&token, text));
						}
					}
				}
				_ if cursor.is_block_transclusion_at(0) => {
					let group = cursor.take_group();
					nodes.push(self.transclusion(group, true)?);
				}
				_ => {
					let paragraph = self.paragraph(cursor)?;
					nodes.push(paragraph);
				}
			}
		}

		Ok(nodes)
	}

	fn paragraph(&mut self, cursor: &mut Cursor) -> WikiResult<Node> {
		let mut tokens = vec![];

		while let Some(token) = cursor.peek() {
			match &token.kind {
				TokenKind::EndOfInput => break,
				TokenKind::Newline if !cursor.paragraph_continues() => break,
				_ if !tokens.is_empty() && cursor.is_block_transclusion_at(0) => break,
				_ if start_marker_about(token).is_some() => tokens.extend(cursor.take_group()),
				_ => tokens.extend(cursor.next()),
			}
		}

		let dsr = span_of(&tokens).map(|span| DomSourceRange::new(span.start, span.end, 0, 0));
		let children = self.inline_nodes(tokens)?;

		Ok(self.element("p", vec![], children, DataParsoid {
			dsr,
			..Default::default()
		}))
	}

	fn inline_nodes(&mut self, tokens: Vec<Token>) -> WikiResult<Vec<Node>> {
		let mut cursor = Cursor::new(tokens);
		let mut nodes = vec![];
		let mut text = PendingText::default();

		while let Some(token) = cursor.peek() {
			if start_marker_about(token).is_some() {
				text.flush(self, &mut nodes);
				let group = cursor.take_group();
				nodes.push(self.transclusion(group, false)?);
				continue;
			}

			let Some(token) = cursor.next() else {
				break;
			};

			match &token.kind {
				TokenKind::Text(value) => text.push(value, token.data.tsr),
				TokenKind::Newline => text.push("\n", token.data.tsr),
				TokenKind::Comment(value) => {
					text.flush(self, &mut nodes);
					nodes.push(self.comment(&token, value));
				}
				TokenKind::TagOpen(tag) => {
					text.flush(self, &mut nodes);
					let name = tag.name.clone();
					let mut depth = 0usize;
					let inner = cursor.take_inline_run(|next| {
						match &next.kind {
							TokenKind::TagOpen(tag) if tag.name == name => depth += 1,
							TokenKind::TagClose(tag) if tag.name == name => {
								if depth == 0 {
									return true;
								}
								depth -= 1;
							}
							_ => {}
						}
						false
					});
					let close = cursor.next();
					let mut all = vec![token.clone()];
					all.extend(inner.iter().cloned());
					all.extend(close);
					let dsr = span_of(&all).map(|span| {
						let open = token.data.tsr.map_or(0, |tsr| tsr.len());
						DomSourceRange::new(span.start, span.end, open, 0)
					});
					let children = self.inline_nodes(inner)?;
					nodes.push(self.element(&tag.name, attrs_of(tag), children, DataParsoid {
						dsr,
						start_tag_src: token.data.src.clone(),
						..Default::default()
					}));
				}
				TokenKind::SelfClosing(tag) if !is_marker(&token) => {
					text.flush(self, &mut nodes);
					let dsr = token
						.data
						.tsr
						.map(|tsr| DomSourceRange::new(tsr.start, tsr.end, tsr.len(), 0));
					nodes.push(self.element(&tag.name, attrs_of(tag), vec![], DataParsoid {
						dsr,
						src: token.data.src.clone(),
						..Default::default()
					}));
				}
				TokenKind::SelfClosing(_) | TokenKind::TagClose(_) | TokenKind::EndOfInput => {}
			}
		}

		text.flush(self, &mut nodes);
		Ok(nodes)
	}

	/// Build the element standing in for a transclusion group. Nested markers
	/// are dropped and only their content kept.
	fn transclusion(&mut self, group: Vec<Token>, block: bool) -> WikiResult<Node> {
		let mut tokens = group.into_iter();
		let Some(start) = tokens.next() else {
			return Ok(self.element("span", vec![], vec![], DataParsoid::default()));
		};
		let about = start_marker_about(&start).unwrap_or_default();
		let mut content: Vec<Token> = tokens.collect();
		let end = content
			.last()
			.filter(|token| is_end_marker(token, &about))
			.cloned();
		if end.is_some() {
			content.pop();
		}

		self.store.set_transclusion_depth(about.clone(), self.marker_depth);
		self.marker_depth += 1;
		for token in &content {
			if let Some(nested) = start_marker_about(token) {
				self.store.set_transclusion_depth(nested, self.marker_depth);
			}
		}
		content.retain(|token| !is_marker(token));

		let children = if block {
			self.blocks(&mut Cursor::new(content))
		} else {
			self.inline_nodes(content)
		};
		self.marker_depth -= 1;
		let children = children?;

		let arg_info: Option<ArgInfo> = start
			.data
			.tmp
			.tplarginfo
			.as_deref()
			.map(serde_json::from_str)
			.transpose()?;

		let dsr = start.data.tsr.map(|tsr| {
			let end = end
				.as_ref()
				.and_then(|token| token.data.tsr)
				.map_or(tsr.end, |end| end.end.max(tsr.end));
			DomSourceRange::new(tsr.start, end, 0, 0)
		});

		let (pi, mw) = match arg_info {
			Some(info) => {
				(
					Some(info.param_infos),
					Some(DataMw {
						parts: vec![DataMwPart {
							template: info.dict,
						}],
					}),
				)
			}
			None => (None, None),
		};

		let id = self.store.put(NodeData {
			parsoid: DataParsoid {
				dsr,
				src: start.data.src.clone(),
				pi,
				..Default::default()
			},
			mw,
		});

		Ok(Node::Element {
			id,
			name: if block { "div" } else { "span" }.to_string(),
			attrs: vec![
				("typeof".to_string(), TRANSCLUSION_TYPE.to_string()),
				("about".to_string(), about),
			],
			children,
		})
	}

	fn table(&mut self, cursor: &mut Cursor) -> WikiResult<Node> {
		let Some(open) = cursor.next() else {
			return Ok(self.element("table", vec![], vec![], DataParsoid::default()));
		};
		let attrs = open.tag().map(attrs_of).unwrap_or_default();
		let open_tsr = open.data.tsr;

		let mut children = vec![];
		let mut row: Option<RowBuilder> = None;
		let mut close = None;

		while let Some(token) = cursor.peek() {
			match &token.kind {
				TokenKind::Newline => cursor.pos += 1,
				TokenKind::EndOfInput => break,
				TokenKind::TagClose(tag) if tag.name == "table" => {
					close = cursor.next();
					break;
				}
				TokenKind::TagOpen(tag) if tag.name == "tr" => {
					if let Some(row) = row.take() {
						children.push(row.finish(self));
					}
					row = cursor.next().map(RowBuilder::explicit);
				}
				TokenKind::TagOpen(tag) if tag.name == "td" || tag.name == "th" => {
					let cell = self.cell(cursor)?;
					row.get_or_insert_with(RowBuilder::implied).push(cell);
				}
				_ => {
					let run = cursor.take_inline_run(|token| {
						matches!(token.kind, TokenKind::Newline | TokenKind::EndOfInput)
							|| is_opening(token, &["tr", "td", "th"])
							|| is_table_close(token)
					});
					let nodes = self.inline_nodes(run)?;
					match &mut row {
						Some(row) => row.children.extend(nodes),
						None => children.extend(nodes),
					}
				}
			}
		}

		if let Some(row) = row.take() {
			children.push(row.finish(self));
		}

		let last_end = children
			.last()
			.and_then(|node| self.store.get(node.id()))
			.and_then(|data| data.parsoid.dsr)
			.map(|dsr| dsr.end);
		let dsr = open_tsr.map(|tsr| {
			match close.as_ref().and_then(|close| close.data.tsr) {
				Some(close_tsr) => {
					DomSourceRange::new(tsr.start, close_tsr.end, tsr.len(), close_tsr.len())
				}
				None => {
					let end = last_end.unwrap_or(tsr.end).max(tsr.end);
					DomSourceRange::new(tsr.start, end, tsr.len(), 0)
				}
			}
		});

		Ok(self.element("table", attrs, children, DataParsoid {
			dsr,
			start_tag_src: open.data.src.clone(),
			end_tag_src: close.as_ref().and_then(|close| close.data.src.clone()),
			auto_inserted_end: close.is_none(),
			..Default::default()
		}))
	}

	/// A cell runs until the next structural table token. Trailing newlines
	/// belong to the separator after it.
	fn cell(&mut self, cursor: &mut Cursor) -> WikiResult<Node> {
		let Some(open) = cursor.next() else {
			return Ok(self.element("td", vec![], vec![], DataParsoid::default()));
		};
		let name = open.name().unwrap_or("td").to_string();

		let mut content = cursor.take_inline_run(|token| {
			token.is_end_of_input() || is_opening(token, &["tr", "td", "th"]) || is_table_close(token)
		});
		while content
			.last()
			.is_some_and(|token| matches!(token.kind, TokenKind::Newline))
		{
			content.pop();
		}

		let dsr = open.data.tsr.map(|tsr| {
			let end = span_of(&content).map_or(tsr.end, |span| span.end.max(tsr.end));
			DomSourceRange::new(tsr.start, end, tsr.len(), 0)
		});
		let attrs = open.tag().map(attrs_of).unwrap_or_default();
		let children = self.inline_nodes(content)?;

		Ok(self.element(&name, attrs, children, DataParsoid {
			dsr,
			start_tag_src: open.data.src.clone(),
			..Default::default()
		}))
	}
}

/// Adjacent text and newline tokens merged into one text node.
#[derive(Default)]
struct PendingText {
	text: String,
	range: Option<SourceRange>,
	/// Some merged token had no source range.
	unranged: bool,
}

impl PendingText {
	fn push(&mut self, text: &str, tsr: Option<SourceRange>) {
		if self.text.is_empty() && self.range.is_none() && !self.unranged {
			self.range = tsr;
			self.unranged = tsr.is_none();
		} else {
			match (self.range, tsr) {
				(Some(range), Some(tsr)) => self.range = Some(SourceRange::new(range.start, tsr.end)),
				_ => self.unranged = true,
			}
		}
		self.text.push_str(text);
	}

	fn flush(&mut self, builder: &mut TreeBuilder, nodes: &mut Vec<Node>) {
		let pending = std::mem::take(self);
		if pending.text.is_empty() {
			return;
		}

		let dsr = pending
			.range
			.filter(|_| !pending.unranged)
			.map(|range| DomSourceRange::new(range.start, range.end, 0, 0));
		let id = builder.store.put(NodeData {
			parsoid: DataParsoid {
				dsr,
				..Default::default()
			},
			mw: None,
		});

		nodes.push(Node::Text {
			id,
			text: pending.text,
		});
	}
}

struct RowBuilder {
	open: Option<Token>,
	children: Vec<Node>,
}

impl RowBuilder {
	fn explicit(open: Token) -> Self {
		Self {
			open: Some(open),
			children: vec![],
		}
	}

	fn implied() -> Self {
		Self {
			open: None,
			children: vec![],
		}
	}

	fn push(&mut self, cell: Node) {
		self.children.push(cell);
	}

	fn finish(self, builder: &mut TreeBuilder) -> Node {
		let child_span = |builder: &TreeBuilder, node: Option<&Node>| {
			node.and_then(|node| builder.store.get(node.id()))
				.and_then(|data| data.parsoid.dsr)
		};
		let first = child_span(builder, self.children.first());
		let last = child_span(builder, self.children.last());

		let (attrs, parsoid) = match &self.open {
			Some(open) => {
				let dsr = open.data.tsr.map(|tsr| {
					let end = last.map_or(tsr.end, |last| last.end.max(tsr.end));
					DomSourceRange::new(tsr.start, end, tsr.len(), 0)
				});
				(
					open.tag().map(attrs_of).unwrap_or_default(),
					DataParsoid {
						dsr,
						start_tag_src: open.data.src.clone(),
						..Default::default()
					},
				)
			}
			None => {
				let dsr = first
					.zip(last)
					.map(|(first, last)| DomSourceRange::new(first.start, last.end, 0, 0));
				(vec![], DataParsoid {
					dsr,
					auto_inserted_start: true,
					..Default::default()
				})
			}
		};

		builder.element("tr", attrs, self.children, parsoid)
	}
}
