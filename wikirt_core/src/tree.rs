use derive_more::Display;
use serde::Deserialize;
use serde::Serialize;

use crate::data_store::DataStore;
use crate::data_store::NodeData;

/// Identifies a node and its entry in the document's [`DataStore`]. Ids are
/// unique within a document generation.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[display("{_0}")]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
	Element {
		id: NodeId,
		name: String,
		attrs: Vec<(String, String)>,
		children: Vec<Node>,
	},
	Text {
		id: NodeId,
		text: String,
	},
	Comment {
		id: NodeId,
		text: String,
	},
}

impl Node {
	pub fn id(&self) -> NodeId {
		match self {
			Node::Element { id, .. } | Node::Text { id, .. } | Node::Comment { id, .. } => *id,
		}
	}

	/// The element name, `None` for text and comments.
	pub fn name(&self) -> Option<&str> {
		match self {
			Node::Element { name, .. } => Some(name),
			_ => None,
		}
	}

	pub fn is_element(&self, expected: &str) -> bool {
		self.name() == Some(expected)
	}

	pub fn attr(&self, key: &str) -> Option<&str> {
		match self {
			Node::Element { attrs, .. } => {
				attrs
					.iter()
					.find(|(name, _)| name == key)
					.map(|(_, value)| value.as_str())
			}
			_ => None,
		}
	}

	pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
		let Node::Element { attrs, .. } = self else {
			return;
		};
		let value = value.into();

		match attrs.iter_mut().find(|(name, _)| name == key) {
			Some((_, existing)) => *existing = value,
			None => attrs.push((key.to_string(), value)),
		}
	}

	/// Whether `typeof` holds `value` as one of its words.
	pub fn has_typeof(&self, value: &str) -> bool {
		self.attr("typeof")
			.is_some_and(|types| types.split_whitespace().any(|word| word == value))
	}

	pub fn children(&self) -> &[Node] {
		match self {
			Node::Element { children, .. } => children,
			_ => &[],
		}
	}

	pub fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
		match self {
			Node::Element { children, .. } => Some(children),
			_ => None,
		}
	}

	/// The text of a text or comment node.
	pub fn text(&self) -> Option<&str> {
		match self {
			Node::Text { text, .. } | Node::Comment { text, .. } => Some(text),
			Node::Element { .. } => None,
		}
	}

	pub fn set_text(&mut self, value: impl Into<String>) {
		if let Node::Text { text, .. } | Node::Comment { text, .. } = self {
			*text = value.into();
		}
	}

	/// Concatenated text of this node and its descendants, comments excluded.
	pub fn text_content(&self) -> String {
		match self {
			Node::Text { text, .. } => text.clone(),
			Node::Comment { .. } => String::new(),
			Node::Element { children, .. } => children.iter().map(Node::text_content).collect(),
		}
	}

	/// This node and all of its descendants in document order.
	pub fn descendants(&self) -> Vec<&Node> {
		let mut nodes = vec![self];
		for child in self.children() {
			nodes.extend(child.descendants());
		}
		nodes
	}

	pub fn find(&self, id: NodeId) -> Option<&Node> {
		if self.id() == id {
			return Some(self);
		}
		self.children().iter().find_map(|child| child.find(id))
	}

	pub fn find_mut(&mut self, id: NodeId) -> Option<&mut Node> {
		if self.id() == id {
			return Some(self);
		}

		match self {
			Node::Element { children, .. } => children.iter_mut().find_map(|child| child.find_mut(id)),
			_ => None,
		}
	}
}

/// A document tree together with its out-of-band node data.
#[derive(Debug, Clone)]
pub struct Document {
	pub root: Node,
	pub store: DataStore,
	/// The wikitext the tree was built from, if any.
	pub source: Option<String>,
}

impl Document {
	/// An empty document with a `body` root.
	pub fn new() -> Self {
		let mut store = DataStore::new();
		let id = store.put(NodeData::default());

		Self {
			root: Node::Element {
				id,
				name: "body".to_string(),
				attrs: vec![],
				children: vec![],
			},
			store,
			source: None,
		}
	}

	pub fn from_parts(root: Node, store: DataStore, source: Option<String>) -> Self {
		Self {
			root,
			store,
			source,
		}
	}

	/// Identifies the parse that produced this tree. Clones share it, so
	/// node ids stay comparable between a document and its edited copy.
	pub fn generation(&self) -> u64 {
		self.store.generation()
	}

	pub fn node(&self, id: NodeId) -> Option<&Node> {
		self.root.find(id)
	}

	pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
		self.root.find_mut(id)
	}

	pub fn data(&self, id: NodeId) -> Option<&NodeData> {
		self.store.get(id)
	}

	/// All nodes in document order.
	pub fn nodes(&self) -> Vec<&Node> {
		self.root.descendants()
	}

	/// The first element named `name` in document order.
	pub fn find_element(&self, name: &str) -> Option<&Node> {
		self.nodes().into_iter().find(|node| node.is_element(name))
	}

	pub fn create_text(&mut self, text: impl Into<String>) -> Node {
		Node::Text {
			id: self.store.put(NodeData::default()),
			text: text.into(),
		}
	}

	pub fn create_comment(&mut self, text: impl Into<String>) -> Node {
		Node::Comment {
			id: self.store.put(NodeData::default()),
			text: text.into(),
		}
	}

	pub fn create_element(&mut self, name: impl Into<String>, children: Vec<Node>) -> Node {
		Node::Element {
			id: self.store.put(NodeData::default()),
			name: name.into(),
			attrs: vec![],
			children,
		}
	}

	/// Insert `node` as the `index`th child of `parent`, clamping the index
	/// to the number of children. Returns `false` when `parent` is not an
	/// element of this document.
	pub fn insert_child(&mut self, parent: NodeId, index: usize, node: Node) -> bool {
		let Some(children) = self.node_mut(parent).and_then(Node::children_mut) else {
			return false;
		};

		let index = index.min(children.len());
		children.insert(index, node);
		true
	}

	pub fn remove_child(&mut self, parent: NodeId, index: usize) -> Option<Node> {
		let children = self.node_mut(parent).and_then(Node::children_mut)?;
		(index < children.len()).then(|| children.remove(index))
	}
}

impl Default for Document {
	fn default() -> Self {
		Self::new()
	}
}
