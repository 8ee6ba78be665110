use std::fmt::Write;

use crate::WikiResult;
use crate::tree::Document;
use crate::tree::Node;

const VOID_ELEMENTS: [&str; 3] = ["br", "hr", "meta"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HtmlOptions {
	/// Emit each element's stored data as `data-parsoid` and `data-mw`
	/// attributes.
	pub data_attributes: bool,
}

/// Render the whole document, root element included.
pub fn to_html(document: &Document, options: HtmlOptions) -> WikiResult<String> {
	let mut html = String::new();
	write_node(&mut html, document, &document.root, options)?;
	Ok(html)
}

/// Render the children of the root element.
pub fn inner_html(document: &Document, options: HtmlOptions) -> WikiResult<String> {
	let mut html = String::new();
	for child in document.root.children() {
		write_node(&mut html, document, child, options)?;
	}
	Ok(html)
}

fn write_node(
	html: &mut String,
	document: &Document,
	node: &Node,
	options: HtmlOptions,
) -> WikiResult<()> {
	match node {
		Node::Text { text, .. } => html.push_str(&escape_text(text)),
		Node::Comment { text, .. } => {
			let _ = write!(html, "<!--{text}-->");
		}
		Node::Element {
			id,
			name,
			attrs,
			children,
		} => {
			html.push('<');
			html.push_str(name);
			for (key, value) in attrs {
				let _ = write!(html, " {key}=\"{}\"", escape_attribute(value));
			}

			if options.data_attributes
				&& let Some(data) = document.data(*id)
			{
				if !data.parsoid.is_empty() {
					let json = serde_json::to_string(&data.parsoid)?;
					let _ = write!(html, " data-parsoid=\"{}\"", escape_attribute(&json));
				}
				if let Some(mw) = &data.mw {
					let json = serde_json::to_string(mw)?;
					let _ = write!(html, " data-mw=\"{}\"", escape_attribute(&json));
				}
			}
			html.push('>');

			if VOID_ELEMENTS.contains(&name.as_str()) {
				return Ok(());
			}

			for child in children {
				write_node(html, document, child, options)?;
			}
			let _ = write!(html, "</{name}>");
		}
	}

	Ok(())
}

pub fn escape_text(text: &str) -> String {
	let mut escaped = String::with_capacity(text.len());
	for ch in text.chars() {
		match ch {
			'&' => escaped.push_str("&amp;"),
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			_ => escaped.push(ch),
		}
	}
	escaped
}

pub fn escape_attribute(text: &str) -> String {
	escape_text(text).replace('"', "&quot;")
}
