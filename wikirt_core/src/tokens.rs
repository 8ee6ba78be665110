use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Display;

use derive_more::Deref;
use float_cmp::approx_eq;
use serde::Deserialize;
use serde::Serialize;

use crate::source_range::KvSourceRange;
use crate::source_range::SourceRange;

/// The rank of the last pipeline stage that processed a token.
///
/// Ranks are real numbers so that stages can be slotted between existing ones
/// (`1.1`, `1.11`). A token is only offered to stages whose rank is at least
/// its own, and never twice to the same stage.
#[derive(Debug, Clone, Copy, Deref)]
pub struct Rank(f64);

impl Rank {
	pub const fn new(value: f64) -> Self {
		Self(value)
	}

	pub const fn value(self) -> f64 {
		self.0
	}
}

impl Eq for Rank {}
impl PartialEq for Rank {
	fn eq(&self, other: &Self) -> bool {
		approx_eq!(f64, self.0, other.0, ulps = 2)
	}
}

impl PartialOrd for Rank {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Rank {
	fn cmp(&self, other: &Self) -> Ordering {
		if self == other {
			Ordering::Equal
		} else {
			self.0.total_cmp(&other.0)
		}
	}
}

impl Display for Rank {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A single markup token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
	pub kind: TokenKind,
	#[serde(default, rename = "dataAttribs", skip_serializing_if = "DataAttribs::is_empty")]
	pub data: DataAttribs,
	#[serde(skip)]
	pub rank: Option<Rank>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenKind {
	TagOpen(Tag),
	TagClose(Tag),
	SelfClosing(Tag),
	Text(String),
	Comment(String),
	Newline,
	EndOfInput,
}

impl TokenKind {
	/// The token type name used in serialized token dumps.
	pub fn type_name(&self) -> &'static str {
		match self {
			TokenKind::TagOpen(_) => "TagTk",
			TokenKind::TagClose(_) => "EndTagTk",
			TokenKind::SelfClosing(_) => "SelfclosingTagTk",
			TokenKind::Text(_) => "string",
			TokenKind::Comment(_) => "CommentTk",
			TokenKind::Newline => "NlTk",
			TokenKind::EndOfInput => "EOFTk",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
	pub name: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub attribs: Vec<Kv>,
}

impl Tag {
	pub fn new(name: impl Into<String>, attribs: Vec<Kv>) -> Self {
		Self {
			name: name.into(),
			attribs,
		}
	}

	/// The value of the first attribute whose literal key matches `key`.
	pub fn attribute(&self, key: &str) -> Option<&Value> {
		Kv::lookup(&self.attribs, key)
	}

	/// The attribute value flattened to text, if present.
	pub fn attribute_text(&self, key: &str) -> Option<String> {
		self.attribute(key).map(Value::to_text)
	}
}

/// Out-of-band data carried by a token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataAttribs {
	/// Token source range.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tsr: Option<SourceRange>,
	/// The exact source text the token was produced from.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub src: Option<String>,
	#[serde(default, skip_serializing_if = "TempData::is_empty")]
	pub tmp: TempData,
}

impl DataAttribs {
	pub fn is_empty(&self) -> bool {
		self.tsr.is_none() && self.src.is_none() && self.tmp.is_empty()
	}
}

/// Scratch fields which only live while the token is in the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TempData {
	/// Serialized argument-info record attached to a transclusion start marker.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tplarginfo: Option<String>,
}

impl TempData {
	pub fn is_empty(&self) -> bool {
		self.tplarginfo.is_none()
	}
}

impl Token {
	pub fn new(kind: TokenKind) -> Self {
		Self {
			kind,
			data: DataAttribs::default(),
			rank: None,
		}
	}

	pub fn text(text: impl Into<String>) -> Self {
		Self::new(TokenKind::Text(text.into()))
	}

	pub fn comment(text: impl Into<String>) -> Self {
		Self::new(TokenKind::Comment(text.into()))
	}

	pub fn newline() -> Self {
		Self::new(TokenKind::Newline)
	}

	pub fn end_of_input() -> Self {
		Self::new(TokenKind::EndOfInput)
	}

	pub fn tag_open(name: impl Into<String>, attribs: Vec<Kv>) -> Self {
		Self::new(TokenKind::TagOpen(Tag::new(name, attribs)))
	}

	pub fn tag_close(name: impl Into<String>) -> Self {
		Self::new(TokenKind::TagClose(Tag::new(name, vec![])))
	}

	pub fn self_closing(name: impl Into<String>, attribs: Vec<Kv>) -> Self {
		Self::new(TokenKind::SelfClosing(Tag::new(name, attribs)))
	}

	#[must_use]
	pub fn with_tsr(mut self, tsr: SourceRange) -> Self {
		self.data.tsr = Some(tsr);
		self
	}

	#[must_use]
	pub fn with_src(mut self, src: impl Into<String>) -> Self {
		self.data.src = Some(src.into());
		self
	}

	pub fn tag(&self) -> Option<&Tag> {
		match &self.kind {
			TokenKind::TagOpen(tag) | TokenKind::TagClose(tag) | TokenKind::SelfClosing(tag) => {
				Some(tag)
			}
			_ => None,
		}
	}

	pub fn tag_mut(&mut self) -> Option<&mut Tag> {
		match &mut self.kind {
			TokenKind::TagOpen(tag) | TokenKind::TagClose(tag) | TokenKind::SelfClosing(tag) => {
				Some(tag)
			}
			_ => None,
		}
	}

	pub fn name(&self) -> Option<&str> {
		self.tag().map(|tag| tag.name.as_str())
	}

	pub fn is_tag(&self) -> bool {
		self.tag().is_some()
	}

	pub fn is_end_of_input(&self) -> bool {
		matches!(self.kind, TokenKind::EndOfInput)
	}

	/// A template or template-argument call awaiting expansion.
	pub fn is_template_token(&self) -> bool {
		matches!(
			&self.kind,
			TokenKind::SelfClosing(tag) if tag.name == "template" || tag.name == "templatearg"
		)
	}

	/// Whether `typeof` contains `value` as one of its space separated words.
	pub fn has_typeof(&self, value: &str) -> bool {
		self.tag()
			.and_then(|tag| tag.attribute_text("typeof"))
			.is_some_and(|types| types.split_whitespace().any(|word| word == value))
	}
}

/// Either half of a key/value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
	Literal(String),
	Tokens(Vec<Token>),
}

impl Default for Value {
	fn default() -> Self {
		Value::Literal(String::new())
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::Literal(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::Literal(value)
	}
}

impl From<Vec<Token>> for Value {
	fn from(value: Vec<Token>) -> Self {
		Value::Tokens(value)
	}
}

impl From<Token> for Value {
	fn from(value: Token) -> Self {
		Value::Tokens(vec![value])
	}
}

impl Value {
	/// Plain text collapses to a literal, anything else stays a token
	/// sequence.
	pub fn from_tokens(tokens: Vec<Token>) -> Self {
		if !tokens
			.iter()
			.all(|token| matches!(token.kind, TokenKind::Text(_)))
		{
			return Value::Tokens(tokens);
		}

		let text = tokens
			.iter()
			.filter_map(|token| {
				match &token.kind {
					TokenKind::Text(text) => Some(text.as_str()),
					_ => None,
				}
			})
			.collect();
		Value::Literal(text)
	}

	pub fn as_literal(&self) -> Option<&str> {
		match self {
			Value::Literal(text) => Some(text),
			Value::Tokens(_) => None,
		}
	}

	/// Lenient string form: tags, comments and newlines are dropped.
	pub fn to_text(&self) -> String {
		match self {
			Value::Literal(text) => text.clone(),
			Value::Tokens(tokens) => tokens_to_string(tokens),
		}
	}

	/// Strict string form, `None` when the value still holds a tag token.
	pub fn to_strict_text(&self) -> Option<String> {
		match self {
			Value::Literal(text) => Some(text.clone()),
			Value::Tokens(tokens) => {
				tokens_to_string_with(tokens, StringifyOptions {
					strict: true,
					retain_newlines: true,
				})
			}
		}
	}

	/// A value needs the attribute pipeline when it carries tag tokens, such
	/// as a template call nested inside an attribute.
	pub fn needs_expansion(&self) -> bool {
		match self {
			Value::Literal(_) => false,
			Value::Tokens(tokens) => tokens.iter().any(Token::is_tag),
		}
	}

	/// View the value as a token sequence.
	pub fn into_tokens(self) -> Vec<Token> {
		match self {
			Value::Literal(text) if text.is_empty() => vec![],
			Value::Literal(text) => vec![Token::text(text)],
			Value::Tokens(tokens) => tokens,
		}
	}

	/// Text and comment only sequences are treated as plain wikitext.
	pub fn is_simple(&self) -> bool {
		match self {
			Value::Literal(_) => true,
			Value::Tokens(tokens) => {
				tokens.iter().all(|token| {
					matches!(
						token.kind,
						TokenKind::Text(_) | TokenKind::Comment(_) | TokenKind::Newline
					)
				})
			}
		}
	}
}

/// A key/value pair with optional source offsets for each side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kv {
	pub k: Value,
	pub v: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub src_offsets: Option<KvSourceRange>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ksrc: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub vsrc: Option<String>,
}

impl Kv {
	pub fn new(k: impl Into<Value>, v: impl Into<Value>) -> Self {
		Self {
			k: k.into(),
			v: v.into(),
			..Default::default()
		}
	}

	#[must_use]
	pub fn with_offsets(mut self, offsets: KvSourceRange) -> Self {
		self.src_offsets = Some(offsets);
		self
	}

	pub fn key_offset(&self) -> Option<SourceRange> {
		self.src_offsets.map(|offsets| offsets.key)
	}

	pub fn value_offset(&self) -> Option<SourceRange> {
		self.src_offsets.map(|offsets| offsets.value)
	}

	/// A positional argument has an empty key whose source range ends where
	/// the value begins.
	pub fn is_positional(&self) -> bool {
		self.k.to_text().trim().is_empty()
			&& self
				.src_offsets
				.is_some_and(|offsets| offsets.has_zero_width_key())
	}

	/// Whether either side still holds unexpanded tag tokens.
	pub fn needs_expansion(&self) -> bool {
		self.k.needs_expansion() || self.v.needs_expansion()
	}

	/// The first pair whose literal key, trimmed, equals `key`. Keys which are
	/// token sequences never match.
	pub fn lookup_kv<'a>(kvs: &'a [Kv], key: &str) -> Option<&'a Kv> {
		kvs.iter()
			.find(|kv| kv.k.as_literal().is_some_and(|k| k.trim() == key))
	}

	pub fn lookup<'a>(kvs: &'a [Kv], key: &str) -> Option<&'a Value> {
		Self::lookup_kv(kvs, key).map(|kv| &kv.v)
	}
}

/// Options for [`tokens_to_string_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StringifyOptions {
	/// Fail on the first tag token instead of skipping it.
	pub strict: bool,
	/// Emit `\n` for newline tokens instead of dropping them.
	pub retain_newlines: bool,
}

/// Flatten tokens to text. Tags, comments and newlines are dropped.
pub fn tokens_to_string(tokens: &[Token]) -> String {
	tokens_to_string_with(tokens, StringifyOptions::default()).unwrap_or_default()
}

/// Flatten tokens to text. Returns `None` in strict mode when a tag token is
/// encountered.
pub fn tokens_to_string_with(tokens: &[Token], options: StringifyOptions) -> Option<String> {
	let mut out = String::new();

	for token in tokens {
		match &token.kind {
			TokenKind::Text(text) => out.push_str(text),
			TokenKind::Newline if options.retain_newlines => out.push('\n'),
			TokenKind::Newline | TokenKind::Comment(_) | TokenKind::EndOfInput => {}
			TokenKind::TagOpen(_) | TokenKind::TagClose(_) | TokenKind::SelfClosing(_) => {
				if options.strict {
					return None;
				}
			}
		}
	}

	Some(out)
}

fn is_trim_transparent(token: &Token) -> bool {
	matches!(token.kind, TokenKind::Newline | TokenKind::Comment(_))
}

/// Strip leading and trailing whitespace from a token sequence. Newlines and
/// comments at either edge are dropped, whitespace inside edge text tokens is
/// trimmed.
pub fn token_trim(tokens: &mut Vec<Token>) {
	while let Some(first) = tokens.first_mut() {
		if is_trim_transparent(first) {
			tokens.remove(0);
			continue;
		}

		if let TokenKind::Text(text) = &mut first.kind {
			let trimmed = text.trim_start();
			if trimmed.is_empty() {
				tokens.remove(0);
				continue;
			}
			*text = trimmed.to_string();
		}

		break;
	}

	while let Some(last) = tokens.last_mut() {
		if is_trim_transparent(last) {
			tokens.pop();
			continue;
		}

		if let TokenKind::Text(text) = &mut last.kind {
			let trimmed = text.trim_end();
			if trimmed.is_empty() {
				tokens.pop();
				continue;
			}
			text.truncate(trimmed.len());
		}

		break;
	}
}

/// Collapse key/value pairs into a map keyed by the trimmed, lowercased key.
/// The first occurrence of a key wins.
pub fn kv_to_hash(kvs: &[Kv], convert_values_to_string: bool) -> BTreeMap<String, Value> {
	let mut hash = BTreeMap::new();

	for kv in kvs {
		let key = kv.k.to_text().trim().to_lowercase();

		if hash.contains_key(&key) {
			continue;
		}

		let value = if convert_values_to_string {
			Value::Literal(kv.v.to_text().trim().to_string())
		} else {
			let mut tokens = kv.v.clone().into_tokens();
			token_trim(&mut tokens);
			Value::Tokens(tokens)
		};

		hash.insert(key, value);
	}

	hash
}

const BLOCK_TAGS: [&str; 27] = [
	"blockquote",
	"body",
	"caption",
	"center",
	"dd",
	"div",
	"dl",
	"dt",
	"h1",
	"h2",
	"h3",
	"h4",
	"h5",
	"h6",
	"hr",
	"li",
	"ol",
	"p",
	"pre",
	"table",
	"tbody",
	"td",
	"tfoot",
	"th",
	"thead",
	"tr",
	"ul",
];

const TABLE_TAGS: [&str; 7] = ["caption", "table", "tbody", "td", "th", "thead", "tr"];

pub fn is_block_tag(name: &str) -> bool {
	BLOCK_TAGS.contains(&name.to_ascii_lowercase().as_str())
}

pub fn is_table_tag(name: &str) -> bool {
	TABLE_TAGS.contains(&name.to_ascii_lowercase().as_str())
}
