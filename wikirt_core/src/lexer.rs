use std::collections::VecDeque;
use std::ops::Range;

use logos::Logos;

use crate::WikiResult;
use crate::source_range::KvSourceRange;
use crate::source_range::SourceRange;
use crate::tokens::Kv;
use crate::tokens::Token;
use crate::tokens::TokenKind;
use crate::tokens::Value;

/// Raw tokens produced by logos. Braces are lexed one at a time so that runs
/// like `}}}}}` can be shared between nested calls.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
enum RawToken {
	#[token("<!--", comment_body)]
	Comment,
	#[token("{")]
	BraceOpen,
	#[token("}")]
	BraceClose,
	#[token("|")]
	Pipe,
	#[token("!")]
	Bang,
	#[token("-")]
	Dash,
	#[token("=")]
	Equals,
	#[token("\n")]
	Newline,
	#[token("<")]
	AngleOpen,
	#[regex(r"[^{}|=!\n<-]+")]
	Text,
}

/// Extend a comment to its closing `-->`, or to the end of input when the
/// comment is never closed.
fn comment_body(lex: &mut logos::Lexer<RawToken>) {
	let rest = lex.remainder();
	match rest.find("-->") {
		Some(index) => lex.bump(index + 3),
		None => lex.bump(rest.len()),
	}
}

/// Context states for the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexerContext {
	/// Top level of a document or template body. Table syntax is recognised
	/// at the start of a line.
	Document,
	/// An inline fragment such as a parameter value. Only calls and comments
	/// are syntax.
	Fragment,
}

/// One pipe-separated part of a call.
struct CallPart {
	start: usize,
	end: usize,
	/// Offset of the `=` separating a named argument.
	eq: Option<usize>,
	key_tokens: Vec<Token>,
	tokens: Vec<Token>,
}

impl CallPart {
	fn new(start: usize) -> Self {
		Self {
			start,
			end: start,
			eq: None,
			key_tokens: vec![],
			tokens: vec![],
		}
	}

	/// The target of a call. Its value is empty and sits right after the key.
	fn into_target_kv(self) -> Kv {
		Kv::new(Value::from_tokens(self.tokens), "").with_offsets(KvSourceRange::new(
			SourceRange::new(self.start, self.end),
			SourceRange::point(self.end),
		))
	}

	fn into_argument_kv(self) -> Kv {
		match self.eq {
			Some(eq) => {
				Kv::new(Value::from_tokens(self.key_tokens), Value::from_tokens(self.tokens)).with_offsets(
					KvSourceRange::new(
						SourceRange::new(self.start, eq),
						SourceRange::new(eq + 1, self.end),
					),
				)
			}
			None => {
				Kv::new("", Value::from_tokens(self.tokens)).with_offsets(KvSourceRange::new(
					SourceRange::point(self.start),
					SourceRange::new(self.start, self.end),
				))
			}
		}
	}
}

/// Walks the logos token stream with context-dependent rules, building
/// pipeline tokens with source ranges.
struct TokenWalker<'a> {
	/// The text being tokenized.
	source: &'a str,
	/// Offset of `source` within the enclosing document.
	base_offset: usize,
	/// The collected raw tokens and their byte spans.
	raw_tokens: Vec<(Result<RawToken, ()>, Range<usize>)>,
	/// Current index into `raw_tokens`.
	cursor: usize,
	/// Whether the cursor sits at the start of a line.
	line_start: bool,
	/// Whether a table is open.
	in_table: bool,
	/// The cell tag of the current line, which enables `||` and `!!`.
	cell_line: Option<&'static str>,
}

impl<'a> TokenWalker<'a> {
	fn new(source: &'a str, base_offset: usize) -> Self {
		let raw_tokens: Vec<_> = RawToken::lexer(source).spanned().collect();

		Self {
			source,
			base_offset,
			raw_tokens,
			cursor: 0,
			line_start: true,
			in_table: false,
			cell_line: None,
		}
	}

	/// Unrecognised input is treated as text.
	fn raw_at(&self, index: usize) -> Option<RawToken> {
		self.raw_tokens
			.get(index)
			.map(|(result, _)| result.unwrap_or(RawToken::Text))
	}

	fn peek(&self) -> Option<RawToken> {
		self.raw_at(self.cursor)
	}

	fn span_at(&self, index: usize) -> Range<usize> {
		self.raw_tokens
			.get(index)
			.map_or(self.source.len()..self.source.len(), |(_, span)| {
				span.clone()
			})
	}

	/// Absolute offset of the start of the raw token under the cursor.
	fn offset(&self) -> usize {
		self.base_offset + self.span_at(self.cursor).start
	}

	/// Absolute offset just past the last consumed raw token.
	fn consumed_offset(&self) -> usize {
		match self.cursor.checked_sub(1) {
			Some(index) => self.base_offset + self.span_at(index).end,
			None => self.base_offset,
		}
	}

	/// Text of an absolute range inside the walked source.
	fn text_of(&self, range: SourceRange) -> &'a str {
		let start = range.start.saturating_sub(self.base_offset);
		let end = range.end.saturating_sub(self.base_offset);
		self.source.get(start..end).unwrap_or_default()
	}

	/// Count consecutive raw tokens of `kind` starting at the cursor.
	fn run_of(&self, kind: RawToken) -> usize {
		(self.cursor..self.raw_tokens.len())
			.take_while(|index| self.raw_at(*index) == Some(kind))
			.count()
	}

	/// Consume `width` raw tokens, returning their combined range and text.
	fn advance(&mut self, width: usize) -> (SourceRange, &'a str) {
		let start = self.offset();
		self.cursor += width;
		let range = SourceRange::new(start, self.consumed_offset());
		(range, self.text_of(range))
	}

	fn take_text(&mut self, tokens: &mut Vec<Token>) {
		let (range, text) = self.advance(1);
		push_text(tokens, text, range);
	}

	fn take_comment(&mut self) -> Token {
		let (range, src) = self.advance(1);
		let body = src.strip_prefix("<!--").unwrap_or(src);
		let body = body.strip_suffix("-->").unwrap_or(body);
		Token::comment(body).with_tsr(range).with_src(src)
	}

	/// Take a nested call at the cursor, or a single `{` as text.
	fn take_call_or_brace(&mut self, tokens: &mut Vec<Token>) {
		match self.try_call() {
			Some(call) => tokens.push(call),
			None => self.take_text(tokens),
		}
	}

	/// Try to read a `{{template}}` or `{{{templatearg}}}` call at the cursor.
	/// On failure the cursor is restored and `None` returned.
	fn try_call(&mut self) -> Option<Token> {
		let saved = self.cursor;
		let (name, width) = match self.run_of(RawToken::BraceOpen) {
			0 | 1 | 4 => return None,
			3 => ("templatearg", 3),
			_ => ("template", 2),
		};
		let start = self.offset();
		self.cursor += width;

		let mut parts = vec![];
		let mut part = CallPart::new(self.offset());

		loop {
			let Some(raw) = self.peek() else {
				self.cursor = saved;
				return None;
			};

			match raw {
				RawToken::BraceClose => {
					let run = self.run_of(RawToken::BraceClose);
					if run >= width {
						part.end = self.offset();
						self.cursor += width;
						parts.push(part);
						break;
					}
					for _ in 0..run {
						self.take_text(&mut part.tokens);
					}
				}
				RawToken::BraceOpen => self.take_call_or_brace(&mut part.tokens),
				RawToken::Pipe => {
					part.end = self.offset();
					self.cursor += 1;
					let next = CallPart::new(self.offset());
					parts.push(std::mem::replace(&mut part, next));
				}
				RawToken::Equals if name == "template" && !parts.is_empty() && part.eq.is_none() => {
					part.eq = Some(self.offset());
					part.key_tokens = std::mem::take(&mut part.tokens);
					self.cursor += 1;
				}
				RawToken::Comment => {
					let comment = self.take_comment();
					part.tokens.push(comment);
				}
				_ => self.take_text(&mut part.tokens),
			}
		}

		let range = SourceRange::new(start, self.consumed_offset());
		let mut parts = parts.into_iter();
		let target = parts.next()?;

		if tokens_are_blank(&target.tokens) {
			self.cursor = saved;
			return None;
		}

		let mut attribs = vec![target.into_target_kv()];
		attribs.extend(parts.map(CallPart::into_argument_kv));

		Some(
			Token::self_closing(name, attribs)
				.with_tsr(range)
				.with_src(self.text_of(range)),
		)
	}

	/// Collect the rest of the line as inline tokens, leaving the newline.
	fn collect_line(&mut self) -> Vec<Token> {
		let mut tokens = vec![];

		while let Some(raw) = self.peek() {
			match raw {
				RawToken::Newline => break,
				RawToken::BraceOpen => self.take_call_or_brace(&mut tokens),
				RawToken::Comment => tokens.push(self.take_comment()),
				_ => self.take_text(&mut tokens),
			}
		}

		tokens
	}

	/// Emit an opening table-structure tag whose source runs from `start` to
	/// the end of its attribute line.
	fn push_attributed_tag(&mut self, tokens: &mut Vec<Token>, name: &str, start: usize) {
		let attribute_tokens = self.collect_line();
		let range = SourceRange::new(start, self.consumed_offset().max(start));
		tokens.push(
			Token::tag_open(name, parse_attributes(&attribute_tokens))
				.with_tsr(range)
				.with_src(self.text_of(range)),
		);
	}

	fn push_marker(&mut self, tokens: &mut Vec<Token>, token: Token, width: usize) {
		let (range, src) = self.advance(width);
		tokens.push(token.with_tsr(range).with_src(src));
	}

	/// Handle table syntax at the start of a line. Returns `false` when the
	/// line does not start with table syntax.
	fn process_table_line(&mut self, tokens: &mut Vec<Token>) -> bool {
		let next = self.raw_at(self.cursor + 1);

		match (self.peek(), next) {
			(Some(RawToken::BraceOpen), Some(RawToken::Pipe))
				if !self.in_table && self.run_of(RawToken::BraceOpen) == 1 =>
			{
				let start = self.offset();
				self.cursor += 2;
				self.in_table = true;
				self.push_attributed_tag(tokens, "table", start);
				true
			}
			(Some(RawToken::Pipe), Some(RawToken::BraceClose)) if self.in_table => {
				self.in_table = false;
				self.push_marker(tokens, Token::tag_close("table"), 2);
				true
			}
			(Some(RawToken::Pipe), Some(RawToken::Dash)) if self.in_table => {
				let start = self.offset();
				self.cursor += 1;
				self.cursor += self.run_of(RawToken::Dash);
				self.push_attributed_tag(tokens, "tr", start);
				true
			}
			(Some(RawToken::Pipe), _) if self.in_table => {
				self.cell_line = Some("td");
				self.push_marker(tokens, Token::tag_open("td", vec![]), 1);
				true
			}
			(Some(RawToken::Bang), _) if self.in_table => {
				self.cell_line = Some("th");
				self.push_marker(tokens, Token::tag_open("th", vec![]), 1);
				true
			}
			_ => false,
		}
	}

	/// Main processing loop.
	fn process(&mut self, context: LexerContext) -> Vec<Token> {
		let mut tokens = vec![];

		while let Some(raw) = self.peek() {
			if raw == RawToken::Newline {
				self.push_marker(&mut tokens, Token::newline(), 1);
				self.line_start = true;
				self.cell_line = None;
				continue;
			}

			let line_start = std::mem::replace(&mut self.line_start, false);
			if line_start
				&& context == LexerContext::Document
				&& self.process_table_line(&mut tokens)
			{
				continue;
			}

			let next = self.raw_at(self.cursor + 1);
			match (raw, self.cell_line, next) {
				(RawToken::Pipe, Some(cell), Some(RawToken::Pipe)) => {
					self.push_marker(&mut tokens, Token::tag_open(cell, vec![]), 2);
				}
				(RawToken::Bang, Some("th"), Some(RawToken::Bang)) => {
					self.push_marker(&mut tokens, Token::tag_open("th", vec![]), 2);
				}
				(RawToken::BraceOpen, ..) => self.take_call_or_brace(&mut tokens),
				(RawToken::Comment, ..) => tokens.push(self.take_comment()),
				_ => self.take_text(&mut tokens),
			}
		}

		tokens
	}
}

/// Append text, merging with a directly preceding text token.
fn push_text(tokens: &mut Vec<Token>, text: &str, range: SourceRange) {
	if let Some(last) = tokens.last_mut()
		&& let Some(tsr) = last.data.tsr
		&& tsr.end == range.start
		&& let TokenKind::Text(existing) = &mut last.kind
	{
		existing.push_str(text);
		last.data.tsr = Some(SourceRange::new(tsr.start, range.end));
		return;
	}

	tokens.push(Token::text(text).with_tsr(range));
}

fn tokens_are_blank(tokens: &[Token]) -> bool {
	tokens.iter().all(|token| {
		match &token.kind {
			TokenKind::Text(text) => text.trim().is_empty(),
			TokenKind::Comment(_) | TokenKind::Newline => true,
			_ => false,
		}
	})
}

/// An attribute-line element: a single character or an opaque token.
enum Atom {
	Char(char),
	Token(Token),
}

impl Atom {
	fn is_space(&self) -> bool {
		matches!(self, Atom::Char(ch) if ch.is_whitespace())
	}

	fn is_char(&self, expected: char) -> bool {
		matches!(self, Atom::Char(ch) if *ch == expected)
	}
}

#[derive(Default)]
struct ValueBuilder {
	text: String,
	tokens: Vec<Token>,
}

impl ValueBuilder {
	fn push(&mut self, atom: Atom) {
		match atom {
			Atom::Char(ch) => self.text.push(ch),
			Atom::Token(token) => {
				self.flush();
				self.tokens.push(token);
			}
		}
	}

	fn flush(&mut self) {
		if !self.text.is_empty() {
			self.tokens.push(Token::text(std::mem::take(&mut self.text)));
		}
	}

	fn is_empty(&self) -> bool {
		self.text.is_empty() && self.tokens.is_empty()
	}

	fn finish(mut self) -> Value {
		if self.tokens.is_empty() {
			return Value::Literal(self.text);
		}
		self.flush();
		Value::Tokens(self.tokens)
	}
}

fn skip_spaces(atoms: &mut VecDeque<Atom>) {
	while atoms.front().is_some_and(Atom::is_space) {
		atoms.pop_front();
	}
}

/// Move atoms into `builder` until `stop` matches the next atom.
fn take_until(atoms: &mut VecDeque<Atom>, builder: &mut ValueBuilder, stop: impl Fn(&Atom) -> bool) {
	while atoms.front().is_some_and(|atom| !stop(atom)) {
		if let Some(atom) = atoms.pop_front() {
			builder.push(atom);
		}
	}
}

/// Parse `name=value`, `name="value"` and bare `name` attributes from the
/// tokens of an attribute line. Template calls may appear inside names and
/// values.
pub fn parse_attributes(tokens: &[Token]) -> Vec<Kv> {
	let mut atoms = VecDeque::new();
	for token in tokens {
		match &token.kind {
			TokenKind::Text(text) => atoms.extend(text.chars().map(Atom::Char)),
			TokenKind::Comment(_) | TokenKind::Newline => {}
			_ => atoms.push_back(Atom::Token(token.clone())),
		}
	}

	let mut attribs = vec![];

	loop {
		skip_spaces(&mut atoms);
		if atoms.is_empty() {
			break;
		}

		let mut name = ValueBuilder::default();
		take_until(&mut atoms, &mut name, |atom| {
			atom.is_space() || atom.is_char('=')
		});
		skip_spaces(&mut atoms);

		let mut value = ValueBuilder::default();
		if atoms.front().is_some_and(|atom| atom.is_char('=')) {
			atoms.pop_front();
			skip_spaces(&mut atoms);

			let quote = match atoms.front() {
				Some(Atom::Char(ch @ ('"' | '\''))) => Some(*ch),
				_ => None,
			};

			match quote {
				Some(quote) => {
					atoms.pop_front();
					take_until(&mut atoms, &mut value, |atom| atom.is_char(quote));
					atoms.pop_front();
				}
				None => take_until(&mut atoms, &mut value, Atom::is_space),
			}
		}

		// a stray `=` without a name
		if name.is_empty() {
			continue;
		}

		attribs.push(Kv::new(name.finish(), value.finish()));
	}

	attribs
}

/// Tokenize a complete document or template body. The stream always ends
/// with an end-of-input token.
#[allow(clippy::unnecessary_wraps)]
pub fn tokenize(source: &str) -> WikiResult<Vec<Token>> {
	let mut tokens = TokenWalker::new(source, 0).process(LexerContext::Document);
	tokens.push(Token::end_of_input().with_tsr(SourceRange::point(source.len())));
	Ok(tokens)
}

/// Tokenize an inline fragment of a larger source. Offsets are shifted by
/// `base_offset`, table syntax is not recognised and no end-of-input token is
/// appended.
#[allow(clippy::unnecessary_wraps)]
pub fn tokenize_fragment(text: &str, base_offset: usize) -> WikiResult<Vec<Token>> {
	Ok(TokenWalker::new(text, base_offset).process(LexerContext::Fragment))
}
