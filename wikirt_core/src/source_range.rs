use serde::Deserialize;
use serde::Serialize;

use crate::WikiError;
use crate::WikiResult;

/// A half-open byte range into a wikitext source. Serialized as
/// `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct SourceRange {
	pub start: usize,
	pub end: usize,
}

impl SourceRange {
	pub const fn new(start: usize, end: usize) -> Self {
		Self { start, end }
	}

	/// A zero width range at `offset`.
	pub const fn point(offset: usize) -> Self {
		Self {
			start: offset,
			end: offset,
		}
	}

	pub const fn len(&self) -> usize {
		self.end.saturating_sub(self.start)
	}

	pub const fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Extract the text covered by this range. Offsets that fall outside the
	/// source or off a character boundary break the tokenizer contract.
	pub fn substr<'a>(&self, source: &'a str) -> WikiResult<&'a str> {
		source.get(self.start..self.end).ok_or_else(|| {
			WikiError::malformed(
				"SourceRange::substr",
				format!(
					"range {}..{} does not fit a source of {} bytes",
					self.start,
					self.end,
					source.len()
				),
			)
		})
	}

	/// Shift both ends by `delta` bytes.
	#[must_use]
	pub const fn offset(self, delta: usize) -> Self {
		Self {
			start: self.start + delta,
			end: self.end + delta,
		}
	}
}

impl From<[usize; 2]> for SourceRange {
	fn from([start, end]: [usize; 2]) -> Self {
		Self { start, end }
	}
}

impl From<SourceRange> for [usize; 2] {
	fn from(range: SourceRange) -> Self {
		[range.start, range.end]
	}
}

/// Source offsets for both halves of a key/value pair. Serialized as
/// `[key_start, key_end, value_start, value_end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[usize; 4]", into = "[usize; 4]")]
pub struct KvSourceRange {
	pub key: SourceRange,
	pub value: SourceRange,
}

impl KvSourceRange {
	pub const fn new(key: SourceRange, value: SourceRange) -> Self {
		Self { key, value }
	}

	/// A zero width key that ends exactly where the value begins marks a
	/// positional parameter, never a named parameter with an empty name.
	pub const fn has_zero_width_key(&self) -> bool {
		self.key.end == self.value.start
	}
}

impl From<[usize; 4]> for KvSourceRange {
	fn from([key_start, key_end, value_start, value_end]: [usize; 4]) -> Self {
		Self::new(
			SourceRange::new(key_start, key_end),
			SourceRange::new(value_start, value_end),
		)
	}
}

impl From<KvSourceRange> for [usize; 4] {
	fn from(range: KvSourceRange) -> Self {
		[
			range.key.start,
			range.key.end,
			range.value.start,
			range.value.end,
		]
	}
}

/// The source span of a tree node: its outer range plus the widths of its
/// opening and closing markup. Serialized as
/// `[start, end, open_width, close_width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[usize; 4]", into = "[usize; 4]")]
pub struct DomSourceRange {
	pub start: usize,
	pub end: usize,
	pub open_width: usize,
	pub close_width: usize,
}

impl From<[usize; 4]> for DomSourceRange {
	fn from([start, end, open_width, close_width]: [usize; 4]) -> Self {
		Self::new(start, end, open_width, close_width)
	}
}

impl From<DomSourceRange> for [usize; 4] {
	fn from(range: DomSourceRange) -> Self {
		[range.start, range.end, range.open_width, range.close_width]
	}
}

impl DomSourceRange {
	pub const fn new(start: usize, end: usize, open_width: usize, close_width: usize) -> Self {
		Self {
			start,
			end,
			open_width,
			close_width,
		}
	}

	/// Offset right after the opening markup.
	pub const fn inner_start(&self) -> usize {
		self.start + self.open_width
	}

	/// Offset right before the closing markup.
	pub const fn inner_end(&self) -> usize {
		self.end.saturating_sub(self.close_width)
	}

	pub const fn outer(&self) -> SourceRange {
		SourceRange::new(self.start, self.end)
	}
}
