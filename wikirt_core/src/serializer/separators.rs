use std::fmt::Display;

use tracing::debug;

/// Bounds on the number of newlines that may separate two serialized units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraint {
	pub min: usize,
	pub max: usize,
}

impl Constraint {
	pub const fn new(min: usize, max: usize) -> Self {
		Self { min, max }
	}

	/// Combine two constraints on the same boundary. An empty intersection is
	/// widened so that `max` equals `min`.
	#[must_use]
	pub fn intersect(self, other: Self) -> Self {
		let min = self.min.max(other.min);
		let max = self.max.min(other.max);

		if min > max {
			debug!(%self, %other, "separator constraints conflict, widening");
			return Self::new(min, min);
		}

		Self::new(min, max)
	}

	pub fn contains(&self, newlines: usize) -> bool {
		(self.min..=self.max).contains(&newlines)
	}
}

impl Display for Constraint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{{min: {}, max: {}}}", self.min, self.max)
	}
}

/// Intersect two optional constraints. `None` means the side has no opinion.
pub fn combine(first: Option<Constraint>, second: Option<Constraint>) -> Option<Constraint> {
	match (first, second) {
		(Some(first), Some(second)) => Some(first.intersect(second)),
		(first, second) => first.or(second),
	}
}

/// The original source position and text of a chunk about to be emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkSpan {
	pub start: Option<usize>,
	pub end: Option<usize>,
	/// The chunk does not reproduce its original source.
	pub modified: bool,
}

impl ChunkSpan {
	pub const fn new(start: Option<usize>, end: Option<usize>, modified: bool) -> Self {
		Self {
			start,
			end,
			modified,
		}
	}
}

/// Tracks the boundary between the last emitted chunk and the next one.
#[derive(Debug, Default)]
pub struct SeparatorState {
	/// Intersection of every constraint registered for the pending boundary.
	constraint: Option<Constraint>,
	/// End offset in the original source of the last emitted chunk.
	src_start: Option<usize>,
	prev_modified: bool,
	/// Handlers whose constraints apply to the pending boundary.
	contributors: Vec<&'static str>,
}

impl SeparatorState {
	pub fn new(src_start: Option<usize>) -> Self {
		Self {
			src_start,
			..Default::default()
		}
	}

	/// Register a constraint on the pending boundary.
	pub fn add_constraint(&mut self, constraint: Option<Constraint>, contributor: &'static str) {
		if constraint.is_none() {
			return;
		}

		self.constraint = combine(self.constraint, constraint);
		self.contributors.push(contributor);
	}

	pub fn constraint(&self) -> Option<Constraint> {
		self.constraint
	}

	/// Produce the separator for the pending boundary and start a new one
	/// after `next`.
	///
	/// Whitespace found between the two chunks in the original source is kept
	/// verbatim when neither chunk changed and otherwise adjusted to fit the
	/// constraint. Without original whitespace the minimum number of newlines
	/// is emitted.
	pub fn resolve(&mut self, source: Option<&str>, next: ChunkSpan, default: Constraint) -> String {
		let constraint = self.constraint.take().unwrap_or(default);
		let contributors = std::mem::take(&mut self.contributors);

		let original = match (source, self.src_start, next.start) {
			(Some(source), Some(start), Some(end)) if start <= end => {
				source
					.get(start..end)
					.filter(|gap| gap.chars().all(char::is_whitespace))
			}
			_ => None,
		};

		let separator = match original {
			Some(gap) if !self.prev_modified && !next.modified => gap.to_string(),
			Some(gap) => {
				let newlines = gap.matches('\n').count();
				if constraint.contains(newlines) {
					gap.to_string()
				} else if newlines < constraint.min {
					format!("{gap}{}", "\n".repeat(constraint.min - newlines))
				} else {
					"\n".repeat(constraint.max)
				}
			}
			None => "\n".repeat(constraint.min),
		};

		if original.is_none() && constraint.min > 0 {
			debug!(%constraint, ?contributors, "synthesized separator");
		}

		self.src_start = next.end;
		self.prev_modified = next.modified;
		separator
	}
}
