//! Conversion of source offsets between byte, char and UCS-2 units.
//!
//! Offsets that land inside a multi-unit character are rounded up to the next
//! character boundary and offsets past the end are clamped to the end.

use crate::config::OffsetType;

fn unit_width(ch: char, unit: OffsetType) -> usize {
	match unit {
		OffsetType::Byte => ch.len_utf8(),
		OffsetType::Char => 1,
		OffsetType::Ucs2 => ch.len_utf16(),
	}
}

/// Number of characters that start strictly before `offset` (measured in
/// `unit`).
fn chars_before(text: &str, offset: usize, unit: OffsetType) -> usize {
	let mut position = 0;
	let mut count = 0;

	for ch in text.chars() {
		if position >= offset {
			break;
		}
		position += unit_width(ch, unit);
		count += 1;
	}

	count
}

fn width_of_chars(text: &str, count: usize, unit: OffsetType) -> usize {
	text.chars().take(count).map(|ch| unit_width(ch, unit)).sum()
}

/// Convert a single offset in `text` from one unit to another.
pub fn convert_offset(text: &str, from: OffsetType, to: OffsetType, offset: usize) -> usize {
	let count = chars_before(text, offset, from);
	width_of_chars(text, count, to)
}

/// Convert every offset in `offsets` in place.
pub fn convert_offsets(text: &str, from: OffsetType, to: OffsetType, offsets: &mut [usize]) {
	for offset in offsets.iter_mut() {
		*offset = convert_offset(text, from, to, *offset);
	}
}
