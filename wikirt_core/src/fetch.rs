use std::collections::HashMap;
use std::task::Poll;

use crate::WikiError;
use crate::WikiResult;

/// An in-flight fetch of page source.
pub trait PendingFetch {
	/// Poll for completion. Implementations must keep returning
	/// `Poll::Pending` until the content, or a failure, is available.
	fn poll(&mut self) -> Poll<WikiResult<String>>;
}

/// Injected capability for loading the source of transcluded pages.
///
/// Fetches are always asynchronous from the pipeline's point of view: the
/// returned handle is polled until it resolves.
pub trait TemplateSource {
	fn fetch(&self, title: &str) -> Box<dyn PendingFetch>;
}

/// A template source backed by an in-memory map of titles to wikitext.
///
/// Each title can be given an artificial latency, expressed as the number of
/// polls that return `Pending` before the content is handed out.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
	pages: HashMap<String, String>,
	delays: HashMap<String, usize>,
}

impl MemorySource {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_page(mut self, title: impl Into<String>, text: impl Into<String>) -> Self {
		self.insert(title, text);
		self
	}

	#[must_use]
	pub fn with_delay(mut self, title: impl Into<String>, polls: usize) -> Self {
		self.delays.insert(title.into(), polls);
		self
	}

	pub fn insert(&mut self, title: impl Into<String>, text: impl Into<String>) {
		self.pages.insert(title.into(), text.into());
	}
}

impl TemplateSource for MemorySource {
	fn fetch(&self, title: &str) -> Box<dyn PendingFetch> {
		let result = self.pages.get(title).cloned().ok_or_else(|| {
			WikiError::Fetch {
				title: title.to_string(),
				reason: "page does not exist".to_string(),
			}
		});

		Box::new(MemoryFetch {
			result: Some(result),
			remaining: self.delays.get(title).copied().unwrap_or(0),
		})
	}
}

struct MemoryFetch {
	result: Option<WikiResult<String>>,
	remaining: usize,
}

impl PendingFetch for MemoryFetch {
	fn poll(&mut self) -> Poll<WikiResult<String>> {
		if self.remaining > 0 {
			self.remaining -= 1;
			return Poll::Pending;
		}

		match self.result.take() {
			Some(result) => Poll::Ready(result),
			None => {
				Poll::Ready(Err(WikiError::Fetch {
					title: String::new(),
					reason: "fetch polled after completion".to_string(),
				}))
			}
		}
	}
}
