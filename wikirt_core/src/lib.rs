//! `wikirt_core` converts wikitext to an annotated document tree and back
//! without losing anything. Serializing an unedited tree reproduces the
//! original source byte for byte, and serializing an edited tree changes the
//! source only where the edit happened.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Wikitext
//!   → Lexer (tokens with source ranges, template calls as `template` tags)
//!   → Token transform manager (rank-ordered stages, order-preserving async)
//!       → Attribute expansion (nested pipelines per key / value)
//!       → Template expansion (Frame chain, template source fetch)
//!       → Template encapsulator (marker pair + argument info)
//!   → Tree builder (Document + DataStore with dsr per node)
//!   … edit …
//!   → DOM diff against the previous tree
//!   → Wikitext serializer (per-node handlers, separator constraints,
//!     unmodified subtrees copied from the original source)
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from `wikirt.toml`.
//! - [`pipeline`]: The token transform pipeline: manager, stages,
//!   attribute expansion, template handling and encapsulation.
//! - [`serializer`]: The separator constraint serializer and the tree diff
//!   behind selective serialization.
//!
//! ## Key Types
//!
//! - [`Token`] and [`Kv`]: Markup tokens and their key/value attributes,
//!   each optionally carrying a source range.
//! - [`Frame`]: One level of template expansion context.
//! - [`TokenTransformManager`]: Applies stages to a token stream, keeping
//!   output in input order however long individual stages take.
//! - [`ArgInfo`]: The public record of how a call was written.
//! - [`DataStore`]: Out-of-band node data keyed by node id.
//! - [`WikitextSerializer`]: Writes a [`Document`] back to wikitext.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use wikirt_core::MemorySource;
//! use wikirt_core::default_env;
//! use wikirt_core::parse_document;
//! use wikirt_core::serialize_document;
//!
//! let source = MemorySource::new().with_page("Template:Greeting", "Hello, {{{1}}}!");
//! let env = default_env(Rc::new(source));
//!
//! let wikitext = "{{Greeting|world}}\n\nSome text.\n";
//! let document = parse_document(&env, wikitext).unwrap();
//! assert_eq!(serialize_document(&env, &document, None).unwrap(), wikitext);
//! ```

pub use config::*;
pub use convert::*;
pub use data_store::*;
pub use error::*;
pub use fetch::*;
pub use frame::*;
pub use html::*;
pub use offsets::*;
pub use pipeline::*;
pub use serializer::*;
pub use source_range::*;
pub use tokens::*;
pub use tree::*;
pub use tree_builder::*;

pub mod config;
mod convert;
mod data_store;
#[allow(unused_assignments)]
mod error;
mod fetch;
mod frame;
mod html;
pub mod lexer;
mod offsets;
pub mod pipeline;
pub mod serializer;
mod source_range;
mod tokens;
mod tree;
mod tree_builder;

#[cfg(test)]
mod __fixtures;
#[cfg(test)]
mod __tests;
