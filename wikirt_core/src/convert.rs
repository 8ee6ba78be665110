use std::rc::Rc;

use tracing::debug;

use crate::WikiResult;
use crate::config::WikiConfig;
use crate::fetch::TemplateSource;
use crate::frame::Frame;
use crate::lexer::tokenize;
use crate::pipeline::Env;
use crate::pipeline::TokenTransformManager;
use crate::serializer::WikitextSerializer;
use crate::tree::Document;
use crate::tree_builder::TreeBuilder;

/// Convert wikitext to a document tree, expanding every transclusion through
/// the environment's template source.
pub fn parse_document(env: &Env, source: &str) -> WikiResult<Document> {
	let tokens = tokenize(source)?;
	let manager = TokenTransformManager::with_default_stages(Frame::root(source));
	debug!(stages = ?manager.stage_names(), tokens = tokens.len(), "expanding document");

	let tokens = manager.process(env, tokens)?;
	TreeBuilder::build(tokens, source)
}

/// Convert a document tree back to wikitext. With a `previous` version the
/// output reuses its source for everything the edit did not touch.
pub fn serialize_document(env: &Env, document: &Document, previous: Option<&Document>) -> WikiResult<String> {
	let serializer = WikitextSerializer::new(env.config());

	match previous {
		Some(previous) => serializer.serialize_selser(document, previous),
		None => serializer.serialize(document),
	}
}

/// An environment with the default configuration around `source`.
pub fn default_env(source: Rc<dyn TemplateSource>) -> Env {
	Env::new(WikiConfig::default(), source)
}
