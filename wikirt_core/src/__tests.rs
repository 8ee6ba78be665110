use std::collections::BTreeMap;
use std::rc::Rc;
use std::task::Poll;

use rstest::rstest;
use similar_asserts::assert_eq;
use tracing_test::traced_test;

use super::__fixtures::*;
use super::*;
use crate::lexer::tokenize;
use crate::serializer::ChunkSpan;
use crate::serializer::Constraint;
use crate::serializer::DiffMark;
use crate::serializer::SeparatorState;
use crate::serializer::changed_span;
use crate::serializer::diff_documents;

// --- Tokens and attributes ---

#[test]
fn kv_lookup_trims_literal_keys() {
	let kvs = vec![Kv::new(" a ", "1"), Kv::new("a", "2")];
	assert_eq!(Kv::lookup(&kvs, "a"), Some(&Value::from("1")));
	assert_eq!(Kv::lookup(&kvs, "b"), None);
}

#[test]
fn kv_lookup_skips_token_keys() {
	let kvs = vec![Kv::new(Value::Tokens(vec![Token::text("a")]), "1")];
	assert_eq!(Kv::lookup(&kvs, "a"), None);
}

#[rstest]
#[case::strings(true, Value::from("x"))]
#[case::tokens(false, Value::Tokens(vec![Token::text("x")]))]
fn kv_to_hash_keeps_first_lowercased_key(#[case] to_string: bool, #[case] expected: Value) {
	let kvs = vec![Kv::new(" Name ", " x "), Kv::new("name", "y")];
	let hash = kv_to_hash(&kvs, to_string);

	assert_eq!(hash.len(), 1);
	assert_eq!(hash.get("name"), Some(&expected));
}

#[test]
fn tokens_to_string_drops_markup() {
	let tokens = vec![
		Token::text("a"),
		Token::newline(),
		Token::comment("hidden"),
		Token::tag_open("b", vec![]),
		Token::text("c"),
	];

	assert_eq!(tokens_to_string(&tokens), "ac");
	assert_eq!(
		tokens_to_string_with(&tokens, StringifyOptions {
			strict: true,
			retain_newlines: true,
		}),
		None
	);
	assert_eq!(
		tokens_to_string_with(&[Token::text("a"), Token::newline(), Token::text("b")], StringifyOptions {
			strict: true,
			retain_newlines: true,
		}),
		Some("a\nb".to_string())
	);
}

#[test]
fn token_trim_strips_edges() {
	let mut tokens = vec![
		Token::newline(),
		Token::text("  a "),
		Token::comment("x"),
		Token::text(" b  "),
		Token::newline(),
	];
	token_trim(&mut tokens);

	assert_eq!(tokens, vec![
		Token::text("a "),
		Token::comment("x"),
		Token::text(" b"),
	]);
}

#[test]
fn token_trim_removes_blank_edges() {
	let mut tokens = vec![Token::text("   "), Token::comment("x"), Token::text("\t")];
	token_trim(&mut tokens);
	assert!(tokens.is_empty());
}

#[test]
fn ranks_order_between_stages() {
	assert!(TemplateHandler::RANK < AttributeExpander::RANK);
	assert_eq!(TemplateHandler::RANK, TemplateArgHandler::RANK);
	assert_eq!(Rank::new(0.1 + 0.2), Rank::new(0.3));
}

// --- Lexer ---

#[rstest]
#[case::paragraph("p", true, false)]
#[case::upper_case_cell("TD", true, true)]
#[case::caption("caption", true, true)]
#[case::span("span", false, false)]
fn classifies_tag_names(#[case] name: &str, #[case] block: bool, #[case] table: bool) {
	assert_eq!(is_block_tag(name), block);
	assert_eq!(is_table_tag(name), table);
}

#[test]
fn lexer_records_call_offsets() -> WikiResult<()> {
	let tokens = tokenize("{{foo|a|bar = 1}}")?;
	assert_eq!(tokens.len(), 2);

	let call = &tokens[0];
	assert_eq!(call.name(), Some("template"));
	assert_eq!(call.data.tsr, Some(SourceRange::new(0, 17)));
	assert_eq!(call.data.src.as_deref(), Some("{{foo|a|bar = 1}}"));

	let attribs = &call.tag().map(|tag| tag.attribs.clone()).unwrap_or_default();
	assert_eq!(attribs.len(), 3);
	assert_eq!(attribs[0].k, Value::from("foo"));
	assert_eq!(attribs[0].src_offsets, Some(KvSourceRange::from([2, 5, 5, 5])));
	assert_eq!(attribs[1].v, Value::from("a"));
	assert_eq!(attribs[1].src_offsets, Some(KvSourceRange::from([6, 6, 6, 7])));
	assert!(attribs[1].is_positional());
	assert_eq!(attribs[2].k, Value::from("bar "));
	assert_eq!(attribs[2].v, Value::from(" 1"));
	assert_eq!(attribs[2].src_offsets, Some(KvSourceRange::from([8, 12, 13, 15])));
	assert!(!attribs[2].is_positional());
	assert_eq!(attribs[2].key_offset(), Some(SourceRange::new(8, 12)));
	assert_eq!(attribs[2].value_offset(), Some(SourceRange::new(13, 15)));
	assert!(tokens[1].is_end_of_input());

	Ok(())
}

#[test]
fn lexer_shares_brace_runs_between_calls() -> WikiResult<()> {
	let tokens = tokenize("{{a|{{{1}}}}}")?;
	assert_eq!(tokens.len(), 2);

	let value = tokens[0]
		.tag()
		.and_then(|tag| tag.attribs.get(1))
		.map(|kv| kv.v.clone())
		.unwrap_or_default();
	let Value::Tokens(inner) = value else {
		panic!("expected a nested call, got {value:?}");
	};
	assert_eq!(inner.len(), 1);
	assert_eq!(inner[0].name(), Some("templatearg"));
	assert_eq!(inner[0].data.src.as_deref(), Some("{{{1}}}"));

	Ok(())
}

#[test]
fn lexer_produces_table_tokens() -> WikiResult<()> {
	let tokens = tokenize("{|\n|a||b\n|}")?;
	let shapes: Vec<String> = tokens
		.iter()
		.map(|token| format!("{} {}", token.kind.type_name(), token.name().unwrap_or("")))
		.collect();

	assert_eq!(shapes, vec![
		"TagTk table",
		"NlTk ",
		"TagTk td",
		"string ",
		"TagTk td",
		"string ",
		"NlTk ",
		"EndTagTk table",
		"EOFTk ",
	]);
	assert_eq!(tokens[2].data.src.as_deref(), Some("|"));
	assert_eq!(tokens[4].data.src.as_deref(), Some("||"));
	assert_eq!(tokens[7].data.tsr, Some(SourceRange::new(9, 11)));

	Ok(())
}

#[rstest]
#[case::closed("a<!--b-->c", "b", "<!--b-->")]
#[case::unterminated("a<!-- b", " b", "<!-- b")]
fn lexer_keeps_comment_source(
	#[case] source: &str,
	#[case] body: &str,
	#[case] src: &str,
) -> WikiResult<()> {
	let tokens = tokenize(source)?;
	assert_eq!(tokens[1].kind, TokenKind::Comment(body.to_string()));
	assert_eq!(tokens[1].data.src.as_deref(), Some(src));

	Ok(())
}

#[test]
fn lexer_leaves_blank_targets_as_text() -> WikiResult<()> {
	let tokens = tokenize("{{ }}")?;
	assert_eq!(tokens[0].kind, TokenKind::Text("{{ }}".to_string()));
	Ok(())
}

// --- Offsets ---

#[rstest]
#[case::byte_to_char(OffsetType::Byte, OffsetType::Char, [0, 21, 4, 13, 9, 18], [0, 14, 4, 9, 8, 11])]
#[case::byte_to_ucs2(OffsetType::Byte, OffsetType::Ucs2, [0, 21, 4, 13, 9, 18], [0, 16, 4, 10, 8, 13])]
#[case::char_to_byte(OffsetType::Char, OffsetType::Byte, [0, 14, 4, 9, 8, 11], [0, 21, 4, 13, 9, 18])]
#[case::ucs2_to_char(OffsetType::Ucs2, OffsetType::Char, [0, 16, 4, 10, 8, 13], [0, 14, 4, 9, 8, 11])]
fn convert_offsets_between_units(
	#[case] from: OffsetType,
	#[case] to: OffsetType,
	#[case] mut offsets: [usize; 6],
	#[case] expected: [usize; 6],
) {
	convert_offsets("foo bár 💩💩 baz", from, to, &mut offsets);
	assert_eq!(offsets, expected);
}

#[test]
fn convert_offset_rounds_up_inside_characters() {
	// byte 10 sits inside the first pile of poo
	assert_eq!(convert_offset("foo bár 💩💩 baz", OffsetType::Byte, OffsetType::Char, 10), 9);
	assert_eq!(convert_offset("abc", OffsetType::Char, OffsetType::Byte, 99), 3);
}

// --- Frames ---

#[test]
fn frame_binds_positional_and_named_arguments() -> WikiResult<()> {
	let call = call_token("{{x|a| k = v |b}}")?;
	let args = call
		.tag()
		.map(|tag| tag.attribs[1..].to_vec())
		.unwrap_or_default();
	let frame = Frame::root("").child("Template:X", "", args, DEFAULT_MAX_TEMPLATE_DEPTH)?;

	let expected: BTreeMap<String, Value> = [
		("1".to_string(), Value::from("a")),
		("2".to_string(), Value::from("b")),
		("k".to_string(), Value::from("v")),
	]
	.into_iter()
	.collect();
	assert_eq!(frame.bindings(), expected);
	assert_eq!(frame.arg(" k "), Some(vec![Token::text("v")]));
	assert_eq!(frame.depth(), 1);
	assert!(!frame.is_root());

	Ok(())
}

#[test]
fn frame_rejects_loops_and_depth() -> WikiResult<()> {
	let root = Frame::root("");
	let child = root.child("Template:A", "", vec![], 1)?;

	let looped = root
		.child("Template:A", "", vec![], 5)?
		.child("Template:A", "", vec![], 5);
	assert!(matches!(looped, Err(WikiError::TemplateLoop { title }) if title == "Template:A"));

	let deep = child.child("Template:B", "", vec![], 1);
	assert!(matches!(deep, Err(WikiError::TemplateDepth { limit: 1 })));

	Ok(())
}

#[rstest]
#[case::template("foo bar", "Template:Foo bar", "./Template:Foo_bar")]
#[case::namespaced("template:x", "Template:X", "./Template:X")]
#[case::main_namespace(":Main_Page", "Main Page", "./Main_Page")]
fn classify_template_targets(
	#[case] text: &str,
	#[case] title: &str,
	#[case] href: &str,
) -> WikiResult<()> {
	assert_eq!(CallTarget::classify(text)?, CallTarget::Template {
		title: title.to_string(),
		href: href.to_string(),
	});
	Ok(())
}

#[rstest]
#[case::function("#invoke:x")]
#[case::invalid("a|b")]
fn classify_rejects_ambiguous_targets(#[case] text: &str) {
	assert!(matches!(
		CallTarget::classify(text),
		Err(WikiError::AmbiguousTarget(_))
	));
}

// --- Token transform manager ---

#[rstest]
#[case::in_order(vec!["0", "0", "0"])]
#[case::slow_first(vec!["3", "0", "2", "1", "0"])]
#[case::slow_last(vec!["0", "1", "4"])]
#[case::mixed(vec!["2", "5", "1", "0", "3", "0", "1"])]
fn manager_preserves_order_with_deferred_stages(#[case] delays: Vec<&str>) -> WikiResult<()> {
	let env = test_env();
	let mut manager = TokenTransformManager::new(Frame::root(""));
	manager.add_stage(Rc::new(SuffixStage {
		name: "Bang",
		rank: 2.0,
		suffix: "!",
	}));
	manager.add_stage(Rc::new(DelayStage));

	let tokens = delays.iter().map(|delay| Token::text(*delay)).collect();
	let output = manager.process(&env, tokens)?;

	let expected: Vec<String> = delays.iter().map(|delay| format!("{delay}!")).collect();
	assert_eq!(texts(&output), expected);

	Ok(())
}

#[test]
fn manager_runs_stages_by_rank_then_registration() -> WikiResult<()> {
	let env = test_env();
	let mut manager = TokenTransformManager::new(Frame::root(""));
	for (name, rank, suffix) in [("a", 2.0, "-a"), ("b", 2.0, "-b"), ("c", 1.5, "-c")] {
		manager.add_stage(Rc::new(SuffixStage { name, rank, suffix }));
	}

	assert_eq!(manager.stage_names(), vec!["c", "a", "b"]);
	let output = manager.process(&env, vec![Token::text("x")])?;
	assert_eq!(texts(&output), vec!["x-c-a-b"]);

	Ok(())
}

#[test]
fn manager_skips_stages_below_token_rank() -> WikiResult<()> {
	let env = test_env();
	let mut manager = TokenTransformManager::new(Frame::root(""));
	manager.add_stage(Rc::new(SuffixStage {
		name: "Bang",
		rank: 2.0,
		suffix: "!",
	}));

	let mut processed = Token::text("late");
	processed.rank = Some(Rank::new(3.0));
	let mut fresh = Token::text("early");
	fresh.rank = Some(Rank::new(1.0));

	let output = manager.process(&env, vec![processed, fresh])?;
	assert_eq!(texts(&output), vec!["late", "early!"]);
	assert_eq!(output[1].rank, Some(Rank::new(2.0)));

	Ok(())
}

#[test]
fn manager_continues_fanned_out_tokens_with_later_stages() -> WikiResult<()> {
	let env = test_env();
	let mut manager = TokenTransformManager::new(Frame::root(""));
	manager.add_stage(Rc::new(SplitStage));
	manager.add_stage(Rc::new(SuffixStage {
		name: "Bang",
		rank: 2.0,
		suffix: "!",
	}));

	let output = manager.process(&env, vec![Token::text("a b"), Token::text("c")])?;
	assert_eq!(texts(&output), vec!["a!", "b!", "c!"]);

	Ok(())
}

#[test]
fn manager_reports_lost_continuations() {
	let config = WikiConfig {
		max_poll_rounds: 5,
		..WikiConfig::default()
	};
	let env = Env::new(config, Rc::new(MemorySource::new()));
	let mut manager = TokenTransformManager::new(Frame::root(""));
	manager.add_stage(Rc::new(StallStage));

	let result = manager.process(&env, vec![
		Token::text("a"),
		Token::text("stall"),
		Token::text("b"),
	]);
	assert!(matches!(result, Err(WikiError::LostContinuation { slot: 1 })));
}

#[test]
fn pipeline_run_flushes_ready_prefix() -> WikiResult<()> {
	let env = test_env();
	let mut manager = TokenTransformManager::new(Frame::root(""));
	manager.add_stage(Rc::new(DelayStage));

	let run = manager.start(&env, vec![
		Token::text("0"),
		Token::text("2"),
		Token::text("0"),
	])?;
	assert_eq!(texts(run.output()), vec!["0"]);
	assert_eq!(run.waiting(), 1);
	assert_eq!(run.first_waiting(), Some(1));
	assert!(!run.is_complete());

	Ok(())
}

#[traced_test]
#[test]
fn slow_fetches_time_out_inline() {
	let config = WikiConfig {
		max_poll_rounds: 3,
		..WikiConfig::default()
	};
	let source = templates()
		.with_page("Template:Slow", "S")
		.with_delay("Template:Slow", 50);
	let env = Env::new(config, Rc::new(source));
	let wikitext = "before {{Slow}} after\n";

	let document = parse_document(&env, wikitext).unwrap_or_else(|e| panic!("parse: {e}"));
	let html = to_html(&document, HtmlOptions::default()).unwrap_or_else(|e| panic!("html: {e}"));
	assert_eq!(
		html,
		"<body><p>before <span typeof=\"mw:Transclusion\" about=\"#mwt1\"><span \
		 typeof=\"mw:Error\">failed to fetch `Template:Slow`: timed out</span></span> \
		 after</p></body>"
	);
	assert!(logs_contain("template fetch timed out"));

	let serialized = serialize_document(&env, &document, None).unwrap_or_else(|e| panic!("serialize: {e}"));
	assert_eq!(serialized, wikitext);
}

#[test]
fn nested_slow_fetches_time_out_before_the_run() -> WikiResult<()> {
	let config = WikiConfig {
		max_poll_rounds: 8,
		..WikiConfig::default()
	};
	let source = templates()
		.with_page("Template:Wrap", "[{{Slow}}]")
		.with_page("Template:Slow", "S")
		.with_delay("Template:Slow", 50);
	let env = Env::new(config, Rc::new(source));

	let document = parse_document(&env, "{{Wrap}}\n")?;
	assert_eq!(
		document.root.text_content(),
		"[failed to fetch `Template:Slow`: timed out]"
	);

	Ok(())
}

#[test]
fn unreachable_sources_time_out() -> WikiResult<()> {
	let config = WikiConfig {
		max_poll_rounds: 3,
		..WikiConfig::default()
	};
	let env = Env::new(config, Rc::new(UnreachableSource));

	let document = parse_document(&env, "text {{Anything}}")?;
	assert_eq!(
		document.root.text_content(),
		"text failed to fetch `Template:Anything`: timed out"
	);

	Ok(())
}

// --- Template expansion ---

#[test]
fn slow_templates_keep_their_position() -> WikiResult<()> {
	let source = templates()
		.with_page("Template:Slow", "S")
		.with_page("Template:Fast", "F")
		.with_delay("Template:Slow", 3);
	let env = env_with(source);

	let document = parse_document(&env, "{{Slow}} middle {{Fast}}\n")?;
	assert_eq!(document.root.text_content(), "S middle F");

	let abouts: Vec<&str> = transclusions(&document)
		.iter()
		.filter_map(|node| node.attr("about"))
		.collect();
	// the fast call finished first and was numbered first
	assert_eq!(abouts, vec!["#mwt2", "#mwt1"]);

	Ok(())
}

#[test]
fn nested_templates_see_their_own_arguments() -> WikiResult<()> {
	let env = test_env();
	let document = parse_document(&env, "{{Outer|x}}")?;

	assert_eq!(document.root.text_content(), "[<x>]");
	assert_eq!(transclusions(&document).len(), 1);
	assert_eq!(document.store.transclusion_depth("#mwt2"), Some(0));
	assert_eq!(document.store.transclusion_depth("#mwt1"), Some(1));

	Ok(())
}

#[rstest]
#[case::default("{{Fallback}}", "nobody")]
#[case::named("{{Fallback|name = Ann }}", "Ann")]
#[case::root_frame("{{{1}}}", "{{{1}}}")]
#[case::lowercase("{{lc: ABC }}", "abc")]
#[case::uppercase("{{uc:abc}}", "ABC")]
#[case::if_true("{{#if: x | yes | no }}", "yes")]
#[case::if_false("{{#if: | yes | no }}", "no")]
#[case::unknown_function("{{#foo:x}}", "{{#foo:x}}")]
fn expands_calls(#[case] source: &str, #[case] expected: &str) -> WikiResult<()> {
	let env = test_env();
	let document = parse_document(&env, source)?;
	assert_eq!(document.root.text_content(), expected);

	Ok(())
}

#[test]
fn template_loops_render_inline_errors() -> WikiResult<()> {
	let env = test_env();
	let document = parse_document(&env, "{{Loop}}")?;

	let error = document
		.nodes()
		.into_iter()
		.find(|node| node.has_typeof("mw:Error"))
		.map(Node::text_content)
		.unwrap_or_default();
	assert_eq!(error, "template loop detected: `Template:Loop`");
	assert_eq!(document.root.text_content(), format!("a{error}b"));

	Ok(())
}

#[traced_test]
#[test]
fn missing_templates_render_inline_errors() {
	let env = test_env();
	let document = parse_document(&env, "{{Missing}}\n").unwrap_or_else(|e| panic!("parse: {e}"));

	let html = to_html(&document, HtmlOptions::default()).unwrap_or_else(|e| panic!("html: {e}"));
	assert_eq!(
		html,
		"<body><p><span typeof=\"mw:Transclusion\" about=\"#mwt1\"><span \
		 typeof=\"mw:Error\">failed to fetch `Template:Missing`: page does not \
		 exist</span></span></p></body>"
	);
	assert!(logs_contain("template expansion failed"));
}

#[traced_test]
#[test]
fn encapsulation_is_logged() {
	let env = test_env();
	parse_document(&env, "{{lc:A}}").unwrap_or_else(|e| panic!("parse: {e}"));
	assert!(logs_contain("encapsulated transclusion"));
}

// --- Attribute expansion ---

fn table_attribs(source: &str) -> WikiResult<Vec<Kv>> {
	tokenize(source)?
		.into_iter()
		.find(|token| token.name() == Some("table"))
		.and_then(|token| token.tag().map(|tag| tag.attribs.clone()))
		.ok_or_else(|| WikiError::malformed("table_attribs", format!("no table in `{source}`")))
}

fn attribute_pairs(attribs: &[Kv]) -> Vec<(String, String)> {
	attribs
		.iter()
		.map(|kv| (kv.k.to_text(), kv.v.to_text()))
		.collect()
}

fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
	expected
		.iter()
		.map(|(k, v)| ((*k).to_string(), (*v).to_string()))
		.collect()
}

fn slow_env() -> Env {
	env_with(
		templates()
			.with_page("Template:Slow", "wide")
			.with_delay("Template:Slow", 2),
	)
}

#[traced_test]
#[test]
fn attributes_expand_synchronously_without_slow_calls() {
	let env = test_env();
	let source = "{| class=\"{{lc:WIDE}}\" id=x\n|}";
	let attribs = table_attribs(source).unwrap_or_else(|e| panic!("attribs: {e}"));
	let manager = AttributeTransformManager::new(Frame::root(source));

	let expansion = manager
		.expand(&env, attribs)
		.unwrap_or_else(|e| panic!("expand: {e}"));
	let AttributeExpansion::Ready(expanded) = expansion else {
		panic!("expected a synchronous expansion");
	};

	assert_eq!(attribute_pairs(&expanded), pairs(&[("class", "wide"), ("id", "x")]));
	// transclusion markers do not survive into the value
	assert_eq!(expanded[0].v, Value::from("wide"));
	assert!(logs_contain("attribute expansion completed synchronously"));
}

#[test]
fn plain_attributes_pass_through_unchanged() -> WikiResult<()> {
	let env = test_env();
	let source = "{| class=wikitable\n|}";
	let attribs = table_attribs(source)?;
	let manager = AttributeTransformManager::new(Frame::root(source));

	let AttributeExpansion::Ready(expanded) = manager.expand(&env, attribs.clone())? else {
		panic!("expected a synchronous expansion");
	};
	assert_eq!(expanded, attribs);

	Ok(())
}

#[test]
fn attributes_wait_for_slow_calls_and_keep_their_pairs() -> WikiResult<()> {
	let env = slow_env();
	let source = "{| {{lc:DATA}}=\"{{Slow}}\" id=\"{{lc:X}}\" title=plain\n|}";
	let attribs = table_attribs(source)?;
	let manager = AttributeTransformManager::new(Frame::root(source));

	let AttributeExpansion::Pending(mut pending) = manager.expand(&env, attribs)? else {
		panic!("expected the slow value to defer the expansion");
	};
	assert!(pending.poll(&env).is_pending());

	let mut expanded = None;
	for _ in 0..10 {
		if let Poll::Ready(result) = pending.poll(&env) {
			expanded = Some(result?);
			break;
		}
	}

	assert_eq!(
		attribute_pairs(&expanded.unwrap_or_default()),
		pairs(&[("data", "wide"), ("id", "x"), ("title", "plain")])
	);

	Ok(())
}

#[test]
fn expanded_tags_commit_attributes_once_resolved() -> WikiResult<()> {
	let env = slow_env();
	let source = "{| class=\"{{Slow}}\" id=\"{{lc:X}}\"\n|}";
	let table = tokenize(source)?
		.into_iter()
		.find(|token| token.name() == Some("table"))
		.ok_or_else(|| WikiError::malformed("test", "no table"))?;
	let frame = Frame::root(source);
	let cx = StageContext {
		env: &env,
		frame: &frame,
	};

	let StageOutcome::Pending(mut deferred) = AttributeExpander.transform(table.clone(), &cx)? else {
		panic!("expected the tag to wait on its attributes");
	};
	assert!(deferred.poll(&env).is_pending());

	let mut tokens = vec![];
	for _ in 0..10 {
		if let Poll::Ready(result) = deferred.poll(&env) {
			tokens = result?;
			break;
		}
	}

	assert_eq!(tokens.len(), 1);
	assert_eq!(tokens[0].name(), Some("table"));
	assert_eq!(tokens[0].data.tsr, table.data.tsr);
	assert_eq!(tokens[0].data.src, table.data.src);
	let committed = tokens[0]
		.tag()
		.map(|tag| tag.attribs.clone())
		.unwrap_or_default();
	assert_eq!(attribute_pairs(&committed), pairs(&[("class", "wide"), ("id", "x")]));

	Ok(())
}

#[test]
fn expanding_tags_hold_back_later_tokens() -> WikiResult<()> {
	let env = slow_env();
	let source = "{| class=\"{{Slow}}\"\n|a\n|}";
	let manager = TokenTransformManager::with_default_stages(Frame::root(source));

	let run = manager.start(&env, tokenize(source)?)?;
	assert!(run.output().is_empty());
	assert_eq!(run.first_waiting(), Some(0));

	let tokens = manager.process(&env, tokenize(source)?)?;
	let class = tokens
		.iter()
		.find(|token| token.name() == Some("table"))
		.and_then(|token| token.tag())
		.and_then(|tag| tag.attribute_text("class"));
	assert_eq!(class.as_deref(), Some("wide"));
	assert_eq!(texts(&tokens), vec!["a"]);

	Ok(())
}

// --- Template encapsulation ---

fn arg_info(source: &str) -> WikiResult<ArgInfo> {
	let env = test_env();
	let frame = Frame::root(source);
	let token = call_token(source)?;
	let target = call_target(&token)?;
	TemplateEncapsulator::new(&env, &frame, &token, &target).arg_info()
}

#[test]
fn encapsulation_wraps_content_in_markers() -> WikiResult<()> {
	let env = test_env();
	let source = "{{Greeting|world}}";
	let manager = TokenTransformManager::with_default_stages(Frame::root(source));
	let tokens = manager.process(&env, tokenize(source)?)?;

	let start = &tokens[0];
	assert!(start.has_typeof("mw:Transclusion"));
	assert_eq!(
		start.tag().and_then(|tag| tag.attribute_text("about")),
		Some("#mwt1".to_string())
	);
	assert_eq!(start.data.tsr, Some(SourceRange::new(0, 18)));
	assert_eq!(start.data.src.as_deref(), Some(source));

	let end = &tokens[tokens.len() - 2];
	assert!(end.has_typeof("mw:Transclusion/End"));
	assert_eq!(end.data.tsr, Some(SourceRange::point(18)));
	assert!(tokens[tokens.len() - 1].is_end_of_input());

	let content = &tokens[1..tokens.len() - 2];
	assert_eq!(tokens_to_string(content), "Hello, world!");
	assert!(content.iter().all(|token| token.data.tsr.is_none()));

	let json = start.data.tmp.tplarginfo.clone().unwrap_or_default();
	insta::assert_snapshot!(json, @r#"{"dict":{"target":{"wt":"Greeting","href":"./Template:Greeting"},"params":{"1":{"wt":"world"}}},"paramInfos":[{"k":"1","srcOffsets":[11,11,11,16]}]}"#);

	Ok(())
}

#[test]
fn positional_arguments_are_numbered_around_named_ones() -> WikiResult<()> {
	let info = arg_info("{{foo|a|bar=1|b}}")?;

	let keys: Vec<(&str, bool)> = info
		.param_infos
		.iter()
		.map(|info| (info.k.as_str(), info.named))
		.collect();
	assert_eq!(keys, vec![("1", false), ("bar", true), ("2", false)]);

	let params: Vec<(&str, &str)> = info
		.dict
		.params
		.iter()
		.map(|(key, param)| (key.as_str(), param.wt.as_str()))
		.collect();
	assert_eq!(params, vec![("1", "a"), ("2", "b"), ("bar", "1")]);

	Ok(())
}

#[rstest]
#[case::named("{{foo|x=1|x=2}}", "x", "1")]
#[case::positional_then_named("{{foo|a|1=b}}", "1", "a")]
fn first_occurrence_of_a_parameter_wins(
	#[case] source: &str,
	#[case] key: &str,
	#[case] wt: &str,
) -> WikiResult<()> {
	let info = arg_info(source)?;

	assert_eq!(info.param_infos.len(), 1);
	assert_eq!(info.param_infos[0].k, key);
	assert_eq!(info.dict.params.get(key).map(|param| param.wt.as_str()), Some(wt));

	Ok(())
}

#[rstest]
#[case::padded("{{foo| bar = baz }}", Some([" ", " ", " ", " "]))]
#[case::tight("{{foo|bar=baz}}", None)]
#[case::empty_value("{{foo|bar=}}", None)]
#[case::blank_value("{{foo|bar= }}", Some(["", "", "", " "]))]
#[case::positional("{{foo| a }}", None)]
fn records_parameter_spacing(
	#[case] source: &str,
	#[case] expected: Option<[&str; 4]>,
) -> WikiResult<()> {
	let info = arg_info(source)?;
	let spc = info.param_infos[0].spc.clone();

	assert_eq!(spc, expected.map(|quad| quad.map(ToString::to_string)));

	Ok(())
}

#[test]
fn positional_values_keep_their_whitespace() -> WikiResult<()> {
	let info = arg_info("{{foo| a }}")?;
	assert_eq!(info.dict.params.get("1").map(|param| param.wt.as_str()), Some(" a "));
	Ok(())
}

#[test]
fn keys_with_markup_keep_their_source() -> WikiResult<()> {
	let info = arg_info("{{foo|<!--c-->bar=1}}")?;
	let param = info.dict.params.get("bar");

	assert_eq!(param.and_then(|param| param.key.clone()), Some(ParamKey {
		wt: "<!--c-->bar".to_string(),
	}));
	assert_eq!(param.map(|param| param.wt.as_str()), Some("1"));

	Ok(())
}

#[rstest]
#[case::template("{{foo bar}}", "foo bar", None, Some("./Template:Foo_bar"))]
#[case::function("{{lc:ABC}}", "lc:ABC", Some("lc"), None)]
fn target_is_a_function_or_a_page(
	#[case] source: &str,
	#[case] wt: &str,
	#[case] function: Option<&str>,
	#[case] href: Option<&str>,
) -> WikiResult<()> {
	let info = arg_info(source)?;

	assert_eq!(info.dict.target, TemplateTarget {
		wt: wt.to_string(),
		function: function.map(ToString::to_string),
		href: href.map(ToString::to_string),
	});

	Ok(())
}

#[test]
fn parameters_render_to_html_when_enabled() -> WikiResult<()> {
	let env = html_env();
	let document = parse_document(&env, "{{Greeting|plain|http://example.com/a'b|{{lc:X}}}}")?;

	let span = transclusions(&document)[0];
	let params = document
		.data(span.id())
		.and_then(|data| data.mw.as_ref())
		.and_then(DataMw::template)
		.map(|template| template.params.clone())
		.unwrap_or_default();
	let html = |key: &str| {
		params
			.get(key)
			.and_then(|param| param.html.clone())
			.unwrap_or_default()
	};

	assert_eq!(html("1"), "plain");
	assert_eq!(html("2"), "http://example.com/a'b");
	let nested = html("3");
	assert!(nested.starts_with("<span typeof=\"mw:Transclusion\""), "{nested}");
	assert!(nested.ends_with(">x</span>"), "{nested}");
	assert!(!nested.contains("dsr"), "{nested}");
	assert_eq!(document.root.text_content(), "Hello, plain!");

	Ok(())
}

#[test]
fn url_parameters_with_markup_render_as_links() -> WikiResult<()> {
	let env = html_env();
	let frame = Frame::root("");
	let token = Token::self_closing("template", vec![
		Kv::new("Greeting", ""),
		Kv::new(
			"link",
			Value::Tokens(vec![
				Token::text("http://example.com/a'b"),
				Token::self_closing("br", vec![]),
			]),
		),
	]);
	let target = CallTarget::classify("Greeting")?;

	let job = TemplateEncapsulator::new(&env, &frame, &token, &target).encapsulate(vec![])?;
	let html = job
		.arg_info()
		.dict
		.params
		.get("link")
		.and_then(|param| param.html.clone());
	assert_eq!(
		html.as_deref(),
		Some("<a rel='mw:ExtLink' href='http://example.com/a&#39;b'>http://example.com/a'b</a>")
	);

	Ok(())
}

#[test]
fn parameters_skip_html_by_default() -> WikiResult<()> {
	let env = test_env();
	let document = parse_document(&env, "{{Greeting|plain}}")?;
	let span = transclusions(&document)[0];
	let html = document
		.data(span.id())
		.and_then(|data| data.mw.as_ref())
		.and_then(DataMw::template)
		.and_then(|template| template.params.get("1"))
		.and_then(|param| param.html.clone());

	assert_eq!(html, None);

	Ok(())
}

// --- Tree builder and data store ---

#[test]
fn paragraphs_split_on_blank_lines() -> WikiResult<()> {
	let env = test_env();
	let document = parse_document(&env, "foo\nbar\n\nbaz")?;

	let paragraphs: Vec<&Node> = document.root.children().iter().collect();
	assert_eq!(paragraphs.len(), 2);
	assert_eq!(paragraphs[0].text_content(), "foo\nbar");
	assert_eq!(paragraphs[1].text_content(), "baz");
	assert_eq!(
		document
			.data(paragraphs[0].id())
			.and_then(|data| data.parsoid.dsr),
		Some(DomSourceRange::new(0, 7, 0, 0))
	);

	Ok(())
}

#[test]
fn block_templates_become_divs() -> WikiResult<()> {
	let env = test_env();
	let document = parse_document(&env, "{{Table}}\n\ntext\n")?;

	let children = document.root.children();
	assert_eq!(children[0].name(), Some("div"));
	assert!(children[0].has_typeof("mw:Transclusion"));
	assert_eq!(children[0].children()[0].name(), Some("table"));
	assert_eq!(children[1].name(), Some("p"));

	Ok(())
}

#[test]
fn tables_record_their_markup() -> WikiResult<()> {
	let env = test_env();
	let document = parse_document(&env, "{| class=\"wikitable\"\n|a||b\n")?;

	let table = document
		.find_element("table")
		.ok_or_else(|| WikiError::malformed("test", "no table"))?;
	assert_eq!(table.attr("class"), Some("wikitable"));

	let data = document.data(table.id()).cloned().unwrap_or_default();
	assert_eq!(data.parsoid.start_tag_src.as_deref(), Some("{| class=\"wikitable\""));
	assert!(data.parsoid.auto_inserted_end);

	let row = &table.children()[0];
	assert!(
		document
			.data(row.id())
			.is_some_and(|data| data.parsoid.auto_inserted_start)
	);
	assert_eq!(row.children().len(), 2);

	Ok(())
}

#[test]
fn data_store_assigns_sequential_ids() {
	let mut store = DataStore::new();
	let first = store.put(NodeData::default());
	let second = store.put(NodeData::default());

	assert_eq!((first, second), (NodeId(0), NodeId(1)));
	assert_eq!(store.len(), 2);

	let data = NodeData {
		parsoid: DataParsoid {
			src: Some("x".to_string()),
			..DataParsoid::default()
		},
		mw: None,
	};
	store.set(first, data.clone());
	assert_eq!(store.get(first), Some(&data));
	assert_ne!(DataStore::new().generation(), store.generation());
}

#[test]
fn page_bundle_exports_converted_offsets() -> WikiResult<()> {
	let env = test_env();
	let source = "{|\n|é\n|}\n";
	let mut document = parse_document(&env, source)?;

	let root = document.root.clone();
	let ids = document.store.export_page_bundle(&root, source, OffsetType::Char)?;
	let mut exported: Vec<String> = ids.into_values().collect();
	exported.sort();
	assert_eq!(exported, vec!["mw0", "mw1", "mw2", "mw3"]);

	let bundle = document.store.page_bundle();
	assert_eq!(bundle.parsoid.counter, Some(3));
	assert_eq!(bundle.parsoid.ids["mw0"]["dsr"], serde_json::json!([0, 9, 0, 0]));
	assert_eq!(bundle.parsoid.ids["mw1"]["dsr"], serde_json::json!([0, 8, 2, 2]));
	assert_eq!(bundle.parsoid.ids["mw3"]["dsr"], serde_json::json!([3, 5, 1, 0]));
	assert_eq!(bundle.parsoid.ids["mw3"]["startTagSrc"], serde_json::json!("|"));
	assert!(bundle.mw.ids.is_empty());

	Ok(())
}

#[test]
fn page_bundle_exports_transclusion_data() -> WikiResult<()> {
	let env = test_env();
	let source = "{{lc:A}}";
	let mut document = parse_document(&env, source)?;

	let root = document.root.clone();
	document.store.export_page_bundle(&root, source, OffsetType::Byte)?;

	let mw = &document.store.page_bundle().mw.ids["mw2"];
	assert_eq!(mw["parts"][0]["template"]["target"]["function"], serde_json::json!("lc"));

	let previous = document.store.replace_page_bundle(PageBundle::default());
	assert_eq!(previous.parsoid.counter, Some(2));
	assert_eq!(document.store.page_bundle().parsoid.counter, Some(-1));

	Ok(())
}

#[test]
fn html_escapes_text_and_attributes() -> WikiResult<()> {
	assert_eq!(escape_text("a < b & c > d"), "a &lt; b &amp; c &gt; d");
	assert_eq!(escape_attribute("say \"hi\""), "say &quot;hi&quot;");

	let env = test_env();
	let document = parse_document(&env, "{|\n|a\n|}")?;
	assert_eq!(
		to_html(&document, HtmlOptions::default())?,
		"<body><table><tr><td>a</td></tr></table></body>"
	);

	Ok(())
}

// --- Serialization ---

#[rstest]
#[case::plain("plain text\n")]
#[case::paragraphs("foo\nbar\n\nbaz")]
#[case::blank_lines("\n\nleading blank lines\n\n\n")]
#[case::whitespace_line("  \n\nfoo")]
#[case::simple_table("{|\n|a\n|}\n")]
#[case::empty_table("{|\n|}\n")]
#[case::table("{| class=\"wikitable\"\n|-\n! head !! more\n|-\n| a || b\n|}\n")]
#[case::unclosed_table("{|\n|a\n")]
#[case::comments("<!-- note -->\n\ntext <!-- inline --> more\n")]
#[case::unterminated_comment("unterminated <!-- comment")]
#[case::template("{{Greeting|world}}\n")]
#[case::spaced_template("before {{Greeting| name = x }} after\n")]
#[case::multiline_template("{{Greeting\n|world\n}}\n")]
#[case::block_template("{{Table}}\n\ntext\n")]
#[case::missing_template("{{Missing}}\n")]
#[case::template_loop("{{Loop}}\n")]
#[case::root_argument("{{{1}}} stays\n")]
#[case::parser_function("{{lc:ABC}}\n")]
#[case::ambiguous_target("{{#foo:x}} text\n")]
#[case::nested("{{Outer|{{lc:Y}}}}\n\n{{Greeting|{{{1}}}}}\n")]
fn serializes_unedited_documents_exactly(#[case] source: &str) -> WikiResult<()> {
	let env = test_env();
	assert_eq!(round_trip(&env, source)?, source);

	Ok(())
}

#[rstest]
#[case::paragraphs("foo\n\nbar\n")]
#[case::table("{| class=\"wikitable\"\n|-\n| a || b\n|}\n")]
#[case::template("{{Greeting| name = x }}\n")]
fn selser_reuses_unedited_documents(#[case] source: &str) -> WikiResult<()> {
	let env = test_env();
	let previous = parse_document(&env, source)?;
	let edited = previous.clone();

	assert!(diff_documents(&previous, &edited).is_unchanged(edited.root.id()));
	assert_eq!(serialize_document(&env, &edited, Some(&previous))?, source);

	Ok(())
}

#[test]
fn selser_changes_only_the_edited_region() -> WikiResult<()> {
	let env = test_env();
	let source = "foo\n\nbar\n";
	let previous = parse_document(&env, source)?;
	let mut edited = previous.clone();

	let id = find_text(&edited, "bar").ok_or_else(|| WikiError::malformed("test", "no text"))?;
	if let Some(node) = edited.node_mut(id) {
		node.set_text("baz");
	}

	let output = serialize_document(&env, &edited, Some(&previous))?;
	assert_eq!(output, "foo\n\nbaz\n");

	let span = changed_span(source, &output).ok_or_else(|| WikiError::malformed("test", "no change"))?;
	assert!(span.start >= 5 && span.end <= 8, "{span:?}");

	Ok(())
}

#[test]
fn selser_matches_reparsed_documents_by_position() -> WikiResult<()> {
	let env = test_env();
	let source = "foo\n\nbar\n";
	let previous = parse_document(&env, source)?;
	let mut edited = parse_document(&env, source)?;
	assert_ne!(previous.generation(), edited.generation());

	let id = find_text(&edited, "bar").ok_or_else(|| WikiError::malformed("test", "no text"))?;
	if let Some(node) = edited.node_mut(id) {
		node.set_text("baz");
	}

	assert_eq!(serialize_document(&env, &edited, Some(&previous))?, "foo\n\nbaz\n");

	Ok(())
}

#[test]
fn selser_separates_inserted_paragraphs() -> WikiResult<()> {
	let env = test_env();
	let previous = parse_document(&env, "foo\n")?;
	let mut edited = previous.clone();

	let text = edited.create_text("new");
	let paragraph = edited.create_element("p", vec![text]);
	let root = edited.root.id();
	assert!(edited.insert_child(root, 0, paragraph));

	assert_eq!(serialize_document(&env, &edited, Some(&previous))?, "new\n\nfoo\n");

	Ok(())
}

#[test]
fn selser_closes_the_gap_of_removed_paragraphs() -> WikiResult<()> {
	let env = test_env();
	let previous = parse_document(&env, "foo\n\nbar\n\nbaz\n")?;
	let mut edited = previous.clone();

	let root = edited.root.id();
	assert!(edited.remove_child(root, 1).is_some());

	assert_eq!(serialize_document(&env, &edited, Some(&previous))?, "foo\n\nbaz\n");

	Ok(())
}

#[test]
fn selser_puts_new_cells_on_their_own_line() -> WikiResult<()> {
	let env = test_env();
	let previous = parse_document(&env, "{|\n|a\n|}\n")?;
	let mut edited = previous.clone();

	let row = edited
		.find_element("tr")
		.map(Node::id)
		.ok_or_else(|| WikiError::malformed("test", "no row"))?;
	let text = edited.create_text("b");
	let cell = edited.create_element("td", vec![text]);
	assert!(edited.insert_child(row, 1, cell));

	assert_eq!(
		serialize_document(&env, &edited, Some(&previous))?,
		"{|\n|a\n|b\n|}\n"
	);

	Ok(())
}

#[test]
fn selser_regenerates_modified_table_markup() -> WikiResult<()> {
	let env = test_env();
	let previous = parse_document(&env, "{|\n|a\n|}\n")?;
	let mut edited = previous.clone();

	let table = edited
		.find_element("table")
		.map(Node::id)
		.ok_or_else(|| WikiError::malformed("test", "no table"))?;
	if let Some(node) = edited.node_mut(table) {
		node.set_attr("class", "x");
	}

	assert_eq!(
		serialize_document(&env, &edited, Some(&previous))?,
		"{| class=\"x\"\n|a\n|}\n"
	);

	Ok(())
}

#[rstest]
#[case::positional("{{Greeting|world}}\n", "1", Some("there"), "{{Greeting|there}}\n")]
#[case::named("{{Greeting| name = x }}\n", "name", Some("y"), "{{Greeting| name = y }}\n")]
#[case::added("{{Greeting|world}}\n", "extra", Some("1"), "{{Greeting|world|extra=1}}\n")]
#[case::removed_positional("{{Greeting|a|b|c}}\n", "1", None, "{{Greeting|2=b|3=c}}\n")]
#[case::removed_last_positional("{{Greeting|a|b}}\n", "2", None, "{{Greeting|a}}\n")]
#[case::positional_with_equals("{{Greeting|a}}\n", "1", Some("x=y"), "{{Greeting|1=x=y}}\n")]
fn selser_rebuilds_edited_transclusions(
	#[case] source: &str,
	#[case] key: &str,
	#[case] wt: Option<&str>,
	#[case] expected: &str,
) -> WikiResult<()> {
	let env = test_env();
	let previous = parse_document(&env, source)?;
	let mut edited = previous.clone();

	let span = transclusions(&edited)[0].id();
	let template = edited
		.store
		.get_mut(span)
		.and_then(|data| data.mw.as_mut())
		.and_then(DataMw::template_mut)
		.ok_or_else(|| WikiError::malformed("test", "no template data"))?;
	match wt {
		Some(wt) => template.params.entry(key.to_string()).or_default().wt = wt.to_string(),
		None => {
			template.params.remove(key);
		}
	}

	let diff = diff_documents(&previous, &edited);
	assert_eq!(diff.mark(span), DiffMark::Modified);
	assert_eq!(serialize_document(&env, &edited, Some(&previous))?, expected);

	Ok(())
}

#[test]
fn serializes_documents_without_source() -> WikiResult<()> {
	let env = test_env();
	let mut document = Document::new();
	let root = document.root.id();

	let one = document.create_text("one");
	let first = document.create_element("p", vec![one]);
	let two = document.create_text("two");
	let second = document.create_element("p", vec![two]);
	document.insert_child(root, 0, first);
	document.insert_child(root, 1, second);

	assert_eq!(serialize_document(&env, &document, None)?, "one\n\ntwo");

	Ok(())
}

#[test]
fn serializes_new_comments_inline() -> WikiResult<()> {
	let env = test_env();
	let mut document = Document::new();
	let root = document.root.id();

	let text = document.create_text("a");
	let comment = document.create_comment(" note ");
	let paragraph = document.create_element("p", vec![text, comment]);
	document.insert_child(root, 0, paragraph);

	assert_eq!(serialize_document(&env, &document, None)?, "a<!-- note -->");

	Ok(())
}

#[test]
fn serializes_new_empty_tables_on_two_lines() -> WikiResult<()> {
	let env = test_env();
	let mut document = Document::new();
	let root = document.root.id();
	let table = document.create_element("table", vec![]);
	document.insert_child(root, 0, table);

	assert_eq!(serialize_document(&env, &document, None)?, "{|\n|}");

	Ok(())
}

#[test]
fn diff_marks_edited_paths() -> WikiResult<()> {
	let env = test_env();
	let previous = parse_document(&env, "foo\n\nbar\n")?;
	let mut edited = previous.clone();

	let id = find_text(&edited, "bar").ok_or_else(|| WikiError::malformed("test", "no text"))?;
	if let Some(node) = edited.node_mut(id) {
		node.set_text("baz");
	}
	let new_text = edited.create_text("!");
	let new_id = new_text.id();
	let first = edited.root.children()[0].id();
	edited.insert_child(first, 1, new_text);

	let diff = diff_documents(&previous, &edited);
	let second = edited.root.children()[1].id();
	assert_eq!(diff.mark(edited.root.id()), DiffMark::ChildrenChanged);
	assert_eq!(diff.mark(first), DiffMark::ChildrenChanged);
	assert_eq!(diff.mark(second), DiffMark::ChildrenChanged);
	assert_eq!(diff.mark(id), DiffMark::Modified);
	assert_eq!(diff.mark(new_id), DiffMark::Inserted);
	assert_eq!(diff.origin(id), Some(id));
	assert_eq!(diff.origin(new_id), None);

	Ok(())
}

#[rstest]
#[case::identical("abc", "abc", None)]
#[case::replaced("foo bar", "foo baz", Some(6..7))]
#[case::multibyte("é!", "é?", Some(2..3))]
fn changed_span_reports_byte_ranges(
	#[case] original: &str,
	#[case] regenerated: &str,
	#[case] expected: Option<std::ops::Range<usize>>,
) {
	assert_eq!(changed_span(original, regenerated), expected);
}

// --- Separators ---

#[rstest]
#[case::overlap(Constraint::new(1, 2), Constraint::new(0, 1), Constraint::new(1, 1))]
#[case::contained(Constraint::new(0, 2), Constraint::new(1, 1), Constraint::new(1, 1))]
#[case::conflict(Constraint::new(2, 2), Constraint::new(0, 1), Constraint::new(2, 2))]
fn constraints_intersect(
	#[case] first: Constraint,
	#[case] second: Constraint,
	#[case] expected: Constraint,
) {
	assert_eq!(first.intersect(second), expected);
	assert_eq!(second.intersect(first), expected);
}

#[traced_test]
#[test]
fn conflicting_constraints_are_logged() {
	let _ = Constraint::new(2, 2).intersect(Constraint::new(0, 1));
	assert!(logs_contain("separator constraints conflict"));
}

#[test]
fn combine_treats_none_as_no_opinion() {
	let some = Some(Constraint::new(1, 2));
	assert_eq!(combine(some, None), some);
	assert_eq!(combine(None, some), some);
	assert_eq!(combine(None, None), None);
}

#[rstest]
#[case::verbatim(false, Some(Constraint::new(2, 2)), "\n\n\n")]
#[case::clamped(true, Some(Constraint::new(2, 2)), "\n\n")]
#[case::widened(true, Some(Constraint::new(4, 4)), "\n\n\n\n")]
#[case::kept(true, Some(Constraint::new(1, 3)), "\n\n\n")]
fn separators_adjust_original_whitespace(
	#[case] modified: bool,
	#[case] constraint: Option<Constraint>,
	#[case] expected: &str,
) {
	let mut state = SeparatorState::new(Some(3));
	state.add_constraint(constraint, "p");

	let separator = state.resolve(
		Some("foo\n\n\nbar"),
		ChunkSpan::new(Some(6), Some(9), modified),
		Constraint::new(0, 2),
	);
	assert_eq!(separator, expected);
	assert_eq!(state.constraint(), None);
}

#[test]
fn separators_synthesize_minimum_without_source() {
	let mut state = SeparatorState::new(None);
	state.add_constraint(Some(Constraint::new(1, 2)), "tr");

	let separator = state.resolve(None, ChunkSpan::new(None, None, true), Constraint::new(0, 2));
	assert_eq!(separator, "\n");
}

#[test]
fn separators_ignore_gaps_with_content() {
	let mut state = SeparatorState::new(Some(3));
	state.add_constraint(Some(Constraint::new(2, 2)), "p");

	let separator = state.resolve(
		Some("foo\nbar\nbaz"),
		ChunkSpan::new(Some(8), Some(11), false),
		Constraint::new(0, 2),
	);
	assert_eq!(separator, "\n\n");
}

// --- Configuration ---

#[test]
fn config_defaults() {
	let config = WikiConfig::default();
	assert!(!config.template_parameters_html);
	assert_eq!(config.max_template_depth, DEFAULT_MAX_TEMPLATE_DEPTH);
	assert_eq!(config.max_poll_rounds, DEFAULT_MAX_POLL_ROUNDS);
	assert_eq!(config.fetch_timeout_polls, DEFAULT_FETCH_TIMEOUT_POLLS);
	assert_eq!(config.offset_type, OffsetType::Byte);
	assert_eq!(config.separators.constraint(), Constraint::new(0, 2));
}

#[test]
fn config_load_returns_none_without_file() -> WikiResult<()> {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	assert_eq!(WikiConfig::load(tmp.path())?, None);
	Ok(())
}

#[test]
fn config_load_reads_file() -> WikiResult<()> {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	std::fs::write(
		tmp.path().join("wikirt.toml"),
		"template_parameters_html = true\nmax_template_depth = 5\noffset_type = \
		 \"ucs2\"\n\n[separators]\ndefault_max = 1\n",
	)?;

	let config = WikiConfig::load(tmp.path())?.unwrap_or_default();
	assert!(config.template_parameters_html);
	assert_eq!(config.max_template_depth, 5);
	assert_eq!(config.max_poll_rounds, DEFAULT_MAX_POLL_ROUNDS);
	assert_eq!(config.offset_type, OffsetType::Ucs2);
	assert_eq!(config.separators.constraint(), Constraint::new(0, 1));

	Ok(())
}

#[rstest]
#[case::visible(&["wikirt.toml", ".wikirt.toml"], "wikirt.toml")]
#[case::hidden(&[".wikirt.toml", ".config/wikirt.toml"], ".wikirt.toml")]
#[case::nested(&[".config/wikirt.toml"], ".config/wikirt.toml")]
fn config_resolve_path_precedence(#[case] files: &[&str], #[case] expected: &str) -> WikiResult<()> {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	std::fs::create_dir_all(tmp.path().join(".config"))?;
	for file in files {
		std::fs::write(tmp.path().join(file), "")?;
	}

	assert_eq!(WikiConfig::resolve_path(tmp.path()), Some(tmp.path().join(expected)));

	Ok(())
}

#[rstest]
#[case::timeout_wins(10_000, 1_000, 0, 1_000)]
#[case::halved_per_level(10_000, 1_000, 3, 625)]
#[case::few_rounds(3, 1_000, 0, 1)]
#[case::exhausted(3, 1_000, 1, 0)]
#[case::very_deep(10_000, 1_000, 80, 0)]
fn fetch_budget_shrinks_with_depth(
	#[case] max_poll_rounds: usize,
	#[case] fetch_timeout_polls: usize,
	#[case] depth: usize,
	#[case] expected: usize,
) {
	let config = WikiConfig {
		max_poll_rounds,
		fetch_timeout_polls,
		..WikiConfig::default()
	};
	assert_eq!(config.fetch_budget(depth), expected);
}

#[test]
fn config_rejects_invalid_values() {
	let result = WikiConfig::from_toml_str("max_template_depth = \"deep\"");
	assert!(matches!(result, Err(WikiError::ConfigParse(_))));
}

#[test]
fn template_depth_follows_config() -> WikiResult<()> {
	let config = WikiConfig {
		max_template_depth: 1,
		..WikiConfig::default()
	};
	let env = Env::new(config, Rc::new(templates()));
	let document = parse_document(&env, "{{Outer|x}}")?;

	assert!(
		document
			.root
			.text_content()
			.contains("template expansion depth limit of 1 exceeded")
	);

	Ok(())
}
