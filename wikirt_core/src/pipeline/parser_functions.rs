use crate::tokens::Kv;
use crate::tokens::Token;
use crate::tokens::Value;
use crate::tokens::token_trim;

/// Parser functions evaluated in-process. Names are matched in lowercase.
pub const PARSER_FUNCTIONS: [&str; 3] = ["lc", "uc", "#if"];

pub fn is_parser_function(name: &str) -> bool {
	PARSER_FUNCTIONS.contains(&name)
}

/// Evaluate the parser function `name`. `arg` is the text following the
/// colon in the call target and `args` are the remaining (expanded) call
/// arguments.
pub fn evaluate_parser_function(name: &str, arg: &str, args: &[Kv]) -> Vec<Token> {
	match name {
		"lc" => text_tokens(arg.trim().to_lowercase()),
		"uc" => text_tokens(arg.trim().to_uppercase()),
		"#if" => {
			let branch = usize::from(arg.trim().is_empty());
			let mut tokens = args.get(branch).map(branch_tokens).unwrap_or_default();
			token_trim(&mut tokens);
			tokens
		}
		_ => vec![],
	}
}

fn text_tokens(text: String) -> Vec<Token> {
	if text.is_empty() {
		vec![]
	} else {
		vec![Token::text(text)]
	}
}

/// `#if` branches are whole argument parts, so `a=b` is kept as written.
fn branch_tokens(kv: &Kv) -> Vec<Token> {
	if kv.is_positional() {
		return kv.v.clone().into_tokens();
	}

	let mut tokens = kv.k.clone().into_tokens();
	tokens.push(Token::text("="));
	tokens.extend(kv.v.clone().into_tokens());

	match Value::from_tokens(tokens) {
		Value::Literal(text) => text_tokens(text),
		Value::Tokens(tokens) => tokens,
	}
}
