//! Renders a set expression into a human-readable subject tag and applies
//! it, along with the list-management headers, to an outbound message's
//! header block.
//!
//! Subject mutation goes through `mailparsing`'s `HeaderMap::set_subject`,
//! which re-encodes the value as needed, so a tag containing non-ASCII
//! alias text never produces a malformed header.

use crate::grammar::Expr;
use crate::list_store::Universe;
use mailparsing::{Header, HeaderMap};

/// Renders the textual form of an expression, matching the input grammar's
/// surface syntax: `Union`/`Inter`/`Diff` are flattened n-ary chains, and
/// parentheses appear only around sub-expressions that were explicitly
/// braced in the original address. A leaf identifier renders as its
/// configured symbol, or verbatim if none was configured.
fn render(expr: &Expr, universe: &Universe) -> String {
    match expr {
        Expr::Ref(name) => universe
            .symbol_for(name)
            .map(|s| s.to_string())
            .unwrap_or_else(|| name.clone()),
        Expr::Union(items) => items
            .iter()
            .map(|e| render(e, universe))
            .collect::<Vec<_>>()
            .join("|"),
        Expr::Inter(items) => items
            .iter()
            .map(|e| render(e, universe))
            .collect::<Vec<_>>()
            .join("&"),
        Expr::Diff(items) => items
            .iter()
            .map(|e| render(e, universe))
            .collect::<Vec<_>>()
            .join("-"),
        Expr::Group(inner) => format!("({})", render(inner, universe)),
    }
}

/// Builds the `[tag]` prefix for a given expression, e.g. `[Dog-bob.q.brown]`.
pub fn tag_for(expr: &Expr, universe: &Universe) -> String {
    format!("[{}]", render(expr, universe))
}

/// Prepends the tag to a subject unless it is already present, leaving an
/// already-tagged subject untouched so repeated passes through this code
/// (e.g. a message that loops back through relay) stay idempotent.
pub fn tagged_subject(tag: &str, current: Option<&str>) -> String {
    let prefix = format!("{tag} ");
    match current {
        Some(subject) if subject.starts_with(&prefix) => subject.to_string(),
        Some(subject) => format!("{prefix}{subject}"),
        None => tag.to_string(),
    }
}

/// Removes every existing header with the given name, then pushes a
/// fresh one, so rewriting a message twice never leaves a stale
/// duplicate alongside the new value.
fn replace_unstructured(headers: &mut HeaderMap<'static>, name: &str, value: String) {
    headers.retain(|h| !h.get_name().eq_ignore_ascii_case(name));
    headers.push(Header::new_unstructured(name.to_string(), value));
}

/// Applies the subject tag and list-management headers to a message's
/// header block, in place. `local_part` is the verbatim recipient
/// local-part the message was addressed to, used to build the
/// `List-Id`/`List-Post` headers.
pub fn apply(
    headers: &mut HeaderMap<'static>,
    expr: &Expr,
    universe: &Universe,
    local_part: &str,
    domain: &str,
) {
    let tag = tag_for(expr, universe);
    let current_subject = headers.subject().ok().flatten();
    let new_subject = tagged_subject(&tag, current_subject.as_deref());
    headers.set_subject(new_subject.as_str());

    replace_unstructured(headers, "Precedence", "list".to_string());
    replace_unstructured(
        headers,
        "List-Id",
        format!("<{local_part}.mailingset.{domain}>"),
    );
    replace_unstructured(
        headers,
        "List-Post",
        format!("<mailto:{local_part}@{domain}>"),
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::grammar::parse;
    use std::collections::HashMap;

    fn universe_with_symbols() -> Universe {
        let defs = vec![
            ("sf".to_string(), vec!["\"Bob Brown\" <bob@example.com>".to_string()]),
            ("dog".to_string(), vec!["\"Carol Jones\" <carol@example.com>".to_string()]),
        ];
        let symbols: HashMap<String, String> = [
            ("sf".to_string(), "SF".to_string()),
            ("dog".to_string(), "Dog".to_string()),
        ]
        .into_iter()
        .collect();
        Universe::build(&defs, &symbols).unwrap()
    }

    #[test]
    fn renders_a_diff_chain_without_parens() {
        let u = Universe::build(&[], &HashMap::new()).unwrap();
        let expr = parse("dog_-_bob.q.brown").unwrap();
        k9::assert_equal!(tag_for(&expr, &u), "[dog-bob.q.brown]".to_string());
    }

    #[test]
    fn renders_braced_subexpression_with_parens() {
        let u = Universe::build(&[], &HashMap::new()).unwrap();
        let expr = parse("sf_&_{dog_|_cat}").unwrap();
        k9::assert_equal!(tag_for(&expr, &u), "[sf&(dog|cat)]".to_string());
    }

    #[test]
    fn substitutes_configured_symbols() {
        let u = universe_with_symbols();
        let expr = parse("sf_&_dog").unwrap();
        k9::assert_equal!(tag_for(&expr, &u), "[SF&Dog]".to_string());
    }

    #[test]
    fn unconfigured_identifier_renders_verbatim() {
        let u = universe_with_symbols();
        let expr = parse("sf_&_cat").unwrap();
        k9::assert_equal!(tag_for(&expr, &u), "[SF&cat]".to_string());
    }

    #[test]
    fn tag_is_prepended_once() {
        let tag = "[dog]";
        let subject = tagged_subject(tag, None);
        k9::assert_equal!(subject, "[dog]".to_string());

        let subject = tagged_subject(tag, Some("hello"));
        k9::assert_equal!(subject, "[dog] hello".to_string());

        let already = tagged_subject(tag, Some("[dog] hello"));
        k9::assert_equal!(already, "[dog] hello".to_string());
    }

    #[test]
    fn apply_injects_list_headers_using_the_verbatim_local_part() {
        let u = universe_with_symbols();
        let expr = parse("sf").unwrap();
        let mut headers = HeaderMap::new(vec![Header::new_unstructured(
            "Subject".to_string(),
            "hello".to_string(),
        )]);

        apply(&mut headers, &expr, &u, "sf", "example.com");

        k9::assert_equal!(
            headers.subject().unwrap().unwrap(),
            "[SF] hello".to_string()
        );
        k9::assert_equal!(
            headers.get_first("List-Id").unwrap().get_raw_value(),
            "<sf.mailingset.example.com>"
        );
        k9::assert_equal!(
            headers.get_first("List-Post").unwrap().get_raw_value(),
            "<mailto:sf@example.com>"
        );
        k9::assert_equal!(headers.get_first("Precedence").unwrap().get_raw_value(), "list");
    }

    #[test]
    fn apply_replaces_preexisting_list_headers_instead_of_duplicating() {
        let u = universe_with_symbols();
        let expr = parse("sf").unwrap();
        let mut headers = HeaderMap::new(vec![
            Header::new_unstructured("Subject".to_string(), "hello".to_string()),
            Header::new_unstructured("List-Id".to_string(), "<stale>".to_string()),
            Header::new_unstructured("Precedence".to_string(), "bulk".to_string()),
        ]);

        apply(&mut headers, &expr, &u, "sf", "example.com");

        let list_id_count = headers
            .iter()
            .filter(|h| h.get_name().eq_ignore_ascii_case("List-Id"))
            .count();
        k9::assert_equal!(list_id_count, 1);
        k9::assert_equal!(
            headers.get_first("List-Id").unwrap().get_raw_value(),
            "<sf.mailingset.example.com>"
        );
        k9::assert_equal!(headers.get_first("Precedence").unwrap().get_raw_value(), "list");
    }
}
