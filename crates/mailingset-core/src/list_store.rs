//! Builds the in-memory universe of lists and aliases from a set of list
//! definitions, eagerly: membership expansion and alias ambiguity are both
//! fully resolved at construction time so that a lookup against a running
//! universe never has to walk the list graph again.

use crate::error::MailingSetError;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    Address {
        canonical: String,
        display_name: Option<String>,
    },
    ListRef(String),
}

#[derive(Debug, Clone)]
pub struct List {
    pub name: String,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasTarget {
    Canonical(String),
    Ambiguous(Vec<String>),
}

#[derive(Debug)]
pub struct Universe {
    pub(crate) lists: HashMap<String, List>,
    pub(crate) aliases: HashMap<String, AliasTarget>,
    pub(crate) list_expansions: HashMap<String, HashSet<String>>,
    pub(crate) symbols: HashMap<String, String>,
}

/// One raw line from a list definition file, before it has been classified.
/// A line that opens a quoted display name must close it and be followed
/// by a bracketed address, or it is rejected rather than silently
/// reinterpreted as a bare address or list reference.
fn classify_line(line: &str) -> Result<Member, MailingSetError> {
    let line = line.trim();

    if line.starts_with('"') {
        let quote_end = line[1..]
            .find('"')
            .ok_or_else(|| MailingSetError::MalformedListEntry(line.to_string()))?;
        let display_name = &line[1..1 + quote_end];
        let remainder = line[1 + quote_end + 1..].trim();
        let addr = remainder
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .ok_or_else(|| MailingSetError::MalformedListEntry(line.to_string()))?;
        return Ok(Member::Address {
            canonical: addr.trim().to_lowercase(),
            display_name: Some(display_name.to_string()),
        });
    }

    if let Some(addr) = line.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
        return Ok(Member::Address {
            canonical: addr.trim().to_lowercase(),
            display_name: None,
        });
    }

    if line.contains('@') {
        return Ok(Member::Address {
            canonical: line.to_lowercase(),
            display_name: None,
        });
    }

    Ok(Member::ListRef(line.to_lowercase()))
}

fn register_alias(aliases: &mut HashMap<String, AliasTarget>, key: &str, canonical: &str) {
    let key = key.to_lowercase();
    if key.is_empty() {
        return;
    }
    match aliases.get(&key) {
        None => {
            aliases.insert(key, AliasTarget::Canonical(canonical.to_string()));
        }
        Some(AliasTarget::Canonical(existing)) => {
            if existing == canonical {
                // Same alias token, same address: a silent no-op, not an
                // ambiguity — only genuinely different addresses collide.
                return;
            }
            let mut candidates = vec![existing.clone(), canonical.to_string()];
            candidates.sort();
            candidates.dedup();
            aliases.insert(key, AliasTarget::Ambiguous(candidates));
        }
        Some(AliasTarget::Ambiguous(existing)) => {
            let mut candidates = existing.clone();
            if !candidates.iter().any(|c| c == canonical) {
                candidates.push(canonical.to_string());
                candidates.sort();
            }
            aliases.insert(key, AliasTarget::Ambiguous(candidates));
        }
    }
}

fn register_member_aliases(aliases: &mut HashMap<String, AliasTarget>, member: &Member) {
    let Member::Address {
        canonical,
        display_name,
    } = member
    else {
        return;
    };

    if let Some(local) = canonical.split('@').next() {
        register_alias(aliases, local, canonical);
    }

    if let Some(display_name) = display_name {
        let tokens: Vec<&str> = display_name.split_whitespace().collect();
        for token in &tokens {
            register_alias(aliases, token, canonical);
        }
        if tokens.len() > 1 {
            let joined = tokens.join(".");
            register_alias(aliases, &joined, canonical);
        }
    }
}

enum Color {
    White,
    Gray,
    Black,
}

fn check_acyclic(lists: &HashMap<String, List>) -> Result<(), MailingSetError> {
    let mut colors: HashMap<&str, Color> = lists.keys().map(|k| (k.as_str(), Color::White)).collect();

    fn visit<'a>(
        name: &'a str,
        lists: &'a HashMap<String, List>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> Result<(), MailingSetError> {
        match colors.get(name) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => return Err(MailingSetError::CycleDetected(name.to_string())),
            _ => {}
        }
        colors.insert(name, Color::Gray);
        if let Some(list) = lists.get(name) {
            for member in &list.members {
                if let Member::ListRef(child) = member {
                    if lists.contains_key(child.as_str()) {
                        visit(child, lists, colors)?;
                    }
                }
            }
        }
        colors.insert(name, Color::Black);
        Ok(())
    }

    let names: Vec<&str> = lists.keys().map(|k| k.as_str()).collect();
    for name in names {
        visit(name, lists, &mut colors)?;
    }
    Ok(())
}

fn expand_list<'a>(
    name: &'a str,
    lists: &'a HashMap<String, List>,
    memo: &mut HashMap<String, HashSet<String>>,
) -> HashSet<String> {
    if let Some(cached) = memo.get(name) {
        return cached.clone();
    }
    let mut result = HashSet::new();
    if let Some(list) = lists.get(name) {
        for member in &list.members {
            match member {
                Member::Address { canonical, .. } => {
                    result.insert(canonical.clone());
                }
                Member::ListRef(child) => {
                    result.extend(expand_list(child, lists, memo));
                }
            }
        }
    }
    memo.insert(name.to_string(), result.clone());
    result
}

impl Universe {
    /// Builds a universe from a set of list definitions: each entry is a
    /// list name paired with its raw member lines, in whatever order the
    /// definition source yields them. `symbols` maps a list name to the
    /// short tag string substituted for it when rendering a subject tag;
    /// a list with no entry here is rendered under its own name.
    pub fn build(
        list_lines: &[(String, Vec<String>)],
        symbols: &HashMap<String, String>,
    ) -> Result<Universe, MailingSetError> {
        let mut lists = HashMap::new();
        for (name, raw_members) in list_lines {
            let name = name.to_lowercase();
            let members = raw_members
                .iter()
                .filter(|line| !line.trim().is_empty())
                .map(|line| classify_line(line))
                .collect::<Result<Vec<Member>, MailingSetError>>()?;
            lists.insert(name.clone(), List { name, members });
        }

        check_acyclic(&lists)?;

        let mut aliases = HashMap::new();
        for list in lists.values() {
            for member in &list.members {
                register_member_aliases(&mut aliases, member);
            }
        }

        let mut list_expansions = HashMap::new();
        let names: Vec<String> = lists.keys().cloned().collect();
        for name in &names {
            expand_list(name, &lists, &mut list_expansions);
        }

        let symbols = symbols
            .iter()
            .map(|(name, symbol)| (name.to_lowercase(), symbol.clone()))
            .collect();

        Ok(Universe {
            lists,
            aliases,
            list_expansions,
            symbols,
        })
    }

    pub fn list_names(&self) -> impl Iterator<Item = &str> {
        self.lists.keys().map(|k| k.as_str())
    }

    /// The configured short tag for a list name, if one was set.
    pub fn symbol_for(&self, name: &str) -> Option<&str> {
        self.symbols.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lines(pairs: &[(&str, &str)]) -> Vec<(String, Vec<String>)> {
        pairs
            .iter()
            .map(|(name, body)| {
                (
                    name.to_string(),
                    body.lines().map(|l| l.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn expands_nested_lists() {
        let defs = lines(&[
            ("dog", "\"Bob Q Brown\" <bob@example.com>\ncat"),
            ("cat", "\"Alice Smith\" <alice@example.com>"),
        ]);
        let universe = Universe::build(&defs, &HashMap::new()).unwrap();
        let dog = universe.list_expansions.get("dog").unwrap();
        k9::assert_equal!(dog.contains("bob@example.com"), true);
        k9::assert_equal!(dog.contains("alice@example.com"), true);
    }

    #[test]
    fn rejects_a_display_name_with_an_unclosed_quote() {
        let defs = lines(&[("dog", "\"Bob Q Brown <bob@example.com>")]);
        let err = Universe::build(&defs, &HashMap::new()).unwrap_err();
        k9::assert_equal!(matches!(err, MailingSetError::MalformedListEntry(_)), true);
    }

    #[test]
    fn detects_cycles() {
        let defs = lines(&[("a", "b"), ("b", "a")]);
        let err = Universe::build(&defs, &HashMap::new()).unwrap_err();
        k9::assert_equal!(matches!(err, MailingSetError::CycleDetected(_)), true);
    }

    #[test]
    fn same_address_different_spelling_is_not_ambiguous() {
        let defs = lines(&[(
            "dog",
            "\"Bob Brown\" <bob@example.com>\n\"Bob Q Brown\" <bob@example.com>",
        )]);
        let universe = Universe::build(&defs, &HashMap::new()).unwrap();
        k9::assert_equal!(
            universe.aliases.get("bob"),
            Some(&AliasTarget::Canonical("bob@example.com".to_string()))
        );
    }

    #[test]
    fn different_addresses_sharing_a_token_are_ambiguous() {
        let defs = lines(&[(
            "dog",
            "\"Bob Brown\" <bob@example.com>\n\"Bob Black\" <bob.black@example.com>",
        )]);
        let universe = Universe::build(&defs, &HashMap::new()).unwrap();
        match universe.aliases.get("bob") {
            Some(AliasTarget::Ambiguous(candidates)) => {
                k9::assert_equal!(candidates.len(), 2);
            }
            other => panic!("expected an ambiguous alias, got {other:?}"),
        }
    }
}
