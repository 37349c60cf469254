//! Turns a single identifier into the set of canonical addresses it denotes.
//!
//! List names and alias tokens share one namespace: a name that happens to
//! be both a list and an alias resolves as the list, since list expansions
//! are checked first.

use crate::error::MailingSetError;
use crate::list_store::{AliasTarget, Universe};
use std::collections::HashSet;

impl Universe {
    pub fn resolve(&self, identifier: &str) -> Result<HashSet<String>, MailingSetError> {
        let key = identifier.to_lowercase();

        if let Some(expansion) = self.list_expansions.get(&key) {
            return Ok(expansion.clone());
        }

        match self.aliases.get(&key) {
            Some(AliasTarget::Canonical(addr)) => {
                let mut set = HashSet::new();
                set.insert(addr.clone());
                Ok(set)
            }
            Some(AliasTarget::Ambiguous(candidates)) => Err(MailingSetError::AmbiguousName {
                name: identifier.to_string(),
                candidates: candidates.clone(),
            }),
            None => Err(MailingSetError::UnknownName(identifier.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn universe() -> Universe {
        let defs = vec![(
            "dog".to_string(),
            vec!["\"Bob Q Brown\" <bob@example.com>".to_string()],
        )];
        Universe::build(&defs, &HashMap::new()).unwrap()
    }

    #[test]
    fn resolves_a_list_name() {
        let u = universe();
        let set = u.resolve("dog").unwrap();
        k9::assert_equal!(set.contains("bob@example.com"), true);
    }

    #[test]
    fn resolves_an_alias_token() {
        let u = universe();
        let set = u.resolve("bob").unwrap();
        k9::assert_equal!(set.contains("bob@example.com"), true);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let u = universe();
        let err = u.resolve("nobody").unwrap_err();
        k9::assert_equal!(matches!(err, MailingSetError::UnknownName(_)), true);
    }
}
