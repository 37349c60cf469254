//! Evaluates a parsed expression tree against a universe, producing the
//! final set of canonical addresses a message should be delivered to.

use crate::error::MailingSetError;
use crate::grammar::Expr;
use crate::list_store::Universe;
use std::collections::HashSet;

pub fn eval(universe: &Universe, expr: &Expr) -> Result<HashSet<String>, MailingSetError> {
    match expr {
        Expr::Ref(name) => universe.resolve(name),
        Expr::Group(inner) => eval(universe, inner),
        Expr::Union(items) => {
            let mut acc = HashSet::new();
            for item in items {
                acc.extend(eval(universe, item)?);
            }
            Ok(acc)
        }
        Expr::Inter(items) => {
            let mut iter = items.iter();
            let first = iter
                .next()
                .expect("grammar never produces an Inter node with no operands");
            let mut acc = eval(universe, first)?;
            for item in iter {
                let next = eval(universe, item)?;
                acc.retain(|addr| next.contains(addr));
            }
            Ok(acc)
        }
        Expr::Diff(items) => {
            let mut iter = items.iter();
            let first = iter
                .next()
                .expect("grammar never produces a Diff node with no operands");
            let mut acc = eval(universe, first)?;
            for item in iter {
                let next = eval(universe, item)?;
                acc.retain(|addr| !next.contains(addr));
            }
            Ok(acc)
        }
    }
}

/// Evaluates the top-level expression for a recipient, rejecting an empty
/// result the way an SMTP transaction must: with no mailbox to deliver to,
/// there is nothing downstream can do with the message.
pub fn eval_top(universe: &Universe, expr: &Expr) -> Result<HashSet<String>, MailingSetError> {
    let set = eval(universe, expr)?;
    if set.is_empty() {
        return Err(MailingSetError::EmptySet);
    }
    Ok(set)
}
