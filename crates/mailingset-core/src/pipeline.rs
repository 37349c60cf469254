//! Ties parsing, resolution, and evaluation together into the single
//! operation an SMTP `RCPT TO` handler needs: turn a local-part into
//! either an accepted expression with its resolved address set, or the
//! specific error that should become the reply code.

use crate::error::MailingSetError;
use crate::evaluator;
use crate::grammar::{self, Expr};
use crate::list_store::Universe;
use std::collections::HashSet;

/// An `RCPT TO` local-part that parsed, resolved, and evaluated to a
/// non-empty set of canonical addresses.
#[derive(Debug, Clone)]
pub struct AcceptedExpression {
    pub local_part: String,
    pub expr: Expr,
    pub resolved: HashSet<String>,
}

pub fn validate_recipient(
    universe: &Universe,
    local_part: &str,
) -> Result<AcceptedExpression, MailingSetError> {
    let expr = grammar::parse(local_part)?;
    let resolved = evaluator::eval_top(universe, &expr)?;
    Ok(AcceptedExpression {
        local_part: local_part.to_string(),
        expr,
        resolved,
    })
}
