//! Core set-algebra engine for mailing-list recipient expressions:
//! parses a local-part expression, resolves its leaf identifiers against
//! a `Universe` of lists and aliases, evaluates the set algebra, and
//! renders the resulting subject tag and list-management headers. Fans
//! the accepted expression's resolved addresses out to an injected
//! [`RelayClient`].

pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod grammar;
pub mod list_store;
pub mod pipeline;
pub mod resolver;
pub mod tagger;

pub use dispatch::{dispatch_expression, RelayClient, RelayOutcome};
pub use error::{MailingSetError, ParseError, ParseErrorReason};
pub use grammar::Expr;
pub use list_store::{AliasTarget, List, Member, Universe};
pub use pipeline::{validate_recipient, AcceptedExpression};
