//! End-to-end walk through the six `RCPT TO` scenarios the spec uses to
//! pin down parsing, resolution, evaluation, and tagging together:
//! `sf={alice@x, bob@x}`, `dog={bob@x, carol@x}`, `cat={alice@x, dave@x}`,
//! symbols `sf:SF, dog:Dog, cat:Cat`, incoming domain `x`.

use mailingset_core::{validate_recipient, tagger, MailingSetError};
use std::collections::HashMap;
use std::collections::HashSet;

fn universe() -> mailingset_core::Universe {
    let defs = vec![
        (
            "sf".to_string(),
            vec![
                "\"Alice Smith\" <alice@x>".to_string(),
                "\"Bob Q Brown\" <bob@x>".to_string(),
            ],
        ),
        (
            "dog".to_string(),
            vec![
                "\"Bob Q Brown\" <bob@x>".to_string(),
                "\"Carol Jones\" <carol@x>".to_string(),
            ],
        ),
        (
            "cat".to_string(),
            vec![
                "\"Alice Smith\" <alice@x>".to_string(),
                "\"Dave White\" <dave@x>".to_string(),
            ],
        ),
    ];
    let symbols: HashMap<String, String> = [
        ("sf".to_string(), "SF".to_string()),
        ("dog".to_string(), "Dog".to_string()),
        ("cat".to_string(), "Cat".to_string()),
    ]
    .into_iter()
    .collect();
    mailingset_core::Universe::build(&defs, &symbols).unwrap()
}

fn addrs(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn scenario_1_intersection_of_two_lists() {
    let u = universe();
    let accepted = validate_recipient(&u, "sf_&_dog").unwrap();
    k9::assert_equal!(accepted.resolved, addrs(&["bob@x"]));
    k9::assert_equal!(tagger::tag_for(&accepted.expr, &u), "[SF&Dog]".to_string());
}

#[test]
fn scenario_2_intersection_with_a_braced_union() {
    let u = universe();
    let accepted = validate_recipient(&u, "sf_&_{dog_|_cat}").unwrap();
    k9::assert_equal!(accepted.resolved, addrs(&["alice@x", "bob@x"]));
    k9::assert_equal!(
        tagger::tag_for(&accepted.expr, &u),
        "[SF&(Dog|Cat)]".to_string()
    );
}

#[test]
fn scenario_3_difference_of_a_list_with_itself_is_empty_set() {
    let u = universe();
    let err = validate_recipient(&u, "sf_-_sf").unwrap_err();
    k9::assert_equal!(matches!(err, MailingSetError::EmptySet), true);
    k9::assert_equal!(err.smtp_code(), 550);
}

#[test]
fn scenario_4_stray_brace_is_a_mismatched_brace_parse_error() {
    let u = universe();
    let err = validate_recipient(&u, "a_&_b}_-_c").unwrap_err();
    match err {
        MailingSetError::Parse(parse_err) => {
            k9::assert_equal!(
                parse_err.reason,
                mailingset_core::ParseErrorReason::MismatchedBrace
            );
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
    k9::assert_equal!(err.smtp_code(), 550);
}

#[test]
fn scenario_5_unbraced_mixed_operators_is_a_parse_error() {
    let u = universe();
    let err = validate_recipient(&u, "sf_&_dog_|_cat").unwrap_err();
    match err {
        MailingSetError::Parse(parse_err) => {
            k9::assert_equal!(
                parse_err.reason,
                mailingset_core::ParseErrorReason::MixedOperators
            );
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn scenario_6_difference_against_a_display_name_alias() {
    let u = universe();
    let accepted = validate_recipient(&u, "dog_-_bob.q.brown").unwrap();
    k9::assert_equal!(accepted.resolved, addrs(&["carol@x"]));
    k9::assert_equal!(
        tagger::tag_for(&accepted.expr, &u),
        "[Dog-bob.q.brown]".to_string()
    );
}

/// Every accepted scenario must also carry `List-Id`/`Precedence`/`List-Post`
/// headers keyed off the verbatim local-part, and relay under the
/// configured envelope sender — the tagger owns the first part.
#[test]
fn accepted_scenarios_carry_list_management_headers() {
    use mailparsing::{Header, HeaderMap};

    let u = universe();
    let accepted = validate_recipient(&u, "sf_&_dog").unwrap();
    let mut headers = HeaderMap::new(vec![Header::new_unstructured(
        "Subject".to_string(),
        "quarterly numbers".to_string(),
    )]);

    tagger::apply(&mut headers, &accepted.expr, &u, "sf_&_dog", "x");

    k9::assert_equal!(
        headers.subject().unwrap().unwrap(),
        "[SF&Dog] quarterly numbers".to_string()
    );
    k9::assert_equal!(
        headers.get_first("List-Id").unwrap().get_raw_value(),
        "<sf_&_dog.mailingset.x>"
    );
    k9::assert_equal!(
        headers.get_first("List-Post").unwrap().get_raw_value(),
        "<mailto:sf_&_dog@x>"
    );
    k9::assert_equal!(headers.get_first("Precedence").unwrap().get_raw_value(), "list");
}
