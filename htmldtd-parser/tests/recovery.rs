//! Scenario corpus for the tokenizer / recovery driver, parsed against the
//! built-in grammar.

use assert_matches::assert_matches;
use htmldtd_model::html;
use htmldtd_parser::{
    Event, EventCollector, ErrorKind, ParseAbort, Parser, ParserOptions, StrSource, Termination,
};

fn parse(input: &str) -> EventCollector {
    parse_with(input, ParserOptions::default())
}

fn parse_strict(input: &str) -> EventCollector {
    parse_with(
        input,
        ParserOptions {
            strict: true,
            ignore_charset: false,
        },
    )
}

fn parse_with(input: &str, opts: ParserOptions) -> EventCollector {
    let mut parser = Parser::with_options(html::dtd(), opts, EventCollector::new());
    let mut src = StrSource::new(input);
    let term = parser.parse(&mut src).expect("parse aborted unexpectedly");
    assert_eq!(term, Termination::Eof);
    parser.into_sink()
}

fn text_events(events: &EventCollector) -> Vec<&str> {
    events
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn assert_balanced(events: &EventCollector) {
    let mut depth = 0i64;
    for e in &events.events {
        match e {
            Event::StartTag { .. } => depth += 1,
            Event::EndTag { .. } => depth -= 1,
            _ => {}
        }
        assert!(depth >= 0, "end tag before start tag in {:?}", events.outline());
    }
    assert_eq!(depth, 0, "unbalanced events: {:?}", events.outline());
}

#[test]
fn sibling_paragraphs_imply_closure() {
    let events = parse("<p>A<p>B");
    assert_eq!(
        events.outline(),
        vec![
            "<~html>", "<~head>", "</~head>", "<~body>", "<p>", "'A'", "</~p>", "<p>", "'B'",
            "</~p>", "</~body>", "</~html>",
        ]
    );
    assert_balanced(&events);
}

#[test]
fn case_folds_to_one_matched_pair() {
    let events = parse("<P>x</p>");
    assert_eq!(
        events.outline(),
        vec![
            "<~html>", "<~head>", "</~head>", "<~body>", "<p>", "'x'", "</p>", "</~body>",
            "</~html>",
        ]
    );
}

#[test]
fn numeric_entities_decode_with_cp1252_remap() {
    let events = parse("<p>&#65;&#x41;&#150;");
    assert_eq!(text_events(&events), vec!["AA\u{2013}"]);
    assert!(events.errors().count() == 0);
}

#[test]
fn named_entities_resolve_case_insensitively_in_permissive_mode() {
    let events = parse("<p>&AMP;x");
    assert_eq!(text_events(&events), vec!["&x"]);
}

#[test]
fn unknown_entity_re_emits_literal_text() {
    let events = parse("<p>&nosuch;");
    assert_eq!(text_events(&events), vec!["&nosuch;"]);
    assert!(events
        .errors()
        .any(|(kind, msg, _)| kind == ErrorKind::Entity && msg.contains("nosuch")));
}

#[test]
fn dominant_line_terminator_is_reported() {
    let events = parse("a\nb\nc\nd\ne\nf\r\ng");
    assert!(events
        .events
        .iter()
        .any(|e| matches!(e, Event::EndOfLine { eol } if eol == "\n")));
}

#[test]
fn whitespace_collapses_and_leading_space_is_dropped() {
    let events = parse("<p>  a   b\t\nc  ");
    assert_eq!(text_events(&events), vec!["a b c"]);
}

#[test]
fn table_cell_bridges_through_implied_row() {
    let events = parse("<table><td>x</td></table>");
    assert_eq!(
        events.outline(),
        vec![
            "<~html>", "<~head>", "</~head>", "<~body>", "<table>", "<~tr>", "<td>", "'x'",
            "</td>", "</~tr>", "</table>", "</~body>", "</~html>",
        ]
    );
}

#[test]
fn stray_text_inside_table_is_dropped() {
    let events = parse("<table>junk<tr><td>x</td></tr></table>");
    assert!(!text_events(&events).contains(&"junk"));
    assert!(events
        .errors()
        .any(|(kind, msg, _)| kind == ErrorKind::Structural && msg.contains("ignored")));
    assert_balanced(&events);
}

#[test]
fn font_end_tag_cannot_force_close_structure() {
    let events = parse("<p><font>a<b>c</font>d");
    assert_eq!(
        events.outline(),
        vec![
            "<~html>", "<~head>", "</~head>", "<~body>", "<p>", "<font>", "'a'", "<b>", "'c'",
            "'d'", "</~b>", "</~font>", "</~p>", "</~body>", "</~html>",
        ]
    );
}

#[test]
fn mismatched_end_tag_closes_intervening_frames_as_implied() {
    let events = parse("<p>x<b>y</p>");
    assert_eq!(
        events.outline(),
        vec![
            "<~html>", "<~head>", "</~head>", "<~body>", "<p>", "'x'", "<b>", "'y'", "</~b>",
            "</p>", "</~body>", "</~html>",
        ]
    );
}

#[test]
fn unmatched_end_tag_is_reported_and_dropped() {
    let events = parse("<p>x</div>");
    assert!(events
        .errors()
        .any(|(kind, msg, _)| kind == ErrorKind::Structural && msg.contains("matching start")));
    assert_balanced(&events);
}

#[test]
fn style_content_is_literal() {
    let events = parse("<style>a < b</style>");
    assert_eq!(
        events.outline(),
        vec![
            "<~html>", "<~head>", "<style>", "'a < b'", "</style>", "</~head>", "</~html>",
        ]
    );
}

#[test]
fn script_literal_swallows_markup() {
    let events = parse("<script>if (a<b) { x = \"<p>\"; }</script>");
    assert_eq!(
        text_events(&events),
        vec!["if (a<b) { x = \"<p>\"; }"]
    );
}

#[test]
fn raw_data_expands_entities_but_not_tags() {
    let events = parse("<textarea rows=2 cols=3>&amp;<p></textarea>");
    assert_eq!(text_events(&events), vec!["&<p>"]);
}

#[test]
fn unterminated_literal_is_reported_and_balanced() {
    let events = parse("<style>never closed");
    assert!(events
        .errors()
        .any(|(kind, msg, _)| kind == ErrorKind::Lexical && msg.contains("unterminated")));
    assert_balanced(&events);
}

#[test]
fn comments_are_reported_in_order() {
    let events = parse("<p>a<!-- note -->b");
    assert_eq!(
        events.outline(),
        vec![
            "<~html>", "<~head>", "</~head>", "<~body>", "<p>", "'a'", "<!-- note -->", "'b'",
            "</~p>", "</~body>", "</~html>",
        ]
    );
}

#[test]
fn unterminated_comment_is_reported() {
    let events = parse("<p>a<!-- runs off");
    assert!(events
        .errors()
        .any(|(kind, msg, _)| kind == ErrorKind::Lexical && msg.contains("comment")));
}

#[test]
fn doctype_is_skipped_quietly() {
    let events = parse("<!DOCTYPE html \"quoted > inside\"><p>x");
    assert_eq!(text_events(&events), vec!["x"]);
    assert!(events.errors().count() == 0);
}

#[test]
fn other_markup_declarations_are_discarded_with_an_error() {
    let events = parse("<!ENTITY junk><p>x");
    assert!(events
        .errors()
        .any(|(kind, msg, _)| kind == ErrorKind::Lexical && msg.contains("entity")));
    assert_eq!(text_events(&events), vec!["x"]);
}

#[test]
fn attribute_defaults_apply() {
    let events = parse("<input>");
    let attrs = events
        .events
        .iter()
        .find_map(|e| match e {
            Event::StartTag { name, attrs, .. } if name == "input" => Some(attrs),
            _ => None,
        })
        .expect("input tag emitted");
    assert_eq!(attrs.get("type"), Some(Some("text")));
}

#[test]
fn bare_attribute_word_resolves_through_value_set() {
    let events = parse("<select name=s><option selected>x</select>");
    let attrs = events
        .events
        .iter()
        .find_map(|e| match e {
            Event::StartTag { name, attrs, .. } if name == "option" => Some(attrs),
            _ => None,
        })
        .expect("option tag emitted");
    assert_eq!(attrs.get("selected"), Some(Some("selected")));
}

#[test]
fn bare_undeclared_attribute_keeps_no_value_sentinel() {
    let events = parse("<p mystery>x");
    let attrs = events
        .events
        .iter()
        .find_map(|e| match e {
            Event::StartTag { name, attrs, .. } if name == "p" => Some(attrs),
            _ => None,
        })
        .expect("p tag emitted");
    assert_eq!(attrs.get("mystery"), Some(None));
    assert!(events.errors().any(|(kind, _, _)| kind == ErrorKind::Attribute));
}

#[test]
fn duplicate_attribute_keeps_first_and_reports() {
    let events = parse("<p align=left align=right>x");
    let attrs = events
        .events
        .iter()
        .find_map(|e| match e {
            Event::StartTag { name, attrs, .. } if name == "p" => Some(attrs),
            _ => None,
        })
        .expect("p tag emitted");
    assert_eq!(attrs.get("align"), Some(Some("left")));
    assert!(events
        .errors()
        .any(|(kind, msg, _)| kind == ErrorKind::Attribute && msg.contains("duplicate")));
}

#[test]
fn enumerated_attribute_value_is_checked() {
    let events = parse("<form method=zap>x</form>");
    assert!(events
        .errors()
        .any(|(kind, msg, _)| kind == ErrorKind::Attribute && msg.contains("not legal")));
}

#[test]
fn missing_required_attributes_are_reported() {
    let events = parse("<textarea>x</textarea>");
    let missing: Vec<_> = events
        .errors()
        .filter(|(kind, msg, _)| *kind == ErrorKind::Attribute && msg.contains("required"))
        .map(|(_, msg, _)| msg.to_string())
        .collect();
    assert!(missing.iter().any(|m| m.contains("rows")));
    assert!(missing.iter().any(|m| m.contains("cols")));
}

#[test]
fn entities_inside_attribute_values_expand() {
    let events = parse("<a href=\"x?a=1&amp;b=2\">t</a>");
    let attrs = events
        .events
        .iter()
        .find_map(|e| match e {
            Event::StartTag { name, attrs, .. } if name == "a" => Some(attrs),
            _ => None,
        })
        .expect("a tag emitted");
    assert_eq!(attrs.get("href"), Some(Some("x?a=1&b=2")));
}

#[test]
fn meta_charset_aborts_with_typed_signal() {
    let mut parser = Parser::new(html::dtd(), EventCollector::new());
    let mut src = StrSource::new("<meta charset=\"utf-8\"><p>x");
    assert_matches!(
        parser.parse(&mut src),
        Err(ParseAbort::CharsetChange { content, .. }) if content == "utf-8"
    );
}

#[test]
fn http_equiv_content_type_also_signals() {
    let mut parser = Parser::new(html::dtd(), EventCollector::new());
    let mut src =
        StrSource::new("<meta http-equiv=Content-Type content=\"text/html; charset=cp1252\">");
    assert_matches!(
        parser.parse(&mut src),
        Err(ParseAbort::CharsetChange { content, .. }) if content.contains("cp1252")
    );
}

#[test]
fn ignore_charset_option_suppresses_the_abort() {
    let events = parse_with(
        "<meta charset=\"utf-8\"><p>x",
        ParserOptions {
            strict: false,
            ignore_charset: true,
        },
    );
    assert_eq!(text_events(&events), vec!["x"]);
}

#[test]
fn strict_mode_surfaces_errors_instead_of_repairing() {
    // a <p> directly inside <ul> cannot be repaired without heuristics:
    // <li> does not permit start-tag omission
    let events = parse_strict("<ul><p>x</p></ul>");
    assert!(events
        .errors()
        .any(|(kind, msg, _)| kind == ErrorKind::Structural && msg.contains("not legal")));
    assert_balanced(&events);
}

#[test]
fn non_strict_mode_repairs_the_same_input() {
    let events = parse("<ul><p>x</p></ul>");
    // recovery opens the li the model predicts
    assert!(events
        .outline()
        .iter()
        .any(|s| s == "<~li>"));
    assert!(!events
        .errors()
        .any(|(kind, _, _)| kind == ErrorKind::Structural));
    assert_balanced(&events);
}

#[test]
fn resynchronization_counts_match_depth_delta() {
    let events = parse_strict("<ul><p>x");
    // the failed token forced the <ul> closed on the way back to body
    let implied_ul_close = events
        .events
        .iter()
        .any(|e| matches!(e, Event::EndTag { name, implied: true, .. } if name == "ul"));
    assert!(implied_ul_close);
    assert_balanced(&events);
}

#[test]
fn strict_reparse_of_canonical_output_is_idempotent() {
    let first = parse("<p>A<p>B");
    let canonical = serialize(&first);
    let second = parse_strict(&canonical);
    assert_eq!(strip_implied(&first.outline()), strip_implied(&second.outline()));
    assert_eq!(second.errors().count(), 0);
    // nothing needed repair the second time: no implied tags at all
    assert!(second.outline().iter().all(|s| !s.contains('~')));
}

#[test]
fn net_enabled_tags_accept_null_end() {
    let events = parse("<p><em/x/ y");
    assert_eq!(
        events.outline(),
        vec![
            "<~html>", "<~head>", "</~head>", "<~body>", "<p>", "<em>", "'x'", "</em>", "' y'",
            "</~p>", "</~body>", "</~html>",
        ]
    );
}

#[test]
fn empty_elements_emit_balanced_pairs() {
    let events = parse("<p>a<br>b");
    assert_eq!(
        events.outline(),
        vec![
            "<~html>", "<~head>", "</~head>", "<~body>", "<p>", "'a'", "<br>", "</~br>", "'b'",
            "</~p>", "</~body>", "</~html>",
        ]
    );
}

#[test]
fn anchor_exclusion_closes_outer_anchor() {
    // nested <a> is excluded; recovery closes the outer one
    let events = parse("<p><a href=x>1<a href=y>2</a>");
    assert_balanced(&events);
    let starts = events
        .outline()
        .iter()
        .filter(|s| s.starts_with("<a"))
        .count();
    assert_eq!(starts, 2);
}

fn serialize(events: &EventCollector) -> String {
    let mut out = String::new();
    for e in &events.events {
        match e {
            Event::StartTag { name, attrs, .. } => {
                out.push('<');
                out.push_str(name);
                for (n, v) in attrs.iter() {
                    out.push(' ');
                    out.push_str(n);
                    if let Some(v) = v {
                        out.push_str(&format!("=\"{}\"", v));
                    }
                }
                out.push('>');
            }
            Event::EndTag { name, .. } => {
                out.push_str(&format!("</{}>", name));
            }
            Event::Text { text, .. } => out.push_str(text),
            _ => {}
        }
    }
    out
}

fn strip_implied(outline: &[String]) -> Vec<String> {
    outline.iter().map(|s| s.replace('~', "")).collect()
}
