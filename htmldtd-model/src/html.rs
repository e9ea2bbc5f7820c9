//! The built-in HTML-flavored grammar.
//!
//! A compact default grammar in the HTML 3.2 mould: document structure with
//! omissible tags, flow/inline content groups, tables, lists, forms, literal
//! content elements, and the common named character entities. Built once per
//! process and shared.
//!
//! This is deliberately not all of HTML; it is the grammar the driver and
//! the CLI fall back on when no compiled grammar file is given.

use crate::{
    AttDef, AttModifier, AttValueKind, ContentKind, ContentModel, ContentModelBuilder, Dtd,
    ElementSet, EntityKind,
};
use lazy_static::lazy_static;
use std::sync::Arc;

/// Registry name of the built-in grammar.
pub const NAME: &str = "html";

lazy_static! {
    static ref HTML: Arc<Dtd> = Arc::new(build());
}

/// The built-in grammar, built on first use.
pub fn dtd() -> Arc<Dtd> {
    HTML.clone()
}

const INLINE: &[&str] = &[
    "#pcdata", "a", "b", "i", "u", "em", "strong", "span", "font", "br", "img", "input",
    "select", "textarea", "script",
];

const BLOCK: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "pre", "div", "center", "blockquote",
    "table", "form", "hr",
];

/// `( a | b | ... )*` over the named elements.
fn star_of(dtd: &mut Dtd, names: &[&str]) -> ContentModel {
    let indices: Vec<_> = names.iter().map(|n| dtd.get_or_create(n)).collect();
    let mut b = ContentModelBuilder::new();
    let leaves: Vec<_> = indices.into_iter().map(|i| b.leaf(i)).collect();
    let inner = if leaves.len() == 1 {
        leaves[0]
    } else {
        b.choice(&leaves)
    };
    let root = b.star(inner);
    b.build(root)
}

fn flow(dtd: &mut Dtd) -> ContentModel {
    let names: Vec<&str> = INLINE.iter().chain(BLOCK.iter()).copied().collect();
    star_of(dtd, &names)
}

fn set_of(dtd: &mut Dtd, names: &[&str]) -> ElementSet {
    let indices: Vec<_> = names.iter().map(|n| dtd.get_or_create(n)).collect();
    ElementSet::from_indices(&indices)
}

fn cdata(name: &str) -> AttDef {
    AttDef::new(name, AttValueKind::Cdata, AttModifier::Implied)
}

fn build() -> Dtd {
    let mut d = Dtd::new(NAME);

    // document structure
    let head = d.get_or_create("head");
    let body = d.get_or_create("body");
    let title = d.get_or_create("title");
    let base = d.get_or_create("base");
    {
        let mut b = ContentModelBuilder::new();
        let h = b.leaf(head);
        let bd = b.leaf(body);
        let root = b.seq(&[h, bd]);
        d.define_element("html", ContentKind::Modeled, true, true, Some(b.build(root)), None, None, vec![]);
    }
    {
        // title is optional so an untitled document can still resolve
        // through omitted-tag inference (head must stay terminable)
        let mut b = ContentModelBuilder::new();
        let t = b.leaf(title);
        let opt_title = b.opt(t);
        let ba = b.leaf(base);
        let opt_base = b.opt(ba);
        let root = b.all(&[opt_title, opt_base]);
        let inclusions = set_of(&mut d, &["meta", "link", "style", "script"]);
        d.define_element(
            "head",
            ContentKind::Modeled,
            true,
            true,
            Some(b.build(root)),
            None,
            Some(inclusions),
            vec![],
        );
    }
    let pcdata_model = star_of(&mut d, &["#pcdata"]);
    d.define_element("title", ContentKind::Modeled, false, false, Some(pcdata_model), None, None, vec![]);
    let body_model = flow(&mut d);
    d.define_element("body", ContentKind::Modeled, true, true, Some(body_model), None, None, vec![]);

    // head furniture
    d.define_element(
        "meta",
        ContentKind::Empty,
        false,
        true,
        None,
        None,
        None,
        vec![
            AttDef::new("http-equiv", AttValueKind::Name, AttModifier::Implied),
            AttDef::new("name", AttValueKind::Name, AttModifier::Implied),
            cdata("content"),
            cdata("charset"),
        ],
    );
    d.define_element("link", ContentKind::Empty, false, true, None, None, None, vec![cdata("href"), cdata("rel")]);
    d.define_element("base", ContentKind::Empty, false, true, None, None, None, vec![cdata("href")]);
    d.define_element("style", ContentKind::Data, false, false, None, None, None, vec![cdata("type")]);
    d.define_element(
        "script",
        ContentKind::Data,
        false,
        false,
        None,
        None,
        None,
        vec![cdata("type"), cdata("src")],
    );

    // blocks
    let p_model = star_of(&mut d, INLINE);
    d.define_element("p", ContentKind::Modeled, false, true, Some(p_model), None, None, vec![cdata("align")]);
    for h in ["h1", "h2", "h3", "h4", "h5", "h6"] {
        let model = star_of(&mut d, INLINE);
        d.define_element(h, ContentKind::Modeled, false, false, Some(model), None, None, vec![cdata("align")]);
    }
    for list in ["ul", "ol"] {
        let li = d.get_or_create("li");
        let mut b = ContentModelBuilder::new();
        let l = b.leaf(li);
        let root = b.plus(l);
        d.define_element(
            list,
            ContentKind::Modeled,
            false,
            false,
            Some(b.build(root)),
            None,
            None,
            vec![AttDef::new("compact", AttValueKind::Enumerated, AttModifier::Implied)
                .with_values(&["compact"])],
        );
    }
    let li_model = flow(&mut d);
    d.define_element("li", ContentKind::Modeled, false, true, Some(li_model), None, None, vec![]);
    let pre_model = star_of(&mut d, INLINE);
    let pre_excl = set_of(&mut d, &["img", "font"]);
    d.define_element("pre", ContentKind::Modeled, false, false, Some(pre_model), Some(pre_excl), None, vec![]);
    for block in ["div", "center", "blockquote"] {
        let model = flow(&mut d);
        d.define_element(block, ContentKind::Modeled, false, false, Some(model), None, None, vec![]);
    }
    d.define_element("hr", ContentKind::Empty, false, true, None, None, None, vec![cdata("width")]);

    // tables
    {
        let caption = d.get_or_create("caption");
        let tr = d.get_or_create("tr");
        let mut b = ContentModelBuilder::new();
        let c = b.leaf(caption);
        let opt_c = b.opt(c);
        let r = b.leaf(tr);
        let rows = b.plus(r);
        let root = b.seq(&[opt_c, rows]);
        d.define_element(
            "table",
            ContentKind::Modeled,
            false,
            false,
            Some(b.build(root)),
            None,
            None,
            vec![
                AttDef::new("border", AttValueKind::Number, AttModifier::Implied),
                cdata("width"),
            ],
        );
    }
    let caption_model = star_of(&mut d, INLINE);
    d.define_element("caption", ContentKind::Modeled, false, false, Some(caption_model), None, None, vec![]);
    let tr_model = star_of(&mut d, &["td", "th"]);
    d.define_element("tr", ContentKind::Modeled, false, true, Some(tr_model), None, None, vec![cdata("align")]);
    for cell in ["td", "th"] {
        let model = flow(&mut d);
        d.define_element(cell, ContentKind::Modeled, false, true, Some(model), None, None, vec![cdata("align")]);
    }

    // forms
    {
        let model = flow(&mut d);
        let excl = set_of(&mut d, &["form"]);
        d.define_element(
            "form",
            ContentKind::Modeled,
            false,
            false,
            Some(model),
            Some(excl),
            None,
            vec![
                cdata("action"),
                AttDef::new("method", AttValueKind::Enumerated, AttModifier::Default)
                    .with_default("get")
                    .with_values(&["get", "post"]),
            ],
        );
    }
    d.define_element(
        "input",
        ContentKind::Empty,
        false,
        true,
        None,
        None,
        None,
        vec![
            AttDef::new("type", AttValueKind::Enumerated, AttModifier::Default)
                .with_default("text")
                .with_values(&[
                    "text", "password", "checkbox", "radio", "submit", "reset", "file",
                    "hidden", "image", "button",
                ]),
            AttDef::new("name", AttValueKind::Name, AttModifier::Implied),
            cdata("value"),
            AttDef::new("checked", AttValueKind::Enumerated, AttModifier::Implied)
                .with_values(&["checked"]),
        ],
    );
    {
        let option = d.get_or_create("option");
        let mut b = ContentModelBuilder::new();
        let o = b.leaf(option);
        let root = b.plus(o);
        d.define_element(
            "select",
            ContentKind::Modeled,
            false,
            false,
            Some(b.build(root)),
            None,
            None,
            vec![
                AttDef::new("name", AttValueKind::Name, AttModifier::Implied),
                AttDef::new("multiple", AttValueKind::Enumerated, AttModifier::Implied)
                    .with_values(&["multiple"]),
            ],
        );
    }
    let option_model = star_of(&mut d, &["#pcdata"]);
    d.define_element(
        "option",
        ContentKind::Modeled,
        false,
        true,
        Some(option_model),
        None,
        None,
        vec![
            AttDef::new("selected", AttValueKind::Enumerated, AttModifier::Implied)
                .with_values(&["selected"]),
            cdata("value"),
        ],
    );
    d.define_element(
        "textarea",
        ContentKind::RawData,
        false,
        false,
        None,
        None,
        None,
        vec![
            AttDef::new("name", AttValueKind::Name, AttModifier::Implied),
            AttDef::new("rows", AttValueKind::Number, AttModifier::Required),
            AttDef::new("cols", AttValueKind::Number, AttModifier::Required),
        ],
    );

    // inline markup
    {
        let model = star_of(&mut d, INLINE);
        let excl = set_of(&mut d, &["a"]);
        d.define_element(
            "a",
            ContentKind::Modeled,
            false,
            false,
            Some(model),
            Some(excl),
            None,
            vec![cdata("href"), AttDef::new("name", AttValueKind::Name, AttModifier::Implied)],
        );
    }
    for tag in ["b", "i", "u", "em", "strong", "span"] {
        let model = star_of(&mut d, INLINE);
        d.define_element(tag, ContentKind::Modeled, false, false, Some(model), None, None, vec![]);
    }
    {
        let model = star_of(&mut d, INLINE);
        d.define_element(
            "font",
            ContentKind::Modeled,
            false,
            false,
            Some(model),
            None,
            None,
            vec![cdata("size"), cdata("color")],
        );
    }
    d.define_element("br", ContentKind::Empty, false, true, None, None, None, vec![]);
    d.define_element(
        "img",
        ContentKind::Empty,
        false,
        true,
        None,
        None,
        None,
        vec![
            AttDef::new("src", AttValueKind::Cdata, AttModifier::Required),
            cdata("alt"),
            AttDef::new("width", AttValueKind::Number, AttModifier::Implied),
            AttDef::new("height", AttValueKind::Number, AttModifier::Implied),
        ],
    );

    entities(&mut d);
    d
}

fn entities(d: &mut Dtd) {
    for (name, data) in [
        ("amp", "&"),
        ("lt", "<"),
        ("gt", ">"),
        ("quot", "\""),
        ("apos", "'"),
        ("nbsp", "\u{a0}"),
        ("copy", "\u{a9}"),
        ("reg", "\u{ae}"),
        ("sect", "\u{a7}"),
        ("pound", "\u{a3}"),
        ("middot", "\u{b7}"),
        ("laquo", "\u{ab}"),
        ("raquo", "\u{bb}"),
        ("agrave", "\u{e0}"),
        ("auml", "\u{e4}"),
        ("ccedil", "\u{e7}"),
        ("eacute", "\u{e9}"),
        ("egrave", "\u{e8}"),
        ("ntilde", "\u{f1}"),
        ("ouml", "\u{f6}"),
        ("szlig", "\u{df}"),
        ("uuml", "\u{fc}"),
        ("ndash", "\u{2013}"),
        ("mdash", "\u{2014}"),
        ("bull", "\u{2022}"),
        ("hellip", "\u{2026}"),
        ("trade", "\u{2122}"),
        ("euro", "\u{20ac}"),
    ] {
        d.define_entity(name, EntityKind::Cdata, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ModelOp, Role};

    #[test]
    fn structure_is_omissible() {
        let d = dtd();
        let html = d.element("html").unwrap();
        assert!(html.omit_start && html.omit_end);
        assert_eq!(html.role, Role::Root);
        let body = d.element("body").unwrap();
        assert!(body.omit_start && body.omit_end);
    }

    #[test]
    fn table_model_shape() {
        let d = dtd();
        let table = d.element("table").unwrap();
        let model = table.content.as_ref().unwrap();
        let kids: Vec<_> = model.children(model.root()).collect();
        assert_eq!(kids.len(), 2);
        assert!(matches!(model.node(kids[0]).op, ModelOp::Optional));
        assert!(matches!(model.node(kids[1]).op, ModelOp::OneOrMore));
    }

    #[test]
    fn pre_excludes_images() {
        let d = dtd();
        let pre = d.element("pre").unwrap();
        let img = d.element_idx("img").unwrap();
        assert!(pre.excludes(img));
        assert!(pre.preformatted);
    }

    #[test]
    fn bare_attribute_words() {
        let d = dtd();
        let option = d.element("option").unwrap();
        assert_eq!(option.attribute_by_value("selected").unwrap().name, "selected");
        let input = d.element("input").unwrap();
        assert_eq!(input.attribute_by_value("checked").unwrap().name, "checked");
    }

    #[test]
    fn required_attributes() {
        let d = dtd();
        assert!(d.element("textarea").unwrap().has_required_attribute());
        assert!(d.element("img").unwrap().has_required_attribute());
        assert!(!d.element("p").unwrap().has_required_attribute());
    }

    #[test]
    fn entities_present() {
        let d = dtd();
        assert_eq!(d.entity("mdash").unwrap().data, "\u{2014}");
        assert_eq!(d.entity_for_char('&').unwrap().name, "amp");
    }
}
