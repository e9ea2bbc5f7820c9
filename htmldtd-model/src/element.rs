//! Element and attribute declarations.

use crate::content::ContentModel;
use crate::ElementIdx;

/// How an element's content is interpreted by the parser.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ContentKind {
    /// Plain literal data: content is scanned up to the matching end tag
    /// without entity expansion.
    Data,
    /// Raw literal data with entity expansion.
    RawData,
    /// No content at all; the start tag is the whole element.
    Empty,
    /// Unrestricted: any element or data may appear inside.
    Any,
    /// Content governed by a content model.
    Modeled,
}

impl ContentKind {
    pub fn code(self) -> u8 {
        match self {
            ContentKind::Data => 0,
            ContentKind::RawData => 1,
            ContentKind::Empty => 2,
            ContentKind::Any => 3,
            ContentKind::Modeled => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<ContentKind> {
        Some(match code {
            0 => ContentKind::Data,
            1 => ContentKind::RawData,
            2 => ContentKind::Empty,
            3 => ContentKind::Any,
            4 => ContentKind::Modeled,
            _ => return None,
        })
    }
}

/// Structural role of an element, computed once from its name when the
/// element is first registered. The recovery heuristics switch on this
/// instead of re-comparing name strings in the hot path.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Role {
    None,
    Root,
    Head,
    Body,
    Paragraph,
    Table,
    TableRow,
    TableCell,
    Font,
    Center,
}

impl Role {
    pub fn from_name(name: &str) -> Role {
        match name {
            "html" => Role::Root,
            "head" => Role::Head,
            "body" => Role::Body,
            "p" => Role::Paragraph,
            "table" => Role::Table,
            "tr" => Role::TableRow,
            "td" | "th" => Role::TableCell,
            "font" => Role::Font,
            "center" => Role::Center,
            _ => Role::None,
        }
    }

    /// Roles that may appear at most once per document; a repeat is one of
    /// the nonsense patterns the recovery cascade drops outright.
    pub fn is_unique_structural(self) -> bool {
        matches!(self, Role::Root | Role::Head | Role::Body)
    }
}

fn name_breaks_flow(name: &str) -> bool {
    matches!(
        name,
        "html"
            | "head"
            | "body"
            | "title"
            | "meta"
            | "link"
            | "base"
            | "style"
            | "script"
            | "p"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "ul"
            | "ol"
            | "li"
            | "dl"
            | "dt"
            | "dd"
            | "blockquote"
            | "pre"
            | "div"
            | "center"
            | "table"
            | "caption"
            | "tr"
            | "td"
            | "th"
            | "form"
            | "select"
            | "option"
            | "textarea"
            | "hr"
            | "br"
    )
}

fn name_preformatted(name: &str) -> bool {
    matches!(name, "pre" | "textarea")
}

/// Value-type tag of an attribute declaration.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AttValueKind {
    Cdata,
    Enumerated,
    Id,
    IdRef,
    Entity,
    Name,
    Number,
    NmToken,
    Notation,
}

impl AttValueKind {
    pub fn code(self) -> u8 {
        match self {
            AttValueKind::Cdata => 0,
            AttValueKind::Enumerated => 1,
            AttValueKind::Id => 2,
            AttValueKind::IdRef => 3,
            AttValueKind::Entity => 4,
            AttValueKind::Name => 5,
            AttValueKind::Number => 6,
            AttValueKind::NmToken => 7,
            AttValueKind::Notation => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<AttValueKind> {
        Some(match code {
            0 => AttValueKind::Cdata,
            1 => AttValueKind::Enumerated,
            2 => AttValueKind::Id,
            3 => AttValueKind::IdRef,
            4 => AttValueKind::Entity,
            5 => AttValueKind::Name,
            6 => AttValueKind::Number,
            7 => AttValueKind::NmToken,
            8 => AttValueKind::Notation,
            _ => return None,
        })
    }
}

/// Declaration modifier of an attribute.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AttModifier {
    /// Declared with a default value and no other modifier.
    Default,
    Required,
    Implied,
    Fixed,
    Current,
    Conref,
}

impl AttModifier {
    pub fn code(self) -> u8 {
        match self {
            AttModifier::Default => 0,
            AttModifier::Required => 1,
            AttModifier::Implied => 2,
            AttModifier::Fixed => 3,
            AttModifier::Current => 4,
            AttModifier::Conref => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<AttModifier> {
        Some(match code {
            0 => AttModifier::Default,
            1 => AttModifier::Required,
            2 => AttModifier::Implied,
            3 => AttModifier::Fixed,
            4 => AttModifier::Current,
            5 => AttModifier::Conref,
            _ => return None,
        })
    }
}

/// One attribute declaration. Declarations keep insertion order; lookup is
/// linear, by name or by legal-value membership.
#[derive(Clone, Debug)]
pub struct AttDef {
    pub name: String,
    pub kind: AttValueKind,
    pub modifier: AttModifier,
    pub default: Option<String>,
    pub values: Option<Vec<String>>,
}

impl AttDef {
    pub fn new(name: &str, kind: AttValueKind, modifier: AttModifier) -> AttDef {
        AttDef {
            name: name.to_string(),
            kind,
            modifier,
            default: None,
            values: None,
        }
    }

    pub fn with_default(mut self, default: &str) -> AttDef {
        self.default = Some(default.to_string());
        self
    }

    pub fn with_values(mut self, values: &[&str]) -> AttDef {
        self.values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn contains_value(&self, value: &str) -> bool {
        self.values
            .as_ref()
            .map(|vs| vs.iter().any(|v| v == value))
            .unwrap_or(false)
    }
}

/// A set of elements, held as a bit-set indexed by `ElementIdx`. Sized by
/// the owning grammar's element count, growing as needed.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct ElementSet {
    bits: Vec<u64>,
}

impl ElementSet {
    pub fn new() -> ElementSet {
        ElementSet::default()
    }

    pub fn from_indices(indices: &[ElementIdx]) -> ElementSet {
        let mut set = ElementSet::new();
        for &i in indices {
            set.insert(i);
        }
        set
    }

    pub fn insert(&mut self, idx: ElementIdx) {
        let (word, bit) = (idx.as_usize() / 64, idx.as_usize() % 64);
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        self.bits[word] |= 1 << bit;
    }

    pub fn contains(&self, idx: ElementIdx) -> bool {
        let (word, bit) = (idx.as_usize() / 64, idx.as_usize() % 64);
        self.bits.get(word).map(|w| w & (1 << bit) != 0).unwrap_or(false)
    }

    /// In-place union with `other`.
    pub fn union_with(&mut self, other: &ElementSet) {
        if other.bits.len() > self.bits.len() {
            self.bits.resize(other.bits.len(), 0);
        }
        for (w, o) in self.bits.iter_mut().zip(other.bits.iter()) {
            *w |= o;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ElementIdx> + '_ {
        self.bits.iter().enumerate().flat_map(|(wi, w)| {
            (0..64)
                .filter(move |b| w & (1 << b) != 0)
                .map(move |b| ElementIdx((wi * 64 + b) as u32))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }
}

/// One element declaration in a grammar.
///
/// Created as an empty placeholder at first reference (which permits forward
/// references while a grammar is being built) and filled in by
/// `Dtd::define_element`. The latest definition wins.
#[derive(Clone, Debug)]
pub struct Element {
    pub name: String,
    pub index: ElementIdx,
    pub kind: ContentKind,
    pub omit_start: bool,
    pub omit_end: bool,
    pub content: Option<ContentModel>,
    pub exclusions: Option<ElementSet>,
    pub inclusions: Option<ElementSet>,
    pub atts: Vec<AttDef>,
    pub role: Role,
    pub breaks_flow: bool,
    pub preformatted: bool,
    /// false while this is an undefined placeholder
    pub defined: bool,
}

impl Element {
    pub(crate) fn placeholder(name: &str, index: ElementIdx) -> Element {
        Element {
            name: name.to_string(),
            index,
            kind: ContentKind::Any,
            omit_start: false,
            omit_end: false,
            content: None,
            exclusions: None,
            inclusions: None,
            atts: Vec::new(),
            role: Role::from_name(name),
            breaks_flow: name_breaks_flow(name),
            preformatted: name_preformatted(name),
            defined: false,
        }
    }

    /// Look up a declared attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttDef> {
        self.atts.iter().find(|a| a.name == name)
    }

    /// Resolve a bare value word (e.g. `selected`) to the attribute whose
    /// legal-value set contains it.
    pub fn attribute_by_value(&self, value: &str) -> Option<&AttDef> {
        self.atts.iter().find(|a| a.contains_value(value))
    }

    pub fn has_required_attribute(&self) -> bool {
        self.atts.iter().any(|a| a.modifier == AttModifier::Required)
    }

    pub fn excludes(&self, idx: ElementIdx) -> bool {
        self.exclusions.as_ref().map(|s| s.contains(idx)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_set_grows() {
        let mut set = ElementSet::new();
        set.insert(ElementIdx(3));
        set.insert(ElementIdx(130));
        assert!(set.contains(ElementIdx(3)));
        assert!(set.contains(ElementIdx(130)));
        assert!(!set.contains(ElementIdx(64)));
        assert_eq!(set.iter().count(), 2);
    }

    #[test]
    fn element_set_union() {
        let mut a = ElementSet::from_indices(&[ElementIdx(1)]);
        let b = ElementSet::from_indices(&[ElementIdx(70)]);
        a.union_with(&b);
        assert!(a.contains(ElementIdx(1)));
        assert!(a.contains(ElementIdx(70)));
    }

    #[test]
    fn bare_value_resolution() {
        let mut e = Element::placeholder("option", ElementIdx(0));
        e.atts.push(
            AttDef::new("selected", AttValueKind::Enumerated, AttModifier::Implied)
                .with_values(&["selected"]),
        );
        let att = e.attribute_by_value("selected").unwrap();
        assert_eq!(att.name, "selected");
        assert!(e.attribute_by_value("checked").is_none());
    }

    #[test]
    fn roles_from_names() {
        assert_eq!(Role::from_name("table"), Role::Table);
        assert_eq!(Role::from_name("td"), Role::TableCell);
        assert_eq!(Role::from_name("em"), Role::None);
        assert!(Role::from_name("body").is_unique_structural());
    }
}
