//! The parse-event sink contract.
//!
//! The driver reports everything it accepts through an ordered sequence of
//! callbacks. Attribute maps are freshly allocated per tag event and owned
//! by the sink from then on.

/// Error taxonomy reported alongside every error callback.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// malformed tag, unterminated comment/literal/entity
    Lexical,
    /// token illegal at the current grammar position
    Structural,
    /// unknown name, value outside the declared set, duplicate
    Attribute,
    /// unresolvable name or malformed numeric reference
    Entity,
}

/// Ordered name→value attribute mapping for one start tag. A value of
/// `None` is the "no explicit value" marker used when the source gives a
/// bare attribute the grammar defines no value for.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Attributes {
    items: Vec<(String, Option<String>)>,
}

impl Attributes {
    pub fn new() -> Attributes {
        Attributes::default()
    }

    pub fn push(&mut self, name: String, value: Option<String>) {
        self.items.push((name, value));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|(n, _)| n == name)
    }

    /// `None` = attribute absent; `Some(None)` = present with no explicit
    /// value.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.items
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.items.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Receives the ordered parse events.
pub trait ParseSink {
    fn start_tag(&mut self, name: &str, attrs: Attributes, pos: usize, implied: bool);
    fn end_tag(&mut self, name: &str, pos: usize, implied: bool);
    fn text(&mut self, text: &str, pos: usize);
    fn comment(&mut self, text: &str, pos: usize);
    fn error(&mut self, kind: ErrorKind, message: &str, pos: usize);
    /// Reported once, at end of stream: the document's dominant line
    /// terminator.
    fn end_of_line(&mut self, _eol: &str) {}
}

/// One recorded parse event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    StartTag {
        name: String,
        attrs: Attributes,
        pos: usize,
        implied: bool,
    },
    EndTag {
        name: String,
        pos: usize,
        implied: bool,
    },
    Text {
        text: String,
        pos: usize,
    },
    Comment {
        text: String,
        pos: usize,
    },
    Error {
        kind: ErrorKind,
        message: String,
        pos: usize,
    },
    EndOfLine {
        eol: String,
    },
}

/// A sink that records every event, for tests and the CLI.
#[derive(Default)]
pub struct EventCollector {
    pub events: Vec<Event>,
}

impl EventCollector {
    pub fn new() -> EventCollector {
        EventCollector::default()
    }

    pub fn errors(&self) -> impl Iterator<Item = (ErrorKind, &str, usize)> {
        self.events.iter().filter_map(|e| match e {
            Event::Error { kind, message, pos } => Some((*kind, message.as_str(), *pos)),
            _ => None,
        })
    }

    /// The tag/text skeleton, for compact assertions: `<p>`, `</p>`,
    /// `'text'`, `<!--c-->`. Implied tags are marked with a `~` prefix.
    pub fn outline(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::StartTag { name, implied, .. } => {
                    Some(format!("<{}{}>", if *implied { "~" } else { "" }, name))
                }
                Event::EndTag { name, implied, .. } => {
                    Some(format!("</{}{}>", if *implied { "~" } else { "" }, name))
                }
                Event::Text { text, .. } => Some(format!("'{}'", text)),
                Event::Comment { text, .. } => Some(format!("<!--{}-->", text)),
                _ => None,
            })
            .collect()
    }
}

impl ParseSink for EventCollector {
    fn start_tag(&mut self, name: &str, attrs: Attributes, pos: usize, implied: bool) {
        self.events.push(Event::StartTag {
            name: name.to_string(),
            attrs,
            pos,
            implied,
        });
    }

    fn end_tag(&mut self, name: &str, pos: usize, implied: bool) {
        self.events.push(Event::EndTag {
            name: name.to_string(),
            pos,
            implied,
        });
    }

    fn text(&mut self, text: &str, pos: usize) {
        self.events.push(Event::Text {
            text: text.to_string(),
            pos,
        });
    }

    fn comment(&mut self, text: &str, pos: usize) {
        self.events.push(Event::Comment {
            text: text.to_string(),
            pos,
        });
    }

    fn error(&mut self, kind: ErrorKind, message: &str, pos: usize) {
        self.events.push(Event::Error {
            kind,
            message: message.to_string(),
            pos,
        });
    }

    fn end_of_line(&mut self, eol: &str) {
        self.events.push(Event::EndOfLine {
            eol: eol.to_string(),
        });
    }
}
