//! Grammar model for DTD-driven markup parsing.
//!
//! A [`Dtd`] is one named grammar: element, attribute-list, and entity
//! declarations. It has no matching behavior of its own beyond lookup and
//! registration; the content-model engine and the parse driver live in the
//! `htmldtd-parser` crate.
//!
//! Grammars are expensive to build and are shared by name across all parses
//! through a [`DtdRegistry`], as immutable `Arc<Dtd>` values.

pub mod binary;
mod content;
mod element;
mod entity;
pub mod html;

pub use content::{Children, ContentModel, ContentModelBuilder, ModelId, ModelNode, ModelOp, NodeId};
pub use element::{
    AttDef, AttModifier, AttValueKind, ContentKind, Element, ElementSet, Role,
};
pub use entity::{Entity, EntityKind};

use fnv::FnvHashMap;
use log::debug;
use std::sync::{Arc, Mutex};

/// Stable index of an element within its grammar, assigned at first
/// reference and never reused.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ElementIdx(pub u32);

impl ElementIdx {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Elements the driver consults on its fast paths, resolved eagerly when
/// the grammar is created so later lookups are plain index loads.
#[derive(Copy, Clone, Debug)]
pub struct WellKnown {
    pub pcdata: ElementIdx,
    pub html: ElementIdx,
    pub head: ElementIdx,
    pub body: ElementIdx,
    pub p: ElementIdx,
    pub meta: ElementIdx,
    pub title: ElementIdx,
    pub style: ElementIdx,
    pub script: ElementIdx,
    pub tr: ElementIdx,
}

/// One named grammar. Cloning is deep; the parser clones on write when a
/// document references elements the grammar never declared, so shared
/// grammars stay immutable.
#[derive(Clone, Debug)]
pub struct Dtd {
    name: String,
    elements: Vec<Element>,
    by_name: FnvHashMap<String, ElementIdx>,
    entities: Vec<Entity>,
    entities_by_name: FnvHashMap<String, usize>,
    entities_by_char: FnvHashMap<char, usize>,
    next_model_id: u32,
    well_known: WellKnown,
}

impl Dtd {
    pub fn new(name: &str) -> Dtd {
        let placeholder = ElementIdx(0);
        let mut dtd = Dtd {
            name: name.to_string(),
            elements: Vec::new(),
            by_name: FnvHashMap::default(),
            entities: Vec::new(),
            entities_by_name: FnvHashMap::default(),
            entities_by_char: FnvHashMap::default(),
            next_model_id: 0,
            well_known: WellKnown {
                pcdata: placeholder,
                html: placeholder,
                head: placeholder,
                body: placeholder,
                p: placeholder,
                meta: placeholder,
                title: placeholder,
                style: placeholder,
                script: placeholder,
                tr: placeholder,
            },
        };
        dtd.well_known = WellKnown {
            pcdata: dtd.get_or_create("#pcdata"),
            html: dtd.get_or_create("html"),
            head: dtd.get_or_create("head"),
            body: dtd.get_or_create("body"),
            p: dtd.get_or_create("p"),
            meta: dtd.get_or_create("meta"),
            title: dtd.get_or_create("title"),
            style: dtd.get_or_create("style"),
            script: dtd.get_or_create("script"),
            tr: dtd.get_or_create("tr"),
        };
        dtd
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn well_known(&self) -> &WellKnown {
        &self.well_known
    }

    /// Number of element slots; the grammar's high-water mark for sizing
    /// element bit-sets.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Look up an element by name, registering an empty placeholder if it
    /// is not yet known. Placeholders permit forward references while a
    /// grammar is being built.
    pub fn get_or_create(&mut self, name: &str) -> ElementIdx {
        if let Some(&idx) = self.by_name.get(name) {
            return idx;
        }
        let idx = ElementIdx(self.elements.len() as u32);
        self.elements.push(Element::placeholder(name, idx));
        self.by_name.insert(name.to_string(), idx);
        idx
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.by_name.get(name).map(|&i| &self.elements[i.as_usize()])
    }

    pub fn element_idx(&self, name: &str) -> Option<ElementIdx> {
        self.by_name.get(name).copied()
    }

    pub fn element_at(&self, idx: ElementIdx) -> &Element {
        &self.elements[idx.as_usize()]
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    /// Full element definition in one atomic call. No error on duplicate
    /// definition; the latest wins.
    #[allow(clippy::too_many_arguments)]
    pub fn define_element(
        &mut self,
        name: &str,
        kind: ContentKind,
        omit_start: bool,
        omit_end: bool,
        mut content: Option<ContentModel>,
        exclusions: Option<ElementSet>,
        inclusions: Option<ElementSet>,
        atts: Vec<AttDef>,
    ) -> ElementIdx {
        let idx = self.get_or_create(name);
        if let Some(model) = content.as_mut() {
            model.set_id(ModelId(self.next_model_id));
            self.next_model_id += 1;
        }
        let elem = &mut self.elements[idx.as_usize()];
        elem.kind = kind;
        elem.omit_start = omit_start;
        elem.omit_end = omit_end;
        elem.content = content;
        elem.exclusions = exclusions;
        elem.inclusions = inclusions;
        elem.atts = atts;
        elem.defined = true;
        idx
    }

    /// Define or extend an element's attribute list; existing declarations
    /// with the same name are replaced.
    pub fn define_attributes(&mut self, name: &str, atts: Vec<AttDef>) -> ElementIdx {
        let idx = self.get_or_create(name);
        let elem = &mut self.elements[idx.as_usize()];
        for att in atts {
            if let Some(existing) = elem.atts.iter_mut().find(|a| a.name == att.name) {
                *existing = att;
            } else {
                elem.atts.push(att);
            }
        }
        idx
    }

    /// Register an entity. A one-character general entity is additionally
    /// indexed by its codepoint. The latest registration wins for both
    /// keys.
    pub fn register_entity(&mut self, entity: Entity) {
        let slot = self.entities.len();
        if let Some(c) = entity.single_char() {
            self.entities_by_char.insert(c, slot);
        }
        self.entities_by_name.insert(entity.name.clone(), slot);
        self.entities.push(entity);
    }

    pub fn define_entity(&mut self, name: &str, kind: EntityKind, data: &str) {
        self.register_entity(Entity::general(name, kind, data));
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities_by_name.get(name).map(|&i| &self.entities[i])
    }

    /// Case-insensitive fallback lookup, used by the driver in permissive
    /// mode when the exact name is unknown.
    pub fn entity_ignore_case(&self, name: &str) -> Option<&Entity> {
        self.entities_by_name
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, &i)| &self.entities[i])
    }

    pub fn entity_for_char(&self, c: char) -> Option<&Entity> {
        self.entities_by_char.get(&c).map(|&i| &self.entities[i])
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }
}

/// Registry of named grammars.
///
/// Construction is idempotent per name and safe under concurrent first use:
/// the builder may run more than once in a race, but only one result is
/// kept and every caller sees the same `Arc`.
#[derive(Default)]
pub struct DtdRegistry {
    inner: Mutex<FnvHashMap<String, Arc<Dtd>>>,
}

impl DtdRegistry {
    pub fn new() -> DtdRegistry {
        DtdRegistry::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Dtd>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Look up `name`, building and inserting the grammar on first use.
    /// The builder runs outside the lock; a concurrent winner's value is
    /// returned instead of the loser's.
    pub fn get_or_insert_with<F, E>(&self, name: &str, build: F) -> Result<Arc<Dtd>, E>
    where
        F: FnOnce() -> Result<Dtd, E>,
    {
        if let Some(found) = self.get(name) {
            return Ok(found);
        }
        debug!("building grammar {:?}", name);
        let built = Arc::new(build()?);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.entry(name.to_string()).or_insert(built).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn well_known_resolved_eagerly() {
        let dtd = Dtd::new("test");
        assert_eq!(dtd.element_at(dtd.well_known().pcdata).name, "#pcdata");
        assert_eq!(dtd.element_at(dtd.well_known().html).name, "html");
        assert_eq!(dtd.element_at(dtd.well_known().tr).name, "tr");
    }

    #[test]
    fn forward_reference_keeps_index() {
        let mut dtd = Dtd::new("test");
        let early = dtd.get_or_create("li");
        assert!(!dtd.element_at(early).defined);
        let defined = dtd.define_element(
            "li",
            ContentKind::Modeled,
            false,
            true,
            None,
            None,
            None,
            vec![],
        );
        assert_eq!(early, defined);
        assert!(dtd.element_at(early).defined);
        assert!(dtd.element_at(early).omit_end);
    }

    #[test]
    fn latest_definition_wins() {
        let mut dtd = Dtd::new("test");
        dtd.define_element("x", ContentKind::Empty, false, false, None, None, None, vec![]);
        dtd.define_element("x", ContentKind::Any, true, true, None, None, None, vec![]);
        let x = dtd.element("x").unwrap();
        assert_eq!(x.kind, ContentKind::Any);
        assert!(x.omit_start);
    }

    #[test]
    fn entity_aliased_by_codepoint() {
        let mut dtd = Dtd::new("test");
        dtd.define_entity("lt", EntityKind::Cdata, "<");
        dtd.define_entity("hellip", EntityKind::Cdata, "\u{2026}");
        assert_eq!(dtd.entity("lt").unwrap().data, "<");
        assert_eq!(dtd.entity_for_char('<').unwrap().name, "lt");
        assert_matches!(dtd.entity_ignore_case("LT"), Some(e) if e.name == "lt");
        assert_eq!(dtd.entity_for_char('\u{2026}').unwrap().name, "hellip");
    }

    #[test]
    fn registry_concurrent_first_use() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let registry = Arc::new(DtdRegistry::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for _ in 0..8 {
            let registry = registry.clone();
            let builds = builds.clone();
            handles.push(std::thread::spawn(move || {
                registry
                    .get_or_insert_with("shared", || {
                        builds.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, std::convert::Infallible>(Dtd::new("shared"))
                    })
                    .unwrap()
            }));
        }
        let got: Vec<Arc<Dtd>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for dtd in &got[1..] {
            assert!(Arc::ptr_eq(&got[0], dtd));
        }
        // the builder may have raced, but never after the first insert
        assert!(builds.load(Ordering::SeqCst) >= 1);
        assert!(registry.get("shared").is_some());
    }
}
