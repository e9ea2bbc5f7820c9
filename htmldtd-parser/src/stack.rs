//! The stack of currently-open elements.
//!
//! One frame per open element. A frame carries the content-model position
//! the engine is at, plus the inclusion/exclusion sets accumulated from the
//! frame's ancestors; `advance` is the single validity oracle the driver
//! consults before accepting any structural token.

use crate::engine::{Engine, Position, Step};
use htmldtd_model::{ContentKind, Dtd, ElementIdx, ElementSet};
use std::rc::Rc;

/// Where a frame's content model stands.
#[derive(Debug)]
pub enum ModelState {
    /// The element has no content model (empty, literal-data or
    /// unrestricted content).
    Unconstrained,
    /// The model has been fully consumed; only inclusions accept more.
    Done,
    At(Rc<Position>),
}

#[derive(Debug)]
pub struct TagFrame {
    pub element: ElementIdx,
    /// true when this frame was opened by recovery rather than by a source
    /// tag
    pub implied: bool,
    pub state: ModelState,
    pub inclusions: Option<ElementSet>,
    pub exclusions: Option<ElementSet>,
    pub preformatted: bool,
    /// null end tag (`/`) permitted
    pub net: bool,
    /// source offset of the opening tag
    pub pos: usize,
}

impl TagFrame {
    fn inclusion_accepts(&self, token: ElementIdx) -> bool {
        self.inclusions
            .as_ref()
            .map(|s| s.contains(token))
            .unwrap_or(false)
    }

    /// Is `token` forbidden here by an accumulated exclusion?
    pub fn excludes(&self, token: ElementIdx) -> bool {
        self.exclusions
            .as_ref()
            .map(|s| s.contains(token))
            .unwrap_or(false)
    }

    /// Would `advance` accept `token`? Same logic, no state change.
    pub fn accepts(&self, dtd: &Dtd, engine: &mut Engine, token: ElementIdx) -> bool {
        if self.excludes(token) {
            return false;
        }
        match &self.state {
            ModelState::At(pos) => {
                let elem = dtd.element_at(self.element);
                if let Some(model) = elem.content.as_ref() {
                    if !matches!(engine.advance(model, pos, token), Step::Reject) {
                        return true;
                    }
                }
                self.inclusion_accepts(token)
            }
            ModelState::Unconstrained => {
                if dtd.element_at(self.element).kind == ContentKind::Any {
                    true
                } else {
                    self.inclusion_accepts(token)
                }
            }
            ModelState::Done => self.inclusion_accepts(token),
        }
    }

    /// Accept `token` into this frame if it is legal here, updating the
    /// content-model position on success.
    pub fn advance(&mut self, dtd: &Dtd, engine: &mut Engine, token: ElementIdx) -> bool {
        if self.excludes(token) {
            return false;
        }
        match &self.state {
            ModelState::At(pos) => {
                let elem = dtd.element_at(self.element);
                if let Some(model) = elem.content.as_ref() {
                    match engine.advance(model, pos, token) {
                        Step::Next(next) => {
                            self.state = match next {
                                Some(p) => ModelState::At(p),
                                None => ModelState::Done,
                            };
                            return true;
                        }
                        Step::Reject => {}
                    }
                }
                self.inclusion_accepts(token)
            }
            ModelState::Unconstrained => {
                if dtd.element_at(self.element).kind == ContentKind::Any {
                    true
                } else {
                    self.inclusion_accepts(token)
                }
            }
            ModelState::Done => self.inclusion_accepts(token),
        }
    }

    /// May this frame close here without violating its content model?
    pub fn terminate(&self, dtd: &Dtd, engine: &Engine) -> bool {
        match &self.state {
            ModelState::At(pos) => {
                let elem = dtd.element_at(self.element);
                match elem.content.as_ref() {
                    Some(model) => engine.terminate(model, pos),
                    None => true,
                }
            }
            ModelState::Unconstrained | ModelState::Done => true,
        }
    }

    /// The single element unconditionally required next, if any.
    pub fn first(&self, dtd: &Dtd, engine: &Engine) -> Option<ElementIdx> {
        match &self.state {
            ModelState::At(pos) => {
                let elem = dtd.element_at(self.element);
                elem.content.as_ref().and_then(|m| engine.first(m, pos))
            }
            ModelState::Unconstrained | ModelState::Done => None,
        }
    }
}

#[derive(Default)]
pub struct TagStack {
    frames: Vec<TagFrame>,
}

impl TagStack {
    pub fn new() -> TagStack {
        TagStack::default()
    }

    /// Open a frame for `element`. Inclusion/exclusion sets are the union
    /// of the parent frame's sets with this element's own; the
    /// preformatted flag propagates from either.
    pub fn push(
        &mut self,
        dtd: &Dtd,
        engine: &Engine,
        element: ElementIdx,
        implied: bool,
        net: bool,
        pos: usize,
    ) {
        let elem = dtd.element_at(element);
        let state = match elem.content.as_ref() {
            Some(model) => ModelState::At(engine.initial(model)),
            None => ModelState::Unconstrained,
        };
        let parent = self.frames.last();
        let mut inclusions = parent.and_then(|p| p.inclusions.clone());
        let mut exclusions = parent.and_then(|p| p.exclusions.clone());
        let preformatted = parent.map(|p| p.preformatted).unwrap_or(false) || elem.preformatted;
        if let Some(own) = elem.inclusions.as_ref() {
            match inclusions.as_mut() {
                Some(s) => s.union_with(own),
                None => inclusions = Some(own.clone()),
            }
        }
        if let Some(own) = elem.exclusions.as_ref() {
            match exclusions.as_mut() {
                Some(s) => s.union_with(own),
                None => exclusions = Some(own.clone()),
            }
        }
        self.frames.push(TagFrame {
            element,
            implied,
            state,
            inclusions,
            exclusions,
            preformatted,
            net,
            pos,
        });
    }

    pub fn pop(&mut self) -> Option<TagFrame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&TagFrame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut TagFrame> {
        self.frames.last_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, i: usize) -> &TagFrame {
        &self.frames[i]
    }

    pub fn frames(&self) -> &[TagFrame] {
        &self.frames
    }

    /// Index of the innermost frame holding `element`.
    pub fn find(&self, element: ElementIdx) -> Option<usize> {
        self.frames.iter().rposition(|f| f.element == element)
    }

    pub fn in_preformatted(&self) -> bool {
        self.frames.last().map(|f| f.preformatted).unwrap_or(false)
    }
}
