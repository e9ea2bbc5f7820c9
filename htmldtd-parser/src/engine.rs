//! The content-model matching engine.
//!
//! A [`Position`] is a cursor into a content model during a parse: the node
//! being matched, a progress value whose meaning depends on the node's
//! operator, and the continuation to resume once the node is satisfied.
//! Positions are persistent: every advance allocates fresh links and never
//! mutates shared state, so rejected attempts leave the caller's position
//! intact. The grammar must be deterministic (no backtracking is ever
//! performed); determinism is the grammar author's obligation and is not
//! verified here.

use fnv::FnvHashMap;
use htmldtd_model::{ContentModel, ElementIdx, ModelId, ModelOp, NodeId};
use std::rc::Rc;

/// A point in the derivation of one content model.
#[derive(Debug)]
pub struct Position {
    node: NodeId,
    /// Iteration count for `+`, child cursor for `,`, satisfied-branch
    /// bit-mask for `&`; unused otherwise.
    value: u64,
    /// What must match once this node is satisfied.
    next: Option<Rc<Position>>,
}

impl Position {
    fn link(node: NodeId, value: u64, next: Option<Rc<Position>>) -> Rc<Position> {
        Rc::new(Position { node, value, next })
    }
}

/// Outcome of [`Engine::advance`]. Rejection is an ordinary, frequent
/// result used by the driver to try recovery alternatives.
#[derive(Debug)]
pub enum Step {
    Reject,
    /// Token consumed; `None` means the model is now fully consumed.
    Next(Option<Rc<Position>>),
}

/// One engine instance serves one parse. The memo table caches "could
/// element E start here" answers for `|`/`&` group nodes, keyed by
/// (model, node, element) so models from any number of elements share it.
#[derive(Default)]
pub struct Engine {
    memo: FnvHashMap<(ModelId, NodeId, ElementIdx), bool>,
}

impl Engine {
    pub fn new() -> Engine {
        Engine::default()
    }

    /// The position before anything of `model` has been matched.
    pub fn initial(&self, model: &ContentModel) -> Rc<Position> {
        Position::link(model.root(), 0, None)
    }

    /// May `node` match zero tokens?
    pub fn nullable(&self, model: &ContentModel, node: NodeId) -> bool {
        match model.node(node).op {
            ModelOp::Leaf(_) => false,
            ModelOp::ZeroOrMore | ModelOp::Optional => true,
            ModelOp::OneOrMore | ModelOp::Choice => {
                model.children(node).any(|c| self.nullable(model, c))
            }
            ModelOp::Sequence | ModelOp::All => {
                model.children(node).all(|c| self.nullable(model, c))
            }
        }
    }

    /// May a match of `node` begin by consuming `token`?
    pub fn can_start(&mut self, model: &ContentModel, node: NodeId, token: ElementIdx) -> bool {
        match model.node(node).op {
            ModelOp::Leaf(e) => e == token,
            ModelOp::ZeroOrMore | ModelOp::Optional | ModelOp::OneOrMore => {
                match model.node(node).child {
                    Some(child) => self.can_start(model, child, token),
                    None => false,
                }
            }
            ModelOp::Sequence => {
                let mut cursor = model.node(node).child;
                while let Some(c) = cursor {
                    if self.can_start(model, c, token) {
                        return true;
                    }
                    if !self.nullable(model, c) {
                        return false;
                    }
                    cursor = model.node(c).next;
                }
                false
            }
            // the expensive branch: group answers are memoized per element
            ModelOp::Choice | ModelOp::All => {
                let key = (model.id(), node, token);
                if let Some(&hit) = self.memo.get(&key) {
                    return hit;
                }
                let mut cursor = model.node(node).child;
                let mut found = false;
                while let Some(c) = cursor {
                    if self.can_start(model, c, token) {
                        found = true;
                        break;
                    }
                    cursor = model.node(c).next;
                }
                self.memo.insert(key, found);
                found
            }
        }
    }

    /// The single element that is unconditionally next at `node`, if the
    /// operator does not introduce choice.
    pub fn first_of_node(&self, model: &ContentModel, node: NodeId) -> Option<ElementIdx> {
        match model.node(node).op {
            ModelOp::Leaf(e) => Some(e),
            ModelOp::OneOrMore | ModelOp::Sequence => {
                let child = model.node(node).child?;
                self.first_of_node(model, child)
            }
            ModelOp::ZeroOrMore | ModelOp::Optional | ModelOp::Choice | ModelOp::All => None,
        }
    }

    /// As [`Engine::first_of_node`], but relative to a position's progress
    /// (a partially consumed sequence predicts its current child).
    pub fn first(&self, model: &ContentModel, pos: &Position) -> Option<ElementIdx> {
        match model.node(pos.node).op {
            ModelOp::Leaf(e) => Some(e),
            ModelOp::OneOrMore => {
                let child = model.node(pos.node).child?;
                self.first_of_node(model, child)
            }
            ModelOp::Sequence => {
                let child = self.nth_child(model, pos.node, pos.value)?;
                self.first_of_node(model, child)
            }
            ModelOp::ZeroOrMore | ModelOp::Optional | ModelOp::Choice | ModelOp::All => None,
        }
    }

    fn nth_child(&self, model: &ContentModel, node: NodeId, n: u64) -> Option<NodeId> {
        model.children(node).nth(n as usize)
    }

    /// Consume `token` at `pos`, returning the new position or `Reject`.
    pub fn advance(
        &mut self,
        model: &ContentModel,
        pos: &Rc<Position>,
        token: ElementIdx,
    ) -> Step {
        let node = pos.node;
        match model.node(node).op {
            ModelOp::OneOrMore => {
                if self.can_start(model, node, token) {
                    let child = match model.node(node).child {
                        Some(c) => c,
                        None => return Step::Reject,
                    };
                    let again = Position::link(node, pos.value + 1, pos.next.clone());
                    let enter = Position::link(child, 0, Some(again));
                    return self.advance(model, &enter, token);
                }
                if pos.value != 0 {
                    return self.defer(model, pos, token);
                }
                Step::Reject
            }
            ModelOp::ZeroOrMore => {
                if self.can_start(model, node, token) {
                    let child = match model.node(node).child {
                        Some(c) => c,
                        None => return Step::Reject,
                    };
                    let enter = Position::link(child, 0, Some(pos.clone()));
                    return self.advance(model, &enter, token);
                }
                self.defer(model, pos, token)
            }
            ModelOp::Optional => {
                if self.can_start(model, node, token) {
                    let child = match model.node(node).child {
                        Some(c) => c,
                        None => return Step::Reject,
                    };
                    let enter = Position::link(child, 0, pos.next.clone());
                    return self.advance(model, &enter, token);
                }
                self.defer(model, pos, token)
            }
            ModelOp::Choice => {
                let mut cursor = model.node(node).child;
                while let Some(c) = cursor {
                    if self.can_start(model, c, token) {
                        let enter = Position::link(c, 0, pos.next.clone());
                        return self.advance(model, &enter, token);
                    }
                    cursor = model.node(c).next;
                }
                Step::Reject
            }
            ModelOp::Sequence => {
                let current = match self.nth_child(model, node, pos.value) {
                    Some(c) => c,
                    None => return self.defer(model, pos, token),
                };
                if self.can_start(model, current, token) || self.nullable(model, current) {
                    let continuation = if model.node(current).next.is_none() {
                        pos.next.clone()
                    } else {
                        Some(Position::link(node, pos.value + 1, pos.next.clone()))
                    };
                    let enter = Position::link(current, 0, continuation);
                    return self.advance(model, &enter, token);
                }
                Step::Reject
            }
            ModelOp::All => {
                let mut complete = true;
                let mut cursor = model.node(node).child;
                let mut i = 0u32;
                while let Some(c) = cursor {
                    if pos.value & (1 << i) == 0 {
                        if self.can_start(model, c, token) {
                            let again =
                                Position::link(node, pos.value | (1 << i), pos.next.clone());
                            let enter = Position::link(c, 0, Some(again));
                            return self.advance(model, &enter, token);
                        }
                        if !self.nullable(model, c) {
                            complete = false;
                        }
                    }
                    cursor = model.node(c).next;
                    i += 1;
                }
                if complete {
                    return self.defer(model, pos, token);
                }
                Step::Reject
            }
            ModelOp::Leaf(e) => {
                if e == token {
                    Step::Next(pos.next.clone())
                } else {
                    Step::Reject
                }
            }
        }
    }

    fn defer(&mut self, model: &ContentModel, pos: &Position, token: ElementIdx) -> Step {
        match &pos.next {
            Some(next) => self.advance(model, next, token),
            None => Step::Reject,
        }
    }

    /// May `pos` legitimately represent "end of content here"? Same
    /// operator logic as `advance`, testing satisfaction instead of
    /// consuming.
    pub fn terminate(&self, model: &ContentModel, pos: &Position) -> bool {
        let node = pos.node;
        let next_ok = |next: &Option<Rc<Position>>| match next {
            Some(n) => self.terminate(model, n),
            None => true,
        };
        match model.node(node).op {
            ModelOp::OneOrMore => {
                if pos.value == 0 && !self.nullable(model, node) {
                    return false;
                }
                next_ok(&pos.next)
            }
            ModelOp::ZeroOrMore | ModelOp::Optional => next_ok(&pos.next),
            ModelOp::Choice => {
                if self.nullable(model, node) {
                    next_ok(&pos.next)
                } else {
                    false
                }
            }
            ModelOp::All => {
                let mut cursor = model.node(node).child;
                let mut i = 0u32;
                while let Some(c) = cursor {
                    if pos.value & (1 << i) == 0 && !self.nullable(model, c) {
                        return false;
                    }
                    cursor = model.node(c).next;
                    i += 1;
                }
                next_ok(&pos.next)
            }
            ModelOp::Sequence => {
                let mut cursor = self.nth_child(model, node, pos.value);
                while let Some(c) = cursor {
                    if !self.nullable(model, c) {
                        return false;
                    }
                    cursor = model.node(c).next;
                }
                next_ok(&pos.next)
            }
            ModelOp::Leaf(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use htmldtd_model::ContentModelBuilder;

    const A: ElementIdx = ElementIdx(1);
    const B: ElementIdx = ElementIdx(2);
    const C: ElementIdx = ElementIdx(3);

    /// `(a, b) | c`
    fn seq_or_c() -> ContentModel {
        let mut b = ContentModelBuilder::new();
        let la = b.leaf(A);
        let lb = b.leaf(B);
        let seq = b.seq(&[la, lb]);
        let lc = b.leaf(C);
        let root = b.choice(&[seq, lc]);
        b.build(root)
    }

    fn run(model: &ContentModel, tokens: &[ElementIdx]) -> Option<bool> {
        let mut engine = Engine::new();
        let mut pos = Some(engine.initial(model));
        for &t in tokens {
            match pos {
                Some(ref p) => match engine.advance(model, p, t) {
                    Step::Next(n) => pos = n,
                    Step::Reject => return None,
                },
                // model consumed; nothing further matches
                None => return None,
            }
        }
        Some(match pos {
            Some(p) => engine.terminate(model, &p),
            None => true,
        })
    }

    #[test]
    fn choice_first_tokens() {
        let m = seq_or_c();
        let mut e = Engine::new();
        assert!(e.can_start(&m, m.root(), A));
        assert!(!e.can_start(&m, m.root(), B));
        assert!(e.can_start(&m, m.root(), C));
    }

    #[test]
    fn sequence_through_choice() {
        let m = seq_or_c();
        assert_eq!(run(&m, &[A, B]), Some(true));
        assert_eq!(run(&m, &[A]), Some(false));
        assert_eq!(run(&m, &[C]), Some(true));
        assert_eq!(run(&m, &[B]), None);
        assert_eq!(run(&m, &[C, A]), None);
    }

    #[test]
    fn one_or_more_repeats() {
        let mut b = ContentModelBuilder::new();
        let la = b.leaf(A);
        let root = b.plus(la);
        let m = b.build(root);
        assert_eq!(run(&m, &[]), Some(false));
        assert_eq!(run(&m, &[A]), Some(true));
        assert_eq!(run(&m, &[A, A, A]), Some(true));
        assert_eq!(run(&m, &[A, B]), None);
    }

    #[test]
    fn star_skips_to_continuation() {
        // (a*, b)
        let mut b = ContentModelBuilder::new();
        let la = b.leaf(A);
        let star = b.star(la);
        let lb = b.leaf(B);
        let root = b.seq(&[star, lb]);
        let m = b.build(root);
        assert_eq!(run(&m, &[B]), Some(true));
        assert_eq!(run(&m, &[A, A, B]), Some(true));
        assert_eq!(run(&m, &[A]), Some(false));
    }

    #[test]
    fn all_group_any_order() {
        // (a & b?)
        let mut b = ContentModelBuilder::new();
        let la = b.leaf(A);
        let lb = b.leaf(B);
        let ob = b.opt(lb);
        let root = b.all(&[la, ob]);
        let m = b.build(root);
        assert_eq!(run(&m, &[A]), Some(true));
        assert_eq!(run(&m, &[A, B]), Some(true));
        assert_eq!(run(&m, &[B, A]), Some(true));
        assert_eq!(run(&m, &[]), Some(false));
        assert_eq!(run(&m, &[B, B]), None);
    }

    #[test]
    fn optional_consumes_at_most_once() {
        // (a?, b)
        let mut b = ContentModelBuilder::new();
        let la = b.leaf(A);
        let oa = b.opt(la);
        let lb = b.leaf(B);
        let root = b.seq(&[oa, lb]);
        let m = b.build(root);
        assert_eq!(run(&m, &[A, B]), Some(true));
        assert_eq!(run(&m, &[B]), Some(true));
        assert_eq!(run(&m, &[A, A, B]), None);
    }

    #[test]
    fn first_prediction() {
        // (a, b): before anything, the unconditional next element is a
        let mut b = ContentModelBuilder::new();
        let la = b.leaf(A);
        let lb = b.leaf(B);
        let root = b.seq(&[la, lb]);
        let m = b.build(root);
        let mut e = Engine::new();
        let p0 = e.initial(&m);
        assert_eq!(e.first(&m, &p0), Some(A));
        assert_matches!(e.advance(&m, &p0, B), Step::Reject);
        let p1 = match e.advance(&m, &p0, A) {
            Step::Next(Some(p)) => p,
            other => panic!("unexpected step {:?}", other),
        };
        assert_eq!(e.first(&m, &p1), Some(B));
    }

    #[test]
    fn choice_gives_no_first_prediction() {
        let m = seq_or_c();
        let e = Engine::new();
        let p0 = e.initial(&m);
        assert_eq!(e.first(&m, &p0), None);
    }

    #[test]
    fn memo_is_consistent_across_queries() {
        let m = seq_or_c();
        let mut e = Engine::new();
        for _ in 0..3 {
            assert!(e.can_start(&m, m.root(), A));
            assert!(!e.can_start(&m, m.root(), B));
        }
    }
}
