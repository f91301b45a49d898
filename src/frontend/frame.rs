//! Stack frame layout of the function currently being parsed.
//!
//! The caller pushes arguments left to right and `cal` pushes the return
//! address, then the callee saves the old frame base and points `bp` at it:
//!
//! ```text
//! bp + n + 1   first argument
//! ...
//! bp + 2       last argument
//! bp + 1       return address
//! bp + 0       saved frame base
//! bp - 1       first local
//! bp - 2       second local
//! ```

use hashbrown::HashMap;

use crate::index::{IndexVec, simple_index};

simple_index! {
    /// Identifies a slot of a frame, in declaration order
    pub struct SlotId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Parameter,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub name: String,
    pub kind: SlotKind,
    /// Signed displacement from the frame base
    pub offset: i64,
}

#[derive(Debug, Default)]
pub struct FrameLayout {
    slots: IndexVec<SlotId, Slot>,
    parameters: HashMap<String, SlotId>,
    scopes: Vec<HashMap<String, SlotId>>,
    locals: usize,
}

impl FrameLayout {
    /// Lays out the parameters of a function. Returns the name of the first
    /// duplicated parameter, if any.
    pub fn new(parameters: &[String]) -> Result<Self, String> {
        let mut frame = Self {
            scopes: vec![HashMap::new()],
            ..Self::default()
        };

        let count = parameters.len() as i64;

        for (position, name) in parameters.iter().enumerate() {
            let id = frame.slots.push(Slot {
                name: name.clone(),
                kind: SlotKind::Parameter,
                offset: count + 1 - position as i64,
            });

            if frame.parameters.insert(name.clone(), id).is_some() {
                return Err(name.clone());
            }
        }

        Ok(frame)
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Names declared in the scope go out of view, their slots stay reserved.
    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Allocates a local slot without making it visible yet.
    pub fn allocate_local(&mut self, name: &str) -> SlotId {
        self.locals += 1;

        self.slots.push(Slot {
            name: name.to_owned(),
            kind: SlotKind::Local,
            offset: -(self.locals as i64),
        })
    }

    /// Makes a slot visible under its name in the innermost scope.
    pub fn bind(&mut self, slot: SlotId) {
        let name = self.slots[slot].name.clone();

        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, slot);
        }
    }

    pub fn declare_local(&mut self, name: &str) -> SlotId {
        let slot = self.allocate_local(name);
        self.bind(slot);
        slot
    }

    /// Innermost block scope first, then the parameters.
    pub fn resolve(&self, name: &str) -> Option<&Slot> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.parameters.get(name))
            .map(|id| &self.slots[*id])
    }

    pub fn slot(&self, id: SlotId) -> &Slot {
        &self.slots[id]
    }

    /// Number of local slots allocated so far
    pub fn depth(&self) -> usize {
        self.locals
    }

    pub fn slots(&self) -> impl Iterator<Item = (SlotId, &Slot)> {
        self.slots.enumerate()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parameters_count_down_to_two() {
        let frame = FrameLayout::new(&names(&["a", "b", "c"])).unwrap();

        assert_eq!(frame.resolve("a").unwrap().offset, 4);
        assert_eq!(frame.resolve("b").unwrap().offset, 3);
        assert_eq!(frame.resolve("c").unwrap().offset, 2);
        assert_eq!(frame.depth(), 0);
    }

    #[test]
    fn duplicate_parameters_are_reported() {
        assert_eq!(
            FrameLayout::new(&names(&["x", "y", "x"])).unwrap_err(),
            "x"
        );
    }

    #[test]
    fn locals_grow_downwards_and_are_never_reused() {
        let mut frame = FrameLayout::new(&names(&["p"])).unwrap();

        frame.declare_local("a");
        frame.push_scope();
        frame.declare_local("b");
        frame.pop_scope();
        frame.declare_local("c");

        assert_eq!(frame.resolve("a").unwrap().offset, -1);
        assert_eq!(frame.resolve("b"), None);
        assert_eq!(frame.resolve("c").unwrap().offset, -3);
        assert_eq!(frame.depth(), 3);

        let offsets = frame
            .slots()
            .filter(|(_, slot)| slot.kind == SlotKind::Local)
            .map(|(_, slot)| -slot.offset)
            .collect::<Vec<_>>();

        assert_eq!(offsets, vec![1, 2, 3]);
    }

    #[test]
    fn inner_scopes_shadow_outer_names_and_parameters() {
        let mut frame = FrameLayout::new(&names(&["x"])).unwrap();

        assert_eq!(frame.resolve("x").unwrap().kind, SlotKind::Parameter);

        frame.push_scope();
        frame.declare_local("x");
        assert_eq!(frame.resolve("x").unwrap().offset, -1);

        frame.pop_scope();
        assert_eq!(frame.resolve("x").unwrap().offset, 2);
    }

    #[test]
    fn allocated_slots_are_invisible_until_bound() {
        let mut frame = FrameLayout::new(&[]).unwrap();

        let slot = frame.allocate_local("t");
        assert_eq!(frame.resolve("t"), None);

        frame.bind(slot);
        assert_eq!(frame.resolve("t"), Some(frame.slot(slot)));
    }
}
