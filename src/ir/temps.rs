use crate::typeck::types::CType;

use super::TempId;

/// Per-function temporary numbering. Slots are 1-based (`_tmp1`, `_tmp2`, ...)
/// and never reused within a function, so a prelude can reference any
/// temporary defined before it.
#[derive(Debug, Default)]
pub struct TempAllocator {
    types: Vec<CType>,
    iter_slots: usize,
}

impl TempAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, ty: CType) -> TempId {
        self.types.push(ty);
        self.types.len()
    }

    pub fn ty(&self, id: TempId) -> Option<&CType> {
        id.checked_sub(1).and_then(|i| self.types.get(i))
    }

    /// Stack iterator buffers used by generic loops, numbered from 1.
    pub fn alloc_iter_slot(&mut self) -> usize {
        self.iter_slots += 1;
        self.iter_slots
    }

    pub fn count(&self) -> usize {
        self.types.len()
    }

    pub fn finish(self) -> (Vec<CType>, usize) {
        (self.types, self.iter_slots)
    }
}

pub fn temp_name(id: TempId) -> String {
    format!("_tmp{id}")
}
