//! Sequential resource identifiers.
//!
//! One [`IdAllocator`] per run, threaded through the stages that create
//! entities. Counters are independent per kind and never shared between
//! runs, so two runs over the same document yield the same ids.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Chapter,
    Image,
    Table,
    Footnote,
}

impl IdKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            IdKind::Chapter => "ch",
            IdKind::Image => "img",
            IdKind::Table => "tbl",
            IdKind::Footnote => "ftn",
        }
    }
}

#[derive(Debug, Default)]
pub struct IdAllocator {
    counters: HashMap<IdKind, u32>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id of `kind`: `ch-001`, `ch-002`, … `ch-1000`.
    pub fn next(&mut self, kind: IdKind) -> String {
        let n = self.counters.entry(kind).or_insert(0);
        *n += 1;
        format!("{}-{:03}", kind.prefix(), n)
    }

    /// Ids handed out so far for `kind`.
    pub fn issued(&self, kind: IdKind) -> u32 {
        self.counters.get(&kind).copied().unwrap_or(0)
    }
}
