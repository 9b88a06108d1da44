//! A dirty-tracking handle over a row-mapped entity.
//!
//! Reproduces the source ORM's write-through update set without dynamic
//! attribute interception: callers mutate a row through setter methods
//! that record the touched column name, and `update()` flushes only the
//! columns that were actually touched. The lazy partial-column fetch the
//! source layer performs is not reproduced — handles always carry every
//! column of their row, which is cheap and simpler given a fixed struct
//! layout, at the cost of the source's narrower `SELECT`s (see DESIGN.md).

use std::collections::HashSet;
use std::ops::Deref;

/// Wraps a row of type `T` with a dirty-column set and an origin flag.
#[derive(Debug, Clone)]
pub struct Dirty<T> {
    pub row: T,
    dirty: HashSet<&'static str>,
    pub from_db: bool,
}

impl<T> Dirty<T> {
    /// Wrap a row that was just fetched from the database: clean, `from_db = true`.
    pub fn from_db(row: T) -> Self {
        Self {
            row,
            dirty: HashSet::new(),
            from_db: true,
        }
    }

    /// Wrap a locally constructed row pending insertion: `from_db = false`.
    pub fn pending_insert(row: T) -> Self {
        Self {
            row,
            dirty: HashSet::new(),
            from_db: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.dirty.iter().copied()
    }

    pub fn mark_dirty(&mut self, column: &'static str) {
        self.dirty.insert(column);
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn into_row(self) -> T {
        self.row
    }
}

impl<T> Deref for Dirty<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.row
    }
}
