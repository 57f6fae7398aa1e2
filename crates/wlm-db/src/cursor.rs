//! Forward-only result cursor.

use core::marker::PhantomData;

use crate::conn::StoredRow;
use crate::entities::Persistable;
use crate::error::DbError;
use crate::gateway::apply_row;

/// Rows of one listing, decoded into objects one at a time.
///
/// A row that fails to decode yields an error and the cursor moves on.
#[derive(Debug)]
pub struct Cursor<T> {
    rows: std::vec::IntoIter<StoredRow>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Persistable> Cursor<T> {
    pub(crate) fn new(rows: Vec<StoredRow>) -> Self {
        Self {
            rows: rows.into_iter(),
            _entity: PhantomData,
        }
    }

    /// Next raw row, for callers that refresh existing instances in place.
    pub fn next_row(&mut self) -> Option<StoredRow> {
        self.rows.next()
    }

    /// Remaining raw rows.
    pub fn into_rows(self) -> Vec<StoredRow> {
        self.rows.collect()
    }

    /// Rows left.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the cursor is exhausted.
    pub fn is_empty(&self) -> bool {
        self.rows.len() == 0
    }
}

impl<T: Persistable> Iterator for Cursor<T> {
    type Item = Result<T, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(T::blank(row.key.clone()).and_then(|mut obj| {
            apply_row(&mut obj, row)?;
            Ok(obj)
        }))
    }
}
