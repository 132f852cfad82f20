//! Lazy primary key enumeration.
//!
//! Keys are fetched page by page with keyset pagination: every fetch asks
//! the source for keys strictly after the last key handed out, so the
//! consumer holds at most one page regardless of how large the type is.

use std::collections::VecDeque;

use massindex_types::{
    EntityType, FetchSize, KeyRange, MassIndexError, PrimaryKey, Restriction,
};

use crate::source::{LoadContext, RecordSource};

/// Forward-only iterator over the ascending keys of one entity type.
///
/// Yields `Err` once and then ends if the source fails or hands back keys
/// out of order.
pub struct KeyEnumerator<'a> {
    source: &'a dyn RecordSource,
    entity_type: &'a EntityType,
    restriction: Option<&'a Restriction>,
    ctx: &'a LoadContext,
    range: KeyRange,
    fetch_size: FetchSize,
    remaining: Option<u64>,
    after: Option<PrimaryKey>,
    page: VecDeque<PrimaryKey>,
    exhausted: bool,
}

impl<'a> KeyEnumerator<'a> {
    pub fn new(
        source: &'a dyn RecordSource,
        entity_type: &'a EntityType,
        ctx: &'a LoadContext,
    ) -> Self {
        Self {
            source,
            entity_type,
            restriction: None,
            ctx,
            range: KeyRange::all(),
            fetch_size: FetchSize::Rows(1_000),
            remaining: None,
            after: None,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_restriction(mut self, restriction: Option<&'a Restriction>) -> Self {
        self.restriction = restriction;
        self
    }

    /// Only yield keys inside `range`.
    pub fn with_range(mut self, range: KeyRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: FetchSize) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    /// Stop after `cap` keys in total.
    pub fn with_cap(mut self, cap: Option<u64>) -> Self {
        self.remaining = cap;
        self
    }

    /// Skip every key up to and including `key`.
    pub fn starting_after(mut self, key: Option<PrimaryKey>) -> Self {
        self.after = key;
        self
    }

    /// Collect up to `n` keys.
    pub fn next_chunk(&mut self, n: usize) -> Result<Vec<PrimaryKey>, MassIndexError> {
        self.by_ref().take(n).collect()
    }

    fn fetch_page(&mut self) -> Result<(), MassIndexError> {
        let mut limit = self.fetch_size.limit();
        if let Some(remaining) = self.remaining {
            let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
            limit = Some(limit.map_or(remaining, |l| l.min(remaining)));
        }

        let keys = self.source.fetch_keys(
            self.entity_type,
            self.restriction,
            self.range,
            self.after,
            limit,
            self.ctx,
        )?;

        // A short page (or a load-all fetch) is the last one
        if limit.is_none_or(|limit| keys.len() < limit) {
            self.exhausted = true;
        }

        let mut previous = self.after;
        for key in keys.into_iter().take(limit.unwrap_or(usize::MAX)) {
            if previous.is_some_and(|p| key <= p) {
                return Err(MassIndexError::ScopeQuery(format!(
                    "{} keys are not strictly ascending: {} after {:?}",
                    self.entity_type, key, previous
                )));
            }
            if !self.range.contains(key) {
                return Err(MassIndexError::ScopeQuery(format!(
                    "{} key {} outside requested range",
                    self.entity_type, key
                )));
            }
            previous = Some(key);
            self.page.push_back(key);
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(self.page.len() as u64);
        }
        if self.page.is_empty() {
            self.exhausted = true;
        }
        self.after = previous;
        Ok(())
    }
}

impl Iterator for KeyEnumerator<'_> {
    type Item = Result<PrimaryKey, MassIndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(key) = self.page.pop_front() {
            return Some(Ok(key));
        }
        if self.exhausted || self.remaining == Some(0) {
            return None;
        }
        if let Err(e) = self.fetch_page() {
            self.exhausted = true;
            self.page.clear();
            return Some(Err(e));
        }
        self.page.pop_front().map(Ok)
    }
}
