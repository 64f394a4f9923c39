//! Query Builder pagination operations

use serde::Serialize;

use super::builder::QueryBuilder;
use crate::error::{ModelError, ModelResult};

impl<M> QueryBuilder<M> {
    /// Skip the first `count` documents
    pub fn skip(mut self, count: u64) -> Self {
        self.skip_count = Some(count);
        self
    }

    /// Return at most `count` documents
    pub fn limit(mut self, count: u64) -> Self {
        self.limit_count = Some(count);
        self
    }

    /// Alias of [`skip`](Self::skip)
    pub fn offset(self, count: u64) -> Self {
        self.skip(count)
    }

    /// Restrict the query to one page (1-based)
    pub fn for_page(self, page: u64, per_page: u64) -> ModelResult<Self> {
        let (skip, limit) = page_window(page as i64, per_page as i64)?;
        Ok(self.skip(skip).limit(limit))
    }
}

/// `(skip, limit)` of a 1-based page; invalid when either argument is below 1
pub(crate) fn page_window(page: i64, per_page: i64) -> ModelResult<(u64, u64)> {
    if page < 1 || per_page < 1 {
        return Err(ModelError::InvalidArgument(format!(
            "page and per_page must be at least 1, got page={} per_page={}",
            page, per_page
        )));
    }
    let skip = (page as u64 - 1).saturating_mul(per_page as u64);
    Ok((skip, per_page as u64))
}

/// One page of results with totals
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
}

impl<T> Paginated<T> {
    pub(crate) fn new(data: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let last_page = if total == 0 {
            1
        } else {
            total.div_ceil(per_page)
        };
        Self {
            data,
            total,
            per_page,
            current_page: page,
            last_page,
        }
    }

    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Transform the page's items
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            per_page: self.per_page,
            current_page: self.current_page,
            last_page: self.last_page,
        }
    }
}

/// In-memory paging of a result sequence
pub trait ForPage {
    type Item;

    /// Items of the 1-based `page`. Only complete pages are returned; a page
    /// that would run past the end of the sequence is empty.
    fn for_page(&self, page: i64, per_page: i64) -> ModelResult<Vec<Self::Item>>;
}

impl<T: Clone> ForPage for [T] {
    type Item = T;

    fn for_page(&self, page: i64, per_page: i64) -> ModelResult<Vec<T>> {
        let (skip, limit) = page_window(page, per_page)?;
        let start = usize::try_from(skip).unwrap_or(usize::MAX);
        let len = usize::try_from(limit).unwrap_or(usize::MAX);
        match start.checked_add(len) {
            Some(end) if end <= self.len() => Ok(self[start..end].to_vec()),
            _ => Ok(Vec::new()),
        }
    }
}

impl<T: Clone> ForPage for Vec<T> {
    type Item = T;

    fn for_page(&self, page: i64, per_page: i64) -> ModelResult<Vec<T>> {
        self.as_slice().for_page(page, per_page)
    }
}
