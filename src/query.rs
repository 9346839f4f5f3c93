//! Boolean tag-query engine: doc-at-a-time `Term`/`BoolAnd`/`BoolOr` nodes
//! with galloping (binary-search) advance.
//!
//! DocIds are record offsets reinterpreted as signed `i64` — offsets fit in
//! 63 bits in practice, so the reinterpretation never loses information.

use crate::error::{Result, StoreError};
use serde_json::Value;

/// Sentinel meaning "no more documents".
pub const NO_MORE: i64 = i64::MAX;
/// Sentinel for a cursor that has not been advanced yet.
pub const NOT_READY: i64 = -1;

/// Doc-at-a-time iterator protocol shared by every query node.
pub trait QueryNode: Send {
    /// Position at the smallest docId >= target, or `NO_MORE`.
    fn advance(&mut self, target: i64) -> i64;
    /// Position at the next docId strictly greater than the current one.
    fn next(&mut self) -> i64;
    /// The current docId; `NOT_READY` before the first `advance`/`next`.
    fn doc_id(&self) -> i64;
}

// ── Term ─────────────────────────────────────────────────────────────────────

/// Wraps a snapshotted, ascending-sorted postings list.
pub struct Term {
    postings: Vec<i64>,
    cursor: i64,
    doc_id: i64,
}

impl Term {
    /// `postings` is sorted here rather than trusted to already be sorted —
    /// concurrent `append_postings` calls for the same tag can race and
    /// leave the file out of order, and the binary search in `advance`
    /// requires order.
    pub fn new(mut postings: Vec<i64>) -> Self {
        postings.sort_unstable();
        Self { postings, cursor: -1, doc_id: NOT_READY }
    }

    fn move_to(&mut self, to: i64) -> i64 {
        self.cursor = to;
        if to < 0 || to as usize >= self.postings.len() {
            self.doc_id = NO_MORE;
        } else {
            self.doc_id = self.postings[to as usize];
        }
        self.doc_id
    }
}

impl QueryNode for Term {
    fn advance(&mut self, target: i64) -> i64 {
        if self.doc_id == NO_MORE || self.doc_id == target || target == NO_MORE {
            self.doc_id = target;
            return self.doc_id;
        }
        if self.cursor < 0 {
            self.cursor = 0;
        }

        let mut start = self.cursor;
        let mut end = self.postings.len() as i64;
        while start < end {
            let mid = start + (end - start) / 2;
            let current = self.postings[mid as usize];
            if current == target {
                self.cursor = mid;
                self.doc_id = target;
                return self.doc_id;
            }
            if current < target {
                start = mid + 1;
            } else {
                end = mid;
            }
        }
        self.move_to(start)
    }

    fn next(&mut self) -> i64 {
        self.cursor += 1;
        self.move_to(self.cursor)
    }

    fn doc_id(&self) -> i64 {
        self.doc_id
    }
}

// ── BoolOr ───────────────────────────────────────────────────────────────────

/// Union of sub-queries. Empty returns `NO_MORE` on every call.
pub struct BoolOr {
    queries: Vec<Box<dyn QueryNode>>,
    doc_id: i64,
}

impl BoolOr {
    pub fn new(queries: Vec<Box<dyn QueryNode>>) -> Self {
        Self { queries, doc_id: NOT_READY }
    }
}

impl QueryNode for BoolOr {
    fn advance(&mut self, target: i64) -> i64 {
        let mut new_doc = NO_MORE;
        for q in self.queries.iter_mut() {
            let mut cur = q.doc_id();
            if cur < target {
                cur = q.advance(target);
            }
            if cur < new_doc {
                new_doc = cur;
            }
        }
        self.doc_id = new_doc;
        self.doc_id
    }

    fn next(&mut self) -> i64 {
        let mut new_doc = NO_MORE;
        for q in self.queries.iter_mut() {
            let mut cur = q.doc_id();
            if cur == self.doc_id {
                cur = q.next();
            }
            if cur < new_doc {
                new_doc = cur;
            }
        }
        self.doc_id = new_doc;
        self.doc_id
    }

    fn doc_id(&self) -> i64 {
        self.doc_id
    }
}

// ── BoolAnd ──────────────────────────────────────────────────────────────────

/// Intersection of sub-queries; `queries[0]` is the pivot. Empty returns
/// `NO_MORE` on every call.
pub struct BoolAnd {
    queries: Vec<Box<dyn QueryNode>>,
    doc_id: i64,
}

impl BoolAnd {
    pub fn new(queries: Vec<Box<dyn QueryNode>>) -> Self {
        Self { queries, doc_id: NOT_READY }
    }

    /// Converge every non-pivot sub-query onto `target`, re-advancing the
    /// pivot and restarting the scan whenever one of them lands higher.
    /// Mirrors a C-style `for i := 1; i < n; i++` loop that resets `i` to 0
    /// inside the body: the post-increment then leaves it at 1, i.e. the
    /// scan restarts at the first *non-pivot* query, never re-checking the
    /// pivot itself mid-restart.
    fn next_anded_doc(&mut self, mut target: i64) -> i64 {
        let n = self.queries.len();
        let mut i = 1usize;
        while i < n {
            if self.queries[i].doc_id() < target {
                self.queries[i].advance(target);
            }
            if self.queries[i].doc_id() == target {
                i += 1;
                continue;
            }
            target = self.queries[0].advance(self.queries[i].doc_id());
            i = 1;
        }
        self.doc_id = target;
        self.doc_id
    }
}

impl QueryNode for BoolAnd {
    fn advance(&mut self, target: i64) -> i64 {
        if self.queries.is_empty() {
            self.doc_id = NO_MORE;
            return NO_MORE;
        }
        let t = self.queries[0].advance(target);
        self.next_anded_doc(t)
    }

    fn next(&mut self) -> i64 {
        if self.queries.is_empty() {
            self.doc_id = NO_MORE;
            return NO_MORE;
        }
        let t = self.queries[0].next();
        self.next_anded_doc(t)
    }

    fn doc_id(&self) -> i64 {
        self.doc_id
    }
}

// ── Query tree construction ──────────────────────────────────────────────────

/// Build a query node tree from a JSON-like value. Each object level may
/// carry any combination of `{"tag": "<name>"}`, `{"and": [...]}`, and
/// `{"or": [...]}` keys; when more than one is present the resulting nodes
/// are combined with an implicit AND. A single produced node is returned
/// unwrapped.
///
/// `resolve_tag` materializes a [`Term`] for a tag name (snapshotting that
/// tag's postings list); it is injected rather than called directly so this
/// module stays independent of how/where postings lists are stored.
pub fn build_query(
    tree: &Value,
    resolve_tag: &mut dyn FnMut(&str) -> Result<Term>,
) -> Result<Box<dyn QueryNode>> {
    let mut produced: Vec<Box<dyn QueryNode>> = Vec::new();

    if let Some(obj) = tree.as_object() {
        if let Some(v) = obj.get("tag") {
            if !v.is_null() {
                let name = v
                    .as_str()
                    .ok_or_else(|| StoreError::QueryParse("[tag] must be a string".into()))?;
                produced.push(Box::new(resolve_tag(name)?));
            }
        }

        if let Some(v) = obj.get("and") {
            if !v.is_null() {
                let list = v
                    .as_array()
                    .ok_or_else(|| StoreError::QueryParse("[and] takes array of subqueries".into()))?;
                let mut subs = Vec::with_capacity(list.len());
                for sub in list {
                    subs.push(build_query(sub, resolve_tag)?);
                }
                produced.push(Box::new(BoolAnd::new(subs)));
            }
        }

        if let Some(v) = obj.get("or") {
            if !v.is_null() {
                let list = v
                    .as_array()
                    .ok_or_else(|| StoreError::QueryParse("[or] takes array of subqueries".into()))?;
                let mut subs = Vec::with_capacity(list.len());
                for sub in list {
                    subs.push(build_query(sub, resolve_tag)?);
                }
                produced.push(Box::new(BoolOr::new(subs)));
            }
        }
    }

    if produced.len() == 1 {
        Ok(produced.pop().unwrap())
    } else {
        Ok(Box::new(BoolAnd::new(produced)))
    }
}
