//! Cursor pagination shared by every list, history and replies fetch.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;

/// One page of a cursor-paginated Slack response.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub ok: bool,
    pub error: Option<String>,
    pub items: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        let has_more = next_cursor.is_some();
        Self {
            ok: true,
            error: None,
            items,
            has_more,
            next_cursor,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            items: Vec::new(),
            has_more: false,
            next_cursor: None,
        }
    }
}

/// Items accumulated by a walk, and whether the walk reached the real end.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected<T> {
    pub items: Vec<T>,
    pub complete: bool,
    pub pages: usize,
}

impl<T> Collected<T> {
    pub fn is_partial(&self) -> bool {
        !self.complete
    }
}

/// Walks a cursor-paginated endpoint from the first page, accumulating items
/// in page order.
///
/// The walk ends normally when a page reports `has_more == false` or carries no
/// items. It ends early, flagged incomplete, when a page is not `ok`, the
/// request fails, the server asks for more without handing out a new cursor,
/// or `cancel` fires. Pages are always requested strictly in sequence.
pub async fn walk_pages<T, F, Fut>(
    label: &str,
    cancel: &CancellationToken,
    mut fetch_page: F,
) -> Collected<T>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;

    let complete = loop {
        if cancel.is_cancelled() {
            warn!(label, pages, "pagination cancelled");
            break false;
        }

        let page = match fetch_page(cursor.clone()).await {
            Ok(page) => page,
            Err(e) => {
                warn!(label, pages, error = %e, "page request failed, keeping partial results");
                break false;
            }
        };
        pages += 1;

        if !page.ok {
            warn!(
                label,
                pages,
                error = page.error.as_deref().unwrap_or("unknown"),
                "Slack returned a non-ok page, keeping partial results"
            );
            break false;
        }

        let received = page.items.len();
        items.extend(page.items);
        debug!(label, pages, received, total = items.len(), "page received");

        if received == 0 || !page.has_more {
            break true;
        }

        match page.next_cursor {
            Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                cursor = Some(next);
            }
            _ => {
                warn!(label, pages, "has_more without a fresh cursor, stopping");
                break false;
            }
        }
    };

    Collected {
        items,
        complete,
        pages,
    }
}
