//! Due-event scanner: a lazy, paged walk over every source of candidates.

use chrono::{DateTime, Utc};
use nutribaby_core::Result;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::candidate::{PageCursor, ReminderCandidate};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Feeding,
    Vaccination,
}

/// Scan order: subject ascending, then newest event first, then record id.
fn scan_order(a: &ReminderCandidate, b: &ReminderCandidate) -> Ordering {
    a.subject_id
        .cmp(&b.subject_id)
        .then_with(|| b.event_time.cmp(&a.event_time))
        .then_with(|| a.record_id.cmp(&b.record_id))
}

/// Produces the candidates due at a given instant.
pub struct DueEventScanner {
    store: Arc<dyn Store>,
    page_size: usize,
}

impl DueEventScanner {
    pub fn new(store: Arc<dyn Store>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Start a scan. Each source is fetched one page at a time as `next`
    /// drains, and the two are merged in scan order.
    pub fn scan(&self, now: DateTime<Utc>) -> DueScan {
        DueScan {
            store: self.store.clone(),
            now,
            page_size: self.page_size,
            feeding: SourceCursor::new(Source::Feeding),
            vaccination: SourceCursor::new(Source::Vaccination),
            pages: 0,
        }
    }
}

/// Paging state for one source.
struct SourceCursor {
    source: Source,
    cursor: Option<PageCursor>,
    buffer: VecDeque<ReminderCandidate>,
    exhausted: bool,
}

impl SourceCursor {
    fn new(source: Source) -> Self {
        Self {
            source,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn needs_page(&self) -> bool {
        self.buffer.is_empty() && !self.exhausted
    }

    async fn fetch(&mut self, store: &dyn Store, now: DateTime<Utc>, limit: usize) -> Result<()> {
        let cursor = self.cursor.as_ref();
        let page = match self.source {
            Source::Feeding => store.scan_due_feeding(now, cursor, limit).await?,
            Source::Vaccination => store.scan_due_vaccination(now, cursor, limit).await?,
        };
        self.buffer.extend(page.items);
        match page.next {
            Some(next) => self.cursor = Some(next),
            None => {
                self.cursor = None;
                self.exhausted = true;
            }
        }
        Ok(())
    }
}

/// An in-progress scan. Dropping it early simply stops fetching.
pub struct DueScan {
    store: Arc<dyn Store>,
    now: DateTime<Utc>,
    page_size: usize,
    feeding: SourceCursor,
    vaccination: SourceCursor,
    pages: usize,
}

impl DueScan {
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Pages fetched so far, across both sources.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Next eligible candidate, or `None` once every source is exhausted.
    pub async fn next(&mut self) -> Result<Option<ReminderCandidate>> {
        loop {
            for source in [&mut self.feeding, &mut self.vaccination] {
                while source.needs_page() {
                    source.fetch(self.store.as_ref(), self.now, self.page_size).await?;
                    self.pages += 1;
                }
            }

            let take_feeding = match (self.feeding.buffer.front(), self.vaccination.buffer.front()) {
                (None, None) => return Ok(None),
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some(f), Some(v)) => scan_order(f, v) != Ordering::Greater,
            };
            let next = if take_feeding {
                self.feeding.buffer.pop_front()
            } else {
                self.vaccination.buffer.pop_front()
            };
            let Some(candidate) = next else { continue };
            if candidate.is_eligible(self.now) {
                return Ok(Some(candidate));
            }
            tracing::debug!("Scanner skipped ineligible record {}", candidate.record_id);
        }
    }
}
