//! [`ScrollingResultIterator`] — incremental consumption of an open search
//! cursor.

use std::{collections::HashSet, num::NonZeroUsize, sync::Arc, time::Duration};

use uuid::Uuid;

use crate::backend::{IndexBackend, SearchResponse};

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
  pub values:   Vec<Uuid>,
  /// No further batches follow.
  pub finished: bool,
}

impl Batch {
  fn terminal() -> Self { Self { values: Vec::new(), finished: true } }
}

/// Cursor over a Fact search.
///
/// A batch shorter than the page size is the last one; the cursor is then
/// released in the background. Ids already returned by an earlier batch are
/// skipped, since a Fact may live in several daily shards. Dropping an
/// unfinished iterator releases its cursor.
pub struct ScrollingResultIterator<B: IndexBackend> {
  backend:    Option<Arc<B>>,
  count:      i64,
  page_size:  usize,
  keep_alive: Duration,
  pending:    Option<SearchResponse>,
  scroll_id:  Option<String>,
  finished:   bool,
  seen:       HashSet<Uuid>,
}

impl<B: IndexBackend> ScrollingResultIterator<B> {
  pub(crate) fn open(
    backend: Arc<B>,
    first: SearchResponse,
    count: i64,
    page_size: NonZeroUsize,
    keep_alive: Duration,
  ) -> Self {
    Self {
      backend: Some(backend),
      count,
      page_size: page_size.get(),
      keep_alive,
      scroll_id: first.scroll_id.clone(),
      pending: Some(first),
      finished: false,
      seen: HashSet::new(),
    }
  }

  /// An iterator with no results whose first batch is terminal.
  pub fn empty() -> Self {
    Self {
      backend:    None,
      count:      0,
      page_size:  0,
      keep_alive: Duration::ZERO,
      pending:    None,
      scroll_id:  None,
      finished:   true,
      seen:       HashSet::new(),
    }
  }

  /// Number of unique matching Facts, `-1` if the backend did not report it.
  pub fn count(&self) -> i64 { self.count }

  pub fn is_finished(&self) -> bool { self.finished }

  pub async fn next(&mut self) -> Batch {
    if self.finished {
      return Batch::terminal();
    }

    let response = match self.pending.take() {
      Some(first) => first,
      None => match self.fetch().await {
        Some(response) => response,
        None => {
          self.finished = true;
          return Batch::terminal();
        }
      },
    };

    self.accept(response)
  }

  /// Stop early and release the cursor.
  pub fn close(&mut self) {
    if !self.finished {
      self.finished = true;
      self.pending = None;
      self.release();
    }
  }

  /// Drain every remaining batch.
  pub async fn collect_remaining(&mut self) -> Vec<Uuid> {
    let mut values = Vec::new();
    loop {
      let batch = self.next().await;
      values.extend(batch.values);
      if batch.finished {
        return values;
      }
    }
  }

  async fn fetch(&self) -> Option<SearchResponse> {
    let backend = self.backend.as_ref()?;
    let scroll_id = self.scroll_id.clone()?;
    match backend.scroll(scroll_id, self.keep_alive).await {
      Ok(response) => Some(response),
      Err(error) => {
        tracing::warn!(
          %error,
          "could not retrieve next batch of search results, stop scrolling"
        );
        None
      }
    }
  }

  fn accept(&mut self, response: SearchResponse) -> Batch {
    if response.scroll_id.is_some() {
      self.scroll_id = response.scroll_id;
    }

    let fetched = response.hits.len();
    let values: Vec<Uuid> = response
      .hits
      .into_iter()
      .filter(|id| self.seen.insert(*id))
      .collect();
    tracing::debug!(batch = fetched, unique = values.len(), "retrieved batch of search results");

    let finished = fetched < self.page_size;
    if finished {
      tracing::debug!("retrieved all search results");
      self.finished = true;
      self.release();
    }

    Batch { values, finished }
  }

  /// Fire-and-forget cursor release; the outcome is only logged.
  fn release(&mut self) {
    let (Some(backend), Some(scroll_id)) = (self.backend.clone(), self.scroll_id.take())
    else {
      return;
    };
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      tracing::warn!("no runtime available to close search context");
      return;
    };

    runtime.spawn(async move {
      match backend.clear_scroll(scroll_id).await {
        Ok(true) => tracing::debug!("closed search context"),
        Ok(false) => tracing::warn!("could not close search context"),
        Err(error) => tracing::warn!(%error, "could not close search context"),
      }
    });
  }
}

impl<B: IndexBackend> Drop for ScrollingResultIterator<B> {
  fn drop(&mut self) { self.close(); }
}
