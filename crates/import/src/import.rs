use crate::budget::{Budget, Limit};
use crate::error::{ErrorKind, Result};
use crate::fetch::{FetchFailure, FetchOutcome, Fetcher};
use crate::ledger::FailureLedger;
use async_stream::stream;
use derive_more::Display;
use exn::ResultExt;
use futures::Stream;
use seedbed_catalog::{Cursor, Repository};
use seedbed_config::Config;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Paging and reporting knobs for one import run.
#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub page_size: u32,
    /// Log a progress line every this many successful downloads; `0` never.
    pub progress_interval: u64,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { page_size: 1000, progress_interval: 100 }
    }
}

impl From<&Config> for ImportOptions {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.limits.page_size,
            progress_interval: config.import.progress_interval,
        }
    }
}

/// Running counters of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Catalog entries handed to the fetcher.
    pub processed: u64,
    pub downloaded: u64,
    pub failed: u64,
    /// Bytes written by successful downloads.
    pub bytes: u64,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    #[display("catalog exhausted")]
    Exhausted,
    #[display("{_0} reached")]
    Budget(Limit),
    #[display("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub tally: Tally,
    pub pages: u64,
    pub stopped: StopReason,
}

/// Progress events emitted by [`import`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. For each page: [`PageStarted`](Self::PageStarted), then one
///    [`Downloaded`](Self::Downloaded) or [`Failed`](Self::Failed) per entry,
///    interleaved with [`Progress`](Self::Progress).
/// 3. At most one of [`BudgetReached`](Self::BudgetReached),
///    [`Exhausted`](Self::Exhausted) or [`Cancelled`](Self::Cancelled).
/// 4. [`Complete`](Self::Complete) exactly once.
///
/// A fatal error terminates the stream early, in which case
/// [`Complete`](Self::Complete) is never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportEvent {
    /// Paging has begun with this many identifiers already in the ledger.
    Started { ledgered: usize },
    PageStarted { page: u64, entries: usize },
    Downloaded { id: Uuid, bytes: u64 },
    /// The failure has already been persisted to the ledger.
    Failed { id: Uuid, reason: FetchFailure },
    Progress(Tally),
    BudgetReached(Limit),
    Exhausted,
    Cancelled,
    Complete(ImportSummary),
}

/// Walk the catalog newest first, downloading committed artifacts until the
/// catalog is exhausted, `budget` runs out or `cancel` fires.
///
/// A failed download is logged, persisted to `ledger` before the next entry
/// is considered, and otherwise ignored. Identifiers already in the ledger are
/// never handed to the fetcher. Cancellation is only observed between
/// entries; on cancellation the ledger is flushed on a best-effort basis.
pub fn import<'a>(
    catalog: &'a Repository,
    fetcher: &'a Fetcher,
    ledger: &'a mut FailureLedger,
    mut budget: Budget,
    options: ImportOptions,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<ImportEvent>> + 'a {
    stream! {
        tracing::info!(
            ledgered = ledger.len(),
            max_bytes = budget.max_bytes(),
            max_count = budget.max_count(),
            page_size = options.page_size,
            "starting import",
        );
        yield Ok(ImportEvent::Started { ledgered: ledger.len() });

        let mut cursor: Option<Cursor> = None;
        let mut tally = Tally::default();
        let mut pages = 0;
        let stopped = 'paging: loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if let Some(limit) = budget.exhausted_by() {
                break StopReason::Budget(limit);
            }
            let page = match catalog
                .next_page(cursor.as_ref(), options.page_size, ledger.ids())
                .await
                .or_raise(|| ErrorKind::Catalog)
            {
                Ok(page) => page,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let Some(last) = page.last() else {
                break StopReason::Exhausted;
            };
            cursor = Some(Cursor::from(last));
            pages += 1;
            tracing::info!(
                page = pages,
                entries = page.len(),
                downloaded = tally.downloaded,
                bytes = budget.bytes(),
                max_bytes = budget.max_bytes(),
                "processing page",
            );
            yield Ok(ImportEvent::PageStarted { page: pages, entries: page.len() });

            for entry in page {
                if cancel.is_cancelled() {
                    break 'paging StopReason::Cancelled;
                }
                if let Some(limit) = budget.exhausted_by() {
                    break 'paging StopReason::Budget(limit);
                }
                tally.processed += 1;
                match fetcher.fetch(&entry.id).await {
                    FetchOutcome::Success(bytes) => {
                        budget.record(bytes);
                        tally.downloaded += 1;
                        tally.bytes = budget.bytes();
                        tracing::debug!(id = %entry.id, bytes, "downloaded artifact");
                        yield Ok(ImportEvent::Downloaded { id: entry.id, bytes });
                        if options.progress_interval > 0 && tally.downloaded % options.progress_interval == 0 {
                            tracing::info!(
                                downloaded = tally.downloaded,
                                failed = tally.failed,
                                processed = tally.processed,
                                bytes = tally.bytes,
                                max_bytes = budget.max_bytes(),
                                "import progress",
                            );
                            yield Ok(ImportEvent::Progress(tally));
                        }
                    },
                    FetchOutcome::Failure(reason) => {
                        tracing::warn!(id = %entry.id, %reason, "download failed; recording in ledger");
                        if let Err(e) = ledger.record(entry.id).await {
                            yield Err(e);
                            return;
                        }
                        tally.failed += 1;
                        yield Ok(ImportEvent::Failed { id: entry.id, reason });
                    },
                }
            }
        };

        match stopped {
            StopReason::Exhausted => {
                tracing::info!(pages, "catalog exhausted");
                yield Ok(ImportEvent::Exhausted);
            },
            StopReason::Budget(limit) => {
                tracing::info!(%limit, downloaded = tally.downloaded, bytes = tally.bytes, "download budget reached");
                yield Ok(ImportEvent::BudgetReached(limit));
            },
            StopReason::Cancelled => {
                if let Err(e) = ledger.flush().await {
                    tracing::warn!(error = ?e, "could not flush failure ledger after cancellation");
                }
                yield Ok(ImportEvent::Cancelled);
            },
        }
        tracing::info!(
            %stopped,
            pages,
            downloaded = tally.downloaded,
            failed = tally.failed,
            processed = tally.processed,
            bytes = tally.bytes,
            "import finished",
        );
        yield Ok(ImportEvent::Complete(ImportSummary { tally, pages, stopped }));
    }
}
