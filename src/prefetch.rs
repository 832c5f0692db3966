//! Next-chapter prefetching.
//! Jobs go through a bounded tokio mpsc queue; submission never blocks the
//! request that triggered it. A worker loop resolves each job through the
//! translation cache on its own task and swallows any failure.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::navigator;
use crate::translate::cache::CacheKey;
use crate::translate::TranslationService;

/// A chapter to warm in the cache.
#[derive(Debug)]
pub struct PrefetchJob {
    pub key: CacheKey,
    pub enqueued_at: Instant,
}

impl PrefetchJob {
    /// Job for the chapter after `current`, same mode/model/scraper.
    pub fn next_chapter(current: &CacheKey) -> Result<Self> {
        let url = navigator::next_url(&current.url)?;
        Ok(Self {
            key: current.with_url(url),
            enqueued_at: Instant::now(),
        })
    }
}

/// Owns the prefetch queue.
pub struct Prefetcher {
    tx: mpsc::Sender<PrefetchJob>,
    rx: parking_lot::Mutex<Option<mpsc::Receiver<PrefetchJob>>>,
}

impl Prefetcher {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: parking_lot::Mutex::new(Some(rx)),
        }
    }

    /// Enqueue without waiting. Returns false when the job was dropped.
    pub fn submit(&self, job: PrefetchJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(url = %job.key.url, "prefetch queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("prefetch queue closed");
                false
            }
        }
    }

    /// Compute the next chapter of `current` and enqueue it.
    pub fn schedule_next(&self, current: &CacheKey) -> bool {
        match PrefetchJob::next_chapter(current) {
            Ok(job) => {
                debug!(from = %current.url, next = %job.key.url, "scheduling prefetch");
                self.submit(job)
            }
            Err(e) => {
                warn!(url = %current.url, error = %e, "no next chapter to prefetch");
                false
            }
        }
    }

    /// Take the receiver (call once to start the worker loop).
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<PrefetchJob>> {
        self.rx.lock().take()
    }
}

/// Prefetch worker loop: one task per job so a slow chapter does not hold up
/// the queue. Exits when the queue closes or `shutdown` fires.
pub fn run_prefetch_loop(
    prefetcher: &Prefetcher,
    service: Arc<TranslationService>,
    metrics: Arc<MetricsRegistry>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    let Some(mut rx) = prefetcher.take_receiver() else {
        warn!("prefetch receiver already taken");
        return None;
    };

    Some(tokio::spawn(async move {
        info!("prefetch worker loop started");
        loop {
            let job = tokio::select! {
                job = rx.recv() => job,
                _ = shutdown.cancelled() => break,
            };
            let Some(job) = job else { break };

            metrics.record(
                metric_names::QUEUE_WAIT_PREFETCH,
                job.enqueued_at.elapsed().as_micros() as f64,
            );

            let service = Arc::clone(&service);
            tokio::spawn(async move {
                match service.translate(&job.key, false).await {
                    Ok(handle) => {
                        info!(url = %job.key.url, stream_id = handle.id(), "prefetch warmed cache");
                    }
                    Err(e) => {
                        warn!(url = %job.key.url, error = %e, "prefetch failed");
                    }
                }
            });
        }
        info!("prefetch worker loop exiting");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::{ModelId, Mode, ScraperProvider};

    fn key(url: &str) -> CacheKey {
        CacheKey::new(url, Mode::FantasyTranslate, ModelId::Deepseek, ScraperProvider::Firecrawl)
    }

    #[test]
    fn next_chapter_job_keeps_request_shape() {
        let job = PrefetchJob::next_chapter(&key("https://site/novel/chap-10.html")).unwrap();
        assert_eq!(job.key.url, "https://site/novel/chap-11.html");
        assert_eq!(job.key.mode, Mode::FantasyTranslate);
        assert_eq!(job.key.model, ModelId::Deepseek);
        assert_eq!(job.key.scraper, ScraperProvider::Firecrawl);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let prefetcher = Prefetcher::new(1);
        assert!(prefetcher.schedule_next(&key("https://site/c/1")));
        assert!(!prefetcher.schedule_next(&key("https://site/c/2")));
    }

    #[test]
    fn url_without_chapter_is_not_scheduled() {
        let prefetcher = Prefetcher::new(4);
        assert!(!prefetcher.schedule_next(&key("https://site/about")));
    }

    #[test]
    fn receiver_can_be_taken_once() {
        let prefetcher = Prefetcher::new(4);
        assert!(prefetcher.take_receiver().is_some());
        assert!(prefetcher.take_receiver().is_none());
    }
}
