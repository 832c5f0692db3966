//! Replayable handle over one model generation.
//!
//! The writer half appends text deltas as they arrive from the provider. Every
//! reader opened on the handle replays the transcript from the first chunk and
//! then follows the live generation, so one upstream call can serve any number
//! of HTTP responses.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::cache::Cacheable;
use crate::error::TranslateError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Finished,
    Failed(String),
}

#[derive(Default)]
struct Transcript {
    chunks: Vec<Bytes>,
    outcome: Option<Outcome>,
}

struct Shared {
    id: String,
    transcript: Mutex<Transcript>,
    /// Bumped on every append or terminal transition.
    progress: watch::Sender<u64>,
}

/// Cloneable handle to a generation. Clones share the same transcript.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transcript = self.shared.transcript.lock();
        f.debug_struct("StreamHandle")
            .field("id", &self.shared.id)
            .field("chunks", &transcript.chunks.len())
            .field("outcome", &transcript.outcome)
            .finish()
    }
}

impl StreamHandle {
    /// Create a handle together with the writer that feeds it.
    pub fn channel() -> (StreamHandle, StreamWriter) {
        let (progress, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            id: uuid::Uuid::new_v4().to_string(),
            transcript: Mutex::new(Transcript::default()),
            progress,
        });
        (
            StreamHandle {
                shared: Arc::clone(&shared),
            },
            StreamWriter {
                shared,
                closed: false,
            },
        )
    }

    /// A handle whose generation already finished with `text`.
    pub fn completed(text: impl Into<String>) -> StreamHandle {
        let (handle, mut writer) = StreamHandle::channel();
        writer.push(&text.into());
        writer.finish();
        handle
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// True when both handles observe the same generation.
    pub fn same_stream(&self, other: &StreamHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn is_finished(&self) -> bool {
        self.shared.transcript.lock().outcome.is_some()
    }

    /// True when the generation ended with an error.
    pub fn is_failed(&self) -> bool {
        matches!(self.shared.transcript.lock().outcome, Some(Outcome::Failed(_)))
    }

    pub fn chunk_count(&self) -> usize {
        self.shared.transcript.lock().chunks.len()
    }

    /// Open a reader that replays from the start and follows until the end.
    /// A failed generation ends the reader with one error item.
    pub fn reader(&self) -> impl Stream<Item = Result<Bytes, TranslateError>> + Send + 'static {
        let shared = Arc::clone(&self.shared);
        let progress = shared.progress.subscribe();
        stream::unfold(
            ReaderState {
                shared,
                progress,
                next: 0,
                done: false,
            },
            |mut state| async move {
                if state.done {
                    return None;
                }
                loop {
                    state.progress.borrow_and_update();
                    let step = {
                        let transcript = state.shared.transcript.lock();
                        if let Some(chunk) = transcript.chunks.get(state.next) {
                            Some(Ok(chunk.clone()))
                        } else {
                            match &transcript.outcome {
                                Some(Outcome::Finished) => return None,
                                Some(Outcome::Failed(reason)) => {
                                    Some(Err(TranslateError::Stream(reason.clone())))
                                }
                                None => None,
                            }
                        }
                    };
                    match step {
                        Some(Ok(chunk)) => {
                            state.next += 1;
                            return Some((Ok(chunk), state));
                        }
                        Some(Err(e)) => {
                            state.done = true;
                            return Some((Err(e), state));
                        }
                        None => {
                            // Sender lives in `shared`, which this reader keeps alive.
                            if state.progress.changed().await.is_err() {
                                return None;
                            }
                        }
                    }
                }
            },
        )
    }

    /// Read the whole generation into a string.
    pub async fn collect_text(&self) -> Result<String, TranslateError> {
        use futures_util::StreamExt;

        let mut reader = std::pin::pin!(self.reader());
        let mut out = Vec::new();
        while let Some(chunk) = reader.next().await {
            out.extend_from_slice(&chunk?);
        }
        String::from_utf8(out).map_err(|e| TranslateError::Stream(e.to_string()))
    }
}

/// A broken-off generation is never served from the cache again.
impl Cacheable for StreamHandle {
    fn is_failed(&self) -> bool {
        StreamHandle::is_failed(self)
    }
}

struct ReaderState {
    shared: Arc<Shared>,
    progress: watch::Receiver<u64>,
    next: usize,
    done: bool,
}

/// Producer side of a [`StreamHandle`]. Dropping an unfinished writer marks
/// the generation as failed so readers never hang.
pub struct StreamWriter {
    shared: Arc<Shared>,
    closed: bool,
}

impl StreamWriter {
    pub fn push(&mut self, text: &str) {
        if self.closed || text.is_empty() {
            return;
        }
        self.shared
            .transcript
            .lock()
            .chunks
            .push(Bytes::copy_from_slice(text.as_bytes()));
        self.shared.progress.send_modify(|v| *v += 1);
    }

    pub fn finish(&mut self) {
        self.close(Outcome::Finished);
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.close(Outcome::Failed(reason.into()));
    }

    fn close(&mut self, outcome: Outcome) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.transcript.lock().outcome = Some(outcome);
        self.shared.progress.send_modify(|v| *v += 1);
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if !self.closed {
            self.fail("generation aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn completed_handle_replays_text() {
        let handle = StreamHandle::completed("xin chào");
        assert!(handle.is_finished());
        assert!(!handle.is_failed());
        assert_eq!(handle.collect_text().await.unwrap(), "xin chào");
        // A second reader sees the same transcript.
        assert_eq!(handle.collect_text().await.unwrap(), "xin chào");
    }

    #[tokio::test]
    async fn late_reader_replays_then_follows_live_chunks() {
        let (handle, mut writer) = StreamHandle::channel();
        writer.push("one ");

        let reader_handle = handle.clone();
        let reader = tokio::spawn(async move { reader_handle.collect_text().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.push("two ");
        writer.push("three");
        writer.finish();

        assert_eq!(reader.await.unwrap().unwrap(), "one two three");
        assert_eq!(handle.chunk_count(), 3);
    }

    #[tokio::test]
    async fn failure_surfaces_after_partial_output() {
        let (handle, mut writer) = StreamHandle::channel();
        writer.push("partial");
        writer.fail("upstream reset");
        assert!(handle.is_failed());

        let items: Vec<_> = handle.reader().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Bytes::from_static(b"partial"));
        assert!(matches!(&items[1], Err(TranslateError::Stream(r)) if r == "upstream reset"));
    }

    #[tokio::test]
    async fn dropped_writer_fails_the_generation() {
        let (handle, writer) = StreamHandle::channel();
        drop(writer);
        assert!(handle.is_finished());
        assert!(handle.is_failed());
        assert!(handle.collect_text().await.is_err());
    }

    #[test]
    fn clones_share_identity() {
        let a = StreamHandle::completed("x");
        let b = a.clone();
        let c = StreamHandle::completed("x");
        assert!(a.same_stream(&b));
        assert!(!a.same_stream(&c));
        assert_eq!(a.id(), b.id());
    }
}
