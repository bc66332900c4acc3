use std::{fmt, marker::PhantomData, pin::Pin};

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{JsonCodec, LichessError, Result};

pub(crate) type ByteSource = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

enum Read {
    Chunk(Option<Result<Bytes>>),
    Cancelled,
}

/// Forward-only cursor over an NDJSON response body.
///
/// Every line is one JSON record; blank lines are server heartbeats and are
/// skipped. The cursor owns the connection and releases it exactly once: on
/// [`close`](Self::close), at end of stream, after a terminal error, on
/// cancellation, or when dropped.
pub struct NdjsonStream<T> {
    source: Option<ByteSource>,
    buffer: Vec<u8>,
    scan_from: usize,
    codec: JsonCodec,
    cancel: CancellationToken,
    records: u64,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for NdjsonStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdjsonStream")
            .field("open", &self.source.is_some())
            .field("buffered", &self.buffer.len())
            .field("records", &self.records)
            .field("done", &self.done)
            .finish()
    }
}

impl<T: DeserializeOwned> NdjsonStream<T> {
    pub(crate) fn from_response(
        response: reqwest::Response,
        codec: JsonCodec,
        cancel: CancellationToken,
    ) -> Self {
        let source = response.bytes_stream().map_err(LichessError::Transport);
        Self::from_source(Box::pin(source), codec, cancel)
    }

    pub(crate) fn from_source(
        source: ByteSource,
        codec: JsonCodec,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source: Some(source),
            buffer: Vec::new(),
            scan_from: 0,
            codec,
            cancel,
            records: 0,
            done: false,
            _marker: PhantomData,
        }
    }

    /// Returns the next record, or `None` once the stream is exhausted or closed.
    ///
    /// A malformed line yields a [`LichessError::Decode`] and the cursor moves
    /// on to the following line. Read failures, oversized lines and
    /// cancellation are terminal: they are reported once, then `None` follows.
    pub async fn next(&mut self) -> Option<Result<T>> {
        loop {
            if self.done {
                return None;
            }
            if self.cancel.is_cancelled() {
                return Some(Err(self.fail(LichessError::Cancelled)));
            }

            if let Some(line) = self.take_line() {
                if line.len() > self.codec.max_line_bytes() {
                    let err = self.oversized();
                    return Some(Err(self.fail(err)));
                }
                match self.codec.decode_line::<T>(&line) {
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("ndjson heartbeat");
                        continue;
                    }
                    Some(Ok(record)) => {
                        self.records += 1;
                        return Some(Ok(record));
                    }
                    Some(Err(err)) => return Some(Err(err)),
                }
            }

            if self.source.is_none() {
                // Final line without a terminating newline.
                if self.buffer.len() > self.codec.max_line_bytes() {
                    let err = self.oversized();
                    return Some(Err(self.fail(err)));
                }
                self.done = true;
                let rest = std::mem::take(&mut self.buffer);
                let decoded = self.codec.decode_line::<T>(&rest)?;
                if decoded.is_ok() {
                    self.records += 1;
                }
                return Some(decoded);
            }

            if self.buffer.len() > self.codec.max_line_bytes() {
                let err = self.oversized();
                return Some(Err(self.fail(err)));
            }

            let read = match self.source.as_mut() {
                Some(source) => tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Read::Cancelled,
                    chunk = source.next() => Read::Chunk(chunk),
                },
                None => Read::Chunk(None),
            };

            match read {
                Read::Cancelled => return Some(Err(self.fail(LichessError::Cancelled))),
                Read::Chunk(Some(Ok(chunk))) => self.buffer.extend_from_slice(&chunk),
                Read::Chunk(Some(Err(err))) => return Some(Err(self.fail(err))),
                Read::Chunk(None) => self.release(),
            }
        }
    }

    /// Adapts the cursor into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        futures::stream::unfold(self, |mut cursor| async move {
            let item = cursor.next().await?;
            Some((item, cursor))
        })
    }
}

impl<T> NdjsonStream<T> {
    /// Stops reading and releases the connection. Further `next` calls return `None`.
    pub fn close(&mut self) {
        self.done = true;
        self.buffer.clear();
        self.release();
    }

    /// Number of records yielded so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Whether the underlying connection is still held.
    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let offset = self.buffer[self.scan_from..]
            .iter()
            .position(|byte| *byte == b'\n');
        match offset {
            Some(offset) => {
                let end = self.scan_from + offset;
                let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
                line.pop();
                self.scan_from = 0;
                Some(line)
            }
            None => {
                self.scan_from = self.buffer.len();
                None
            }
        }
    }

    fn oversized(&self) -> LichessError {
        LichessError::Decode(format!(
            "ndjson line exceeds {} bytes",
            self.codec.max_line_bytes()
        ))
    }

    fn fail(&mut self, err: LichessError) -> LichessError {
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %err, records = self.records, "ndjson stream terminated");
        self.close();
        err
    }

    fn release(&mut self) {
        if let Some(source) = self.source.take() {
            drop(source);
            #[cfg(feature = "tracing")]
            tracing::trace!(records = self.records, "ndjson connection released");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        task::{Context, Poll},
        time::Duration,
    };

    use bytes::Bytes;
    use futures::{Stream, StreamExt};
    use serde::Deserialize;
    use tokio_util::sync::CancellationToken;

    use super::NdjsonStream;
    use crate::{JsonCodec, LichessError, Result};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Event {
        id: u32,
    }

    #[derive(Default)]
    struct Probe {
        polls: AtomicUsize,
        drops: AtomicUsize,
    }

    /// Chunk source that records how often it is polled and dropped.
    struct Scripted {
        chunks: Vec<Bytes>,
        probe: Arc<Probe>,
        pending_after_script: bool,
    }

    impl Stream for Scripted {
        type Item = Result<Bytes>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.probe.polls.fetch_add(1, Ordering::SeqCst);
            if self.chunks.is_empty() {
                if self.pending_after_script {
                    return Poll::Pending;
                }
                return Poll::Ready(None);
            }
            Poll::Ready(Some(Ok(self.chunks.remove(0))))
        }
    }

    impl Drop for Scripted {
        fn drop(&mut self) {
            self.probe.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn cursor(
        chunks: &[&str],
        pending_after_script: bool,
        cancel: CancellationToken,
    ) -> (NdjsonStream<Event>, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let source = Scripted {
            chunks: chunks.iter().map(|c| Bytes::from(c.to_string())).collect(),
            probe: probe.clone(),
            pending_after_script,
        };
        let stream = NdjsonStream::from_source(Box::pin(source), JsonCodec::new(64), cancel);
        (stream, probe)
    }

    #[tokio::test]
    async fn yields_records_in_order_skipping_heartbeats() {
        let (mut stream, probe) = cursor(
            &["{\"id\":1}\n\n", "\n{\"id\"", ":2}\r\n\n\n{\"id\":3}\n", "\n"],
            false,
            CancellationToken::new(),
        );

        let mut ids = Vec::new();
        while let Some(event) = stream.next().await {
            ids.push(event.expect("record must decode").id);
        }

        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(stream.records(), 3);
        assert!(!stream.is_open());
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn decodes_unterminated_final_line() {
        let (mut stream, _) = cursor(&["{\"id\":1}\n{\"id\":2}"], false, CancellationToken::new());
        assert_eq!(stream.next().await.unwrap().unwrap(), Event { id: 1 });
        assert_eq!(stream.next().await.unwrap().unwrap(), Event { id: 2 });
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn malformed_line_does_not_end_stream() {
        let (mut stream, _) = cursor(
            &["{\"id\":1}\n", "oops\n", "{\"id\":3}\n"],
            false,
            CancellationToken::new(),
        );
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await,
            Some(Err(LichessError::Decode(_)))
        ));
        assert_eq!(stream.next().await.unwrap().unwrap(), Event { id: 3 });
    }

    #[tokio::test]
    async fn early_close_stops_reading_and_releases_once() {
        let (mut stream, probe) = cursor(
            &["{\"id\":1}\n", "{\"id\":2}\n", "{\"id\":3}\n", "{\"id\":4}\n"],
            true,
            CancellationToken::new(),
        );

        for expected in 1..=2 {
            assert_eq!(stream.next().await.unwrap().unwrap().id, expected);
        }
        let polls = probe.polls.load(Ordering::SeqCst);
        assert_eq!(polls, 2);

        stream.close();
        stream.close();
        assert!(stream.next().await.is_none());
        drop(stream);

        assert_eq!(probe.polls.load(Ordering::SeqCst), polls);
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_mid_stream_releases_connection() {
        let (mut stream, probe) =
            cursor(&["{\"id\":1}\n", "{\"id\":2}\n"], true, CancellationToken::new());
        assert!(stream.next().await.unwrap().is_ok());
        drop(stream);
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_while_waiting_surfaces_cancelled() {
        let cancel = CancellationToken::new();
        let (mut stream, probe) = cursor(&["{\"id\":1}\n"], true, cancel.clone());
        assert!(stream.next().await.unwrap().is_ok());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("cancellation must unblock the read");
        assert!(matches!(outcome, Some(Err(LichessError::Cancelled))));
        assert!(!stream.is_open());
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn oversized_line_is_terminal() {
        let long = format!("{{\"id\":1,\"pad\":\"{}\"", "x".repeat(100));
        let (mut stream, probe) = cursor(&[long.as_str(), "}\n"], false, CancellationToken::new());
        assert!(matches!(
            stream.next().await,
            Some(Err(LichessError::Decode(_)))
        ));
        assert!(stream.next().await.is_none());
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_complete_line_in_one_chunk_is_terminal() {
        let long = format!("{{\"id\":1,\"pad\":\"{}\"}}\n{{\"id\":2}}\n", "x".repeat(200));
        let (mut stream, probe) = cursor(&[long.as_str()], true, CancellationToken::new());
        assert!(matches!(
            stream.next().await,
            Some(Err(LichessError::Decode(_)))
        ));
        assert!(stream.next().await.is_none());
        assert!(!stream.is_open());
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_unterminated_final_line_is_rejected() {
        let long = format!("{{\"id\":1,\"pad\":\"{}\"}}", "x".repeat(200));
        let (mut stream, _) = cursor(&["{\"id\":0}\n", long.as_str()], false, CancellationToken::new());
        assert_eq!(stream.next().await.unwrap().unwrap(), Event { id: 0 });
        assert!(matches!(
            stream.next().await,
            Some(Err(LichessError::Decode(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn into_stream_supports_combinators() {
        let (stream, _) = cursor(
            &["{\"id\":1}\n\n{\"id\":2}\n{\"id\":3}\n"],
            false,
            CancellationToken::new(),
        );
        let ids: Vec<u32> = stream
            .into_stream()
            .take(2)
            .map(|event| event.expect("record must decode").id)
            .collect()
            .await;
        assert_eq!(ids, vec![1, 2]);
    }
}
