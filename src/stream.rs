use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::LLMError;
use crate::extract::extract_delta;
use crate::http::HttpBodyStream;
use crate::types::{StreamChunk, StreamResponse};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Lazy sequence of decoded deltas, ending with at most one terminal chunk.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LLMError>> + Send>>;

/// Wraps an open response body into a [`ChunkStream`].
pub fn decode_stream(body: HttpBodyStream) -> ChunkStream {
    Box::pin(SseDecoder::new(body))
}

/// Turns a server-sent-event byte stream into [`StreamChunk`] values, line by line.
///
/// Every line is trimmed; only lines starting with `data: ` are considered. `data: [DONE]` yields
/// a terminal chunk and ends the stream even if more bytes follow. Frames that are not JSON or lack
/// `choices[0].delta.content` are skipped. End of input without the sentinel ends the stream
/// without a terminal chunk, and a body read error is yielded once before the stream ends.
pub struct SseDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    pending: VecDeque<StreamChunk>,
    stream_closed: bool,
    finished: bool,
}

impl SseDecoder {
    pub fn new(body: HttpBodyStream) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            stream_closed: false,
            finished: false,
        }
    }

    fn handle_line(&mut self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let Some(data) = text.trim().strip_prefix(DATA_PREFIX) else {
            return;
        };

        if data == DONE_SENTINEL {
            self.pending.push_back(StreamChunk::done());
            self.finished = true;
            return;
        }

        match extract_delta(data) {
            Some(content) if !content.is_empty() => {
                trace!(len = content.len(), "stream delta");
                self.pending.push_back(StreamChunk::delta(content));
            }
            Some(_) => {}
            None => debug!(frame = data, "skipping undecodable stream frame"),
        }
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            line.pop();
            line
        })
    }

    fn drain_buffer(&mut self) {
        while !self.finished {
            let Some(line) = Self::drain_line(&mut self.buffer) else {
                break;
            };
            self.handle_line(&line);
        }
    }
}

impl Stream for SseDecoder {
    type Item = Result<StreamChunk, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(chunk) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(chunk)));
            }

            if this.finished {
                return Poll::Ready(None);
            }

            if this.stream_closed {
                if !this.buffer.is_empty() {
                    let line = std::mem::take(&mut this.buffer);
                    this.handle_line(&line);
                }
                this.finished = true;
                continue;
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    this.drain_buffer();
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    this.pending.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => this.stream_closed = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Drives a [`ChunkStream`], invoking `on_chunk` in-line for every chunk in arrival order.
///
/// The next chunk is only read after the callback returns. Delivery stops at the terminal chunk,
/// at the end of the stream, on the first read error, on the first callback error (returned
/// verbatim) or when `cancel` fires, which yields [`LLMError::Aborted`].
///
/// # Examples
///
/// ```
/// # use futures_util::stream;
/// # use llm_relay::stream::{decode_stream, deliver};
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let body = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n".to_vec();
/// let chunks = decode_stream(Box::pin(stream::iter(vec![Ok(body)])));
/// let mut seen = Vec::new();
/// let response = deliver(chunks, None, |chunk| {
///     seen.push(chunk);
///     Ok(())
/// })
/// .await
/// .unwrap();
/// assert_eq!(response.content, "Hi");
/// assert_eq!(seen.len(), 2);
/// assert!(seen[1].done);
/// # });
/// ```
pub async fn deliver<F>(
    mut chunks: ChunkStream,
    cancel: Option<&CancellationToken>,
    mut on_chunk: F,
) -> Result<StreamResponse, LLMError>
where
    F: FnMut(StreamChunk) -> Result<(), LLMError>,
{
    let mut content = String::new();

    loop {
        let next = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(LLMError::Aborted {
                        message: "stream cancelled".to_string(),
                    });
                }
                next = chunks.next() => next,
            },
            None => chunks.next().await,
        };

        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        let done = chunk.done;
        if !done {
            content.push_str(&chunk.content);
        }
        on_chunk(chunk)?;
        if done {
            break;
        }
    }

    Ok(StreamResponse { content })
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    fn build_body(chunks: Vec<Result<Vec<u8>, LLMError>>) -> HttpBodyStream {
        Box::pin(stream::iter(chunks))
    }

    fn frame(content: &str) -> String {
        format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{content}\"}}}}]}}\n\n")
    }

    async fn collect(body: HttpBodyStream) -> Vec<Result<StreamChunk, LLMError>> {
        decode_stream(body).collect().await
    }

    #[tokio::test]
    async fn decoder_emits_delta_then_done() {
        let body = build_body(vec![Ok(format!("{}data: [DONE]\n", frame("Hi")).into_bytes())]);
        let chunks: Vec<StreamChunk> = collect(body)
            .await
            .into_iter()
            .map(|chunk| chunk.expect("ok"))
            .collect();
        assert_eq!(chunks, vec![StreamChunk::delta("Hi"), StreamChunk::done()]);
    }

    #[tokio::test]
    async fn decoder_reassembles_lines_split_across_reads() {
        let full = frame("split");
        let (head, tail) = full.split_at(17);
        let body = build_body(vec![
            Ok(head.as_bytes().to_vec()),
            Ok(tail.as_bytes().to_vec()),
        ]);
        let chunks = collect(body).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().expect("ok"), &StreamChunk::delta("split"));
    }

    #[tokio::test]
    async fn decoder_skips_malformed_frames() {
        let body = build_body(vec![Ok(format!("data: {{not json\n{}", frame("ok")).into_bytes())]);
        let chunks = collect(body).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().expect("ok"), &StreamChunk::delta("ok"));
    }

    #[tokio::test]
    async fn decoder_ignores_comments_and_unprefixed_lines() {
        let text = format!(
            ": keep-alive\nevent: message\ndata:{{\"choices\":[{{\"delta\":{{\"content\":\"nospace\"}}}}]}}\n\r\n{}",
            frame("kept")
        );
        let chunks = collect(build_body(vec![Ok(text.into_bytes())])).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().expect("ok"), &StreamChunk::delta("kept"));
    }

    #[tokio::test]
    async fn decoder_stops_at_done_even_with_trailing_data() {
        let text = format!("data: [DONE]\n{}", frame("late"));
        let chunks = collect(build_body(vec![Ok(text.into_bytes()), Ok(frame("later").into_bytes())])).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().expect("ok"), &StreamChunk::done());
    }

    #[tokio::test]
    async fn decoder_handles_final_line_without_newline() {
        let text = "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}";
        let chunks = collect(build_body(vec![Ok(text.as_bytes().to_vec())])).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().expect("ok"), &StreamChunk::delta("tail"));
    }

    #[tokio::test]
    async fn decoder_ends_without_terminal_chunk_on_eof() {
        let chunks = collect(build_body(vec![Ok(frame("a").into_bytes())])).await;
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].as_ref().expect("ok").done);
    }

    #[tokio::test]
    async fn decoder_surfaces_read_errors_once() {
        let body = build_body(vec![
            Ok(frame("a").into_bytes()),
            Err(LLMError::transport("read stream", "connection reset")),
            Ok(frame("b").into_bytes()),
        ]);
        let chunks = collect(body).await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        match &chunks[1] {
            Err(LLMError::Transport { stage, .. }) => assert_eq!(*stage, "read stream"),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn deliver_aggregates_and_stops_on_callback_error() {
        let text: String = ["a", "b", "c", "d", "e"].iter().map(|c| frame(c)).collect();
        let chunks = decode_stream(build_body(vec![Ok(text.into_bytes())]));
        let mut seen = Vec::new();
        let err = deliver(chunks, None, |chunk| {
            seen.push(chunk);
            Err(LLMError::Aborted {
                message: "caller stop".to_string(),
            })
        })
        .await
        .expect_err("callback error propagates");
        assert_eq!(seen, vec![StreamChunk::delta("a")]);
        assert_eq!(err.to_string(), "request aborted: caller stop");
    }

    #[tokio::test]
    async fn deliver_honors_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let chunks = decode_stream(Box::pin(stream::pending()));
        let err = deliver(chunks, Some(&token), |_| Ok(()))
            .await
            .expect_err("cancelled");
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn deliver_returns_partial_content_on_natural_eof() {
        let text = format!("{}{}", frame("Hel"), frame("lo"));
        let chunks = decode_stream(build_body(vec![Ok(text.into_bytes())]));
        let mut calls = 0;
        let response = deliver(chunks, None, |_| {
            calls += 1;
            Ok(())
        })
        .await
        .expect("ok");
        assert_eq!(response.content, "Hello");
        assert_eq!(calls, 2);
    }
}
