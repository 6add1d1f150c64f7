use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use llmverse_common::{Error, Result};

use super::{GenerationEvent, GenerationStream, LlmResponse};

/// Turns the `data:` payloads of one server-sent-events body into
/// generation events.
pub(crate) trait SseDecoder: Send + 'static {
    fn on_data(&mut self, data: &str, out: &mut VecDeque<GenerationEvent>) -> Result<()>;

    /// Called once when the body ends or `[DONE]` arrives.
    fn finish(&mut self) -> LlmResponse;
}

struct SseState<D> {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    body_done: bool,
    buffer: Vec<u8>,
    pending: VecDeque<GenerationEvent>,
    finished: bool,
    decoder: D,
}

impl<D: SseDecoder> SseState<D> {
    fn handle_line(&mut self, raw: &[u8]) -> Result<()> {
        let line = String::from_utf8_lossy(raw);
        let Some(data) = line.trim().strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.finish();
            return Ok(());
        }
        if data.is_empty() {
            return Ok(());
        }
        self.decoder.on_data(data, &mut self.pending)
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.pending
                .push_back(GenerationEvent::Completed(self.decoder.finish()));
        }
    }
}

/// Decode an SSE response body. The stream always ends with exactly one
/// [`GenerationEvent::Completed`] unless the body fails first.
pub(crate) fn decode<D: SseDecoder>(
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: D,
) -> GenerationStream {
    let state = SseState {
        body,
        body_done: false,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
        decoder,
    };

    stream::try_unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Ok(Some((event, state)));
            }
            if state.finished {
                return Ok(None);
            }

            if let Some(i) = state.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=i).collect();
                state.handle_line(&line)?;
                continue;
            }

            if state.body_done {
                let rest = std::mem::take(&mut state.buffer);
                state.handle_line(&rest)?;
                state.finish();
                continue;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(Error::Agent(format!("stream error: {e}"))),
                None => state.body_done = true,
            }
        }
    })
    .boxed()
}
