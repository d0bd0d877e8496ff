//! Drives one generation from the host model to a client.
//!
//! Streaming responses are written as fragments arrive: every fragment is counted,
//! handed to the dialect's synthesizer and yielded before the next one is awaited.
//! Dropping the returned stream (client disconnect) cancels the host generation.

use crate::canonical::{Request, StreamPart};
use crate::error::{BridgeError, Result};
use crate::host::{FragmentStream, HostError, HostModel};
use crate::journal::PendingRecord;
use crate::taxonomy::map_error;
use crate::tokens::TokenAccountant;
use crate::translate::{Completion, SseEvent, StreamSynthesizer};

use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Events in the order they must reach the client.
pub type SseStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

/// A generation whose host stream is open but not yet consumed.
pub struct Generation {
    parts: FragmentStream,
    cancel: CancellationToken,
    accountant: TokenAccountant,
    input_tokens: u64,
}

impl Generation {
    /// Start the host generation. Failures here happen before any response byte is
    /// written, so callers can still answer with a plain HTTP error.
    pub async fn open(
        host: &dyn HostModel,
        accountant: &TokenAccountant,
        request: &Request,
        input_tokens: u64,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        let cancel = shutdown.child_token();
        let parts = host.send_request(request, cancel.clone()).await?;
        Ok(Self {
            parts,
            cancel,
            accountant: accountant.clone(),
            input_tokens,
        })
    }

    /// Drain the host stream into one aggregate. Counting matches the streaming path
    /// fragment for fragment, so both modes report identical usage.
    pub async fn collect(self) -> Result<Completion> {
        let Self {
            mut parts,
            cancel,
            accountant,
            input_tokens,
        } = self;
        let _guard = cancel.clone().drop_guard();

        let mut completion = Completion::new(input_tokens);
        while let Some(next) = next_part(&mut parts, &cancel).await {
            let part = next?;
            let tokens = accountant.count_part(&part).await?;
            completion.push(part, tokens);
        }
        Ok(completion)
    }

    /// Feed the host stream through `synth`, yielding events as fragments arrive.
    ///
    /// A host failure mid-stream ends the stream with the dialect's error events;
    /// events already yielded stay valid for the client. If the stream is dropped
    /// early, `pending` is journaled as cancelled with the usage seen so far.
    pub fn drive<S: StreamSynthesizer>(self, mut synth: S, mut pending: PendingRecord) -> SseStream {
        let Self {
            mut parts,
            cancel,
            accountant,
            ..
        } = self;

        let stream = async_stream::stream! {
            let _guard = cancel.clone().drop_guard();

            for event in synth.start() {
                yield event;
            }

            let mut failure: Option<BridgeError> = None;
            while let Some(next) = next_part(&mut parts, &cancel).await {
                let part = match next {
                    Ok(part) => part,
                    Err(e) => {
                        failure = Some(e.into());
                        break;
                    }
                };
                let tokens = match accountant.count_part(&part).await {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        failure = Some(e.into());
                        break;
                    }
                };
                let events = synth.on_part(&part, tokens);
                pending.observe(synth.usage());
                for event in events {
                    yield event;
                }
            }

            match failure {
                None => {
                    for event in synth.finish() {
                        yield event;
                    }
                    pending.completed(synth.usage());
                }
                Some(err) => {
                    let mapped = map_error(&err, synth.dialect());
                    tracing::warn!(
                        dialect = %synth.dialect(),
                        error_type = %mapped.error_type,
                        "generation failed mid-stream: {}",
                        err
                    );
                    for event in synth.fail(&mapped) {
                        yield event;
                    }
                    pending.failed(synth.usage(), mapped.status.as_u16(), &mapped.error_type);
                }
            }
        };

        Box::pin(stream)
    }
}

/// Next fragment, or a cancellation error once `cancel` fires.
async fn next_part(
    parts: &mut FragmentStream,
    cancel: &CancellationToken,
) -> Option<std::result::Result<StreamPart, HostError>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Some(Err(HostError::cancelled())),
        next = parts.next() => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{Content, Message};
    use crate::host::{HostErrorKind, ScriptedModel};
    use crate::journal::{Outcome, RequestRecord, SharedJournal, CLIENT_CLOSED_STATUS};
    use crate::translate::anthropic::AnthropicStreamSynthesizer;
    use crate::translate::chat::ChatStreamSynthesizer;
    use crate::translate::responses::ResponsesStreamSynthesizer;
    use crate::translate::Dialect;
    use serde_json::json;
    use std::sync::Arc;

    fn request() -> Request {
        Request {
            model: "echo".to_string(),
            messages: vec![Message::user(Content::Text("hi".to_string()))],
            ..Request::default()
        }
    }

    async fn open(host: ScriptedModel, shutdown: &CancellationToken) -> Result<Generation> {
        let host: Arc<dyn HostModel> = Arc::new(host);
        let accountant = TokenAccountant::new(host.clone());
        Generation::open(host.as_ref(), &accountant, &request(), 1, shutdown).await
    }

    fn pending(journal: &SharedJournal) -> PendingRecord {
        journal.begin(RequestRecord::new(Dialect::OpenAiChat, "echo", "echo", true))
    }

    #[tokio::test]
    async fn test_collect_counts_each_fragment() {
        let host = ScriptedModel::replay(vec![
            StreamPart::text("one two"),
            StreamPart::text(" three"),
            StreamPart::tool_call("call_1", "lookup", json!({})),
        ]);
        let completion = open(host, &CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(completion.text, "one two three");
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.usage.input_tokens, 1);
        // 2 + 1 words of text, plus the tool call's serialized form
        assert!(completion.usage.output_tokens > 3);
    }

    #[tokio::test]
    async fn test_send_failure_surfaces_before_streaming() {
        let host = ScriptedModel::failing(HostErrorKind::InvalidModel, "no such model");
        let err = open(host, &CancellationToken::new()).await.err().unwrap();
        assert!(matches!(err, BridgeError::Host(ref e) if e.kind == HostErrorKind::InvalidModel));
    }

    #[tokio::test]
    async fn test_stream_usage_matches_collect() {
        let parts = vec![StreamPart::text("a b c"), StreamPart::text("d e")];
        let collected = open(ScriptedModel::replay(parts.clone()), &CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        let journal = SharedJournal::in_memory();
        let events: Vec<SseEvent> = open(ScriptedModel::replay(parts), &CancellationToken::new())
            .await
            .unwrap()
            .drive(ChatStreamSynthesizer::new("echo", 1, true), pending(&journal))
            .collect()
            .await;

        let usage_chunk = events
            .iter()
            .map(SseEvent::json)
            .find(|v| !v["usage"].is_null())
            .unwrap();
        assert_eq!(
            usage_chunk["usage"]["completion_tokens"],
            json!(collected.usage.output_tokens)
        );

        let recent = journal.recent(1);
        assert_eq!(recent[0].outcome, Outcome::Completed);
        assert_eq!(recent[0].output_tokens, collected.usage.output_tokens);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_terminates_with_error() {
        let host = ScriptedModel::failing_after(
            vec![StreamPart::text("partial")],
            HostErrorKind::QuotaExceeded,
            "slow down",
        );
        let journal = SharedJournal::in_memory();
        let events: Vec<SseEvent> = open(host, &CancellationToken::new())
            .await
            .unwrap()
            .drive(AnthropicStreamSynthesizer::new("m", 1), pending(&journal))
            .collect()
            .await;

        let names: Vec<_> = events.iter().filter_map(|e| e.event.as_deref()).collect();
        assert!(names.contains(&"content_block_delta"));
        assert_eq!(names[names.len() - 2], "error");
        assert_eq!(names[names.len() - 1], "message_stop");

        let recent = journal.recent(1);
        assert_eq!(recent[0].outcome, Outcome::Failed);
        assert_eq!(recent[0].status, 429);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_generation() {
        let shutdown = CancellationToken::new();
        let generation = open(ScriptedModel::replay(vec![StreamPart::text("x")]), &shutdown)
            .await
            .unwrap();
        shutdown.cancel();

        let err = generation.collect().await.unwrap_err();
        assert_eq!(err.client_message(), "request cancelled");
    }

    fn names(events: &[SseEvent]) -> Vec<&str> {
        events.iter().filter_map(|e| e.event.as_deref()).collect()
    }

    #[tokio::test]
    async fn test_shutdown_mid_stream_ends_anthropic_stream_with_error() {
        let shutdown = CancellationToken::new();
        let journal = SharedJournal::in_memory();
        let host = ScriptedModel::replay(vec![StreamPart::text("one"), StreamPart::text("two")]);
        let mut stream = open(host, &shutdown)
            .await
            .unwrap()
            .drive(AnthropicStreamSynthesizer::new("m", 1), pending(&journal));

        let first = stream.next().await.unwrap();
        assert_eq!(first.event.as_deref(), Some("message_start"));
        shutdown.cancel();
        let rest: Vec<SseEvent> = stream.collect().await;

        assert_eq!(names(&rest), vec!["error", "message_stop"]);
        let recent = journal.recent(1);
        assert_eq!(recent[0].outcome, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_shutdown_mid_stream_fails_response() {
        let shutdown = CancellationToken::new();
        let journal = SharedJournal::in_memory();
        let host = ScriptedModel::replay(vec![StreamPart::text("one")]);
        let mut stream = open(host, &shutdown)
            .await
            .unwrap()
            .drive(ResponsesStreamSynthesizer::new("m", 1), pending(&journal));

        let first = stream.next().await.unwrap();
        assert_eq!(first.event.as_deref(), Some("response.created"));
        shutdown.cancel();
        let rest: Vec<SseEvent> = stream.collect().await;

        let rest = names(&rest);
        assert_eq!(rest[rest.len() - 2..], ["error", "response.failed"]);
        assert!(!rest.contains(&"response.output_text.delta"));
        assert_eq!(journal.recent(1)[0].outcome, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_dropped_stream_is_journaled_as_cancelled() {
        let journal = SharedJournal::in_memory();
        let host = ScriptedModel::replay(vec![StreamPart::text("one two"), StreamPart::text("three")]);
        let mut stream = open(host, &CancellationToken::new())
            .await
            .unwrap()
            .drive(AnthropicStreamSynthesizer::new("m", 1), pending(&journal));

        // message_start, then the first text block
        stream.next().await.unwrap();
        stream.next().await.unwrap();
        stream.next().await.unwrap();
        drop(stream);

        let recent = journal.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].outcome, Outcome::Cancelled);
        assert_eq!(recent[0].status, CLIENT_CLOSED_STATUS);
        assert_eq!(recent[0].input_tokens, 1);
        assert_eq!(recent[0].output_tokens, 2);
    }
}
