use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use widget_core::tools::{ToolCall, ToolCallAccumulator};
use widget_core::ChatEvent;

use crate::provider::LLMStream;
use crate::types::LLMChunk;

use super::GenerationError;

pub(crate) struct StepOutput {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Drain one provider stream, forwarding tokens and folding tool-call deltas.
pub(crate) async fn consume_llm_stream(
    mut stream: LLMStream,
    events: &mpsc::Sender<ChatEvent>,
    cancel: &CancellationToken,
) -> Result<StepOutput, GenerationError> {
    let mut content = String::new();
    let mut tool_calls = ToolCallAccumulator::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            chunk = stream.next() => chunk,
        };

        match chunk {
            None => break,
            Some(Ok(LLMChunk::Token(token))) => {
                content.push_str(&token);
                let _ = events.send(ChatEvent::Token { content: token }).await;
            }
            Some(Ok(LLMChunk::ToolCalls(partial_calls))) => {
                debug!("Received {} tool call parts", partial_calls.len());
                tool_calls.extend(partial_calls);
            }
            Some(Ok(LLMChunk::Done)) => {
                debug!("LLM stream completed");
                break;
            }
            Some(Err(error)) => return Err(GenerationError::LLM(error)),
        }
    }

    Ok(StepOutput {
        content,
        tool_calls: tool_calls.finalize(),
    })
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use widget_core::tools::FunctionCall;

    use super::*;
    use crate::provider::LLMError;

    fn build_stream(items: Vec<crate::provider::Result<LLMChunk>>) -> LLMStream {
        Box::pin(stream::iter(items))
    }

    fn part(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            tool_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn accumulates_tokens_and_tool_calls() {
        let stream = build_stream(vec![
            Ok(LLMChunk::Token("hi".to_string())),
            Ok(LLMChunk::ToolCalls(vec![part("call_1", "lookup", "{")])),
            Ok(LLMChunk::ToolCalls(vec![part("call_1", "", "}")])),
            Ok(LLMChunk::Done),
        ]);

        let (tx, mut rx) = mpsc::channel(8);
        let output = consume_llm_stream(stream, &tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.content, "hi");
        assert_eq!(output.tool_calls.len(), 1);
        assert_eq!(output.tool_calls[0].function.arguments, "{}");
        assert_eq!(
            rx.recv().await,
            Some(ChatEvent::Token {
                content: "hi".to_string()
            })
        );
    }

    #[tokio::test]
    async fn stream_error_is_returned() {
        let stream = build_stream(vec![
            Ok(LLMChunk::Token("a".to_string())),
            Err(LLMError::Stream("boom".to_string())),
        ]);

        let (tx, _rx) = mpsc::channel(8);
        let result = consume_llm_stream(stream, &tx, &CancellationToken::new()).await;

        assert!(matches!(result, Err(GenerationError::LLM(LLMError::Stream(_)))));
    }

    #[tokio::test]
    async fn cancelled_token_stops_reading() {
        let stream: LLMStream = Box::pin(stream::pending());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (tx, _rx) = mpsc::channel(8);
        let result = consume_llm_stream(stream, &tx, &cancel).await;

        assert!(matches!(result, Err(GenerationError::Cancelled)));
    }
}
