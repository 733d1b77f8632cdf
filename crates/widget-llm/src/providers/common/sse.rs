//! Turns a provider's `text/event-stream` response into an [`LLMStream`].

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Response;

use crate::provider::{LLMError, LLMStream, Result};
use crate::types::LLMChunk;

/// `handler` sees each event's name and data and returns the chunk to emit,
/// `None` to skip the event, or an error that is surfaced as
/// [`LLMError::Stream`].
pub fn llm_stream_from_sse<H>(response: Response, mut handler: H) -> LLMStream
where
    H: FnMut(&str, &str) -> Result<Option<LLMChunk>> + Send + 'static,
{
    let stream = response
        .bytes_stream()
        .eventsource()
        .filter_map(move |event| {
            let item = match event {
                Ok(event) => match handler(event.event.as_str(), event.data.as_str()) {
                    Ok(chunk) => chunk.map(Ok),
                    Err(LLMError::Stream(message)) => Some(Err(LLMError::Stream(message))),
                    Err(other) => Some(Err(LLMError::Stream(other.to_string()))),
                },
                Err(e) => Some(Err(LLMError::Stream(e.to_string()))),
            };
            futures::future::ready(item)
        });

    Box::pin(stream)
}
