pub mod chat;
pub mod conversations;
pub mod health;
pub mod widget_chat;
pub mod widgets;

use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{HttpResponse, HttpResponseBuilder};
use futures::Stream;
use serde::Deserialize;
use widget_core::Message;

/// A message as sent by the widget client.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessageInput {
    pub role: InputRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputRole {
    System,
    User,
    Assistant,
}

impl ChatMessageInput {
    pub fn to_message(&self) -> Message {
        match self.role {
            InputRole::System => Message::system(self.content.clone()),
            InputRole::User => Message::user(self.content.clone()),
            InputRole::Assistant => Message::assistant(self.content.clone(), None),
        }
    }
}

/// The history must be non-empty and end with the user's turn.
pub(crate) fn validate_messages(
    messages: &[ChatMessageInput],
) -> Result<&ChatMessageInput, HttpResponse> {
    match messages.last() {
        None => Err(bad_request("messages must not be empty")),
        Some(last) if last.role != InputRole::User => {
            Err(bad_request("the last message must come from the user"))
        }
        Some(last) => Ok(last),
    }
}

pub(crate) fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
}

pub(crate) fn sse_response<S>(mut builder: HttpResponseBuilder, body: S) -> HttpResponse
where
    S: Stream<Item = Result<Bytes, actix_web::Error>> + 'static,
{
    builder
        .append_header((header::CONTENT_TYPE, "text/event-stream"))
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(body)
}
