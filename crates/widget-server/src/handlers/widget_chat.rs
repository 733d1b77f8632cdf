use actix_web::cookie::{Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;
use widget_core::{Message, Role, StoredMessage};
use widget_llm::ProviderKind;

use super::{sse_response, validate_messages, ChatMessageInput};
use crate::pipeline::{start_chat, ChatJob};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WidgetChatRequest {
    pub messages: Vec<ChatMessageInput>,
}

pub fn session_cookie_name(widget_id: u64) -> String {
    format!("widget_{}_session", widget_id)
}

fn failed() -> HttpResponse {
    HttpResponse::InternalServerError()
        .json(serde_json::json!({ "error": "Failed to process chat" }))
}

pub(crate) fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "error": "Widget not found" }))
}

/// Chat through a configured widget. The visitor is identified by the
/// `widget_{id}_session` cookie; a fresh id is issued when it is missing.
pub async fn handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
    http: HttpRequest,
    req: web::Json<WidgetChatRequest>,
) -> impl Responder {
    let Some(widget) = path
        .into_inner()
        .parse::<u64>()
        .ok()
        .and_then(|id| state.widgets.get(id))
    else {
        return not_found();
    };

    let user_message = match validate_messages(&req.messages) {
        Ok(message) => message,
        Err(response) => return response,
    };

    let cookie_name = session_cookie_name(widget.id);
    let existing_session = http
        .cookie(&cookie_name)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok());
    let is_new_session = existing_session.is_none();
    let session_id = existing_session.unwrap_or_else(Uuid::new_v4).to_string();
    let label = format!("widget-{}/{}", widget.id, session_id);

    let conversation = match state
        .conversations
        .find_or_create(widget.id, &session_id)
        .await
    {
        Ok(conversation) => conversation,
        Err(e) => {
            error!("[{}] Failed to open conversation: {}", label, e);
            return failed();
        }
    };

    let stored = StoredMessage::new(
        conversation.id.as_str(),
        Role::User,
        user_message.content.clone(),
    );
    if let Err(e) = state.conversations.append_message(&stored).await {
        error!("[{}] Failed to store user message: {}", label, e);
        return failed();
    }

    let kind = ProviderKind::from_name(Some(widget.default_provider.as_str()));
    let provider = match state.providers.provider(kind) {
        Ok(provider) => provider,
        Err(e) => {
            error!("[{}] {} provider unavailable: {}", label, kind.as_str(), e);
            return failed();
        }
    };

    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(prompt) = widget.system_prompt.as_deref().filter(|p| !p.is_empty()) {
        messages.push(Message::system(prompt));
    }
    messages.extend(req.messages.iter().map(ChatMessageInput::to_message));

    let servers = widget.server_descriptors();
    info!(
        "[{}] Widget chat: {} messages, {} MCP server(s)",
        label,
        messages.len(),
        servers.len()
    );

    let job = ChatJob {
        label,
        provider,
        messages,
        servers,
        conversation_id: Some(conversation.id),
    };

    let mut builder = HttpResponse::Ok();
    if is_new_session {
        builder.cookie(
            Cookie::build(cookie_name, session_id)
                .path("/")
                .http_only(true)
                .secure(true)
                .same_site(SameSite::None)
                .finish(),
        );
    }

    sse_response(builder, start_chat(&state, job))
}
