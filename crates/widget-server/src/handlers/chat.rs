use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;
use widget_llm::ProviderKind;
use widget_mcp::normalize_values;

use super::{sse_response, validate_messages, ChatMessageInput};
use crate::pipeline::{start_chat, ChatJob};
use crate::state::AppState;
use crate::widgets::server_list;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessageInput>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default, deserialize_with = "server_list")]
    pub mcp_servers: Vec<Value>,
}

/// Ad-hoc chat with request-supplied MCP servers; nothing is persisted.
pub async fn handler(state: web::Data<AppState>, req: web::Json<ChatRequest>) -> impl Responder {
    let req = req.into_inner();
    if let Err(response) = validate_messages(&req.messages) {
        return response;
    }

    let label = format!("chat-{}", Uuid::new_v4());
    let kind = ProviderKind::from_name(req.provider.as_deref());
    let provider = match state.providers.provider(kind) {
        Ok(provider) => provider,
        Err(e) => {
            error!("[{}] {} provider unavailable: {}", label, kind.as_str(), e);
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "Failed to process chat" }));
        }
    };

    let servers = normalize_values(&req.mcp_servers);
    info!(
        "[{}] Chat request: {} messages, {} of {} MCP server(s) usable",
        label,
        req.messages.len(),
        servers.len(),
        req.mcp_servers.len()
    );

    let job = ChatJob {
        label,
        provider,
        messages: req.messages.iter().map(ChatMessageInput::to_message).collect(),
        servers,
        conversation_id: None,
    };

    sse_response(HttpResponse::Ok(), start_chat(&state, job))
}

#[cfg(test)]
mod tests {
    use actix_web::{test, App};
    use serde_json::json;
    use widget_core::ChatEvent;

    use super::super::test_helpers::events;
    use crate::server::configure;
    use crate::test_support::{test_state, FakeConnector, ScriptedProvider, DOWN_URL, TOOLS_URL};

    #[actix_web::test]
    async fn streams_with_reachable_tools_and_skips_unreachable() {
        let connector = FakeConnector::new();
        let provider = ScriptedProvider::tool_then_text("Done");
        let (state, _dir) = test_state(connector.clone(), provider.clone()).await;
        let app = test::init_service(
            App::new()
                .app_data(actix_web::web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .set_json(json!({
                "messages": [{ "role": "user", "content": "Look it up" }],
                "mcpServers": [
                    { "url": TOOLS_URL, "type": "sse" },
                    { "url": DOWN_URL, "type": "http" }
                ]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        let body = test::read_body(resp).await;
        let events = events(&body);

        assert!(events.iter().any(|e| matches!(
            e,
            ChatEvent::ToolComplete { tool_call_id, .. } if tool_call_id == "call_1"
        )));
        assert!(matches!(
            events.last(),
            Some(ChatEvent::Finish { text, steps: 2 }) if text == "Done"
        ));
        assert_eq!(
            provider.seen_tools.lock().unwrap()[0],
            Some(vec!["lookup".to_string()])
        );
        assert_eq!(connector.close_count(), 1);
    }

    #[actix_web::test]
    async fn malformed_server_entries_are_skipped() {
        let connector = FakeConnector::new();
        let provider = ScriptedProvider::text("Fine");
        let (state, _dir) = test_state(connector.clone(), provider.clone()).await;
        let app = test::init_service(
            App::new()
                .app_data(actix_web::web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .set_json(json!({
                "messages": [{ "role": "user", "content": "Hi" }],
                "mcpServers": [{ "url": TOOLS_URL }, { "url": 12 }, { "type": 5 }, "bogus"]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);

        let body = test::read_body(resp).await;
        assert!(matches!(events(&body).last(), Some(ChatEvent::Finish { .. })));
        assert_eq!(
            provider.seen_tools.lock().unwrap()[0],
            Some(vec!["lookup".to_string()])
        );
        assert_eq!(connector.close_count(), 1);
    }

    #[actix_web::test]
    async fn null_server_list_means_no_tools() {
        let provider = ScriptedProvider::text("Hi there");
        let (state, _dir) = test_state(FakeConnector::new(), provider.clone()).await;
        let app = test::init_service(
            App::new()
                .app_data(actix_web::web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .set_json(json!({
                "messages": [{ "role": "user", "content": "Hi" }],
                "mcpServers": null
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        test::read_body(resp).await;

        assert_eq!(*provider.seen_tools.lock().unwrap(), vec![None]);
    }

    #[actix_web::test]
    async fn no_servers_means_no_tools() {
        let provider = ScriptedProvider::text("Hi there");
        let (state, _dir) = test_state(FakeConnector::new(), provider.clone()).await;
        let app = test::init_service(
            App::new()
                .app_data(actix_web::web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .set_json(json!({ "messages": [{ "role": "user", "content": "Hi" }] }))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;

        assert!(matches!(events(&body).last(), Some(ChatEvent::Finish { .. })));
        assert_eq!(*provider.seen_tools.lock().unwrap(), vec![None]);
    }

    #[actix_web::test]
    async fn rejects_invalid_histories() {
        let (state, _dir) = test_state(FakeConnector::new(), ScriptedProvider::text("x")).await;
        let app = test::init_service(
            App::new()
                .app_data(actix_web::web::Data::new(state))
                .configure(configure),
        )
        .await;

        for body in [
            json!({ "messages": [] }),
            json!({ "messages": [
                { "role": "user", "content": "a" },
                { "role": "assistant", "content": "b" }
            ] }),
        ] {
            let req = test::TestRequest::post()
                .uri("/api/chat")
                .set_json(body)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400);
        }
    }
}
