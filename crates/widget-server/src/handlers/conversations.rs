use actix_web::{web, HttpResponse, Responder};
use tracing::{error, info};
use widget_core::StorageError;

use super::widget_chat::not_found;
use crate::state::AppState;

fn widget_id(state: &AppState, raw: &str) -> Option<u64> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| state.widgets.get(*id).is_some())
}

pub async fn list(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let Some(widget_id) = widget_id(&state, &path) else {
        return not_found();
    };

    match state.conversations.list_conversations(widget_id).await {
        Ok(conversations) => HttpResponse::Ok().json(conversations),
        Err(e) => {
            error!("[widget-{}] Failed to list conversations: {}", widget_id, e);
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "Failed to fetch conversations" }))
        }
    }
}

fn conversation_not_found() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "error": "Conversation not found" }))
}

async fn belongs_to_widget(state: &AppState, widget_id: u64, conversation_id: &str) -> bool {
    match state.conversations.list_conversations(widget_id).await {
        Ok(conversations) => conversations.iter().any(|c| c.id == conversation_id),
        Err(e) => {
            error!("[widget-{}] Failed to list conversations: {}", widget_id, e);
            false
        }
    }
}

pub async fn messages(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (raw_widget_id, conversation_id) = path.into_inner();
    let Some(widget_id) = widget_id(&state, &raw_widget_id) else {
        return not_found();
    };
    if !belongs_to_widget(&state, widget_id, &conversation_id).await {
        return conversation_not_found();
    }

    match state.conversations.load_messages(&conversation_id).await {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(StorageError::InvalidId(_)) | Err(StorageError::NotFound(_)) => {
            conversation_not_found()
        }
        Err(e) => {
            error!("[widget-{}] Failed to load {}: {}", widget_id, conversation_id, e);
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "Failed to fetch messages" }))
        }
    }
}

pub async fn delete(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (raw_widget_id, conversation_id) = path.into_inner();
    let Some(widget_id) = widget_id(&state, &raw_widget_id) else {
        return not_found();
    };
    if !belongs_to_widget(&state, widget_id, &conversation_id).await {
        return conversation_not_found();
    }

    match state.conversations.delete_conversation(&conversation_id).await {
        Ok(()) => {
            info!("[widget-{}] Deleted conversation {}", widget_id, conversation_id);
            HttpResponse::Ok().json(serde_json::json!({ "success": true }))
        }
        Err(StorageError::InvalidId(_)) | Err(StorageError::NotFound(_)) => {
            conversation_not_found()
        }
        Err(e) => {
            error!("[widget-{}] Failed to delete {}: {}", widget_id, conversation_id, e);
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "Failed to delete conversation" }))
        }
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{test, web, App};
    use serde_json::Value;
    use widget_core::{ConversationStore, Role, StoredMessage};

    use crate::server::configure;
    use crate::test_support::{test_state_with_widgets, widget, FakeConnector, ScriptedProvider};

    #[actix_web::test]
    async fn lists_conversations_and_messages() {
        let (state, _dir) = test_state_with_widgets(
            FakeConnector::new(),
            ScriptedProvider::text("x"),
            vec![widget(4, &[]), widget(5, &[])],
        )
        .await;
        let store = state.conversations.clone();
        let conversation = store.find_or_create(4, "visitor-1").await.unwrap();
        store
            .append_message(&StoredMessage::new(conversation.id.as_str(), Role::User, "Hi"))
            .await
            .unwrap();
        let app =
            test::init_service(App::new().app_data(web::Data::new(state)).configure(configure))
                .await;

        let req = test::TestRequest::get()
            .uri("/api/widgets/4/conversations")
            .to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed[0]["sessionId"], "visitor-1");

        let req = test::TestRequest::get()
            .uri(&format!("/api/widgets/4/conversations/{}/messages", conversation.id))
            .to_request();
        let messages: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(messages[0]["content"], "Hi");
        assert_eq!(messages[0]["role"], "user");

        // Another widget cannot read it.
        let req = test::TestRequest::get()
            .uri(&format!("/api/widgets/5/conversations/{}/messages", conversation.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        let req = test::TestRequest::get()
            .uri("/api/widgets/99/conversations")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn proxy_paths_mirror_conversation_routes() {
        let (state, _dir) = test_state_with_widgets(
            FakeConnector::new(),
            ScriptedProvider::text("x"),
            vec![widget(6, &[])],
        )
        .await;
        let store = state.conversations.clone();
        let conversation = store.find_or_create(6, "visitor-2").await.unwrap();
        store
            .append_message(&StoredMessage::new(conversation.id.as_str(), Role::User, "Yo"))
            .await
            .unwrap();
        let app =
            test::init_service(App::new().app_data(web::Data::new(state)).configure(configure))
                .await;

        let req = test::TestRequest::get()
            .uri("/api/proxy/widgets/6/conversations")
            .to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed[0]["id"], conversation.id.as_str());

        let req = test::TestRequest::get()
            .uri(&format!(
                "/api/proxy/widgets/6/conversations/{}/messages",
                conversation.id
            ))
            .to_request();
        let messages: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(messages[0]["content"], "Yo");

        let req = test::TestRequest::delete()
            .uri(&format!("/api/proxy/widgets/6/conversations/{}", conversation.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
        assert!(store.list_conversations(6).await.unwrap().is_empty());

        let req = test::TestRequest::delete()
            .uri(&format!("/api/proxy/widgets/6/conversations/{}", conversation.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn delete_is_scoped_to_the_owning_widget() {
        let (state, _dir) = test_state_with_widgets(
            FakeConnector::new(),
            ScriptedProvider::text("x"),
            vec![widget(7, &[]), widget(8, &[])],
        )
        .await;
        let store = state.conversations.clone();
        let conversation = store.find_or_create(7, "visitor-3").await.unwrap();
        let app =
            test::init_service(App::new().app_data(web::Data::new(state)).configure(configure))
                .await;

        let req = test::TestRequest::delete()
            .uri(&format!("/api/widgets/8/conversations/{}", conversation.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
        assert_eq!(store.list_conversations(7).await.unwrap().len(), 1);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/widgets/7/conversations/{}", conversation.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
        assert!(store.list_conversations(7).await.unwrap().is_empty());
    }
}
