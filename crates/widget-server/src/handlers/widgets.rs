use actix_web::{web, HttpResponse, Responder};
use serde_json::Value;

use super::widget_chat::not_found;
use crate::state::AppState;

pub async fn list(state: web::Data<AppState>) -> impl Responder {
    let widgets: Vec<Value> = state.widgets.list().map(|w| w.public_view()).collect();
    HttpResponse::Ok().json(widgets)
}

pub async fn get(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match path.parse::<u64>().ok().and_then(|id| state.widgets.get(id)) {
        Some(widget) => HttpResponse::Ok().json(widget.public_view()),
        None => not_found(),
    }
}
