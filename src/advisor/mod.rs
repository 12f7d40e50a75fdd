use crate::state::AppState;
use axum::Router;

pub mod analysis;
pub mod completion;
mod dto;
mod export;
pub mod handlers;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::advisor_routes())
}
