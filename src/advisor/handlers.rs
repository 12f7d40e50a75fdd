use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{error, info, instrument};

use crate::{
    advisor::{
        dto::{ExportRequest, IdeaRequest},
        export,
        services::{Advice, AdvisorError},
    },
    auth::extractors::AuthSession,
    state::AppState,
};

pub fn advisor_routes() -> Router<AppState> {
    Router::new()
        .route("/advisor/ideas", post(ideas))
        .route("/advisor/export", post(export_ideas))
}

#[instrument(skip(state, session, payload), fields(username = %session.username))]
pub async fn ideas(
    State(state): State<AppState>,
    session: AuthSession,
    Json(payload): Json<IdeaRequest>,
) -> Result<Json<Advice>, AdvisorError> {
    let advice = state.advisor.advise(&payload).await?;
    info!(analysis = ?advice.analysis, source = ?advice.source, "advice generated");
    Ok(Json(advice))
}

#[instrument(skip(_session, payload), fields(format = ?payload.format))]
pub async fn export_ideas(
    _session: AuthSession,
    Json(payload): Json<ExportRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if payload.text.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Nothing to export".into()));
    }
    let doc = export::render(
        &payload.text,
        payload.format,
        payload.analysis_type,
        OffsetDateTime::now_utc(),
    )
    .map_err(|e| {
        error!(error = %e, "export failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    let disposition = format!("attachment; filename=\"{}\"", doc.filename);
    Ok((
        [
            (header::CONTENT_TYPE, doc.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        doc.body,
    ))
}
