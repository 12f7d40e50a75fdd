use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    advisor::{
        analysis::{AnalysisType, DEFAULT_REGION},
        completion::CompletionClient,
        dto::IdeaRequest,
    },
    auth::error::ErrorBody,
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdviceSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct Advice {
    pub analysis: AnalysisType,
    pub text: String,
    pub source: AdviceSource,
}

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("The AI advisor is not configured.")]
    NotConfigured,
    #[error("The AI advisor is unavailable right now, please try again later.")]
    Upstream(#[source] anyhow::Error),
}

impl IntoResponse for AdvisorError {
    fn into_response(self) -> Response {
        let kind = match &self {
            Self::NotConfigured => "advisor_not_configured",
            Self::Upstream(_) => "advisor_unavailable",
        };
        let body = ErrorBody {
            success: false,
            kind,
            message: self.to_string(),
        };
        (StatusCode::BAD_GATEWAY, Json(body)).into_response()
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    match value.trim() {
        "" => default,
        v => v,
    }
}

pub fn build_prompt(req: &IdeaRequest) -> String {
    let region = or_default(&req.region, DEFAULT_REGION);
    if let Some(ask) = req.analysis_type.ask(region) {
        return format!(
            "You are a business consultant who specialises in sustainable, eco-friendly ventures.\n\
             \n\
             Context: the user is based in {region} and wants to start a sustainable business.\n\
             Topic: {topic}\n\
             \n\
             Requirements:\n\
             1. Favour eco-friendly, sustainable or recyclable products and services\n\
             2. Include a market analysis for the region\n\
             3. Give concrete startup costs in local currency\n\
             4. Name the target audience and a marketing approach\n\
             5. Describe the environmental benefit\n\
             6. Point to local suppliers or resources where possible\n\
             \n\
             Request: {ask}\n\
             \n\
             Use clear headings and bullet points.",
            topic = req.analysis_type.label(),
        );
    }

    let interests = if req.interests.is_empty() {
        "Not specified".to_string()
    } else {
        req.interests.join(", ")
    };
    let eco = if req.eco_focus { "Yes" } else { "No" };
    format!(
        "Suggest 5 specific business ideas for someone in {region} with these characteristics:\n\
         - Interests: {interests}\n\
         - Budget: {budget}\n\
         - Eco-focus: {eco}\n\
         \n\
         For each idea, provide:\n\
         1. A brief description\n\
         2. Why it's suitable for the region\n\
         3. Market potential\n\
         4. Eco-friendly aspects (if applicable)\n\
         5. Startup requirements\n\
         \n\
         Present the information in a clear, structured format suitable for display in a web app.",
        budget = or_default(&req.budget, "Not specified"),
    )
}

/// Business advice generator with an explicit canned fallback per analysis.
pub struct Advisor {
    client: Option<Arc<dyn CompletionClient>>,
    fallback: bool,
}

impl Advisor {
    pub fn new(client: Option<Arc<dyn CompletionClient>>, fallback: bool) -> Self {
        Self { client, fallback }
    }

    pub async fn advise(&self, req: &IdeaRequest) -> Result<Advice, AdvisorError> {
        let prompt = build_prompt(req);
        let analysis = req.analysis_type;

        let Some(client) = &self.client else {
            if self.fallback {
                info!(?analysis, "no completion client configured; serving fallback advice");
                return Ok(canned(analysis));
            }
            return Err(AdvisorError::NotConfigured);
        };

        match client.complete(&prompt).await {
            Ok(text) => Ok(Advice {
                analysis,
                text,
                source: AdviceSource::Model,
            }),
            Err(e) if self.fallback => {
                warn!(error = %e, ?analysis, "completion failed; serving fallback advice");
                Ok(canned(analysis))
            }
            Err(e) => {
                warn!(error = %e, "completion failed");
                Err(AdvisorError::Upstream(e))
            }
        }
    }
}

fn canned(analysis: AnalysisType) -> Advice {
    Advice {
        analysis,
        text: analysis.fallback().to_string(),
        source: AdviceSource::Fallback,
    }
}
