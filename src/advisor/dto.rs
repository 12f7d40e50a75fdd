use serde::Deserialize;

use crate::advisor::{analysis::AnalysisType, export::ExportFormat};

/// Request body for idea generation.
#[derive(Debug, Clone, Deserialize)]
pub struct IdeaRequest {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub budget: String,
    #[serde(default = "default_eco_focus")]
    pub eco_focus: bool,
    #[serde(default)]
    pub analysis_type: AnalysisType,
}

fn default_eco_focus() -> bool {
    true
}

/// Request body for downloading previously generated advice.
#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub text: String,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub analysis_type: AnalysisType,
}
