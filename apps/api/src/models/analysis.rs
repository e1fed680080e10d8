use serde::{Deserialize, Serialize};

/// Structured review of a resume produced by the `analysis` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub overall_score: u32, // 0 – 100
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub section_feedback: Vec<SectionFeedback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionFeedback {
    pub section: String,
    pub score: u32,
    pub feedback: String,
}

/// Resume vs job description comparison produced by the `matching` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_score: u32, // 0 – 100
    #[serde(default)]
    pub matched_keywords: Vec<String>,
    #[serde(default)]
    pub missing_keywords: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Wire shape for the `suggestions` operation. Callers only see the list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionList {
    pub suggestions: Vec<String>,
}
