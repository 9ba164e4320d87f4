//! Request-scoped context threaded through every component (spec §3 AgentContext).

use serde::{Deserialize, Serialize};

/// One prior turn's distilled outcome, carried forward so later turns don't need
/// to re-derive it from the raw conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisHistoryEntry {
    pub query: String,
    pub summary: String,
}

/// Everything a component needs to know about *which document/segment/thread* it
/// is operating on, independent of the conversation content itself. Constructed
/// once per inbound `Stream`/`Resume` call and cloned into C1/C6/C7/C8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub index_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub segment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub segment_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub start_timecode: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_timecode: Option<f64>,
    pub thread_id: String,
    pub session_id: String,
    pub user_query: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub previous_analysis_context: Option<String>,
    #[serde(default)]
    pub analysis_history: Vec<AnalysisHistoryEntry>,
    #[serde(default)]
    pub skip_opensearch_query: bool,
}

impl AgentContext {
    pub fn new(
        index_id: impl Into<String>,
        thread_id: impl Into<String>,
        session_id: impl Into<String>,
        user_query: impl Into<String>,
    ) -> Self {
        Self {
            index_id: index_id.into(),
            document_id: None,
            segment_id: None,
            segment_index: None,
            file_uri: None,
            image_uri: None,
            start_timecode: None,
            end_timecode: None,
            thread_id: thread_id.into(),
            session_id: session_id.into(),
            user_query: user_query.into(),
            previous_analysis_context: None,
            analysis_history: Vec::new(),
            skip_opensearch_query: false,
        }
    }

    /// True when the context is scoped to a specific segment within a document
    /// (vs. document-wide or corpus-wide queries).
    pub fn is_segment_scoped(&self) -> bool {
        self.segment_id.is_some()
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_segment(mut self, segment_id: impl Into<String>, segment_index: u32) -> Self {
        self.segment_id = Some(segment_id.into());
        self.segment_index = Some(segment_index);
        self
    }

    pub fn push_history(&mut self, query: impl Into<String>, summary: impl Into<String>) {
        self.analysis_history.push(AnalysisHistoryEntry {
            query: query.into(),
            summary: summary.into(),
        });
    }
}
