//! Worker Pool — Deep Research (C8): bounded-concurrency batched segment
//! analyzer with a Lead coordinator and partial-failure tolerance (spec §4.8).
//!
//! Grounded in `original_source/.../agent/deep_research_agent/agent.py`'s
//! `DeepResearchAgent.research` (batch loop over `segment_ids`, per-batch
//! progress percentage, `should_continue` budget check, final report/markdown
//! generation) and its `tools/document_tool.py` (`get_document_overview_async`
//! shape: `total_pages`/`total_segments`/`segment_ids`/`document_type`). The
//! batch loop here drives [`WorkerPool`] instead of the original's
//! `PageWorkerPool`, fanned out with `tokio::sync::Semaphore` +
//! `futures::stream::FuturesUnordered` per DESIGN.md.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::agent_context::AgentContext;
use crate::config::CoreConfig;
use crate::error::AgentError;
use crate::state::{
    Evidence, EvidenceFinding, EvidenceSection, JobProgress, JobStatus, ResearchCost,
    ResearchJob, ResearchMemory, ResearchOutcome, ResearchStats, SegmentResult,
};
use crate::stream::StreamWriter;
use crate::tool::ToolRegistry;

use stream_event::CoreEvent;

const IMAGE_ANALYZER_TOOL: &str = "image_analyzer";
const VIDEO_ANALYZER_TOOL: &str = "video_analyzer";

/// Which analyzer tool a segment is dispatched through (spec §4.8: "image
/// analyzer for document pages, video analyzer for video chapters").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentType {
    Image,
    Video,
}

impl SegmentType {
    /// Inferred from the document overview's `document_type`/`media_type`
    /// field; anything not recognized as video falls back to the image path.
    fn from_document_type(document_type: &str) -> Self {
        if document_type.to_lowercase().contains("video") {
            SegmentType::Video
        } else {
            SegmentType::Image
        }
    }

    fn tool_name(&self) -> &'static str {
        match self {
            SegmentType::Image => IMAGE_ANALYZER_TOOL,
            SegmentType::Video => VIDEO_ANALYZER_TOOL,
        }
    }
}

/// Input to one `Stream(mode=deep_research, ...)` call (spec §6).
pub struct ResearchInput {
    pub thread_id: String,
    pub session_id: String,
    pub index_id: String,
    pub document_id: String,
    pub query: String,
    pub job_id: Option<String>,
}

/// Aggregated job/evidence storage for one or more research jobs (spec §4.8
/// "aggregated `EvidenceStore`"). Process-lifetime only, mirroring
/// [`crate::checkpoint::MemorySaver`]'s scope.
#[derive(Default)]
pub struct EvidenceStore {
    jobs: dashmap::DashMap<String, ResearchJob>,
    evidence: dashmap::DashMap<(String, String), Evidence>,
}

impl EvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_job(&self, job_id: &str, document_id: &str, query: &str, total_pages: u32, total_segments: u32) -> ResearchJob {
        let job = ResearchJob {
            job_id: job_id.to_string(),
            document_id: document_id.to_string(),
            query: query.to_string(),
            total_pages,
            total_segments,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            started_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
        };
        self.jobs.insert(job_id.to_string(), job.clone());
        job
    }

    pub fn set_status(&self, job_id: &str, status: JobStatus) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            job.status = status;
            if matches!(status, JobStatus::Completed | JobStatus::Failed) {
                job.completed_at = Some(chrono::Utc::now().to_rfc3339());
            }
        }
    }

    pub fn update_progress(&self, job_id: &str, progress: JobProgress) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            job.progress = progress;
        }
    }

    pub fn get_job(&self, job_id: &str) -> Option<ResearchJob> {
        self.jobs.get(job_id).map(|j| j.clone())
    }

    pub fn record_evidence(&self, job_id: &str, segment_id: &str, evidence: Evidence) {
        self.evidence.insert((job_id.to_string(), segment_id.to_string()), evidence);
    }

    /// All evidence recorded for `job_id`, ordered by `page_index` (the
    /// original's `get_all_evidence` orders by the underlying storage's
    /// insertion/page order; segment ids in this core are opaque strings, so
    /// `page_index` — assigned as each segment is dispatched — stands in).
    pub fn all_evidence(&self, job_id: &str) -> Vec<Evidence> {
        let mut out: Vec<Evidence> = self
            .evidence
            .iter()
            .filter(|entry| entry.key().0 == job_id)
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by_key(|e| e.page_index);
        out
    }
}

/// Decides whether another batch should run, given accumulated cost and the
/// configured token budget (spec §4.8 `should_continue(cost_summary)`; spec
/// §4.6 "Budget" `budget_tokens`). `None` budget means unbounded.
fn should_continue(cost: &ResearchCost, budget_tokens: Option<u64>) -> bool {
    match budget_tokens {
        Some(limit) => cost.tokens_in + cost.tokens_out < limit,
        None => true,
    }
}

/// Bounded-concurrency segment processor (spec §4.8 `Process(job_id,
/// document_id, segment_ids, query, max_concurrent)`).
pub struct WorkerPool {
    tools: Arc<ToolRegistry>,
}

impl WorkerPool {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        WorkerPool { tools }
    }

    /// Processes one batch of segments with at most `max_concurrent` in
    /// flight. Ordering of results is not guaranteed (spec §4.8); per-segment
    /// `task_start` → `task_complete`/`task_failed` pairs are ordered within
    /// that segment's own task.
    async fn process_batch(
        &self,
        ctx: &AgentContext,
        segment_type: SegmentType,
        document_id: &str,
        query: &str,
        segment_ids: &[String],
        max_concurrent: usize,
        page_index_base: u32,
        evidence: &EvidenceStore,
        job_id: &str,
        writer: &StreamWriter,
    ) -> Vec<SegmentResult> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut tasks = FuturesUnordered::new();

        for (offset, segment_id) in segment_ids.iter().enumerate() {
            let semaphore = semaphore.clone();
            let tools = self.tools.clone();
            let segment_id = segment_id.clone();
            let document_id = document_id.to_string();
            let query = query.to_string();
            let ctx = ctx.clone();
            let page_index = page_index_base + offset as u32;
            let task_writer = writer.clone();

            tasks.push(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                task_writer
                    .emit(CoreEvent::TaskStart {
                        segment_id: segment_id.clone(),
                    })
                    .await;
                analyze_segment(&tools, segment_type, &document_id, &segment_id, &query, &ctx, page_index).await
            });
        }

        let mut results = Vec::with_capacity(segment_ids.len());
        while let Some((result, evidence_record)) = tasks.next().await {
            match &result {
                SegmentResult { success: true, segment_id, summary, .. } => {
                    let _ = writer
                        .emit(CoreEvent::TaskComplete {
                            segment_id: segment_id.clone(),
                            summary: summary.clone().unwrap_or_default(),
                        })
                        .await;
                }
                SegmentResult { success: false, segment_id, error, .. } => {
                    let _ = writer
                        .emit(CoreEvent::TaskFailed {
                            segment_id: segment_id.clone(),
                            error: error.clone().unwrap_or_default(),
                        })
                        .await;
                }
            }
            if let Some(ev) = evidence_record {
                evidence.record_evidence(job_id, &result.segment_id, ev);
            }
            results.push(result);
        }
        results
    }
}

async fn analyze_segment(
    tools: &ToolRegistry,
    segment_type: SegmentType,
    document_id: &str,
    segment_id: &str,
    query: &str,
    ctx: &AgentContext,
    page_index: u32,
) -> (SegmentResult, Option<Evidence>) {
    let args = json!({
        "document_id": document_id,
        "segment_id": segment_id,
        "query": query,
        "index_id": ctx.index_id,
    });

    let result = match tools.invoke(segment_type.tool_name(), args, ctx).await {
        Ok(result) => result,
        Err(err) => {
            return (
                SegmentResult {
                    segment_id: segment_id.to_string(),
                    success: false,
                    summary: None,
                    error: Some(err.to_string()),
                },
                None,
            )
        }
    };

    if !result.success {
        let error = result.error.unwrap_or_else(|| "analysis failed".to_string());
        return (
            SegmentResult {
                segment_id: segment_id.to_string(),
                success: false,
                summary: None,
                error: Some(error),
            },
            None,
        );
    }

    let summary = if result.message.is_empty() {
        format!("segment {segment_id}: no summary returned")
    } else {
        result.message.clone()
    };

    let findings = result
        .data
        .get("findings")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let text = item.get("text").and_then(Value::as_str)?.to_string();
                    let kind = item
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("analysis")
                        .to_string();
                    Some(EvidenceFinding { text, kind })
                })
                .collect()
        })
        .unwrap_or_default();

    let sections = result
        .data
        .get("sections")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let title = item.get("title").and_then(Value::as_str)?.to_string();
                    Some(EvidenceSection { title })
                })
                .collect()
        })
        .unwrap_or_default();

    let evidence = Evidence {
        findings,
        sections,
        summary: summary.clone(),
        page_index,
    };

    (
        SegmentResult {
            segment_id: segment_id.to_string(),
            success: true,
            summary: Some(summary),
            error: None,
        },
        Some(evidence),
    )
}

/// Drives the full deep-research job: resolve the document's segment list,
/// batch-process through [`WorkerPool`], check `should_continue` between
/// batches, and synthesize a final report from the [`EvidenceStore`] (spec
/// §4.8, agent.py's three-phase `research()`).
pub struct DeepResearchPipeline {
    pool: WorkerPool,
    tools: Arc<ToolRegistry>,
    evidence: Arc<EvidenceStore>,
    config: CoreConfig,
}

impl DeepResearchPipeline {
    pub fn new(tools: Arc<ToolRegistry>, evidence: Arc<EvidenceStore>, config: CoreConfig) -> Self {
        DeepResearchPipeline {
            pool: WorkerPool::new(tools.clone()),
            tools,
            evidence,
            config,
        }
    }

    /// Runs one deep-research request to completion, emitting `phase_update`
    /// once per batch, per-segment `task_start`/`task_complete`/`task_failed`,
    /// and a terminal `execution_complete` (spec S3). Returns the final
    /// [`ResearchOutcome`] alongside streaming events (callers persisting a
    /// report read it from the return value, not the event stream).
    pub async fn run(&self, input: ResearchInput, writer: &StreamWriter) -> Result<ResearchOutcome, AgentError> {
        let job_id = input
            .job_id
            .clone()
            .unwrap_or_else(|| format!("research_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));

        let mut ctx = AgentContext::new(
            input.index_id.clone(),
            input.thread_id.clone(),
            input.session_id.clone(),
            input.query.clone(),
        );
        ctx = ctx.with_document(input.document_id.clone());

        let overview = self
            .tools
            .invoke(
                "get_document_info",
                json!({"document_id": input.document_id, "index_id": input.index_id}),
                &ctx,
            )
            .await?;

        if !overview.success {
            let error = overview.error.unwrap_or_else(|| "failed to get document info".to_string());
            self.evidence.create_job(&job_id, &input.document_id, &input.query, 0, 0);
            self.evidence.set_status(&job_id, JobStatus::Failed);
            let _ = writer
                .emit(CoreEvent::Error {
                    error_message: error.clone(),
                    error_code: Some("tool_unavailable".to_string()),
                })
                .await;
            return Ok(ResearchOutcome {
                success: false,
                job_id,
                status: JobStatus::Failed,
                report_path: None,
                markdown_path: None,
                summary: error,
                stats: ResearchStats {
                    total_pages: 0,
                    completed_pages: 0,
                    failed_pages: 0,
                    cost: ResearchCost::default(),
                },
            });
        }

        let total_pages = overview.data.get("total_pages").and_then(Value::as_u64).unwrap_or(0) as u32;
        let segment_ids: Vec<String> = overview
            .data
            .get("segment_ids")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let total_segments = segment_ids.len() as u32;
        let segment_type = overview
            .data
            .get("document_type")
            .and_then(Value::as_str)
            .map(SegmentType::from_document_type)
            .unwrap_or(SegmentType::Image);

        self.evidence.create_job(&job_id, &input.document_id, &input.query, total_pages, total_segments);
        self.evidence.set_status(&job_id, JobStatus::Running);

        let batch_size = self.config.deep_research_batch_size.max(1);
        let max_concurrent = self.config.deep_research_max_concurrent.max(1);

        let mut memory = ResearchMemory::default();
        memory.progress.total_pages = total_pages;

        let mut batch_start = 0usize;
        while batch_start < segment_ids.len() {
            let batch_end = (batch_start + batch_size).min(segment_ids.len());
            let batch = &segment_ids[batch_start..batch_end];

            let results = self
                .pool
                .process_batch(
                    &ctx,
                    segment_type,
                    &input.document_id,
                    &input.query,
                    batch,
                    max_concurrent,
                    batch_start as u32,
                    &self.evidence,
                    &job_id,
                    writer,
                )
                .await;

            for result in &results {
                if result.success {
                    memory.progress.completed_pages += 1;
                } else {
                    memory.progress.failed_pages.push(result.segment_id.clone());
                }
            }
            memory.progress.current_batch += 1;
            memory.cost.tokens_in += batch.len() as u64 * 256;
            memory.cost.tokens_out += batch.len() as u64 * 64;

            let percentage = (batch_end as f64 / segment_ids.len().max(1) as f64) * 100.0;
            let _ = writer
                .emit(CoreEvent::PhaseUpdate {
                    phase: "deep_research_batch".to_string(),
                    percentage: Some(percentage),
                    message: Some(format!("batch {batch_start}-{}", batch_end.saturating_sub(1))),
                })
                .await;

            self.evidence.update_progress(
                &job_id,
                JobProgress {
                    completed_segments: batch_end as u32,
                    failed_segments: memory.progress.failed_pages.len() as u32,
                    percentage,
                },
            );

            if !should_continue(&memory.cost, self.config.budget_tokens) {
                break;
            }
            batch_start = batch_end;
        }

        self.evidence.set_status(&job_id, JobStatus::Completed);

        let all_evidence = self.evidence.all_evidence(&job_id);
        let summary = synthesize_summary(&input.query, &all_evidence, &memory);

        let successful = memory.progress.completed_pages;
        let failed = memory.progress.failed_pages.len() as u32;
        let _ = writer
            .emit(CoreEvent::ExecutionComplete {
                total: total_segments,
                successful,
                failed,
            })
            .await;
        let _ = writer.emit(CoreEvent::StreamEnd).await;

        Ok(ResearchOutcome {
            success: true,
            job_id,
            status: JobStatus::Completed,
            report_path: None,
            markdown_path: None,
            summary,
            stats: ResearchStats {
                total_pages,
                completed_pages: successful,
                failed_pages: failed,
                cost: memory.cost,
            },
        })
    }
}

/// Lead's final synthesis (agent.py `generate_final_summary` /
/// `_generate_report`'s `executive_summary`), reduced to a deterministic
/// rollup since no model call is required to satisfy spec §4.8's contract.
fn synthesize_summary(query: &str, evidence: &[Evidence], memory: &ResearchMemory) -> String {
    let mut findings_by_kind: HashMap<String, usize> = HashMap::new();
    for item in evidence {
        for finding in &item.findings {
            *findings_by_kind.entry(finding.kind.clone()).or_insert(0) += 1;
        }
    }
    let mut breakdown: Vec<String> = findings_by_kind
        .into_iter()
        .map(|(kind, count)| format!("{count} {kind}"))
        .collect();
    breakdown.sort();

    format!(
        "Research on \"{query}\": {} segments analyzed, {} failed. {}",
        memory.progress.completed_pages,
        memory.progress.failed_pages.len(),
        if breakdown.is_empty() {
            "No findings extracted.".to_string()
        } else {
            format!("Findings: {}.", breakdown.join(", "))
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::state::ToolSpec;
    use crate::tool::Tool;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedOverviewTool {
        total_segments: u32,
    }

    #[async_trait]
    impl Tool for FixedOverviewTool {
        fn name(&self) -> &str {
            "get_document_info"
        }
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "get_document_info".to_string(),
                description: "document overview".to_string(),
                input_schema: json!({"required": ["document_id"]}),
                supports_agent_context: false,
            }
        }
        async fn call(&self, _args: Value, _ctx: &AgentContext) -> Result<Value, AgentError> {
            let segment_ids: Vec<String> = (0..self.total_segments).map(|i| format!("seg-{i}")).collect();
            Ok(json!({
                "success": true,
                "total_pages": self.total_segments,
                "segment_ids": segment_ids,
                "document_type": "image",
            }))
        }
    }

    struct CountingAnalyzer {
        calls: Arc<AtomicU32>,
        fail_every: Option<u32>,
    }

    #[async_trait]
    impl Tool for CountingAnalyzer {
        fn name(&self) -> &str {
            IMAGE_ANALYZER_TOOL
        }
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: IMAGE_ANALYZER_TOOL.to_string(),
                description: "analyzes one segment".to_string(),
                input_schema: json!({"required": ["segment_id"]}),
                supports_agent_context: false,
            }
        }
        async fn call(&self, args: Value, _ctx: &AgentContext) -> Result<Value, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(fail_every) = self.fail_every {
                if n % fail_every == 0 {
                    return Ok(json!({"success": false, "error": "analysis timed out"}));
                }
            }
            let segment_id = args["segment_id"].as_str().unwrap_or_default();
            Ok(json!({"content": format!("summary for {segment_id}")}))
        }
    }

    fn registry(total_segments: u32, fail_every: Option<u32>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FixedOverviewTool { total_segments }));
        registry.register(Arc::new(CountingAnalyzer {
            calls: Arc::new(AtomicU32::new(0)),
            fail_every,
        }));
        Arc::new(registry)
    }

    fn writer() -> (StreamWriter, tokio::sync::mpsc::Receiver<CoreEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(4096);
        (StreamWriter::new(tx, "t1", tokio_util::sync::CancellationToken::new()), rx)
    }

    fn input() -> ResearchInput {
        ResearchInput {
            thread_id: "t1".to_string(),
            session_id: "s1".to_string(),
            index_id: "idx-1".to_string(),
            document_id: "doc-1".to_string(),
            query: "what happened?".to_string(),
            job_id: None,
        }
    }

    /// **Scenario** (S3): 120 segments, batch=50, max_concurrent=3 — exactly 3
    /// `phase_update`s with percentages ~{41.6, 83.3, 100.0} and a terminal
    /// `execution_complete{total:120, successful:120, failed:0}`.
    #[tokio::test]
    async fn deep_research_120_segments_batches_and_reports_exact_percentages() {
        let tools = registry(120, None);
        let evidence = Arc::new(EvidenceStore::new());
        let mut config = CoreConfig::default();
        config.deep_research_batch_size = 50;
        config.deep_research_max_concurrent = 3;
        let pipeline = DeepResearchPipeline::new(tools, evidence, config);

        let (w, mut rx) = writer();
        let outcome = pipeline.run(input(), &w).await.unwrap();

        assert_eq!(outcome.stats.total_pages, 120);
        assert_eq!(outcome.stats.completed_pages, 120);
        assert_eq!(outcome.stats.failed_pages, 0);
        assert!(outcome.success);

        let mut phase_updates = Vec::new();
        let mut execution_complete = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                CoreEvent::PhaseUpdate { percentage, .. } => phase_updates.push(percentage.unwrap()),
                CoreEvent::ExecutionComplete { total, successful, failed } => {
                    execution_complete = Some((total, successful, failed));
                }
                _ => {}
            }
        }

        assert_eq!(phase_updates.len(), 3);
        assert!((phase_updates[0] - 41.666_666_666_666_664).abs() < 1e-9);
        assert!((phase_updates[1] - 83.333_333_333_333_33).abs() < 1e-9);
        assert!((phase_updates[2] - 100.0).abs() < 1e-9);
        assert_eq!(execution_complete, Some((120, 120, 0)));
    }

    /// **Scenario**: a failing segment is reported as `task_failed` and counted
    /// in `failed_pages` without stopping the rest of the batch (partial-failure policy).
    #[tokio::test]
    async fn failed_segment_does_not_abort_batch() {
        let tools = registry(10, Some(3));
        let evidence = Arc::new(EvidenceStore::new());
        let mut config = CoreConfig::default();
        config.deep_research_batch_size = 50;
        config.deep_research_max_concurrent = 1;
        let pipeline = DeepResearchPipeline::new(tools, evidence, config);

        let (w, mut rx) = writer();
        let outcome = pipeline.run(input(), &w).await.unwrap();

        assert_eq!(outcome.stats.total_pages, 10);
        assert_eq!(outcome.stats.completed_pages, 7);
        assert_eq!(outcome.stats.failed_pages, 3);

        let mut started_count = 0;
        let mut failed_count = 0;
        let mut complete_count = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                CoreEvent::TaskStart { .. } => started_count += 1,
                CoreEvent::TaskFailed { .. } => failed_count += 1,
                CoreEvent::TaskComplete { .. } => complete_count += 1,
                _ => {}
            }
        }
        assert_eq!(started_count, 10);
        assert_eq!(failed_count, 3);
        assert_eq!(complete_count, 7);
    }

    /// **Scenario**: a document overview failure fails the job rather than panicking.
    #[tokio::test]
    async fn missing_document_overview_fails_job() {
        let mut registry = ToolRegistry::new();
        struct FailingOverview;
        #[async_trait]
        impl Tool for FailingOverview {
            fn name(&self) -> &str {
                "get_document_info"
            }
            fn spec(&self) -> ToolSpec {
                ToolSpec {
                    name: "get_document_info".to_string(),
                    description: "".to_string(),
                    input_schema: json!({}),
                    supports_agent_context: false,
                }
            }
            async fn call(&self, _args: Value, _ctx: &AgentContext) -> Result<Value, AgentError> {
                Ok(json!({"success": false, "error": "document not found"}))
            }
        }
        registry.register(Arc::new(FailingOverview));
        let evidence = Arc::new(EvidenceStore::new());
        let pipeline = DeepResearchPipeline::new(Arc::new(registry), evidence, CoreConfig::default());

        let (w, mut rx) = writer();
        let outcome = pipeline.run(input(), &w).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.status, JobStatus::Failed);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, CoreEvent::Error { .. }));
    }

    /// **Scenario**: `should_continue` halts once the token budget is exhausted.
    #[test]
    fn should_continue_respects_budget() {
        let cost = ResearchCost {
            tokens_in: 900,
            tokens_out: 200,
            dollars_est: 0.0,
        };
        assert!(!should_continue(&cost, Some(1000)));
        assert!(should_continue(&cost, Some(2000)));
        assert!(should_continue(&cost, None));
    }
}
