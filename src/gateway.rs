//! Gateway: request orchestration and the HTTP surface.
//!
//! A switch request resolves the article through the content cache,
//! extracts its paragraphs, dispatches one task per qualifying paragraph,
//! waits (bounded) for their results and splices the switched text back in.

use crate::cache::{Article, ContentCache};
use crate::collector::ResultCollector;
use crate::error::{CodeSwitchError, Result};
use crate::extract::ParsedArticle;
use crate::frequency::FrequencyTables;
use crate::language::Language;
use crate::metrics::{MetricsReport, PipelineMetrics};
use crate::queue::{ParagraphTask, TaskQueue};
use crate::security::verify_api_key;
use crate::selector::{compute_switch_count, select_candidates, SwitchSpec};
use crate::wikipedia::ArticleSource;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSwitchRequest {
    pub title: String,
    #[serde(rename = "sourceLang")]
    pub source_lang: String,
    #[serde(rename = "targetLang")]
    pub target_lang: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSwitchResponse {
    pub html: String,
    pub title: String,
    /// Target language code
    pub language: String,
}

/// Paragraph accounting for one request. Logged and added to metrics,
/// never returned to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwitchReport {
    pub paragraphs: usize,
    pub dispatched: usize,
    pub switched: usize,
    /// Dispatched paragraphs that kept their original text
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalculateRequest {
    pub language: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateResponse {
    pub language: String,
    pub percentage: f64,
    pub total_words: usize,
    /// Share of the table's corpus occurrences the chosen words account for
    pub occurrence_coverage: f64,
    pub words: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    pub code: String,
    pub name: String,
    pub native_name: String,
}

pub struct Gateway {
    cache: Arc<ContentCache>,
    source: Arc<dyn ArticleSource>,
    tables: Arc<FrequencyTables>,
    tasks: TaskQueue<ParagraphTask>,
    collector: Arc<ResultCollector>,
    supported_languages: Vec<Language>,
    min_paragraph_chars: usize,
    result_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl Gateway {
    pub fn new(
        cache: Arc<ContentCache>,
        source: Arc<dyn ArticleSource>,
        tables: Arc<FrequencyTables>,
        tasks: TaskQueue<ParagraphTask>,
        collector: Arc<ResultCollector>,
    ) -> Self {
        Self {
            cache,
            source,
            tables,
            tasks,
            collector,
            supported_languages: vec![Language::ENGLISH, Language::SWEDISH],
            min_paragraph_chars: 10,
            result_timeout: Duration::from_secs(120),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Restrict requests to these language codes.
    pub fn with_supported_languages(mut self, codes: &[String]) -> Result<Self> {
        self.supported_languages = codes
            .iter()
            .map(|code| Language::from_code(code))
            .collect::<Result<_>>()?;
        Ok(self)
    }

    pub fn with_min_paragraph_chars(mut self, min: usize) -> Self {
        self.min_paragraph_chars = min;
        self
    }

    /// Longest a request waits for its paragraphs' results.
    pub fn with_result_timeout(mut self, timeout: Duration) -> Self {
        self.result_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    fn supported(&self, code: &str) -> Result<Language> {
        let language = Language::from_code(code)?;
        if !self.supported_languages.contains(&language) {
            return Err(CodeSwitchError::Validation(format!(
                "language '{}' is not supported",
                language
            )));
        }
        Ok(language)
    }

    fn validate(&self, request: &CodeSwitchRequest) -> Result<SwitchSpec> {
        if request.title.trim().is_empty() {
            return Err(CodeSwitchError::Validation("title must not be empty".into()));
        }
        let source = self.supported(&request.source_lang)?;
        let target = self.supported(&request.target_lang)?;
        SwitchSpec::new(source, target, request.percentage)
    }

    pub async fn handle_switch_request(
        &self,
        request: &CodeSwitchRequest,
    ) -> Result<(CodeSwitchResponse, SwitchReport)> {
        let started = Instant::now();
        let spec = self.validate(request)?;
        let title = request.title.trim();
        info!(
            "Processing request for article '{}' ({} -> {}, {:.1}%)",
            title, spec.source, spec.target, spec.percentage
        );

        let article = self.cache.article(title, Arc::clone(&self.source)).await?;
        let parsed = ParsedArticle::parse(&article.html)?;
        let table = self.tables.load(spec.source.code()).await?;
        let switch_count = compute_switch_count(table.len(), spec.percentage);

        let mut report = SwitchReport {
            paragraphs: parsed.paragraphs().len(),
            ..SwitchReport::default()
        };
        let mut pending: Vec<(usize, String)> = Vec::new();

        for (index, text) in parsed.paragraphs().iter().enumerate() {
            let text = text.trim();
            if text.chars().count() < self.min_paragraph_chars {
                report.skipped += 1;
                continue;
            }

            let words = select_candidates(text, switch_count, &table);
            if words.is_empty() {
                report.skipped += 1;
                continue;
            }

            let task = ParagraphTask {
                id: uuid::Uuid::new_v4().to_string(),
                text: text.to_string(),
                words: words.into_iter().collect(),
                source_lang: spec.source.code().to_string(),
                target_lang: spec.target.code().to_string(),
            };
            self.tasks.publish(&task).await?;
            pending.push((index, task.id));
        }
        report.dispatched = pending.len();

        let ids: Vec<String> = pending.iter().map(|(_, id)| id.clone()).collect();
        let results = self.collector.await_results(&ids, self.result_timeout).await?;

        let mut replacements: Vec<Option<String>> = vec![None; report.paragraphs];
        for (index, id) in &pending {
            match results.get(id).and_then(|r| r.text()) {
                Some(text) => {
                    replacements[*index] = Some(text.to_string());
                    report.switched += 1;
                }
                None => report.failed += 1,
            }
        }

        let html = parsed.render(&replacements)?;

        self.metrics.record_paragraphs(
            report.dispatched,
            report.switched,
            report.failed,
            report.skipped,
        );
        info!(
            "Request completed in {:.2}s (paragraphs: {}, dispatched: {}, switched: {}, \
             failed: {}, skipped: {})",
            started.elapsed().as_secs_f64(),
            report.paragraphs,
            report.dispatched,
            report.switched,
            report.failed,
            report.skipped
        );

        Ok((
            CodeSwitchResponse {
                html,
                title: article.title,
                language: spec.target.code().to_string(),
            },
            report,
        ))
    }

    pub async fn article(&self, title: &str) -> Result<Article> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CodeSwitchError::Validation("title must not be empty".into()));
        }
        self.cache.article(title, Arc::clone(&self.source)).await
    }

    /// The words a switch at `percentage` would target for `language`.
    pub async fn calculate(&self, request: &CalculateRequest) -> Result<CalculateResponse> {
        let language = self.supported(&request.language)?;
        if !request.percentage.is_finite() || !(0.0..=100.0).contains(&request.percentage) {
            return Err(CodeSwitchError::Validation(format!(
                "percentage must be between 0 and 100, got {}",
                request.percentage
            )));
        }

        let table = self.tables.load(language.code()).await?;
        let count = compute_switch_count(table.len(), request.percentage);
        Ok(CalculateResponse {
            language: language.code().to_string(),
            percentage: request.percentage,
            total_words: table.len(),
            occurrence_coverage: table.occurrence_coverage(count),
            words: table.top(count).map(str::to_string).collect(),
        })
    }

    pub fn languages(&self) -> Vec<LanguageInfo> {
        self.supported_languages
            .iter()
            .map(|language| LanguageInfo {
                code: language.code().to_string(),
                name: language.name().to_string(),
                native_name: language.native_name().to_string(),
            })
            .collect()
    }
}

// ==================== HTTP surface ====================

pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// When set, protected routes require a matching `x-api-key` header.
    pub api_key: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/codeswitch", post(codeswitch))
        .route("/article", get(article))
        .route("/calculate", post(calculate))
        .route("/languages", get(languages))
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let presented = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    verify_api_key(state.api_key.as_deref(), presented)
}

async fn codeswitch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<CodeSwitchRequest>, JsonRejection>,
) -> Result<Json<CodeSwitchResponse>> {
    authorize(&state, &headers)?;
    let metrics = state.gateway.metrics();
    metrics.record_request();

    let result = match payload {
        Ok(Json(request)) => state.gateway.handle_switch_request(&request).await,
        Err(rejection) => Err(CodeSwitchError::Validation(rejection.body_text())),
    };

    match result {
        Ok((response, _)) => Ok(Json(response)),
        Err(e) => {
            metrics.record_request_failure();
            error!("Code-switch request failed: {}", e);
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArticleQuery {
    title: String,
}

async fn article(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: std::result::Result<Query<ArticleQuery>, QueryRejection>,
) -> Result<Json<Article>> {
    authorize(&state, &headers)?;
    let Query(query) = query.map_err(|e| CodeSwitchError::Validation(e.body_text()))?;
    Ok(Json(state.gateway.article(&query.title).await?))
}

async fn calculate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<CalculateRequest>, JsonRejection>,
) -> Result<Json<CalculateResponse>> {
    authorize(&state, &headers)?;
    let Json(request) = payload.map_err(|e| CodeSwitchError::Validation(e.body_text()))?;
    Ok(Json(state.gateway.calculate(&request).await?))
}

async fn languages(State(state): State<Arc<AppState>>) -> Json<Vec<LanguageInfo>> {
    Json(state.gateway.languages())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MetricsReport>> {
    authorize(&state, &headers)?;
    Ok(Json(state.gateway.metrics().report()))
}
