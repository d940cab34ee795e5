//! Per-language word frequency tables.
//!
//! A table is the provider's word list in file order (already sorted by
//! descending frequency); a word's rank is its position plus one. Tables
//! are loaded at most once per process through [`FrequencyTables`].

use crate::error::{CodeSwitchError, Result};
use crate::singleflight::SingleFlight;
use crate::store::{keys, KvStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyEntry {
    pub word: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyTable {
    language: String,
    entries: Vec<FrequencyEntry>,
}

impl FrequencyTable {
    pub fn new(language: impl Into<String>, entries: Vec<FrequencyEntry>) -> Self {
        Self {
            language: language.into(),
            entries,
        }
    }

    /// Parse a `word count` list. Lines that are not exactly a word followed
    /// by an unsigned count are skipped.
    pub fn parse(language: &str, text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                match (fields.next(), fields.next(), fields.next()) {
                    (Some(word), Some(count), None) => {
                        count.parse().ok().map(|count| FrequencyEntry {
                            word: word.to_string(),
                            count,
                        })
                    }
                    _ => None,
                }
            })
            .collect();
        Self::new(language, entries)
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn entries(&self) -> &[FrequencyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `n` highest-ranked words (fewer if the table is shorter).
    pub fn top(&self, n: usize) -> impl Iterator<Item = &str> {
        self.entries.iter().take(n).map(|e| e.word.as_str())
    }

    /// Share (0..=1) of all counted occurrences covered by the top `n` words.
    pub fn occurrence_coverage(&self, n: usize) -> f64 {
        let total: u64 = self.entries.iter().map(|e| e.count).sum();
        if total == 0 {
            return 0.0;
        }
        let covered: u64 = self.entries.iter().take(n).map(|e| e.count).sum();
        covered as f64 / total as f64
    }
}

/// Source of raw word lists.
#[async_trait]
pub trait FrequencyProvider: Send + Sync {
    async fn fetch(&self, language: &str) -> Result<FrequencyTable>;
}

/// Downloads `word count` lists over HTTP. `{lang}` in the template is
/// replaced by the language code.
pub struct HttpFrequencyProvider {
    client: reqwest::Client,
    url_template: String,
}

impl HttpFrequencyProvider {
    pub fn new(client: reqwest::Client, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
        }
    }

    fn url_for(&self, language: &str) -> String {
        self.url_template.replace("{lang}", language)
    }
}

#[async_trait]
impl FrequencyProvider for HttpFrequencyProvider {
    async fn fetch(&self, language: &str) -> Result<FrequencyTable> {
        let url = self.url_for(language);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CodeSwitchError::Fetch(format!("word list request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CodeSwitchError::Fetch(format!(
                "word list provider returned status {} for {}",
                response.status(),
                url
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CodeSwitchError::Fetch(format!("failed to read word list: {}", e)))?;

        Ok(FrequencyTable::parse(language, &body))
    }
}

/// Reads `<dir>/<lang>_50k.txt` from disk.
pub struct FileFrequencyProvider {
    dir: PathBuf,
}

impl FileFrequencyProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl FrequencyProvider for FileFrequencyProvider {
    async fn fetch(&self, language: &str) -> Result<FrequencyTable> {
        let path = self.dir.join(format!("{}_50k.txt", language));
        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| {
                CodeSwitchError::Fetch(format!("failed to read {}: {}", path.display(), e))
            })?;
        Ok(FrequencyTable::parse(language, &body))
    }
}

/// Fixed tables, for tests and offline use.
#[derive(Default)]
pub struct StaticFrequencyProvider {
    tables: HashMap<String, FrequencyTable>,
}

impl StaticFrequencyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_words(mut self, language: &str, words: &[&str]) -> Self {
        let len = words.len() as u64;
        let entries = words
            .iter()
            .enumerate()
            .map(|(i, word)| FrequencyEntry {
                word: word.to_string(),
                count: (len - i as u64) * 100,
            })
            .collect();
        self.tables
            .insert(language.to_string(), FrequencyTable::new(language, entries));
        self
    }
}

#[async_trait]
impl FrequencyProvider for StaticFrequencyProvider {
    async fn fetch(&self, language: &str) -> Result<FrequencyTable> {
        self.tables
            .get(language)
            .cloned()
            .ok_or_else(|| CodeSwitchError::Fetch(format!("no word list for '{}'", language)))
    }
}

/// Process-wide owner of the loaded tables.
///
/// The first caller for a language performs the load while concurrent
/// callers wait on it and see the same outcome. Successful loads are kept
/// for the life of the process; failures are not.
pub struct FrequencyTables {
    provider: Arc<dyn FrequencyProvider>,
    store: Option<(Arc<dyn KvStore>, Duration)>,
    loaded: Arc<RwLock<HashMap<String, Arc<FrequencyTable>>>>,
    flights: SingleFlight<Arc<FrequencyTable>>,
}

impl FrequencyTables {
    pub fn new(provider: Arc<dyn FrequencyProvider>) -> Self {
        Self {
            provider,
            store: None,
            loaded: Arc::new(RwLock::new(HashMap::new())),
            flights: SingleFlight::new(),
        }
    }

    /// Share loaded word lists with other processes through the cache store.
    pub fn with_store(mut self, store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        self.store = Some((store, ttl));
        self
    }

    pub async fn load(&self, language: &str) -> Result<Arc<FrequencyTable>> {
        if let Some(table) = loaded_table(&self.loaded, language) {
            return Ok(table);
        }

        let provider = Arc::clone(&self.provider);
        let store = self.store.clone();
        let loaded = Arc::clone(&self.loaded);
        let lang = language.to_string();

        // The table is published before the flight resolves, so a caller
        // arriving after the flight is forgotten always finds it.
        self.flights
            .run(language, move || async move {
                if let Some(table) = loaded_table(&loaded, &lang) {
                    return Ok(table);
                }
                let table = load_table(provider, store, lang.clone()).await?;
                loaded
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(lang, Arc::clone(&table));
                Ok::<_, CodeSwitchError>(table)
            })
            .await
    }
}

fn loaded_table(
    loaded: &RwLock<HashMap<String, Arc<FrequencyTable>>>,
    language: &str,
) -> Option<Arc<FrequencyTable>> {
    loaded
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(language)
        .cloned()
}

async fn load_table(
    provider: Arc<dyn FrequencyProvider>,
    store: Option<(Arc<dyn KvStore>, Duration)>,
    language: String,
) -> Result<Arc<FrequencyTable>> {
    let load_error = |message: String| CodeSwitchError::FrequencyLoad {
        language: language.clone(),
        message,
    };

    if let Some((store, _)) = &store {
        match store.get(&keys::wordlist(&language)).await {
            Ok(Some(cached)) => match serde_json::from_str::<Vec<FrequencyEntry>>(&cached) {
                Ok(entries) if !entries.is_empty() => {
                    info!("Loaded {} '{}' words from cache", entries.len(), language);
                    return Ok(Arc::new(FrequencyTable::new(language.as_str(), entries)));
                }
                Ok(_) => warn!("Cached word list for '{}' is empty, reloading", language),
                Err(e) => warn!(
                    "Cached word list for '{}' is corrupt ({}), reloading",
                    language, e
                ),
            },
            Ok(None) => {}
            Err(e) => warn!("Word list cache unavailable for '{}': {}", language, e),
        }
    }

    info!("Loading frequency table for '{}'", language);
    let table = provider
        .fetch(&language)
        .await
        .map_err(|e| load_error(e.to_string()))?;

    if table.is_empty() {
        return Err(load_error(format!("no words found for language {}", language)));
    }

    if let Some((store, ttl)) = &store {
        match serde_json::to_string(table.entries()) {
            Ok(serialized) => {
                if let Err(e) = store.set(&keys::wordlist(&language), &serialized, *ttl).await {
                    warn!("Failed to cache word list for '{}': {}", language, e);
                }
            }
            Err(e) => warn!("Failed to serialize word list for '{}': {}", language, e),
        }
    }

    info!("Loaded {} '{}' words", table.len(), language);
    Ok(Arc::new(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    /// Counts fetches and optionally fails them.
    struct CountingProvider {
        inner: StaticFrequencyProvider,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl FrequencyProvider for CountingProvider {
        async fn fetch(&self, language: &str) -> Result<FrequencyTable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            if self.fail {
                return Err(CodeSwitchError::Fetch("provider unreachable".into()));
            }
            self.inner.fetch(language).await
        }
    }

    fn counting(fail: bool) -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            inner: StaticFrequencyProvider::new().with_words("en", &["the", "of", "and"]),
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    // ==================== Parsing Tests ====================

    #[test]
    fn test_parse_keeps_file_order() {
        let table = FrequencyTable::parse("en", "you 100\ni 90\nthe 80\n");
        let words: Vec<_> = table.top(10).collect();
        assert_eq!(words, vec!["you", "i", "the"]);
        assert_eq!(table.entries()[0].count, 100);
        assert_eq!(table.language(), "en");
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let text = "you 100\n\nbroken\ntoo many 1 2\nword notanumber\ni 90\n   \nthe\t80";
        let table = FrequencyTable::parse("en", text);
        let words: Vec<_> = table.top(10).collect();
        assert_eq!(words, vec!["you", "i", "the"]);
    }

    #[test]
    fn test_top_is_capped_by_length() {
        let table = FrequencyTable::parse("en", "a 3\nb 2\nc 1");
        assert_eq!(table.top(2).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(table.top(50).count(), 3);
    }

    #[test]
    fn test_occurrence_coverage() {
        let table = FrequencyTable::parse("en", "a 50\nb 30\nc 20");
        assert_eq!(table.occurrence_coverage(0), 0.0);
        assert!((table.occurrence_coverage(1) - 0.5).abs() < 1e-9);
        assert!((table.occurrence_coverage(3) - 1.0).abs() < 1e-9);
        assert_eq!(FrequencyTable::new("en", vec![]).occurrence_coverage(3), 0.0);
    }

    // ==================== Provider Tests ====================

    #[tokio::test]
    async fn test_http_provider_substitutes_language() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sv/sv_50k.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("och 100\natt 90\n"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = HttpFrequencyProvider::new(
            reqwest::Client::new(),
            format!("{}/{{lang}}/{{lang}}_50k.txt", mock_server.uri()),
        );
        let table = provider.fetch("sv").await.expect("Should fetch");
        assert_eq!(table.top(2).collect::<Vec<_>>(), vec!["och", "att"]);
    }

    #[tokio::test]
    async fn test_http_provider_non_200_is_fetch_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let provider = HttpFrequencyProvider::new(
            reqwest::Client::new(),
            format!("{}/{{lang}}.txt", mock_server.uri()),
        );
        let err = provider.fetch("en").await.unwrap_err();
        assert_eq!(err.code(), "fetch_error");
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_file_provider_reads_word_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("en_50k.txt"), "the 10\nof 5\n").expect("write");

        let provider = FileFrequencyProvider::new(dir.path());
        let table = provider.fetch("en").await.expect("Should read");
        assert_eq!(table.len(), 2);

        assert!(provider.fetch("sv").await.is_err());
    }

    // ==================== Loader Tests ====================

    #[tokio::test]
    async fn test_concurrent_first_loads_share_one_fetch() {
        let provider = counting(false);
        let tables = Arc::new(FrequencyTables::new(provider.clone()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let tables = Arc::clone(&tables);
            handles.push(tokio::spawn(async move { tables.load("en").await }));
        }
        for handle in handles {
            let table = handle.await.unwrap().expect("Should load");
            assert_eq!(table.len(), 3);
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        tables.load("en").await.expect("Should reuse");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_staggered_loads_across_threads_fetch_once() {
        let provider = counting(false);
        let tables = Arc::new(FrequencyTables::new(provider.clone()));

        let mut handles = Vec::new();
        for i in 0..16u64 {
            let tables = Arc::clone(&tables);
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(i * 3)).await;
                for _ in 0..20 {
                    tables.load("en").await.expect("Should load");
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_reported_to_all_and_not_cached() {
        let provider = counting(true);
        let tables = FrequencyTables::new(provider.clone());

        let (a, b) = tokio::join!(tables.load("en"), tables.load("en"));
        for result in [a, b] {
            let err = result.unwrap_err();
            assert_eq!(err.code(), "frequency_load_error");
            assert!(err.to_string().contains("provider unreachable"));
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        assert!(tables.load("en").await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_table_is_a_load_error() {
        let provider = Arc::new(StaticFrequencyProvider::new().with_words("en", &[]));
        let tables = FrequencyTables::new(provider);
        let err = tables.load("en").await.unwrap_err();
        assert!(err.to_string().contains("no words found"));
    }

    #[tokio::test]
    async fn test_word_list_shared_through_store() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ttl = Duration::from_secs(60);

        let first = counting(false);
        FrequencyTables::new(first.clone())
            .with_store(Arc::clone(&store), ttl)
            .load("en")
            .await
            .expect("Should load");
        assert!(store.get("wordlist:en").await.unwrap().is_some());

        // A second process finds the list in the store and never hits its provider.
        let second = counting(true);
        let table = FrequencyTables::new(second.clone())
            .with_store(store, ttl)
            .load("en")
            .await
            .expect("Should load from store");
        assert_eq!(table.top(3).collect::<Vec<_>>(), vec!["the", "of", "and"]);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }
}
