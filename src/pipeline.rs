//! The query -> search -> summarize pipeline.
//!
//! Three stages over injected collaborators: generate search queries for a
//! theme, collect page text for a query, synthesize the accumulated text into
//! one report. Stages are meant to run one at a time; the store's append is
//! read-modify-write and the caller upholds sequential invocation.

use crate::audit::{AuditSink, LogEntry};
use crate::error::{ResearchError, Result};
use crate::fetch::PageFetcher;
use crate::llm::ChatApi;
use crate::search::SearchApi;
use crate::store::{PageResult, Store};
use scraper::{Html, Selector};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub const QUERY_TEMPERATURE: f32 = 0.7;
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
pub const SUMMARY_TEMPERATURE: f32 = 0.3;
pub const SUMMARY_TIMEOUT: Duration = Duration::from_secs(60);

/// Extracted page text is stored at most this long, in characters.
pub const MAX_PAGE_TEXT_CHARS: usize = 100_000;

/// Elements stripped before extracting page text.
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "footer", "nav"];

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Token budget per summarization call; the chunk threshold is derived
    /// from it.
    pub token_budget: usize,
    /// Rough characters-per-token estimate carried over from the original
    /// tool. No stated rationale, so it stays tunable.
    pub chars_per_token: f64,
    /// Politeness delay after each fetched page.
    pub fetch_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            token_budget: 100_000,
            chars_per_token: 2.5,
            fetch_delay: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    /// Maximum combined-text length, in characters, summarized in one call.
    pub fn chunk_size(&self) -> usize {
        (self.token_budget as f64 * self.chars_per_token) as usize
    }
}

pub struct Researcher {
    search: Arc<dyn SearchApi>,
    fetcher: Arc<dyn PageFetcher>,
    chat: Arc<dyn ChatApi>,
    store: Store,
    audit: Arc<dyn AuditSink>,
    config: PipelineConfig,
}

impl Researcher {
    pub fn new(
        search: Arc<dyn SearchApi>,
        fetcher: Arc<dyn PageFetcher>,
        chat: Arc<dyn ChatApi>,
        store: Store,
        audit: Arc<dyn AuditSink>,
        config: PipelineConfig,
    ) -> Self {
        Self { search, fetcher, chat, store, audit, config }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Ask the model for 10 search queries covering the theme. The persisted
    /// query list is only overwritten on success.
    pub async fn generate_queries(&self, theme: &str) -> Result<Vec<String>> {
        let prompt = format!(
            "Compile 10 prompts for comprehensive web research of this theme: {theme}. \
             Answer ONLY with the queries."
        );

        let completion = self
            .chat
            .complete(&prompt, QUERY_TEMPERATURE, QUERY_TIMEOUT)
            .await
            .map_err(|e| self.fail("generate_queries", e))?;

        let queries: Vec<String> = completion
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        self.store
            .save_queries(&queries)
            .map_err(|e| self.fail("generate_queries", e))?;

        info!(count = queries.len(), theme, "generated queries");
        self.note(
            "info",
            "generate_queries",
            format!("generated {} queries", queries.len()),
            json!({ "theme": theme }),
        );
        Ok(queries)
    }

    /// Run one query against the search API, fetch and clean each result
    /// page, and append the batch to the results store. A bad page is logged
    /// and skipped; a failed search call aborts with nothing persisted.
    pub async fn collect(&self, query: &str) -> Result<()> {
        let items = self
            .search
            .search(query)
            .await
            .map_err(|e| self.fail("collect", e))?;

        if items.is_empty() {
            warn!(query, "search returned no result items");
            self.note(
                "warn",
                "collect",
                "search returned no result items",
                json!({ "query": query }),
            );
            return Ok(());
        }

        let mut batch = Vec::new();
        for item in &items {
            let html = match self.fetcher.fetch(&item.link).await {
                Ok(html) => html,
                Err(e) => {
                    warn!(url = %item.link, error = %e, "skipping page");
                    self.note(
                        "warn",
                        "collect",
                        format!("skipping page: {e}"),
                        json!({ "url": item.link, "kind": e.kind() }),
                    );
                    continue;
                }
            };

            let page = extract_page(&html);
            let title = if item.title.is_empty() {
                page.title.unwrap_or_default()
            } else {
                item.title.clone()
            };

            batch.push(PageResult {
                url: item.link.clone(),
                title,
                text: truncate_chars(&page.text, MAX_PAGE_TEXT_CHARS),
            });

            // Be polite between page fetches.
            sleep(self.config.fetch_delay).await;
        }

        let appended = batch.len();
        self.store
            .append_results(batch)
            .map_err(|e| self.fail("collect", e))?;

        info!(query, appended, of = items.len(), "collected results");
        self.note(
            "info",
            "collect",
            format!("appended {appended} of {} results", items.len()),
            json!({ "query": query }),
        );
        Ok(())
    }

    /// Summarize everything collected so far into one report, chunking the
    /// combined text when it exceeds the configured threshold. Overwrites the
    /// report file on success.
    pub async fn synthesize(&self) -> Result<String> {
        let results = self
            .store
            .load_results()
            .map_err(|e| self.fail("synthesize", e))?;

        if results.is_empty() {
            let err = ResearchError::Precondition(
                "No results available for reporting. Run some searches first.".into(),
            );
            self.note("warn", "synthesize", err.to_string(), json!(null));
            return Err(err);
        }

        let combined = results
            .iter()
            .map(|r| format!("Source: {}\n{}", r.url, r.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let chunk_size = self.config.chunk_size();
        let report = if combined.chars().count() <= chunk_size {
            self.summarize(&combined)
                .await
                .map_err(|e| self.fail("synthesize", e))?
        } else {
            let chunks = split_chunks(&combined, chunk_size);
            info!(chunks = chunks.len(), chunk_size, "combined text exceeds chunk threshold");

            let mut summaries = Vec::with_capacity(chunks.len());
            for (i, chunk) in chunks.iter().enumerate() {
                info!(chunk = i + 1, total = chunks.len(), "summarizing chunk");
                let summary = self
                    .summarize(chunk)
                    .await
                    .map_err(|e| self.fail("synthesize", e))?;
                summaries.push(summary);
            }

            // One extra level only: the joined summaries go through a single
            // final call and are never re-chunked.
            let combined_summary = summaries.join("\n\n");
            self.summarize(&combined_summary)
                .await
                .map_err(|e| self.fail("synthesize", e))?
        };

        self.store
            .write_report(&report)
            .map_err(|e| self.fail("synthesize", e))?;

        info!(chars = report.len(), "report written");
        self.note(
            "info",
            "synthesize",
            "report written",
            json!({ "chars": report.len(), "sources": results.len() }),
        );
        Ok(report)
    }

    async fn summarize(&self, text: &str) -> Result<String> {
        let prompt = format!(
            "You are a web researcher AI. Analyze the following text and create a detailed \
             report capturing all important themes, patterns, and data points. Include \
             specific facts, statistics, and insights. Organize findings logically:\n\n{text}"
        );
        self.chat
            .complete(&prompt, SUMMARY_TEMPERATURE, SUMMARY_TIMEOUT)
            .await
    }

    fn note(&self, level: &str, function: &str, message: impl Into<String>, details: serde_json::Value) {
        self.audit.record(LogEntry::new(level, function, message, details));
    }

    fn fail(&self, function: &str, err: ResearchError) -> ResearchError {
        error!(function, error = %err, "stage failure");
        self.note("error", function, err.to_string(), json!({ "kind": err.kind() }));
        err
    }
}

pub struct ExtractedPage {
    pub title: Option<String>,
    pub text: String,
}

/// Parse a page, drop non-content subtrees, and collapse all whitespace to
/// single spaces.
pub fn extract_page(html: &str) -> ExtractedPage {
    let doc = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let mut raw = String::new();
    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            collect_text(&body, &mut raw);
        }
    }
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    ExtractedPage { title, text }
}

fn collect_text(node: &scraper::ElementRef<'_>, buf: &mut String) {
    use scraper::Node;

    for child in node.children() {
        match child.value() {
            Node::Text(text) => {
                buf.push_str(text);
                buf.push(' ');
            }
            Node::Element(el) => {
                if SKIP_TAGS.contains(&el.name()) {
                    continue;
                }
                if let Some(child_ref) = scraper::ElementRef::wrap(child) {
                    collect_text(&child_ref, buf);
                }
            }
            _ => {}
        }
    }
}

/// Consecutive fixed-size character slices; the last one may be shorter.
pub fn split_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    if chunk_size == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == chunk_size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Truncate to at most `max` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAudit;
    use crate::search::SearchItem;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct StubSearch {
        items: Vec<SearchItem>,
        fail: bool,
    }

    #[async_trait]
    impl SearchApi for StubSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchItem>> {
            if self.fail {
                return Err(ResearchError::HttpStatus { status: 403, body: "denied".into() });
            }
            Ok(self.items.clone())
        }
    }

    struct StubFetcher {
        /// Body returned per fetch; urls in `unreachable` error instead.
        body: String,
        unreachable: HashSet<String>,
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            if self.unreachable.contains(url) {
                return Err(ResearchError::Transport("connection refused".into()));
            }
            Ok(self.body.clone())
        }
    }

    struct StubChat {
        /// Responses handed out in order; panics in-test if exhausted.
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    impl StubChat {
        fn with_responses(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self { responses: Mutex::new(Vec::new()), prompts: Mutex::new(Vec::new()), fail: true }
        }
    }

    #[async_trait]
    impl ChatApi for StubChat {
        async fn complete(&self, prompt: &str, _temperature: f32, _timeout: Duration) -> Result<String> {
            if self.fail {
                return Err(ResearchError::Transport("unreachable endpoint".into()));
            }
            self.prompts.lock().expect("prompts").push(prompt.to_string());
            Ok(self.responses.lock().expect("responses").pop().expect("stub response"))
        }
    }

    struct Fixture {
        researcher: Researcher,
        audit: Arc<MemoryAudit>,
        _dir: tempfile::TempDir,
    }

    fn fixture(search: StubSearch, fetcher: StubFetcher, chat: StubChat, config: PipelineConfig) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::new(dir.path());
        store.init().expect("init");
        let audit = Arc::new(MemoryAudit::new());
        let researcher = Researcher::new(
            Arc::new(search),
            Arc::new(fetcher),
            Arc::new(chat),
            store,
            audit.clone(),
            config,
        );
        Fixture { researcher, audit, _dir: dir }
    }

    fn no_search() -> StubSearch {
        StubSearch { items: Vec::new(), fail: false }
    }

    fn no_fetch() -> StubFetcher {
        StubFetcher { body: String::new(), unreachable: HashSet::new() }
    }

    fn quick_config() -> PipelineConfig {
        PipelineConfig { fetch_delay: Duration::ZERO, ..PipelineConfig::default() }
    }

    fn items(n: usize) -> Vec<SearchItem> {
        (0..n)
            .map(|i| SearchItem {
                link: format!("https://example.com/{i}"),
                title: format!("Result {i}"),
            })
            .collect()
    }

    // ---- query generation ----

    #[tokio::test]
    async fn completion_lines_become_trimmed_queries_in_order() {
        let chat = StubChat::with_responses(vec![
            "  first query  \n\nsecond query\n   \nthird query\n",
        ]);
        let f = fixture(no_search(), no_fetch(), chat, quick_config());

        let queries = f.researcher.generate_queries("rust adoption").await.expect("generate");

        assert_eq!(queries, vec!["first query", "second query", "third query"]);
        assert_eq!(f.researcher.store().load_queries().expect("load"), queries);
    }

    #[tokio::test]
    async fn failed_generation_leaves_saved_queries_untouched() {
        let f = fixture(no_search(), no_fetch(), StubChat::failing(), quick_config());
        f.researcher.store().save_queries(&["previous".into()]).expect("seed");

        let err = f.researcher.generate_queries("anything").await.expect_err("should fail");

        assert_eq!(err.kind(), "transport");
        assert_eq!(f.researcher.store().load_queries().expect("load"), vec!["previous".to_string()]);
        assert_eq!(f.audit.count_level("error"), 1);
    }

    // ---- collection ----

    #[tokio::test]
    async fn zero_search_items_is_a_logged_noop() {
        let chat = StubChat::with_responses(vec![]);
        let f = fixture(no_search(), no_fetch(), chat, quick_config());
        f.researcher
            .store()
            .append_results(vec![PageResult {
                url: "https://old".into(),
                title: "old".into(),
                text: "old".into(),
            }])
            .expect("seed");

        f.researcher.collect("empty query").await.expect("collect");

        assert_eq!(f.researcher.store().load_results().expect("load").len(), 1);
        assert_eq!(f.audit.count_level("warn"), 1);
    }

    #[tokio::test]
    async fn one_unreachable_page_among_five_is_skipped_with_a_warning() {
        let search = StubSearch { items: items(5), fail: false };
        let fetcher = StubFetcher {
            body: "<html><head><title>T</title></head><body><p>some page text</p></body></html>"
                .into(),
            unreachable: HashSet::from(["https://example.com/2".to_string()]),
        };
        let f = fixture(search, fetcher, StubChat::with_responses(vec![]), quick_config());

        f.researcher.collect("q").await.expect("collect");

        let results = f.researcher.store().load_results().expect("load");
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.url != "https://example.com/2"));
        assert_eq!(results[0].url, "https://example.com/0");
        assert_eq!(f.audit.count_level("warn"), 1);
    }

    #[tokio::test]
    async fn search_failure_aborts_with_nothing_persisted() {
        let search = StubSearch { items: Vec::new(), fail: true };
        let f = fixture(search, no_fetch(), StubChat::with_responses(vec![]), quick_config());

        let err = f.researcher.collect("q").await.expect_err("should fail");

        assert_eq!(err.kind(), "http-status");
        assert!(f.researcher.store().load_results().expect("load").is_empty());
    }

    #[tokio::test]
    async fn missing_metadata_title_falls_back_to_html_title() {
        let search = StubSearch {
            items: vec![SearchItem { link: "https://example.com/a".into(), title: String::new() }],
            fail: false,
        };
        let fetcher = StubFetcher {
            body: "<html><head><title> Doc Title </title></head><body>words here</body></html>"
                .into(),
            unreachable: HashSet::new(),
        };
        let f = fixture(search, fetcher, StubChat::with_responses(vec![]), quick_config());

        f.researcher.collect("q").await.expect("collect");

        let results = f.researcher.store().load_results().expect("load");
        assert_eq!(results[0].title, "Doc Title");
        assert_eq!(results[0].text, "words here");
    }

    #[tokio::test]
    async fn page_text_is_truncated_to_the_maximum_length() {
        let long_word = "a".repeat(MAX_PAGE_TEXT_CHARS + 50_000);
        let search = StubSearch { items: items(1), fail: false };
        let fetcher = StubFetcher {
            body: format!("<html><body><p>{long_word}</p></body></html>"),
            unreachable: HashSet::new(),
        };
        let f = fixture(search, fetcher, StubChat::with_responses(vec![]), quick_config());

        f.researcher.collect("q").await.expect("collect");

        let results = f.researcher.store().load_results().expect("load");
        assert_eq!(results[0].text.chars().count(), MAX_PAGE_TEXT_CHARS);
    }

    #[tokio::test]
    async fn repeated_collections_accumulate_strictly() {
        let body = "<html><body>page</body></html>".to_string();
        let f1 = fixture(
            StubSearch { items: items(2), fail: false },
            StubFetcher { body: body.clone(), unreachable: HashSet::new() },
            StubChat::with_responses(vec![]),
            quick_config(),
        );

        f1.researcher.collect("first").await.expect("collect a");

        // Second call sees three results; store ends at 2 + 3.
        let store_dir = f1._dir.path().to_path_buf();
        let store = Store::new(&store_dir);
        let researcher = Researcher::new(
            Arc::new(StubSearch { items: items(3), fail: false }),
            Arc::new(StubFetcher { body, unreachable: HashSet::new() }),
            Arc::new(StubChat::with_responses(vec![])),
            store,
            f1.audit.clone(),
            quick_config(),
        );
        researcher.collect("second").await.expect("collect b");

        assert_eq!(researcher.store().load_results().expect("load").len(), 5);
    }

    // ---- synthesis ----

    fn seed_results(store: &Store, texts: &[&str]) {
        let batch = texts
            .iter()
            .enumerate()
            .map(|(i, text)| PageResult {
                url: format!("https://example.com/{i}"),
                title: format!("Page {i}"),
                text: (*text).to_string(),
            })
            .collect();
        store.append_results(batch).expect("seed");
    }

    #[tokio::test]
    async fn empty_store_is_a_precondition_and_writes_no_report() {
        let f = fixture(no_search(), no_fetch(), StubChat::with_responses(vec![]), quick_config());

        let err = f.researcher.synthesize().await.expect_err("should fail");

        assert_eq!(err.kind(), "precondition");
        assert!(f.researcher.store().load_report().expect("report").is_empty());
    }

    #[tokio::test]
    async fn small_input_is_summarized_in_one_call() {
        let chat = StubChat::with_responses(vec!["THE REPORT"]);
        let f = fixture(no_search(), no_fetch(), chat, quick_config());
        seed_results(f.researcher.store(), &["alpha text", "beta text"]);

        let report = f.researcher.synthesize().await.expect("synthesize");

        assert_eq!(report, "THE REPORT");
        assert_eq!(f.researcher.store().load_report().expect("report"), "THE REPORT");
    }

    #[tokio::test]
    async fn combined_text_concatenates_url_headers_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::new(dir.path());
        store.init().expect("init");
        seed_results(&store, &["first body", "second body"]);

        let chat = Arc::new(StubChat::with_responses(vec!["ok"]));
        let researcher = Researcher::new(
            Arc::new(no_search()),
            Arc::new(no_fetch()),
            chat.clone(),
            store,
            Arc::new(MemoryAudit::new()),
            quick_config(),
        );

        researcher.synthesize().await.expect("synthesize");

        let prompts = chat.prompts.lock().expect("prompts");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Source: https://example.com/0\nfirst body"));
        assert!(prompts[0].contains("\n\nSource: https://example.com/1\nsecond body"));
    }

    #[tokio::test]
    async fn oversized_input_is_chunked_then_summarized_once_more() {
        // chunk_size = 4 * 2.5 = 10 characters. The combined text is
        // "Source: https://example.com/0\n" (30 chars) + 16 chars of body,
        // so 46 chars -> 5 chunks plus one final pass.
        let config = PipelineConfig {
            token_budget: 4,
            chars_per_token: 2.5,
            fetch_delay: Duration::ZERO,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::new(dir.path());
        store.init().expect("init");
        seed_results(&store, &["0123456789ABCDEF"]);

        let chat = Arc::new(StubChat::with_responses(vec![
            "S1", "S2", "S3", "S4", "S5", "FINAL",
        ]));
        let researcher = Researcher::new(
            Arc::new(no_search()),
            Arc::new(no_fetch()),
            chat.clone(),
            store,
            Arc::new(MemoryAudit::new()),
            config,
        );

        let report = researcher.synthesize().await.expect("synthesize");

        assert_eq!(report, "FINAL");
        assert_eq!(researcher.store().load_report().expect("report"), "FINAL");

        let prompts = chat.prompts.lock().expect("prompts");
        assert_eq!(prompts.len(), 6);
        // The final call receives the joined chunk summaries, unchunked.
        assert!(prompts[5].contains("S1\n\nS2\n\nS3\n\nS4\n\nS5"));
    }

    #[tokio::test]
    async fn chunk_summary_failure_propagates_without_writing_a_report() {
        let config = PipelineConfig {
            token_budget: 4,
            chars_per_token: 2.5,
            fetch_delay: Duration::ZERO,
        };
        let f = fixture(no_search(), no_fetch(), StubChat::failing(), config);
        seed_results(f.researcher.store(), &["0123456789ABCDEF"]);

        let err = f.researcher.synthesize().await.expect_err("should fail");

        assert_eq!(err.kind(), "transport");
        assert!(f.researcher.store().load_report().expect("report").is_empty());
    }

    // ---- helpers ----

    #[test]
    fn chunk_count_is_ceil_and_reconstruction_is_lossless() {
        let text: String = std::iter::repeat("abcdé ").take(1000).collect();
        let len = text.chars().count();
        let chunk_size = 37;

        let chunks = split_chunks(&text, chunk_size);

        assert_eq!(chunks.len(), len.div_ceil(chunk_size));
        assert!(chunks[..chunks.len() - 1]
            .iter()
            .all(|c| c.chars().count() == chunk_size));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn text_at_the_threshold_is_a_single_chunk() {
        let text = "x".repeat(25);
        assert_eq!(split_chunks(&text, 25).len(), 1);
        assert_eq!(split_chunks(&text, 24).len(), 2);
    }

    #[test]
    fn truncation_is_exact_and_char_safe() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars(&"é".repeat(5), 3), "ééé");
    }

    #[test]
    fn extraction_drops_non_content_markup_and_collapses_whitespace() {
        let html = r#"<html>
            <head><title>A Title</title><style>body { color: red }</style></head>
            <body>
                <nav>menu items</nav>
                <script>var x = 1;</script>
                <p>real   content
                   spread over lines</p>
                <noscript>enable js</noscript>
                <div><footer>copyright</footer><span>and more</span></div>
            </body>
        </html>"#;

        let page = extract_page(html);

        assert_eq!(page.title.as_deref(), Some("A Title"));
        assert_eq!(page.text, "real content spread over lines and more");
    }

    #[test]
    fn extraction_without_a_body_or_title_is_empty() {
        let page = extract_page("");
        assert_eq!(page.title, None);
        assert_eq!(page.text, "");
    }
}
