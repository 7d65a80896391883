//! Crawl scheduler
//!
//! A [`CrawlSession`] owns all state of one run: the work queue, the visited
//! and tested-surface sets, findings and live counters. Pages are processed by
//! a semaphore-bounded pool of tokio tasks; each task fetches one page,
//! discovers its attack surfaces, probes every untested parameter and queues
//! the page's links. [`Spider`] is the start/stop controller a host talks to.

pub mod browser;
pub mod extractor;
pub mod stats;

use crate::error::{Result, SpiderError};
use crate::events::{LogLevel, Reporter};
use crate::http::retry::{retry_with_backoff, RetryPolicy};
use crate::http::HttpClient;
use crate::models::{
    AttackSurface, CapturedResponse, CrawlQueueItem, Finding, LiveStats, RunStatus, ScanResult,
    SpiderOptions, SurfaceKey, SurfaceSource,
};
use crate::scanner::headers::HeaderAudit;
use crate::scanner::payloads::PayloadStore;
use crate::scanner::{prioritize_params, test_parameter, Prober, ScanContext};
use async_trait::async_trait;
use stats::CrawlStats;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;
use url::{Origin, Url};

/// Where crawled pages come from
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<CapturedResponse>;
}

#[async_trait]
impl PageSource for HttpClient {
    async fn fetch(&self, url: &str) -> Result<CapturedResponse> {
        self.get(url).await
    }
}

/// Shared "stop requested" flag, polled at the top of every loop
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State and workers of one crawl run
pub struct CrawlSession {
    scan_id: String,
    options: SpiderOptions,
    origin: Origin,
    client: HttpClient,
    ctx: ScanContext,
    reporter: Arc<dyn Reporter>,
    stats: Arc<CrawlStats>,
    stop: StopSignal,
    status: std::sync::Mutex<RunStatus>,
    queue: Mutex<VecDeque<CrawlQueueItem>>,
    /// Every URL ever queued, for queue-side dedup
    queued: Mutex<HashSet<String>>,
    visited: Mutex<HashSet<String>>,
    tested: Mutex<HashSet<SurfaceKey>>,
    findings: Mutex<Vec<Finding>>,
    header_audit: HeaderAudit,
    /// Orders progress events against the stop request
    progress_gate: std::sync::Mutex<()>,
}

impl CrawlSession {
    pub fn new(options: SpiderOptions, reporter: Arc<dyn Reporter>) -> Result<Arc<Self>> {
        let seed = Url::parse(&options.url)?;
        if !matches!(seed.scheme(), "http" | "https") {
            return Err(SpiderError::Protocol(format!(
                "seed URL must be http or https: {}",
                options.url
            )));
        }
        if options.render && cfg!(not(feature = "browser")) {
            return Err(SpiderError::ConfigError(
                "page rendering requires the 'browser' feature".to_string(),
            ));
        }

        let client = HttpClient::from_options(&options)?;
        let payloads = match PayloadStore::load(&options.payload_set) {
            Ok(store) => store,
            Err(e) => {
                reporter.log(
                    LogLevel::Warn,
                    &format!("{e}; falling back to built-in payloads"),
                );
                PayloadStore::builtin()
            }
        };

        let stats = Arc::new(CrawlStats::new());
        let stop = StopSignal::new();
        let prober = Prober::new(client.clone(), Arc::clone(&stats), stop.clone(), Arc::clone(&reporter));
        let ctx = ScanContext::new(prober, payloads, options.clone());

        Ok(Arc::new(Self {
            scan_id: uuid::Uuid::new_v4().to_string(),
            origin: seed.origin(),
            options,
            client,
            ctx,
            reporter,
            stats,
            stop,
            status: std::sync::Mutex::new(RunStatus::Idle),
            queue: Mutex::new(VecDeque::new()),
            queued: Mutex::new(HashSet::new()),
            visited: Mutex::new(HashSet::new()),
            tested: Mutex::new(HashSet::new()),
            findings: Mutex::new(Vec::new()),
            header_audit: HeaderAudit::new(),
            progress_gate: std::sync::Mutex::new(()),
        }))
    }

    /// Requests a stop. In-flight requests finish; nothing new is scheduled.
    pub fn stop(&self) {
        let _gate = self.progress_gate.lock().unwrap_or_else(|p| p.into_inner());
        if !self.stop.is_stopped() {
            self.stop.stop();
            self.log(LogLevel::Warn, "Stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn status(&self) -> RunStatus {
        match self.status.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_status(&self, status: RunStatus) {
        match self.status.lock() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    pub async fn visited_count(&self) -> usize {
        self.visited.lock().await.len()
    }

    pub async fn findings(&self) -> Vec<Finding> {
        self.findings.lock().await.clone()
    }

    pub fn stats(&self) -> LiveStats {
        self.stats.snapshot()
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.reporter.log(level, message);
    }

    /// Drives the crawl until the queue drains or a stop is requested
    pub async fn run(self: Arc<Self>) -> ScanResult {
        let mut result = ScanResult::new(self.options.url.clone());
        result.scan_id = self.scan_id.clone();

        self.reporter.clear();
        self.set_status(RunStatus::Running);
        self.reporter.status(RunStatus::Running);
        self.log(
            LogLevel::Info,
            &format!(
                "Spider started on {} (depth {}, {} threads)",
                self.options.url, self.options.depth, self.options.threads
            ),
        );

        match self.page_source().await {
            Ok(pages) => {
                self.enqueue(&self.options.url, 0).await;
                Arc::clone(&self).dispatch(pages).await;
            }
            Err(e) => self.log(LogLevel::Error, &format!("Page source unavailable: {e}")),
        }

        let status = if self.stop.is_stopped() {
            RunStatus::Stopped
        } else {
            RunStatus::Idle
        };

        result.findings = self.findings().await;
        result.stats = self.stats.snapshot();
        result.total_requests = self.client.request_count();
        result.urls_visited = self.visited_count().await;
        result.finish(status);

        self.reporter.stats(&result.stats);
        self.log(
            LogLevel::Info,
            &format!(
                "Spider finished. Crawled: {}. Found: {}. Requests: {}",
                result.urls_visited,
                result.findings.len(),
                result.total_requests
            ),
        );
        self.set_status(status);
        self.reporter.status(status);
        result
    }

    #[cfg(feature = "browser")]
    async fn page_source(&self) -> Result<Arc<dyn PageSource>> {
        if !self.options.render {
            return Ok(Arc::new(self.client.clone()));
        }
        let source =
            browser::BrowserPageSource::launch(self.client.clone(), self.options.render_wait_ms).await?;
        Ok(Arc::new(source))
    }

    #[cfg(not(feature = "browser"))]
    async fn page_source(&self) -> Result<Arc<dyn PageSource>> {
        Ok(Arc::new(self.client.clone()))
    }

    /// Hands queue items to a bounded pool of workers
    async fn dispatch(self: Arc<Self>, pages: Arc<dyn PageSource>) {
        let semaphore = Arc::new(Semaphore::new(self.options.threads.max(1)));
        let mut workers = JoinSet::new();
        let throttle = Duration::from_millis(self.options.delay_ms);

        loop {
            if self.stop.is_stopped() {
                break;
            }
            while let Some(done) = workers.try_join_next() {
                self.reap(done);
            }

            let next = self.queue.lock().await.pop_front();
            let Some(item) = next else {
                // Queue is empty; wait for a running worker to add more or finish
                match workers.join_next().await {
                    Some(done) => {
                        self.reap(done);
                        continue;
                    }
                    None => break,
                }
            };

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if self.stop.is_stopped() {
                break;
            }

            let session = Arc::clone(&self);
            let pages = Arc::clone(&pages);
            workers.spawn(async move {
                let _permit = permit;
                session.process(item, pages.as_ref()).await;
            });

            if !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }
        }

        while let Some(done) = workers.join_next().await {
            self.reap(done);
        }
    }

    fn reap(&self, done: std::result::Result<(), tokio::task::JoinError>) {
        if let Err(e) = done {
            self.log(LogLevel::Error, &format!("Crawl worker failed: {e}"));
        }
    }

    /// Fetches one page, tests its surfaces and queues its links
    async fn process(&self, item: CrawlQueueItem, pages: &dyn PageSource) {
        {
            let mut visited = self.visited.lock().await;
            if self.stop.is_stopped() || !visited.insert(normalize_url(&item.url)) {
                return;
            }
        }

        let page = match retry_with_backoff(
            &RetryPolicy::navigation(),
            || pages.fetch(&item.url),
            |e: &SpiderError| e.is_transient(),
        )
        .await
        {
            Ok(page) => page,
            Err(e) => {
                self.log(LogLevel::Error, &format!("Fetch {} failed: {e}", item.url));
                self.report_progress().await;
                return;
            }
        };
        self.stats.record_page(page.elapsed_ms);
        self.log(
            LogLevel::Info,
            &format!(
                "Fetched ({}) {} [{}ms] depth {}",
                page.status, item.url, page.elapsed_ms, item.depth
            ),
        );

        if self.options.header_checks && !self.options.render {
            for finding in self.header_audit.check(&page) {
                self.report(finding).await;
            }
        }

        if !page.is_html() {
            debug!("Skipping non-HTML page {}", page.url);
            self.report_progress().await;
            return;
        }
        let page_url = match Url::parse(&page.url).or_else(|_| Url::parse(&item.url)) {
            Ok(url) => url,
            Err(e) => {
                self.log(LogLevel::Error, &format!("Unparseable page URL {}: {e}", page.url));
                self.report_progress().await;
                return;
            }
        };

        let surfaces: Vec<AttackSurface> = extractor::discover_surfaces(&page.body, &page_url)
            .into_iter()
            .filter(|s| self.options.follow_forms || s.source != SurfaceSource::Form)
            .collect();
        if !surfaces.is_empty() {
            self.log(
                LogLevel::Debug,
                &format!("Found {} surfaces on {page_url}", surfaces.len()),
            );
        }

        for surface in &surfaces {
            if self.stop.is_stopped() {
                break;
            }
            self.test_surface(surface, &page).await;
        }

        if item.depth < self.options.depth {
            let origin = self.options.same_domain.then_some(&self.origin);
            for link in extractor::extract_links(&page.body, &page_url, origin) {
                if self.stop.is_stopped() {
                    break;
                }
                self.enqueue(&link, item.depth + 1).await;
            }
        }

        self.reporter.stats(&self.stats.snapshot());
        self.report_progress().await;
    }

    async fn test_surface(&self, surface: &AttackSurface, page: &CapturedResponse) {
        let mut baseline: Option<CapturedResponse> = None;

        for param in prioritize_params(&surface.parameters) {
            if self.stop.is_stopped() {
                break;
            }
            if !self.claim(surface.key(&param)).await {
                continue;
            }
            self.stats.record_param();
            self.log(
                LogLevel::Debug,
                &format!("Testing '{param}' on {} {}", surface.method, surface.action),
            );

            // The page itself is the baseline for its own query string
            let base = match &baseline {
                Some(base) => base.clone(),
                None if surface.source == SurfaceSource::QueryString => page.clone(),
                None => match self.ctx.prober.fetch_baseline(surface).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        self.log(
                            LogLevel::Warn,
                            &format!("Baseline for {} failed ({e}); using page", surface.action),
                        );
                        page.clone()
                    }
                },
            };
            baseline = Some(base.clone());

            if let Some(finding) = test_parameter(&self.ctx, surface, &param, &base).await {
                self.report(finding).await;
            }
        }
    }

    /// Marks a (surface, parameter) pair as tested; false if it already was
    async fn claim(&self, key: SurfaceKey) -> bool {
        self.tested.lock().await.insert(key)
    }

    /// Queues `url` unless already seen, too deep, or the queue is full
    async fn enqueue(&self, url: &str, depth: u32) -> bool {
        if depth > self.options.depth {
            return false;
        }
        let key = normalize_url(url);
        if self.visited.lock().await.contains(&key) {
            return false;
        }
        let mut queued = self.queued.lock().await;
        if queued.contains(&key) {
            return false;
        }
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.options.max_queue_size {
            drop(queue);
            drop(queued);
            self.log(LogLevel::Warn, &format!("Max queue reached. Not adding: {url}"));
            return false;
        }
        queued.insert(key);
        queue.push_back(CrawlQueueItem {
            url: url.to_string(),
            depth,
        });
        true
    }

    async fn report(&self, finding: Finding) {
        let count = {
            let mut findings = self.findings.lock().await;
            findings.push(finding.clone());
            findings.len()
        };
        self.log(
            LogLevel::Vuln,
            &format!("{} at {} ({})", finding.title, finding.endpoint, finding.status),
        );
        self.reporter.finding(&finding);
        self.reporter.found(count);
    }

    async fn report_progress(&self) {
        if self.stop.is_stopped() {
            return;
        }
        let visited = self.visited_count().await;
        let pending = self.queue.lock().await.len();
        let total = visited + pending;
        let percent = if total == 0 {
            100
        } else {
            (visited * 100 / total).min(100) as u8
        };
        let _gate = self.progress_gate.lock().unwrap_or_else(|p| p.into_inner());
        if !self.stop.is_stopped() {
            self.reporter.progress(percent);
        }
    }
}

/// Start/stop controller; at most one run at a time
pub struct Spider {
    reporter: Arc<dyn Reporter>,
    current: std::sync::Mutex<Option<Arc<CrawlSession>>>,
}

impl Spider {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            reporter,
            current: std::sync::Mutex::new(None),
        }
    }

    /// Starts a run in the background. Fails with `AlreadyRunning` while one is active.
    pub fn start(&self, options: SpiderOptions) -> Result<JoinHandle<ScanResult>> {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if current
            .as_ref()
            .is_some_and(|s| s.status() == RunStatus::Running)
        {
            self.reporter.log(LogLevel::Warn, "Spider already running");
            return Err(SpiderError::AlreadyRunning);
        }

        let session = CrawlSession::new(options, Arc::clone(&self.reporter))?;
        session.set_status(RunStatus::Running);
        *current = Some(Arc::clone(&session));
        Ok(tokio::spawn(session.run()))
    }

    pub fn stop(&self) {
        if let Some(session) = self.session() {
            session.stop();
        }
    }

    pub fn status(&self) -> RunStatus {
        self.session()
            .map(|s| s.status())
            .unwrap_or(RunStatus::Idle)
    }

    /// The current or most recent run
    pub fn session(&self) -> Option<Arc<CrawlSession>> {
        match self.current.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Normalizes a URL for deduplication (strips trailing slash, fragment)
fn normalize_url(url: &str) -> String {
    if let Ok(mut parsed) = Url::parse(url) {
        parsed.set_fragment(None);
        let mut result = parsed.to_string();
        if result.ends_with('/') && result.len() > 1 {
            result.pop();
        }
        result
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelReporter, NullReporter, SpiderEvent};
    use std::collections::HashMap;

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://example.com/path/"),
            "https://example.com/path"
        );
        assert_eq!(
            normalize_url("https://example.com/path#section"),
            "https://example.com/path"
        );
        assert_eq!(
            normalize_url("https://example.com/path?a=1"),
            "https://example.com/path?a=1"
        );
    }

    #[test]
    fn test_stop_signal_is_shared() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_stopped());
        signal.stop();
        assert!(clone.is_stopped());
    }

    fn options(depth: u32, max_queue_size: usize) -> SpiderOptions {
        SpiderOptions {
            url: "http://shop.test/".to_string(),
            depth,
            max_queue_size,
            ..SpiderOptions::default()
        }
    }

    #[test]
    fn test_rejects_non_http_seed() {
        let opts = SpiderOptions {
            url: "ftp://shop.test/".to_string(),
            ..SpiderOptions::default()
        };
        assert!(matches!(
            CrawlSession::new(opts, Arc::new(NullReporter)),
            Err(SpiderError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_enqueue_respects_depth_dedup_and_cap() {
        let session = CrawlSession::new(options(1, 2), Arc::new(NullReporter)).expect("session");
        assert!(session.enqueue("http://shop.test/a", 1).await);
        assert!(!session.enqueue("http://shop.test/a#top", 1).await);
        assert!(!session.enqueue("http://shop.test/deep", 2).await);
        assert!(session.enqueue("http://shop.test/b", 1).await);
        assert!(!session.enqueue("http://shop.test/c", 1).await);
        assert_eq!(session.queue.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_surface_claimed_once() {
        let session = CrawlSession::new(options(1, 10), Arc::new(NullReporter)).expect("session");
        let key = SurfaceKey {
            action: "http://shop.test/item.php".to_string(),
            parameter: "id".to_string(),
            method: crate::models::HttpMethod::Get,
        };
        assert!(session.claim(key.clone()).await);
        assert!(!session.claim(key).await);
    }

    /// Serves the same canned page for every URL
    struct CannedPage(CapturedResponse);

    #[async_trait]
    impl PageSource for CannedPage {
        async fn fetch(&self, _url: &str) -> Result<CapturedResponse> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_unparseable_page_url_still_reports_progress() {
        let (reporter, mut rx) = ChannelReporter::new();
        let session = CrawlSession::new(options(1, 10), Arc::new(reporter)).expect("session");
        let page = CannedPage(CapturedResponse {
            status: 200,
            headers: HashMap::from([("content-type".to_string(), "text/html".to_string())]),
            body: "<html><body><a href=\"/next\">next</a></body></html>".to_string(),
            url: "not a url".to_string(),
            elapsed_ms: 3,
        });
        let item = CrawlQueueItem {
            url: "::also not a url::".to_string(),
            depth: 0,
        };

        session.process(item, &page).await;

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SpiderEvent::Progress(percent) = event {
                progress.push(percent);
            }
        }
        assert_eq!(progress, vec![100]);
        assert_eq!(session.visited_count().await, 1);
        assert!(session.queue.lock().await.is_empty());
    }
}
