//! HTTP client wrapper with a shared cookie store and request tracking
//!
//! Redirects are never followed: the caller inspects the 3xx and decides.
//! Retries are not built in either; see [`crate::http::retry`].

use crate::error::{Result, SpiderError};
use crate::models::{CapturedResponse, HttpMethod, SpiderOptions};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, CONTENT_TYPE, COOKIE};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;
use url::Url;

/// HTTP client wrapper with cookie tracking and request counting
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    timeout_ms: u64,
    request_count: Arc<AtomicU64>,
    rate_limit_delay: Option<Duration>,
    default_headers: Vec<(String, String)>,
    cookies: Arc<Jar>,
}

impl HttpClient {
    /// Creates a new HttpClient from run options
    pub fn from_options(options: &SpiderOptions) -> Result<Self> {
        let cookies = Arc::new(Jar::default());
        let mut builder = Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .user_agent(&options.user_agent)
            .cookie_provider(Arc::clone(&cookies))
            .redirect(reqwest::redirect::Policy::none());

        if let Some(ref proxy_url) = options.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| SpiderError::ConfigError(format!("Invalid proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| SpiderError::ConfigError(format!("HTTP client setup failed: {e}")))?;

        let rate_limit_delay = options
            .rate_limit
            .filter(|rps| *rps > 0)
            .map(|rps| Duration::from_millis(1000 / u64::from(rps)));

        let mut default_headers: Vec<(String, String)> = options
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        default_headers.sort();

        Ok(Self {
            client,
            timeout_ms: options.timeout_ms,
            request_count: Arc::new(AtomicU64::new(0)),
            rate_limit_delay,
            default_headers,
            cookies,
        })
    }

    /// Sends a GET request
    pub async fn get(&self, url: &str) -> Result<CapturedResponse> {
        self.request(url, HttpMethod::Get, None, &[], None).await
    }

    /// Sends a request. `form` goes out as an application/x-www-form-urlencoded
    /// body, `headers` are added after the defaults, and `cookies` replaces the
    /// stored cookies for this request only.
    pub async fn request(
        &self,
        url: &str,
        method: HttpMethod,
        form: Option<&[(String, String)]>,
        headers: &[(String, String)],
        cookies: Option<&str>,
    ) -> Result<CapturedResponse> {
        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SpiderError::Protocol(format!(
                "unsupported scheme '{}' in {url}",
                parsed.scheme()
            )));
        }

        if let Some(delay) = self.rate_limit_delay {
            sleep(delay).await;
        }

        let mut req = match method {
            HttpMethod::Get => self.client.get(parsed),
            HttpMethod::Post => self.client.post(parsed),
        };

        for (key, value) in self.default_headers.iter().chain(headers) {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Some(cookies) = cookies {
            req = req.header(COOKIE, cookies);
        }

        if let Some(params) = form {
            let encoded: String = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params.iter())
                .finish();
            req = req
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encoded);
        }

        self.request_count.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let response = req
            .send()
            .await
            .map_err(|e| SpiderError::from_reqwest(e, self.timeout_ms))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = collect_headers(response.headers());

        let body = response
            .text()
            .await
            .map_err(|e| SpiderError::from_reqwest(e, self.timeout_ms))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        debug!("Response: {status} for {method} {final_url} [{elapsed_ms}ms]");

        Ok(CapturedResponse {
            status,
            headers,
            body,
            url: final_url,
            elapsed_ms,
        })
    }

    /// Returns the total number of requests made
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Stores a `Set-Cookie` style string as if `url` had sent it
    pub fn add_cookie(&self, cookie: &str, url: &Url) {
        self.cookies.add_cookie_str(cookie, url);
    }

    #[cfg(test)]
    fn cookie_header(&self, url: &Url) -> Option<String> {
        use reqwest::cookie::CookieStore;
        self.cookies
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}
