//! Headless Chromium page source for JavaScript-heavy targets
//!
//! Pages are navigated in a real browser and the final DOM is handed to the
//! surface discoverer. Probing still goes over plain HTTP; the browser's
//! cookies are copied into the HTTP client's cookie store after every
//! navigation so probes carry the same session. Only available with the
//! `browser` feature.

#![cfg_attr(not(feature = "browser"), allow(dead_code))]

#[cfg(feature = "browser")]
use super::PageSource;
use crate::error::Result;
#[cfg(feature = "browser")]
use crate::error::SpiderError;
#[cfg(feature = "browser")]
use crate::http::HttpClient;
#[cfg(feature = "browser")]
use crate::models::CapturedResponse;
use async_trait::async_trait;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use std::collections::HashMap;
#[cfg(feature = "browser")]
use std::time::{Duration, Instant};
use tracing::debug;
#[cfg(feature = "browser")]
use tracing::info;
#[cfg(feature = "browser")]
use url::Url;

/// An open browser tab
#[async_trait]
trait Tab: Sized + Send + Sync {
    /// Final DOM and URL of the tab
    async fn render(&self) -> Result<(String, String)>;

    async fn close(self) -> Result<()>;
}

/// Renders `tab`, then closes it whether or not the render succeeded
async fn render_and_close<T: Tab>(tab: T, url: &str) -> Result<(String, String)> {
    let rendered = tab.render().await;
    if let Err(e) = tab.close().await {
        debug!("Closing page for {url} failed: {e}");
    }
    rendered
}

/// Page source backed by a headless Chromium instance
#[cfg(feature = "browser")]
pub struct BrowserPageSource {
    browser: Browser,
    client: HttpClient,
    wait: Duration,
}

#[cfg(feature = "browser")]
impl BrowserPageSource {
    /// Launches headless Chromium. `client` receives the browser's cookies.
    pub async fn launch(client: HttpClient, wait_ms: u64) -> Result<Self> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1920, 1080)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(|e| SpiderError::Browser(format!("config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SpiderError::Browser(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!("Browser page source initialized");
        Ok(Self {
            browser,
            client,
            wait: Duration::from_millis(wait_ms),
        })
    }
}

/// A navigated Chromium page plus what rendering it needs
#[cfg(feature = "browser")]
struct ChromeTab<'a> {
    page: Page,
    source: &'a BrowserPageSource,
    url: &'a str,
}

#[cfg(feature = "browser")]
#[async_trait]
impl Tab for ChromeTab<'_> {
    async fn render(&self) -> Result<(String, String)> {
        tokio::time::sleep(self.source.wait).await;
        let body = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .map_err(|e| SpiderError::Browser(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| SpiderError::Parse(format!("rendered DOM of {}: {e}", self.url)))?;
        let final_url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| self.url.to_string());

        if let (Ok(cookies), Ok(origin)) = (self.page.get_cookies().await, Url::parse(&final_url)) {
            for cookie in cookies {
                self.source.client.add_cookie(
                    &format!(
                        "{}={}; Domain={}; Path={}",
                        cookie.name, cookie.value, cookie.domain, cookie.path
                    ),
                    &origin,
                );
            }
        }
        Ok((body, final_url))
    }

    async fn close(self) -> Result<()> {
        self.page
            .close()
            .await
            .map_err(|e| SpiderError::Browser(e.to_string()))
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl PageSource for BrowserPageSource {
    async fn fetch(&self, url: &str) -> Result<CapturedResponse> {
        let started = Instant::now();
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| SpiderError::Network(format!("navigate {url}: {e}")))?;

        let tab = ChromeTab {
            page,
            source: self,
            url,
        };
        let (body, final_url) = render_and_close(tab, url).await?;

        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        Ok(CapturedResponse {
            status: 200,
            headers,
            body,
            url: final_url,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}
