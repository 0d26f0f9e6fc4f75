//! Chrome-backed [`GridSession`].
//!
//! This module is only available when the `headless` Cargo feature is enabled.
//! It launches one Chrome process with a single tab and drives the directory
//! grid through the DevTools protocol. Waits are implemented as short
//! JavaScript polls bounded by `tokio::time::timeout`. Network idleness is
//! tracked from the protocol's request events rather than from the page.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    SetUserAgentOverrideParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chrome::ChromeLocator;
use crate::config::BrowserOptions;
use crate::grid::{pager_prefix, FilterOption, GridSelectors, GridSession};
use crate::{DirectoryError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const IDLE_QUIET: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct RawOption {
    value: String,
    text: String,
}

/// Request ids the tab has sent and not yet seen finish or fail.
#[derive(Debug, Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn started(&self, id: String) {
        self.lock().insert(id);
    }

    fn finished(&self, id: &str) {
        self.lock().remove(id);
    }

    fn count(&self) -> usize {
        self.lock().len()
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

enum Traffic {
    Started(String),
    Done(String),
}

/// One Chrome process with one tab positioned on the directory.
pub struct BrowserSession {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
    tracker: JoinHandle<()>,
    in_flight: InFlight,
    page: Page,
    selectors: GridSelectors,
}

impl BrowserSession {
    /// Launches Chrome and opens a blank tab.
    pub async fn launch(options: &BrowserOptions, selectors: GridSelectors) -> Result<Self> {
        let chrome = match &options.chrome_path {
            Some(path) => path.clone(),
            None => ChromeLocator::new()?.ensure().await?,
        };
        debug!("Launching Chrome at {}", chrome.display());

        let config = launch_config(options, &chrome)?;
        let (browser, mut events) = Browser::launch(config)
            .await
            .map_err(|e| DirectoryError::Browser(format!("Failed to launch browser: {}", e)))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    warn!("Browser CDP handler error: {}", e);
                }
            }
            debug!("Browser CDP handler exited");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DirectoryError::Browser(format!("Failed to open tab: {}", e)))?;

        if let Some(ua) = &options.user_agent {
            page.set_user_agent(SetUserAgentOverrideParams::new(ua.as_str()))
                .await
                .map_err(|e| DirectoryError::Browser(format!("Failed to set user agent: {}", e)))?;
        }

        let in_flight = InFlight::default();
        let tracker = track_network(&page, in_flight.clone()).await?;

        Ok(Self {
            browser: Some(browser),
            handler,
            tracker,
            in_flight,
            page,
            selectors,
        })
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| DirectoryError::Browser(format!("Script failed: {}", e)))?
            .into_value()
            .map_err(|e| DirectoryError::Browser(format!("Unexpected script result: {}", e)))
    }

    /// Re-evaluates `script` until `done` accepts its result.
    ///
    /// Evaluation errors count as "not yet"; the page may be mid-navigation.
    async fn poll<T, F>(&self, what: &str, timeout: Duration, script: String, done: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                match self.eval::<T>(script.clone()).await {
                    Ok(value) if done(&value) => return value,
                    Ok(_) => {}
                    Err(e) => debug!("Polling {}: {}", what, e),
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await;
        waited.map_err(|_| DirectoryError::timeout(what, timeout))
    }

    async fn wait_visible(&self, selector: &str, what: &str, timeout: Duration) -> Result<()> {
        self.poll(what, timeout, visible_script(selector)?, |v: &bool| *v)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl GridSession for BrowserSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.in_flight.clear();
        let page = &self.page;
        tokio::time::timeout(timeout, async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<(), CdpError>(())
        })
        .await
        .map_err(|_| DirectoryError::timeout(format!("navigation to {}", url), timeout))?
        .map_err(|e| DirectoryError::Browser(format!("Navigation to {} failed: {}", url, e)))
    }

    async fn wait_for_filter_control(&mut self, timeout: Duration) -> Result<()> {
        self.wait_visible(&self.selectors.dropdown, "filter dropdown", timeout)
            .await
    }

    async fn filter_options(&mut self) -> Result<Vec<FilterOption>> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (!el) return []; \
             return Array.from(el.querySelectorAll('option')) \
               .map(o => ({{ value: o.value || '', text: o.textContent || '' }})); }})()",
            sel = js_string(&self.selectors.dropdown)?
        );
        let options: Vec<RawOption> = self.eval(script).await?;
        Ok(options
            .into_iter()
            .map(|o| FilterOption {
                value: o.value,
                text: o.text,
            })
            .collect())
    }

    async fn select_filter(&mut self, value: &str) -> Result<()> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (!el) return false; \
             el.value = {val}; \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return true; }})()",
            sel = js_string(&self.selectors.dropdown)?,
            val = js_string(value)?
        );
        if self.eval::<bool>(script).await? {
            Ok(())
        } else {
            Err(DirectoryError::Browser(
                "Filter dropdown not found while selecting".to_string(),
            ))
        }
    }

    async fn wait_for_grid(&mut self, timeout: Duration) -> Result<()> {
        self.wait_visible(&self.selectors.table, "grid table", timeout)
            .await
    }

    async fn pager_summary(&mut self, timeout: Duration) -> Result<Option<String>> {
        match self
            .wait_visible(&self.selectors.pager_summary, "pager summary", timeout)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(e),
        }
        let text: String = self.eval(text_script(&self.selectors.pager_summary)?).await?;
        Ok(Some(text.trim().to_string()).filter(|t| !t.is_empty()))
    }

    async fn grid_html(&mut self, timeout: Duration) -> Result<String> {
        self.wait_visible(&self.selectors.table, "grid table markup", timeout)
            .await?;
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             return el ? el.outerHTML : ''; }})()",
            sel = js_string(&self.selectors.table)?
        );
        self.eval(script).await
    }

    async fn next_page_enabled(&mut self, timeout: Duration) -> Result<bool> {
        self.wait_visible(&self.selectors.next_button, "next page button", timeout)
            .await?;
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (!el) return false; \
             return !el.classList.contains({dis}) \
               && !el.hasAttribute('disabled') \
               && el.getAttribute('aria-disabled') !== 'true'; }})()",
            sel = js_string(&self.selectors.next_button)?,
            dis = js_string(&self.selectors.disabled_class)?
        );
        self.eval(script).await
    }

    async fn click_next_page(&mut self, timeout: Duration) -> Result<()> {
        let page = &self.page;
        let selector = self.selectors.next_button.as_str();
        tokio::time::timeout(timeout, async {
            let button = page.find_element(selector).await?;
            button.click().await?;
            Ok::<(), CdpError>(())
        })
        .await
        .map_err(|_| DirectoryError::timeout("next page click", timeout))?
        .map_err(|e| DirectoryError::Browser(format!("Next page click failed: {}", e)))
    }

    async fn wait_for_pager_change(&mut self, previous_prefix: &str, timeout: Duration) -> Result<()> {
        let previous = previous_prefix.to_string();
        self.poll(
            "pager change",
            timeout,
            text_script(&self.selectors.pager_summary)?,
            |text: &String| {
                let prefix = pager_prefix(text);
                !prefix.is_empty() && prefix != previous
            },
        )
        .await
        .map(|_| ())
    }

    async fn wait_for_network_idle(&mut self, timeout: Duration) -> Result<()> {
        let waited = tokio::time::timeout(timeout, async {
            let mut quiet = Duration::ZERO;
            loop {
                let loaded = matches!(
                    self.eval::<String>("document.readyState".to_string()).await,
                    Ok(state) if state == "complete"
                );
                let pending = self.in_flight.count();
                if loaded && pending == 0 {
                    quiet += POLL_INTERVAL;
                    if quiet >= IDLE_QUIET {
                        return;
                    }
                } else {
                    if pending > 0 {
                        debug!(pending, "Requests in flight");
                    }
                    quiet = Duration::ZERO;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await;
        waited.map_err(|_| DirectoryError::timeout("network idle", timeout))
    }

    async fn grid_fingerprint(&mut self) -> Result<Option<String>> {
        let text: String = self.eval(fingerprint_script(&self.selectors)?).await?;
        Ok(Some(text).filter(|t| !t.is_empty()))
    }

    async fn wait_for_grid_change(&mut self, previous: &str, timeout: Duration) -> Result<()> {
        let previous = previous.to_string();
        self.poll(
            "grid change",
            timeout,
            fingerprint_script(&self.selectors)?,
            |text: &String| *text != previous,
        )
        .await
        .map(|_| ())
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map_err(|e| DirectoryError::Browser(format!("Screenshot failed: {}", e)))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser: {}", e);
            }
            if let Err(e) = browser.wait().await {
                warn!("Failed to wait for browser exit: {}", e);
            }
            self.tracker.abort();
            self.handler.abort();
            debug!("Browser closed");
        }
        Ok(())
    }
}

fn launch_config(options: &BrowserOptions, chrome: &Path) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder().chrome_executable(chrome);

    if options.headless {
        builder = builder.arg("--headless=new");
    } else {
        builder = builder.with_head();
    }

    builder = builder
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--mute-audio")
        .arg("--no-first-run");

    if let Some(proxy) = &options.proxy_url {
        builder = builder.arg(format!("--proxy-server={}", proxy));
    }
    for arg in &options.launch_args {
        builder = builder.arg(arg);
    }

    builder
        .build()
        .map_err(|e| DirectoryError::Browser(format!("Failed to build browser config: {}", e)))
}

/// Follows the tab's request lifecycle events into `in_flight`.
async fn track_network(page: &Page, in_flight: InFlight) -> Result<JoinHandle<()>> {
    page.execute(EnableParams::default())
        .await
        .map_err(|e| DirectoryError::Browser(format!("Failed to enable network events: {}", e)))?;

    let listen_err = |e: CdpError| DirectoryError::Browser(format!("Failed to listen for network events: {}", e));
    let sent = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(listen_err)?
        .map(|event| Traffic::Started(event.request_id.inner().clone()));
    let finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(listen_err)?
        .map(|event| Traffic::Done(event.request_id.inner().clone()));
    let failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(listen_err)?
        .map(|event| Traffic::Done(event.request_id.inner().clone()));

    let mut traffic = futures::stream::select(sent, futures::stream::select(finished, failed));
    Ok(tokio::spawn(async move {
        while let Some(event) = traffic.next().await {
            match event {
                Traffic::Started(id) => in_flight.started(id),
                Traffic::Done(id) => in_flight.finished(&id),
            }
        }
        debug!("Network event stream ended");
    }))
}

fn js_string(value: &str) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Script returning whether the element matching `selector` is rendered.
fn visible_script(selector: &str) -> Result<String> {
    Ok(format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return false; \
         const r = el.getBoundingClientRect(); \
         const s = window.getComputedStyle(el); \
         return r.width > 0 && r.height > 0 \
           && s.visibility !== 'hidden' && s.display !== 'none'; }})()",
        sel = js_string(selector)?
    ))
}

/// Script returning the text of the element matching `selector`, or `""`.
fn text_script(selector: &str) -> Result<String> {
    Ok(format!(
        "(() => {{ const el = document.querySelector({sel}); \
         return el ? (el.textContent || '') : ''; }})()",
        sel = js_string(selector)?
    ))
}

/// Script returning the pager text and data row text of the grid, or `""`
/// when the grid has no data rows.
fn fingerprint_script(selectors: &GridSelectors) -> Result<String> {
    Ok(format!(
        "(() => {{ const rows = document.querySelectorAll({rows}); \
         if (!rows.length) return ''; \
         const pager = document.querySelector({pager}); \
         const head = pager ? (pager.textContent || '') : ''; \
         return [head].concat(Array.from(rows).map(r => r.textContent || '')).join('\\n'); }})()",
        rows = js_string(&format!("{} {}", selectors.table, selectors.data_row))?,
        pager = js_string(&selectors.pager_summary)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        let quoted = js_string("a.dxp-button:has(img[alt='Next'])").unwrap();
        assert_eq!(quoted, "\"a.dxp-button:has(img[alt='Next'])\"");
        assert_eq!(js_string("say \"hi\"").unwrap(), r#""say \"hi\"""#);
    }

    #[test]
    fn test_visible_script_embeds_selector() {
        let script = visible_script("#GuidSpecialite").unwrap();
        assert!(script.contains("document.querySelector(\"#GuidSpecialite\")"));
        assert!(script.contains("getBoundingClientRect"));
    }

    #[test]
    fn test_text_script_embeds_selector() {
        let script = text_script("b.dxp-summary").unwrap();
        assert!(script.contains("\"b.dxp-summary\""));
        assert!(script.contains("textContent"));
    }

    #[test]
    fn test_fingerprint_script_scopes_rows_to_table() {
        let script = fingerprint_script(&GridSelectors::default()).unwrap();
        let rows = js_string(&format!(
            "{} {}",
            GridSelectors::default().table,
            GridSelectors::default().data_row
        ))
        .unwrap();
        assert!(script.contains(&format!("querySelectorAll({})", rows)));
        assert!(script.contains("return '';"));
    }

    #[test]
    fn test_in_flight_tracks_requests() {
        let in_flight = InFlight::default();
        in_flight.started("1".to_string());
        in_flight.started("2".to_string());
        // Redirects reuse the request id.
        in_flight.started("2".to_string());
        assert_eq!(in_flight.count(), 2);
        in_flight.finished("1");
        in_flight.finished("unknown");
        assert_eq!(in_flight.count(), 1);
        in_flight.clone().clear();
        assert_eq!(in_flight.count(), 0);
    }

    #[test]
    fn test_launch_config_builds() {
        let options = BrowserOptions {
            proxy_url: Some("http://localhost:8080".to_string()),
            launch_args: vec!["--lang=fr-FR".to_string()],
            ..Default::default()
        };
        assert!(launch_config(&options, Path::new("/usr/bin/chromium")).is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires Chrome
    async fn test_session_navigates_and_closes() {
        let mut session = BrowserSession::launch(&BrowserOptions::default(), GridSelectors::default())
            .await
            .unwrap();
        session
            .navigate("data:text/html,<select id='GuidSpecialite'><option value='1'>A</option></select>", Duration::from_secs(10))
            .await
            .unwrap();
        session
            .wait_for_filter_control(Duration::from_secs(5))
            .await
            .unwrap();
        let options = session.filter_options().await.unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].text, "A");
        session.close().await.unwrap();
        session.close().await.unwrap();
    }
}
