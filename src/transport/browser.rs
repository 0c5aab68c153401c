#[cfg(feature = "browser")]
use base64::Engine;
#[cfg(feature = "browser")]
use playwright::api::{Browser, BrowserContext, ElementHandle, File, Page};
#[cfg(feature = "browser")]
use playwright::Playwright;
#[cfg(feature = "browser")]
use std::path::Path;
#[cfg(feature = "browser")]
use std::time::Duration;
#[cfg(feature = "browser")]
use tracing::{info, warn};

#[cfg(feature = "browser")]
use super::retry::{retry, RetryPolicy};
use super::Locator;
use crate::config::BrowserConfig;
use crate::error::{ScrapeKitError, ScrapeKitResult};
use serde_json::Value;

#[cfg(feature = "browser")]
const SCROLL_PAUSE: Duration = Duration::from_secs(2);
#[cfg(feature = "browser")]
const MAX_SCROLL_ROUNDS: usize = 100;

#[cfg(feature = "browser")]
fn driver_error(error: impl std::fmt::Display) -> ScrapeKitError {
    ScrapeKitError::browser(error.to_string())
}

#[cfg(feature = "browser")]
async fn locate(page: &Page, locator: &Locator) -> ScrapeKitResult<ElementHandle> {
    page.wait_for_selector_builder(&locator.selector())
        .wait_for_selector()
        .await
        .map_err(driver_error)?
        .ok_or_else(|| ScrapeKitError::ElementNotFound {
            locator: locator.to_string(),
        })
}

/// One Chromium process with a single page, driven strictly in sequence
#[cfg(feature = "browser")]
pub struct DriverManager {
    policy: RetryPolicy,
    _playwright: Playwright,
    browser: Browser,
    _context: BrowserContext,
    page: Option<Page>,
}

#[cfg(feature = "browser")]
impl DriverManager {
    /// Launch the browser and open a page
    pub async fn new(config: &BrowserConfig) -> ScrapeKitResult<Self> {
        info!("Initializing browser driver (headless: {})", config.headless);
        let policy = RetryPolicy::from_browser_config(config);

        let playwright = Playwright::initialize().await.map_err(driver_error)?;
        playwright
            .prepare()
            .map_err(|e| ScrapeKitError::browser(format!("Failed to install browsers: {}", e)))?;

        let headless = config.headless;
        let args = config.extra_args.as_slice();
        let playwright_ref = &playwright;
        let browser = retry(&policy, "launch browser", move || async move {
            let chromium = playwright_ref.chromium();
            chromium
                .launcher()
                .headless(headless)
                .args(args)
                .launch()
                .await
                .map_err(driver_error)
        })
        .await?;

        let context = browser.context_builder().build().await.map_err(driver_error)?;
        let page = context.new_page().await.map_err(driver_error)?;
        page.set_default_timeout((config.implicit_wait_seconds * 1000) as u32)
            .await
            .map_err(driver_error)?;
        page.set_default_navigation_timeout((config.page_load_timeout_seconds * 1000) as u32)
            .await
            .map_err(driver_error)?;

        info!("Browser driver ready");
        Ok(Self {
            policy,
            _playwright: playwright,
            browser,
            _context: context,
            page: Some(page),
        })
    }

    fn page(&self) -> ScrapeKitResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| ScrapeKitError::browser("No open window"))
    }

    pub async fn get(&mut self, url: &str) -> ScrapeKitResult<()> {
        info!("Navigating to {}...", url);
        let page = self.page()?;
        retry(&self.policy, "navigate", move || async move {
            page.goto_builder(url).goto().await.map(drop).map_err(driver_error)
        })
        .await
    }

    /// Pause for the given number of seconds
    pub async fn wait(&mut self, seconds: f64) {
        info!("Waiting for {} seconds...", seconds);
        tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
    }

    pub async fn refresh(&mut self) -> ScrapeKitResult<()> {
        info!("Refreshing the page...");
        let page = self.page()?;
        retry(&self.policy, "refresh", move || async move {
            page.reload_builder().reload().await.map(drop).map_err(driver_error)
        })
        .await
    }

    pub async fn back(&mut self) -> ScrapeKitResult<()> {
        info!("Navigating back in history...");
        let page = self.page()?;
        retry(&self.policy, "back", move || async move {
            page.go_back_builder().go_back().await.map(drop).map_err(driver_error)
        })
        .await
    }

    pub async fn forward(&mut self) -> ScrapeKitResult<()> {
        info!("Navigating forward in history...");
        let page = self.page()?;
        retry(&self.policy, "forward", move || async move {
            page.go_forward_builder().go_forward().await.map(drop).map_err(driver_error)
        })
        .await
    }

    /// First element matching the locator, waiting up to the implicit wait
    pub async fn find_element(&mut self, locator: &Locator) -> ScrapeKitResult<ElementHandle> {
        info!("Finding element by {}", locator);
        let page = self.page()?;
        retry(&self.policy, "find element", move || locate(page, locator)).await
    }

    pub async fn find_elements(&mut self, locator: &Locator) -> ScrapeKitResult<Vec<ElementHandle>> {
        info!("Finding elements by {}", locator);
        let page = self.page()?;
        let selector = locator.selector();
        let selector = selector.as_str();
        retry(&self.policy, "find elements", move || async move {
            page.query_selector_all(selector).await.map_err(driver_error)
        })
        .await
    }

    /// Inner text of every element matching the locator
    pub async fn element_texts(&mut self, locator: &Locator) -> ScrapeKitResult<Vec<String>> {
        let elements = self.find_elements(locator).await?;
        let mut texts = Vec::with_capacity(elements.len());
        for element in &elements {
            texts.push(element.inner_text().await.map_err(driver_error)?);
        }
        Ok(texts)
    }

    pub async fn click_element(&mut self, locator: &Locator) -> ScrapeKitResult<()> {
        info!("Clicking element with {}", locator);
        let page = self.page()?;
        retry(&self.policy, "click", move || async move {
            let element = locate(page, locator).await?;
            element.click_builder().click().await.map_err(driver_error)
        })
        .await
    }

    /// Type text into an element
    pub async fn send_keys_to_element(&mut self, locator: &Locator, keys: &str) -> ScrapeKitResult<()> {
        info!("Sending keys to element with {}", locator);
        let page = self.page()?;
        retry(&self.policy, "send keys", move || async move {
            let element = locate(page, locator).await?;
            element.type_builder(keys).r#type().await.map_err(driver_error)
        })
        .await
    }

    pub async fn clear_element(&mut self, locator: &Locator) -> ScrapeKitResult<()> {
        info!("Clearing element with {}", locator);
        let page = self.page()?;
        retry(&self.policy, "clear", move || async move {
            let element = locate(page, locator).await?;
            element.fill_builder("").fill().await.map_err(driver_error)
        })
        .await
    }

    /// Evaluate a JavaScript expression or function in the page
    pub async fn execute_script(&mut self, script: &str) -> ScrapeKitResult<Value> {
        info!("Executing script: {}", script);
        let page = self.page()?;
        retry(&self.policy, "execute script", move || async move {
            page.evaluate::<(), Value>(script, ()).await.map_err(driver_error)
        })
        .await
    }

    /// Scroll until the page height stops growing
    pub async fn scroll_to_bottom(&mut self) -> ScrapeKitResult<()> {
        info!("Scrolling to the bottom of the page...");
        let mut last_height = self.execute_script("document.body.scrollHeight").await?;

        for _ in 0..MAX_SCROLL_ROUNDS {
            self.execute_script("window.scrollTo(0, document.body.scrollHeight)").await?;
            tokio::time::sleep(SCROLL_PAUSE).await;
            let height = self.execute_script("document.body.scrollHeight").await?;
            if height == last_height {
                return Ok(());
            }
            last_height = height;
        }

        warn!("Page kept growing after {} scrolls", MAX_SCROLL_ROUNDS);
        Ok(())
    }

    /// Accept every dialog the page raises from now on
    pub async fn accept_alert(&mut self) -> ScrapeKitResult<()> {
        info!("Accepting alert...");
        self.execute_script(
            "() => { window.alert = () => {}; window.confirm = () => true; window.prompt = (_m, d) => d ?? ''; }",
        )
        .await
        .map(drop)
    }

    /// Dismiss every dialog the page raises from now on
    pub async fn dismiss_alert(&mut self) -> ScrapeKitResult<()> {
        info!("Dismissing alert...");
        self.execute_script(
            "() => { window.alert = () => {}; window.confirm = () => false; window.prompt = () => null; }",
        )
        .await
        .map(drop)
    }

    /// Attach a local file to a file input
    pub async fn upload_file(&mut self, locator: &Locator, path: &Path) -> ScrapeKitResult<()> {
        info!("Uploading file '{}' to element with {}", path.display(), locator);
        let content = tokio::fs::read(path).await.map_err(|e| ScrapeKitError::FileSystem {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);

        let page = self.page()?;
        let name = name.as_str();
        let encoded = encoded.as_str();
        retry(&self.policy, "upload file", move || async move {
            let element = locate(page, locator).await?;
            let file = File {
                name: name.to_string(),
                mime: "application/octet-stream".to_string(),
                buffer: encoded.to_string(),
            };
            element
                .set_input_files_builder(file)
                .set_input_files()
                .await
                .map_err(driver_error)
        })
        .await
    }

    /// Close the current page; later page operations fail until the driver is recreated
    pub async fn close_window(&mut self) {
        info!("Closing the current window...");
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close(None).await {
                warn!("Error while closing window: {}", e);
            }
        }
    }

    /// Shut the browser down
    pub async fn quit(mut self) -> ScrapeKitResult<()> {
        self.close_window().await;
        self.browser.close().await.map_err(driver_error)?;
        info!("Browser driver closed");
        Ok(())
    }
}

/// Stand-in used when the crate is built without the `browser` feature
#[cfg(not(feature = "browser"))]
pub struct DriverManager;

#[cfg(not(feature = "browser"))]
fn disabled() -> ScrapeKitError {
    ScrapeKitError::browser("Browser feature not enabled")
}

#[cfg(not(feature = "browser"))]
impl DriverManager {
    pub async fn new(_config: &BrowserConfig) -> ScrapeKitResult<Self> {
        Err(disabled())
    }

    pub async fn get(&mut self, _url: &str) -> ScrapeKitResult<()> {
        Err(disabled())
    }

    pub async fn wait(&mut self, _seconds: f64) {}

    pub async fn send_keys_to_element(&mut self, _locator: &Locator, _keys: &str) -> ScrapeKitResult<()> {
        Err(disabled())
    }

    pub async fn execute_script(&mut self, _script: &str) -> ScrapeKitResult<Value> {
        Err(disabled())
    }

    pub async fn element_texts(&mut self, _locator: &Locator) -> ScrapeKitResult<Vec<String>> {
        Err(disabled())
    }

    pub async fn scroll_to_bottom(&mut self) -> ScrapeKitResult<()> {
        Err(disabled())
    }

    pub async fn quit(self) -> ScrapeKitResult<()> {
        Ok(())
    }
}


#[cfg(all(test, feature = "browser"))]
mod browser_tests {
    use super::*;

    async fn dialog_page() -> DriverManager {
        let mut driver = DriverManager::new(&BrowserConfig::default()).await.unwrap();
        driver.get("data:text/html,<p id=\"msg\">dialogs</p>").await.unwrap();
        driver
    }

    #[tokio::test]
    async fn test_accepted_dialogs_answer_yes() {
        let mut driver = dialog_page().await;
        driver.accept_alert().await.unwrap();

        driver.execute_script("() => window.alert('hi')").await.unwrap();
        assert_eq!(driver.execute_script("() => window.confirm('ok?')").await.unwrap(), Value::Bool(true));
        assert_eq!(
            driver.execute_script("() => window.prompt('name?', 'fallback')").await.unwrap(),
            Value::String("fallback".to_string())
        );
        assert_eq!(
            driver.execute_script("() => window.prompt('name?')").await.unwrap(),
            Value::String(String::new())
        );

        driver.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_dismissed_dialogs_answer_no() {
        let mut driver = dialog_page().await;
        driver.accept_alert().await.unwrap();
        driver.dismiss_alert().await.unwrap();

        assert_eq!(driver.execute_script("() => window.confirm('ok?')").await.unwrap(), Value::Bool(false));
        assert_eq!(
            driver.execute_script("() => window.prompt('name?', 'fallback')").await.unwrap(),
            Value::Null
        );

        driver.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_element_is_reported() {
        let mut driver = DriverManager::new(&BrowserConfig {
            implicit_wait_seconds: 1,
            retry_attempts: 1,
            ..BrowserConfig::default()
        })
        .await
        .unwrap();
        driver.get("data:text/html,<p id=\"msg\">dialogs</p>").await.unwrap();

        assert_eq!(driver.element_texts(&Locator::Id("msg".to_string())).await.unwrap(), vec!["dialogs"]);
        assert!(driver.find_element(&Locator::Id("absent".to_string())).await.is_err());

        driver.quit().await.unwrap();
    }
}
