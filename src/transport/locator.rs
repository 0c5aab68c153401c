use crate::error::{ScrapeKitError, ScrapeKitResult};

/// Way of finding an element on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    Name(String),
    Css(String),
    XPath(String),
    ClassName(String),
    TagName(String),
    LinkText(String),
}

impl Locator {
    /// Build a locator from a strategy name such as `id`, `css selector` or `link text`
    pub fn from_strategy(strategy: &str, value: impl Into<String>) -> ScrapeKitResult<Self> {
        let value = value.into();
        let normalized = strategy.trim().to_lowercase().replace(['_', '-'], " ");
        Ok(match normalized.as_str() {
            "id" => Locator::Id(value),
            "name" => Locator::Name(value),
            "css" | "css selector" => Locator::Css(value),
            "xpath" => Locator::XPath(value),
            "class" | "class name" => Locator::ClassName(value),
            "tag" | "tag name" => Locator::TagName(value),
            "link text" | "link" => Locator::LinkText(value),
            _ => {
                return Err(ScrapeKitError::config(format!(
                    "Unknown locator strategy: {}",
                    strategy
                )))
            }
        })
    }

    /// Selector string understood by the browser driver
    pub fn selector(&self) -> String {
        match self {
            Locator::Id(id) => format!("id={}", id),
            Locator::Name(name) => format!("[name=\"{}\"]", escape_quotes(name)),
            Locator::Css(css) => format!("css={}", css),
            Locator::XPath(xpath) => format!("xpath={}", xpath),
            Locator::ClassName(class) => format!(".{}", class),
            Locator::TagName(tag) => tag.clone(),
            Locator::LinkText(text) => format!("a:text-is(\"{}\")", escape_quotes(text)),
        }
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Id(v) => write!(f, "id='{}'", v),
            Locator::Name(v) => write!(f, "name='{}'", v),
            Locator::Css(v) => write!(f, "css selector='{}'", v),
            Locator::XPath(v) => write!(f, "xpath='{}'", v),
            Locator::ClassName(v) => write!(f, "class name='{}'", v),
            Locator::TagName(v) => write!(f, "tag name='{}'", v),
            Locator::LinkText(v) => write!(f, "link text='{}'", v),
        }
    }
}
