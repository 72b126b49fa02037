//! Scripted in-memory browser used by unit tests.
//!
//! Selector checks run against the stored HTML with `scraper`, so tests
//! exercise the same selectors the real session would.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};

use super::{BrowserError, BrowserLauncher, BrowserResult, BrowserSession};

struct Gate {
    input: String,
    submit: String,
    password: String,
    unlocked: String,
}

#[derive(Default)]
pub(crate) struct FakeBrowser {
    pages: HashMap<String, String>,
    current: String,
    typed: HashMap<String, String>,
    gate: Option<Gate>,
    downloads: HashMap<String, (PathBuf, Vec<(String, Vec<u8>)>)>,
    crash_on_goto: bool,
    /// Every interaction, in order (`goto <url>`, `fill <sel>=<text>`, `click <sel>`).
    pub actions: Vec<String>,
}

fn matches(html: &str, selector: &str) -> BrowserResult<bool> {
    let selector = Selector::parse(selector)
        .map_err(|e| BrowserError::Protocol(format!("bad selector {}: {:?}", selector, e)))?;
    let doc = Html::parse_document(html);
    let found = doc.select(&selector).next().is_some();
    Ok(found)
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Submitting `password` into `input` via `submit` swaps the page to `unlocked`.
    pub fn with_password_gate(mut self, input: &str, submit: &str, password: &str, unlocked: &str) -> Self {
        self.gate = Some(Gate {
            input: input.to_string(),
            submit: submit.to_string(),
            password: password.to_string(),
            unlocked: unlocked.to_string(),
        });
        self
    }

    /// Clicking `selector` writes `files` into `dir`, like a native download.
    pub fn with_download(mut self, selector: &str, dir: PathBuf, files: Vec<(String, Vec<u8>)>) -> Self {
        self.downloads.insert(selector.to_string(), (dir, files));
        self
    }

    pub fn crashing(mut self) -> Self {
        self.crash_on_goto = true;
        self
    }

    pub fn clicks(&self, selector: &str) -> usize {
        let action = format!("click {}", selector);
        self.actions.iter().filter(|a| **a == action).count()
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        self.actions.push(format!("goto {}", url));
        if self.crash_on_goto {
            return Err(BrowserError::Crashed("connection closed".into()));
        }
        self.current = self.pages.get(url).cloned().unwrap_or_default();
        self.typed.clear();
        Ok(())
    }

    async fn content(&mut self) -> BrowserResult<String> {
        Ok(self.current.clone())
    }

    async fn exists(&mut self, selector: &str) -> BrowserResult<bool> {
        matches(&self.current, selector)
    }

    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> BrowserResult<bool> {
        matches(&self.current, selector)
    }

    async fn fill(&mut self, selector: &str, text: &str) -> BrowserResult<()> {
        self.actions.push(format!("fill {}={}", selector, text));
        if !matches(&self.current, selector)? {
            return Err(BrowserError::NotFound(selector.to_string()));
        }
        self.typed.insert(selector.to_string(), text.to_string());
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<()> {
        self.actions.push(format!("click {}", selector));
        if !matches(&self.current, selector)? {
            return Err(BrowserError::NotFound(selector.to_string()));
        }
        if let Some(gate) = &self.gate {
            if gate.submit == selector
                && self.typed.get(&gate.input).map(String::as_str) == Some(gate.password.as_str())
            {
                self.current = gate.unlocked.clone();
            }
        }
        if let Some((dir, files)) = self.downloads.get(selector) {
            for (name, bytes) in files {
                std::fs::write(dir.join(name), bytes)
                    .map_err(|e| BrowserError::Protocol(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.actions.push("close".to_string());
        Ok(())
    }
}

/// Launcher handing out clones of a page set.
pub(crate) struct FakeLauncher {
    pub pages: Vec<(String, String)>,
    pub crash: bool,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>> {
        let mut browser = FakeBrowser::new();
        for (url, html) in &self.pages {
            browser = browser.with_page(url, html);
        }
        if self.crash {
            browser = browser.crashing();
        }
        Ok(Box::new(browser))
    }
}
