//! Extraction pipeline
//!
//! A pipeline turns the raw content of one listing page into a
//! `ListingRecord`. It runs in three stages:
//!
//! 1. pre-hooks clean the raw content (stripping irrelevant sections)
//! 2. post-hooks run strictly in registration order, each reading the
//!    cleaned content and the record built so far
//! 3. cleanup removes the temporary raw-content key
//!
//! A failing hook never aborts the page: the record is rolled back to what it
//! was before that hook ran and a `HookWarning` is recorded.

use crate::record::{ListingRecord, RAW_CONTENT_KEY};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of a single hook
#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Message(String),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl HookError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// A hook failure that was recovered from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookWarning {
    pub hook: String,
    pub message: String,
}

/// A post-processing step
///
/// Hooks read the cleaned page content and the record built so far, and
/// update the record in place.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, record: &mut ListingRecord, html: &str) -> Result<(), HookError>;
}

/// A post-processing step that never suspends
///
/// Registered through `PipelineBuilder::post_sync`, which wraps it once so the
/// pipeline only ever deals with `Hook`.
pub trait SyncHook: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, record: &mut ListingRecord, html: &str) -> Result<(), HookError>;
}

/// A content-cleaning step run before any field extraction
pub trait PreHook: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, html: &str) -> Result<String, HookError>;
}

struct SyncAdapter<H>(H);

#[async_trait]
impl<H: SyncHook> Hook for SyncAdapter<H> {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn apply(&self, record: &mut ListingRecord, html: &str) -> Result<(), HookError> {
        self.0.apply(record, html)
    }
}

/// A synchronous hook backed by a closure
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&mut ListingRecord, &str) -> Result<(), HookError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> SyncHook for FnHook<F>
where
    F: Fn(&mut ListingRecord, &str) -> Result<(), HookError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, record: &mut ListingRecord, html: &str) -> Result<(), HookError> {
        (self.f)(record, html)
    }
}

/// Result of running a pipeline over one page
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: ListingRecord,
    pub warnings: Vec<HookWarning>,
}

/// An ordered chain of hooks for one site
pub struct Pipeline {
    pre: Vec<Box<dyn PreHook>>,
    post: Vec<Box<dyn Hook>>,
}

/// Builds a fresh pipeline for every page
pub type PipelineFactory = Arc<dyn Fn() -> Pipeline + Send + Sync>;

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Number of registered post-hooks
    pub fn len(&self) -> usize {
        self.post.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty()
    }

    /// Runs every hook over the page content
    ///
    /// # Arguments
    ///
    /// * `link` - URL of the page, stored as the record's natural key
    /// * `html` - Raw page content
    ///
    /// # Returns
    ///
    /// The finished record (never containing the raw-content key) and the
    /// warnings of any hook that failed.
    pub async fn run(&self, link: &str, html: &str) -> Extraction {
        let mut warnings = Vec::new();

        let mut content = html.to_string();
        for hook in &self.pre {
            match hook.apply(&content) {
                Ok(cleaned) => content = cleaned,
                Err(e) => {
                    warn!("Pre-hook {} failed for {}: {}", hook.name(), link, e);
                    warnings.push(HookWarning {
                        hook: hook.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let mut record = ListingRecord::new(link);
        record.set(RAW_CONTENT_KEY, content);

        for hook in &self.post {
            if let Err(warning) = apply_isolated(hook.as_ref(), &mut record, link).await {
                warnings.push(warning);
            }
        }

        // cleanup
        record.remove(RAW_CONTENT_KEY);

        Extraction { record, warnings }
    }
}

/// Applies one hook, rolling the record back if it fails
async fn apply_isolated(
    hook: &dyn Hook,
    record: &mut ListingRecord,
    link: &str,
) -> Result<(), HookWarning> {
    let html = match record.remove(RAW_CONTENT_KEY) {
        Some(Value::String(html)) if !html.is_empty() => html,
        _ => {
            debug!("No page content for hook {} on {}", hook.name(), link);
            return Ok(());
        }
    };

    let snapshot = record.clone();
    let result = hook.apply(record, &html).await;
    if result.is_err() {
        *record = snapshot;
    }
    record.set(RAW_CONTENT_KEY, html);

    result.map_err(|e| {
        warn!("Hook {} failed for {}: {}", hook.name(), link, e);
        HookWarning {
            hook: hook.name().to_string(),
            message: e.to_string(),
        }
    })
}

/// Registers hooks in order
#[derive(Default)]
pub struct PipelineBuilder {
    pre: Vec<Box<dyn PreHook>>,
    post: Vec<Box<dyn Hook>>,
}

impl PipelineBuilder {
    pub fn pre(mut self, hook: impl PreHook + 'static) -> Self {
        self.pre.push(Box::new(hook));
        self
    }

    pub fn post(mut self, hook: impl Hook + 'static) -> Self {
        self.post.push(Box::new(hook));
        self
    }

    pub fn post_sync(mut self, hook: impl SyncHook + 'static) -> Self {
        self.post.push(Box::new(SyncAdapter(hook)));
        self
    }

    pub fn post_fn<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&mut ListingRecord, &str) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.post_sync(FnHook::new(name, f))
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            pre: self.pre,
            post: self.post,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl PreHook for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn apply(&self, html: &str) -> Result<String, HookError> {
            Ok(html.to_uppercase())
        }
    }

    struct Broken;

    impl PreHook for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn apply(&self, _html: &str) -> Result<String, HookError> {
            Err(HookError::msg("cannot clean"))
        }
    }

    struct SlowAppend(&'static str);

    #[async_trait]
    impl Hook for SlowAppend {
        fn name(&self) -> &str {
            "slow-append"
        }

        async fn apply(&self, record: &mut ListingRecord, _html: &str) -> Result<(), HookError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let trail = record.get_str("trail").unwrap_or("").to_string();
            record.set("trail", format!("{}{}", trail, self.0));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_hook_is_isolated() {
        let pipeline = Pipeline::builder()
            .post_fn("a", |record, _| {
                record.set("x", 1);
                Ok(())
            })
            .post_fn("b", |record, _| {
                record.set("z", 3);
                Err(HookError::msg("boom"))
            })
            .post_fn("c", |record, _| {
                record.set("y", 2);
                Ok(())
            })
            .build();

        let extraction = pipeline.run("https://example.com/1", "<html></html>").await;
        let record = extraction.record;

        assert!(record.contains("x"));
        assert!(record.contains("y"));
        assert!(!record.contains("z"));
        assert!(!record.contains(RAW_CONTENT_KEY));
        assert_eq!(record.link(), Some("https://example.com/1"));
        assert_eq!(
            extraction.warnings,
            vec![HookWarning {
                hook: "b".to_string(),
                message: "boom".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_sync_and_async_hooks_keep_order() {
        let pipeline = Pipeline::builder()
            .post(SlowAppend("a"))
            .post_fn("b", |record, _| {
                let trail = record.get_str("trail").unwrap_or("").to_string();
                record.set("trail", format!("{}b", trail));
                Ok(())
            })
            .post(SlowAppend("c"))
            .build();

        let record = pipeline.run("u", "content").await.record;
        assert_eq!(record.get_str("trail"), Some("abc"));
    }

    #[tokio::test]
    async fn test_pre_hooks_feed_post_hooks() {
        let pipeline = Pipeline::builder()
            .pre(Upper)
            .pre(Broken)
            .post_fn("copy", |record, html| {
                record.set("seen", html);
                Ok(())
            })
            .build();

        let extraction = pipeline.run("u", "abc").await;
        assert_eq!(extraction.record.get_str("seen"), Some("ABC"));
        assert_eq!(extraction.warnings.len(), 1);
        assert_eq!(extraction.warnings[0].hook, "broken");
    }

    #[tokio::test]
    async fn test_hook_cannot_leak_raw_content() {
        let pipeline = Pipeline::builder()
            .post_fn("clobber", |record, _| {
                record.set(RAW_CONTENT_KEY, "other");
                Ok(())
            })
            .post_fn("read", |record, html| {
                record.set("len", html.len() as i64);
                Ok(())
            })
            .build();

        let record = pipeline.run("u", "12345").await.record;
        assert_eq!(record.get_i64("len"), Some(5));
        assert!(!record.contains(RAW_CONTENT_KEY));
    }

    #[tokio::test]
    async fn test_empty_content_skips_hooks() {
        let pipeline = Pipeline::builder()
            .post_fn("never", |_, _| Err(HookError::msg("should not run")))
            .build();

        let extraction = pipeline.run("u", "").await;
        assert!(extraction.warnings.is_empty());
        assert_eq!(extraction.record.len(), 1);
    }

    #[tokio::test]
    async fn test_factory_builds_independent_pipelines() {
        let factory: PipelineFactory = Arc::new(|| {
            Pipeline::builder()
                .post_fn("mark", |record, html| {
                    record.set("body", html);
                    Ok(())
                })
                .build()
        });

        let (first, second) = tokio::join!(
            async { factory().run("a", "one").await },
            async { factory().run("b", "two").await }
        );

        assert_eq!(first.record.get_str("body"), Some("one"));
        assert_eq!(second.record.get_str("body"), Some("two"));
    }
}
