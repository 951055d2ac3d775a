//! Deferred, once-only backend construction
//!
//! Model backends are expensive to bring up. [`LazyTool`] defers that cost
//! to first use and guarantees the constructor runs at most once even when
//! several workers race on the first call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};
use tracing::info;

use super::dispatch::{Answerer, Detector, EditRequest, Editor, Segmenter};
use super::result::{BoundingBox, Image};

type InitFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;
type InitFn<T> = Box<dyn Fn() -> InitFuture<T> + Send + Sync>;

pub struct LazyTool<T> {
    name: String,
    cell: OnceCell<Arc<T>>,
    init: InitFn<T>,
    /// Last construction error, kept so callers see why the tool is missing
    last_error: Mutex<Option<String>>,
}

impl<T: Send + Sync + 'static> LazyTool<T> {
    pub fn new<F, Fut>(name: impl Into<String>, init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            cell: OnceCell::new(),
            init: Box::new(move || Box::pin(init())),
            last_error: Mutex::new(None),
        }
    }

    /// The backend, constructing it on first call
    ///
    /// A failed construction is not cached; the next caller retries.
    pub async fn get(&self) -> Result<Arc<T>> {
        let result = self
            .cell
            .get_or_try_init(|| async {
                info!(tool = %self.name, "initializing backend");
                (self.init)().await.map(Arc::new)
            })
            .await;

        match result {
            Ok(backend) => Ok(backend.clone()),
            Err(e) => {
                let message = format!("{:#}", e);
                *self.last_error.lock().await = Some(message.clone());
                Err(anyhow!("backend '{}' failed to initialize: {}", self.name, message))
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.lock().await.clone()
    }
}

#[async_trait]
impl<T: Detector + 'static> Detector for LazyTool<T> {
    async fn detect(&self, image: &Image, query: &str) -> Result<Option<BoundingBox>> {
        self.get().await?.detect(image, query).await
    }
}

#[async_trait]
impl<T: Segmenter + 'static> Segmenter for LazyTool<T> {
    async fn segment(&self, image: &Image, bbox: &BoundingBox) -> Result<Image> {
        self.get().await?.segment(image, bbox).await
    }
}

#[async_trait]
impl<T: Editor + 'static> Editor for LazyTool<T> {
    async fn edit(&self, request: EditRequest<'_>) -> Result<Image> {
        self.get().await?.edit(request).await
    }
}

#[async_trait]
impl<T: Answerer + 'static> Answerer for LazyTool<T> {
    async fn answer(&self, image: &Image, question: &str) -> Result<String> {
        self.get().await?.answer(image, question).await
    }
}
