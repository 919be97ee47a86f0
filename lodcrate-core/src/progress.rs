//! Progress reporting and cooperative cancellation

use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives progress in `[0, 100]`. Returning `false` requests cancellation.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: f32) -> bool;
}

impl<F: Fn(f32) -> bool + Send + Sync> ProgressObserver for F {
    fn on_progress(&self, progress: f32) -> bool {
        self(progress)
    }
}

/// Observer and cancellation token handed to every engine stage.
///
/// A context covers a slice of the overall progress range; [`sub_range`]
/// narrows it for a nested stage so that each stage can report its own
/// `0..=100` progress.
///
/// [`sub_range`]: ProcessContext::sub_range
#[derive(Clone)]
pub struct ProcessContext {
    observer: Option<Arc<dyn ProgressObserver>>,
    token: CancellationToken,
    start: f32,
    span: f32,
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("has_observer", &self.observer.is_some())
            .field("cancelled", &self.token.is_cancelled())
            .field("start", &self.start)
            .field("span", &self.span)
            .finish()
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessContext {
    pub fn new() -> Self {
        Self {
            observer: None,
            token: CancellationToken::new(),
            start: 0.0,
            span: 100.0,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Context for a stage covering `[from, to]` percent of this one
    pub fn sub_range(&self, from: f32, to: f32) -> Self {
        let from = from.clamp(0.0, 100.0);
        let to = to.clamp(from, 100.0);
        Self {
            observer: self.observer.clone(),
            token: self.token.clone(),
            start: self.start + self.span * from / 100.0,
            span: self.span * (to - from) / 100.0,
        }
    }

    /// Report local progress in `[0, 100]`
    pub fn report(&self, progress: f32) {
        if let Some(observer) = &self.observer {
            let global = self.start + self.span * progress.clamp(0.0, 100.0) / 100.0;
            if !observer.on_progress(global) {
                tracing::debug!("cancellation requested at {:.1}%", global);
                self.token.cancel();
            }
        }
    }

    /// Fail with [`Error::Cancelled`] once cancellation was requested
    pub fn checkpoint(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Report then check for cancellation
    pub fn step(&self, progress: f32) -> Result<()> {
        self.report(progress);
        self.checkpoint()
    }
}
