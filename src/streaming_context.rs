//! Ambient per-task streaming scope.
//!
//! Code that wants to display tokens as they are generated wraps its work
//! in [`StreamingContext::scope`]. Any prompt function invoked inside that
//! scope with `capture_stream` enabled sends its tokens to the scope's
//! handler. Outside a scope, capture is quietly turned off.

use std::future::Future;
use std::sync::Arc;

use crate::events::EventHandler;

tokio::task_local! {
    static STREAMING_SCOPE: Arc<dyn EventHandler>;
}

/// Entry points for the ambient streaming scope.
///
/// ```
/// use std::sync::Arc;
/// use llm_prompt_fn::events::EventRecorder;
/// use llm_prompt_fn::streaming_context::StreamingContext;
///
/// # tokio_test::block_on(async {
/// assert!(!StreamingContext::is_active());
/// let recorder = EventRecorder::new();
/// StreamingContext::scope(recorder, async {
///     assert!(StreamingContext::is_active());
/// })
/// .await;
/// # });
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StreamingContext;

impl StreamingContext {
    /// Run `fut` with `handler` receiving captured tokens.
    pub async fn scope<F: Future>(handler: Arc<dyn EventHandler>, fut: F) -> F::Output {
        STREAMING_SCOPE.scope(handler, fut).await
    }

    /// Run a closure with `handler` installed on the current thread.
    pub fn sync_scope<R>(handler: Arc<dyn EventHandler>, f: impl FnOnce() -> R) -> R {
        STREAMING_SCOPE.sync_scope(handler, f)
    }

    pub fn is_active() -> bool {
        STREAMING_SCOPE.try_with(|_| ()).is_ok()
    }

    /// The handler of the innermost active scope.
    pub fn current() -> Option<Arc<dyn EventHandler>> {
        STREAMING_SCOPE.try_with(Arc::clone).ok()
    }
}
