//! Cancellable streamed responses.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::QueryError;
use super::query::QueryId;
use crate::runtime::FragmentStream;

/// Shared flag that stops a [`QueryStream`]. Clone it to cancel from
/// another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
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

/// Lazy, finite, non-restartable sequence of response fragments.
///
/// Ends after cancellation, after the runtime's completion marker, or after
/// a single error item. Dropping it (or cancelling and then reading once)
/// releases the underlying connection.
pub struct QueryStream {
    id: QueryId,
    model: String,
    inner: Option<FragmentStream>,
    cancel: CancelHandle,
}

impl QueryStream {
    pub(crate) fn new(id: QueryId, model: String, inner: FragmentStream) -> Self {
        Self {
            id,
            model,
            inner: Some(inner),
            cancel: CancelHandle::new(),
        }
    }

    pub fn id(&self) -> &QueryId {
        &self.id
    }

    /// The model that is serving this stream.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the remaining fragments into one string.
    pub fn collect_text(self) -> Result<String, QueryError> {
        let mut text = String::new();
        for fragment in self {
            text.push_str(&fragment?);
        }
        Ok(text)
    }

    fn release(&mut self) {
        if self.inner.take().is_some() {
            log::debug!("Released stream for query {}", self.id);
        }
    }
}

impl Iterator for QueryStream {
    type Item = Result<String, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            self.release();
            return None;
        }
        let item = self.inner.as_mut()?.next();
        match item {
            Some(Ok(_)) if self.cancel.is_cancelled() => {
                self.release();
                None
            }
            Some(Ok(fragment)) => Some(Ok(fragment)),
            Some(Err(e)) => {
                log::warn!("Stream for query {} failed: {}", self.id, e);
                self.release();
                Some(Err(QueryError::ModelUnavailable(e.to_string())))
            }
            None => {
                self.release();
                None
            }
        }
    }
}

impl fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStream")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("open", &self.inner.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeError;

    fn stream_of(items: Vec<Result<String, RuntimeError>>) -> QueryStream {
        QueryStream::new(QueryId::new(), "m".to_string(), Box::new(items.into_iter()))
    }

    #[test]
    fn yields_fragments_in_order() {
        let stream = stream_of(vec![Ok("a".into()), Ok("b".into())]);
        let items: Vec<_> = stream.collect();
        assert_eq!(items, vec![Ok("a".to_string()), Ok("b".to_string())]);
    }

    #[test]
    fn error_is_yielded_once_then_fused() {
        let mut stream = stream_of(vec![
            Ok("a".into()),
            Err(RuntimeError::Truncated),
            Ok("never".into()),
        ]);
        assert_eq!(stream.next(), Some(Ok("a".to_string())));
        assert!(matches!(stream.next(), Some(Err(QueryError::ModelUnavailable(_)))));
        assert_eq!(stream.next(), None);
        assert_eq!(stream.next(), None);
    }

    #[test]
    fn cancel_before_first_read_yields_nothing() {
        let mut stream = stream_of(vec![Ok("a".into())]);
        stream.cancel();
        assert_eq!(stream.next(), None);
    }

    #[test]
    fn cancel_from_handle_stops_delivery() {
        let mut stream = stream_of(vec![Ok("a".into()), Ok("b".into()), Ok("c".into())]);
        let handle = stream.cancel_handle();
        assert_eq!(stream.next(), Some(Ok("a".to_string())));
        handle.cancel();
        assert_eq!(stream.next(), None);
        assert!(format!("{:?}", stream).contains("open: false"));
    }

    #[test]
    fn collect_text_concatenates() {
        let stream = stream_of(vec![Ok("4".into()), Ok(".".into())]);
        assert_eq!(stream.collect_text(), Ok("4.".to_string()));
    }

    #[test]
    fn collect_text_surfaces_error() {
        let stream = stream_of(vec![Ok("4".into()), Err(RuntimeError::Truncated)]);
        assert!(stream.collect_text().is_err());
    }
}
