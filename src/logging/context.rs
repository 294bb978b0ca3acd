// Request correlation context.
//
// The request id and user id for the current logical operation are carried in
// a task-local scope. Binding is RAII: the values are dropped on every exit
// path, including panics and early errors.

use std::future::Future;

use uuid::Uuid;

/// Correlation identifiers for one logical request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: Option<String>,
}

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Run `fut` inside a request context scope. A missing `request_id` is
/// replaced with a fresh UUID.
pub async fn request_context<F>(
    request_id: Option<String>,
    user_id: Option<String>,
    fut: F,
) -> F::Output
where
    F: Future,
{
    let ctx = RequestContext {
        request_id: request_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        user_id,
    };
    REQUEST_CONTEXT.scope(ctx, fut).await
}

/// The request id of the current scope, if any.
pub fn current_request_id() -> Option<String> {
    REQUEST_CONTEXT.try_with(|ctx| ctx.request_id.clone()).ok()
}

/// The user id of the current scope, if any.
pub fn current_user_id() -> Option<String> {
    REQUEST_CONTEXT
        .try_with(|ctx| ctx.user_id.clone())
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_binds_and_unbinds() {
        assert!(current_request_id().is_none());

        let seen = request_context(Some("req-1".into()), Some("user-1".into()), async {
            (current_request_id(), current_user_id())
        })
        .await;

        assert_eq!(seen.0.as_deref(), Some("req-1"));
        assert_eq!(seen.1.as_deref(), Some("user-1"));
        assert!(current_request_id().is_none());
    }

    #[tokio::test]
    async fn test_missing_request_id_is_generated() {
        let id = request_context(None, None, async { current_request_id() }).await;
        assert!(id.is_some());
        assert!(!id.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_context_unbinds_on_error_path() {
        let result: Result<(), ()> =
            request_context(Some("req-err".into()), None, async { Err(()) }).await;
        assert!(result.is_err());
        assert!(current_request_id().is_none());
    }
}
