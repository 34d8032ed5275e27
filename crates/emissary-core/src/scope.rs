//! Task-local deduplication scope.
//!
//! Search tools use the current scope id to avoid returning the same result
//! twice within one logical user request. Sub-calls spawned inside a scoped
//! future share its id; unrelated tasks see distinct isolated ids.

use std::future::Future;

use uuid::Uuid;

tokio::task_local! {
    static CURRENT_SCOPE: String;
}

fn isolated_scope() -> String {
    format!("isolated-{}", Uuid::new_v4().simple())
}

/// Run `fut` with the given deduplication scope set.
///
/// `None` generates a unique single-use id so the block stays isolated.
pub async fn with_scope<F>(scope_id: Option<String>, fut: F) -> F::Output
where
    F: Future,
{
    let id = scope_id.unwrap_or_else(isolated_scope);
    CURRENT_SCOPE.scope(id, fut).await
}

/// The current scope id, or a fresh isolated id when none is set.
pub fn current_scope() -> String {
    CURRENT_SCOPE
        .try_with(|s| s.clone())
        .unwrap_or_else(|_| isolated_scope())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scope_is_visible_inside_block() {
        let seen = with_scope(Some("session-42".into()), async { current_scope() }).await;
        assert_eq!(seen, "session-42");
    }

    #[tokio::test]
    async fn unset_scope_yields_unique_isolated_ids() {
        let a = current_scope();
        let b = current_scope();
        assert!(a.starts_with("isolated-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn nested_scopes_shadow() {
        let (outer, inner) = with_scope(Some("outer".into()), async {
            let outer = current_scope();
            let inner = with_scope(Some("inner".into()), async { current_scope() }).await;
            (outer, inner)
        })
        .await;
        assert_eq!(outer, "outer");
        assert_eq!(inner, "inner");
    }
}
