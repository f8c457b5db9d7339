//! # Kernel Lifecycle Flows
//!
//! Provisioning, authentication, unit execution and shutdown through the
//! real `HttpTransport` and `WebSocketConnector`.
//!
//! ## Flow
//!
//! 1. `GET /tree` primes the `_xsrf` cookie
//! 2. `POST /api/kernels` creates the context
//! 3. WebSocket `/api/kernels/<id>/channels?session_id=<session>`
//! 4. session + codec declarations, then the unit's code cells
//! 5. `DELETE /api/kernels/<id>` on shutdown

#[cfg(test)]
mod tests {
    use crate::{MockServer, ScriptRunner, XSRF_TOKEN};
    use kb_client::{BridgeError, KernelManager, TransportError};

    // =========================================================================
    // PROVISIONING
    // =========================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_all_runs_units_and_stop_all_deletes() {
        let server = MockServer::builder()
            .runner(ScriptRunner)
            .notebook("calc.ipynb", &["print loading\n", "register add\nregister div"])
            .start()
            .await;
        let manager = KernelManager::new(server.config(&["calc.ipynb"]));

        manager.start_all().await.unwrap();
        assert!(manager.is_running());
        assert_eq!(manager.keys(), vec!["calc.ipynb"]);
        assert_eq!(server.created(), 1);

        let kernel = manager.get("calc.ipynb").await.unwrap();
        assert_eq!(kernel.functions().names(), vec!["add", "div"]);
        assert_eq!(server.created(), 1, "get on a live key must not provision again");

        let context_id = kernel.context_id().unwrap();
        manager.stop_all().await.unwrap();
        assert!(!manager.is_running());
        assert!(!kernel.is_running());
        assert!(kernel.functions().is_empty());
        assert_eq!(server.deleted(), vec![context_id]);
        assert!(server.live_kernels().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_channel_carries_session_and_xsrf_cookie() {
        let server = MockServer::builder().start().await;
        let manager = KernelManager::new(server.config(&[]));

        let kernel = manager.get("any").await.unwrap();
        let channels = server.channels();
        assert_eq!(channels.len(), 1);
        assert_eq!(Some(channels[0].context_id.clone()), kernel.context_id());
        assert_eq!(channels[0].session_id.as_deref(), Some(kernel.session().to_string().as_str()));
        let cookie = channels[0].cookie.clone().unwrap_or_default();
        assert!(cookie.contains(&format!("_xsrf={XSRF_TOKEN}")), "cookie was {cookie:?}");

        manager.stop_all().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_distinct_keys_get_distinct_kernels() {
        let server = MockServer::builder()
            .runner(ScriptRunner)
            .notebook("a.ipynb", &["register add"])
            .notebook("b.ipynb", &["register div"])
            .start()
            .await;
        let manager = KernelManager::new(server.config(&["a.ipynb", "b.ipynb"]));

        manager.start_all().await.unwrap();
        assert_eq!(server.created(), 2);
        assert_eq!(manager.keys(), vec!["a.ipynb", "b.ipynb"]);

        let a = manager.get("a.ipynb").await.unwrap();
        let b = manager.get("b.ipynb").await.unwrap();
        assert_ne!(a.context_id(), b.context_id());
        assert!(a.functions().get("add").is_some());
        assert!(a.functions().get("div").is_none());
        assert!(b.functions().get("div").is_some());

        // start_all resets first
        manager.start_all().await.unwrap();
        assert_eq!(server.created(), 4);
        assert_eq!(server.deleted().len(), 2);
        assert!(!a.is_running());

        manager.stop_all().await.unwrap();
        assert!(server.live_kernels().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_html_start_response_is_provisioning_error() {
        let server = MockServer::builder().start().await;
        server.answer_start_with_html(true);
        let manager = KernelManager::new(server.config(&[]));

        let err = manager.get("unit.ipynb").await.unwrap_err();
        assert!(matches!(err, BridgeError::Provisioning(_)), "got {err:?}");
        assert!(!manager.is_running());

        // a failed start leaves nothing behind, so the next get retries
        server.answer_start_with_html(false);
        let kernel = manager.get("unit.ipynb").await.unwrap();
        assert!(kernel.is_running());
        manager.stop_all().await.unwrap();
    }

    // =========================================================================
    // AUTHENTICATION
    // =========================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_token_authentication() {
        let server = MockServer::builder()
            .token("s3cret")
            .runner(ScriptRunner)
            .notebook("calc.ipynb", &["register add"])
            .start()
            .await;

        let mut config = server.config(&["calc.ipynb"]);
        config.auth.kind = "token".into();
        config.auth.token = Some("s3cret".into());
        let manager = KernelManager::new(config);

        manager.start_all().await.unwrap();
        assert_eq!(server.channels().len(), 1);
        manager.stop_all().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wrong_token_is_auth_failure() {
        let server = MockServer::builder().token("s3cret").start().await;

        let mut config = server.config(&["calc.ipynb"]);
        config.auth.kind = "token".into();
        config.auth.token = Some("wrong".into());
        let manager = KernelManager::new(config);

        let err = manager.start_all().await.unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].0, "calc.ipynb");
        assert!(
            matches!(
                err.failures[0].1,
                BridgeError::Transport(TransportError::Status { status: 403, .. })
            ),
            "got {:?}",
            err.failures[0].1
        );
        assert_eq!(server.created(), 0);
        assert!(!manager.is_running());
    }

    // =========================================================================
    // UNITS
    // =========================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_units_returns_notebooks_only() {
        let server = MockServer::builder()
            .notebook("b.ipynb", &[])
            .notebook("a.ipynb", &[])
            .start()
            .await;
        let manager = KernelManager::new(server.config(&[]));

        assert_eq!(manager.list_units().await.unwrap(), vec!["a.ipynb", "b.ipynb"]);
        assert_eq!(server.created(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_cell_stops_unit_with_remote_error() {
        let server = MockServer::builder()
            .runner(ScriptRunner)
            .notebook_cells(
                "broken.ipynb",
                &[
                    ("code", "register add"),
                    ("markdown", "register concat"),
                    ("code", "raise ValueError: bad cell"),
                    ("code", "register div"),
                ],
            )
            .start()
            .await;
        let manager = KernelManager::new(server.config(&["broken.ipynb"]));

        let err = manager.start_all().await.unwrap_err();
        assert_eq!(err.failures.len(), 1);
        let (unit, failure) = &err.failures[0];
        assert_eq!(unit, "broken.ipynb");
        match failure {
            BridgeError::ExecuteRequest { ename, evalue, traceback } => {
                assert_eq!(ename, "ValueError");
                assert_eq!(evalue, "bad cell");
                assert!(!traceback.is_empty());
            }
            other => panic!("expected ExecuteRequest, got {other:?}"),
        }

        // the kernel itself stays up with what ran before the failure
        let kernel = manager.get("broken.ipynb").await.unwrap();
        assert_eq!(kernel.functions().names(), vec!["add"]);
        manager.stop_all().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_unit_fails_run() {
        let server = MockServer::builder().start().await;
        let manager = KernelManager::new(server.config(&["missing.ipynb"]));

        let err = manager.start_all().await.unwrap_err();
        assert!(matches!(err.failures[0].1, BridgeError::Transport(_)), "got {err:?}");
        manager.stop_all().await.unwrap();
    }
}
