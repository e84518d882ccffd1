//! Unit tests for watcher supervision

#[cfg(test)]
mod tests {
    use crate::controller::supervise;
    use crate::error::ControllerError;
    use k8s_openapi::api::core::v1::{Pod, Service};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use watch_engine::{
        EngineError, EngineMetrics, KindTask, LoopConfig, LoopState, MockWatchSource, RecordingDispatcher,
        ResourceKind, WatchError, spawn_loop,
    };

    fn meta(name: &str, rv: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            resource_version: Some(rv.to_string()),
            ..Default::default()
        }
    }

    fn pod_task(source: MockWatchSource<Pod>, recorder: &RecordingDispatcher, cancel: &CancellationToken) -> KindTask {
        spawn_loop(
            ResourceKind::Pod,
            source,
            Arc::new(recorder.clone()),
            EngineMetrics::new().unwrap(),
            LoopConfig::default(),
            cancel.child_token(),
        )
    }

    fn service_task(
        source: MockWatchSource<Service>,
        recorder: &RecordingDispatcher,
        cancel: &CancellationToken,
    ) -> KindTask {
        spawn_loop(
            ResourceKind::Service,
            source,
            Arc::new(recorder.clone()),
            EngineMetrics::new().unwrap(),
            LoopConfig::default(),
            cancel.child_token(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_every_watcher() {
        let recorder = RecordingDispatcher::new();
        let cancel = CancellationToken::new();

        let pods = MockWatchSource::new();
        pods.push_list(vec![Pod { metadata: meta("a", "1"), ..Default::default() }], "1");
        let services = MockWatchSource::new();
        services.push_list(vec![Service { metadata: meta("s", "1"), ..Default::default() }], "1");

        let tasks = vec![pod_task(pods, &recorder, &cancel), service_task(services, &recorder, &cancel)];
        let statuses: Vec<_> = tasks.iter().map(|t| t.status.clone()).collect();

        let observer = recorder.clone();
        let stop = async move {
            assert!(observer.wait_for(ResourceKind::Pod, 1, Duration::from_secs(10)).await);
            assert!(observer.wait_for(ResourceKind::Service, 1, Duration::from_secs(10)).await);
            Ok(())
        };

        supervise(tasks, cancel.clone(), stop).await.unwrap();
        assert!(cancel.is_cancelled());
        for status in statuses {
            assert_eq!(status.borrow().state, LoopState::Stopped);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_watcher_stops_the_others() {
        let recorder = RecordingDispatcher::new();
        let cancel = CancellationToken::new();

        let pods = MockWatchSource::new();
        pods.push_list_error(WatchError::Unauthorized("token expired".to_string()));
        let services = MockWatchSource::new();
        services.push_list(vec![Service { metadata: meta("s", "1"), ..Default::default() }], "1");

        let tasks = vec![pod_task(pods, &recorder, &cancel), service_task(services, &recorder, &cancel)];
        let service_status = tasks[1].status.clone();

        let err = supervise(tasks, cancel.clone(), std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Engine(EngineError::Unauthorized { kind: ResourceKind::Pod, .. })
        ));
        assert!(cancel.is_cancelled());
        assert_eq!(service_status.borrow().state, LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_error_is_propagated() {
        let recorder = RecordingDispatcher::new();
        let cancel = CancellationToken::new();
        let pods = MockWatchSource::new();
        pods.push_list(vec![Pod { metadata: meta("a", "1"), ..Default::default() }], "1");
        let tasks = vec![pod_task(pods, &recorder, &cancel)];

        let stop = async { Err(ControllerError::Http("address in use".to_string())) };
        let err = supervise(tasks, cancel, stop).await.unwrap_err();
        assert!(matches!(err, ControllerError::Http(_)));
    }

    #[tokio::test]
    async fn test_no_watchers_is_an_error() {
        let err = supervise(Vec::new(), CancellationToken::new(), std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }
}
