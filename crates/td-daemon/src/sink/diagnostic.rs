//! Diagnostic sink: one log line per event

use std::sync::Arc;

use tokio::task::JoinHandle;

use td_protocol::TouchEvent;

use crate::hub::{SinkCapacity, SinkRegistry};

/// Human-readable description of an event
pub fn render(event: &TouchEvent) -> String {
    if event.waiting {
        format!("{} operation is waiting for a touch", event.source)
    } else {
        format!("{} operation no longer waiting for a touch", event.source)
    }
}

/// Register the diagnostic sink and spawn its logging task.
///
/// The sink is unbounded so the hub never drops an event for it; the task
/// ends when the sink is unregistered.
pub fn spawn_diagnostic_sink(registry: &Arc<SinkRegistry>) -> JoinHandle<()> {
    let mut receiver = registry.register("diagnostic", SinkCapacity::Unlimited);

    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            tracing::info!(
                source = %event.source,
                waiting = event.waiting,
                "{}",
                render(&event)
            );
        }
        tracing::debug!("Diagnostic sink stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use td_protocol::TouchSource;
    use tracing_test::traced_test;

    #[test]
    fn test_render() {
        assert_eq!(
            render(&TouchEvent::started(TouchSource::U2f)),
            "U2F operation is waiting for a touch"
        );
        assert_eq!(
            render(&TouchEvent::stopped(TouchSource::Gpg)),
            "GPG operation no longer waiting for a touch"
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_logs_every_event() {
        let registry = Arc::new(SinkRegistry::new());
        let task = spawn_diagnostic_sink(&registry);
        assert_eq!(registry.names(), vec!["diagnostic".to_string()]);

        registry.fan_out(TouchEvent::started(TouchSource::Ssh));
        registry.fan_out(TouchEvent::stopped(TouchSource::Ssh));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(logs_contain("SSH operation is waiting for a touch"));
        assert!(logs_contain("SSH operation no longer waiting for a touch"));

        task.abort();
    }
}
