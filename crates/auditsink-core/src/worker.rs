//! The writer loop: the single consumer of the work queue.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::error::WriterError;
use crate::queue::BoundedWorkQueue;
use crate::registry::FileHandleRegistry;

/// Spawn `f` on a thread called `name`.
///
/// The thread runs under the tracing dispatcher current on the caller, so a
/// scoped subscriber active around `start()` also sees background output.
pub(crate) fn spawn_named<F>(name: String, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(Clone::clone);
    thread::Builder::new()
        .name(name)
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

/// Drain `queue` into `registry` until the queue is shut down.
///
/// Failures are logged with the record's correlation id and never end the
/// loop. A panic inside a handle is contained to the record being written.
pub fn run_writer_loop(queue: &BoundedWorkQueue, registry: &FileHandleRegistry) {
    info!(queue_capacity = queue.capacity(), "Audit writer loop started");

    while let Some(request) = queue.take() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            registry.write(request.target(), request.correlation_id(), request.payload())
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log_write_failure(&err),
            Err(_) => error!(
                path = %request.target().display(),
                correlation_id = request.correlation_id(),
                "Audit write panicked for query {}; record dropped",
                request.correlation_id()
            ),
        }

        queue.complete();
    }

    debug!("Audit writer loop exiting");
}

fn log_write_failure(err: &WriterError) {
    let correlation_id = err.correlation_id().unwrap_or_default();
    let path = err.path().map(|p| p.display().to_string()).unwrap_or_default();
    error!(
        kind = err.kind(),
        correlation_id,
        path = %path,
        error = %err,
        "Error writing audit log for query {correlation_id}"
    );
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::record::{SerializedLog, WriteRequest};
    use crate::testing::{CapturedLogs, RecordingHandleFactory};

    fn request(path: &str, id: &str, payload: &str) -> WriteRequest {
        WriteRequest::new(path, SerializedLog::new(id, payload))
    }

    #[test]
    fn spawn_named_sets_thread_name() {
        let handle = spawn_named("audit-writer-test".to_string(), || {
            assert_eq!(thread::current().name(), Some("audit-writer-test"));
        })
        .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn spawned_thread_inherits_scoped_subscriber() {
        let logs = CapturedLogs::new();
        tracing::subscriber::with_default(logs.subscriber(), || {
            spawn_named("inherit".to_string(), || tracing::error!("from background"))
                .unwrap()
                .join()
                .unwrap();
        });
        assert!(logs.contents().contains("from background"));
    }

    #[test]
    fn loop_continues_past_failures_and_exits_on_shutdown() {
        let factory = RecordingHandleFactory::new();
        factory.fail_open("/bad", RecordingHandleFactory::ALWAYS);
        let registry = Arc::new(FileHandleRegistry::new(Arc::new(factory.clone())));
        let queue = Arc::new(BoundedWorkQueue::new(16));

        queue.offer(request("/bad", "q-bad", "lost")).unwrap();
        queue.offer(request("/good", "q-good", "kept")).unwrap();

        let logs = CapturedLogs::new();
        let worker = tracing::subscriber::with_default(logs.subscriber(), || {
            let queue = Arc::clone(&queue);
            let registry = Arc::clone(&registry);
            spawn_named("loop".to_string(), move || run_writer_loop(&queue, &registry)).unwrap()
        });

        assert!(queue.wait_drained(Duration::from_secs(5)));
        queue.shutdown();
        worker.join().unwrap();

        assert_eq!(factory.handles_for("/good")[0].writes, vec!["kept"]);
        assert!(factory.handles_for("/bad").is_empty());
        let errors = logs.error_lines();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("q-bad"));
        assert!(errors[0].contains("kind=\"open\""));
        assert!(registry.contains(Path::new("/good")));
    }
}
