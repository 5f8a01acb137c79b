//! Projection worker: a thread that drains a bus subscription into a
//! projection handler.
//!
//! Display reads are eventually consistent, so the worker tolerates lag; it
//! must never corrupt. The handler is required to be idempotent (delivery is
//! at-least-once) and a handler failure is logged and skipped rather than
//! crashing the pump; a cursor-guarded projection turns the skipped event
//! into a visible gap error on the next apply.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use haulbooks_core::TenantId;
use haulbooks_events::{EventBus, Subscription, TenantScoped};

/// Handle to control and join a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Spawns threads that feed projections from a bus subscription.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn a worker thread over a fresh subscription to `bus`.
    ///
    /// When `tenant_id` is given, events for other tenants are ignored;
    /// this lets one tenant's read models be rebuilt in isolation.
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: B,
        tenant_id: Option<TenantId>,
        mut handler: H,
    ) -> WorkerHandle
    where
        M: TenantScoped + Send + 'static,
        B: EventBus<M> + Send + Sync + 'static,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, tenant_id, &mut handler))
            .expect("failed to spawn projection worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    handler: &mut H,
) where
    M: TenantScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(envelope) => {
                if let Some(pinned) = tenant_id {
                    if envelope.tenant_id() != pinned {
                        continue;
                    }
                }

                if let Err(err) = handler(envelope) {
                    warn!(worker = name, error = ?err, "projection handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, mpsc as std_mpsc};

    use haulbooks_events::InMemoryEventBus;

    use super::*;

    #[derive(Debug, Clone)]
    struct TestMessage {
        tenant_id: TenantId,
        value: u32,
    }

    impl TenantScoped for TestMessage {
        fn tenant_id(&self) -> TenantId {
            self.tenant_id
        }
    }

    #[test]
    fn worker_applies_every_message_then_shuts_down() {
        let bus = Arc::new(InMemoryEventBus::<TestMessage>::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = std_mpsc::channel();

        let counter = Arc::clone(&seen);
        let handle =
            ProjectionWorker::spawn("test-worker", Arc::clone(&bus), None, move |_msg| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = done_tx.send(());
                Ok::<(), String>(())
            });

        let tenant = TenantId::new();
        for value in 0..3 {
            bus.publish(TestMessage {
                tenant_id: tenant,
                value,
            })
            .unwrap();
        }
        for _ in 0..3 {
            done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("worker should process the message");
        }

        handle.shutdown();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn pinned_worker_ignores_other_tenants() {
        let bus = Arc::new(InMemoryEventBus::<TestMessage>::new());
        let mine = TenantId::new();
        let theirs = TenantId::new();
        let (seen_tx, seen_rx) = std_mpsc::channel();

        let handle = ProjectionWorker::spawn(
            "pinned-worker",
            Arc::clone(&bus),
            Some(mine),
            move |msg: TestMessage| {
                let _ = seen_tx.send(msg.value);
                Ok::<(), String>(())
            },
        );

        bus.publish(TestMessage {
            tenant_id: theirs,
            value: 1,
        })
        .unwrap();
        bus.publish(TestMessage {
            tenant_id: mine,
            value: 2,
        })
        .unwrap();

        let value = seen_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("pinned tenant's message should arrive");
        assert_eq!(value, 2);

        handle.shutdown();
        assert!(seen_rx.try_recv().is_err());
    }

    #[test]
    fn handler_failure_does_not_stop_the_pump() {
        let bus = Arc::new(InMemoryEventBus::<TestMessage>::new());
        let tenant = TenantId::new();
        let (seen_tx, seen_rx) = std_mpsc::channel();

        let handle = ProjectionWorker::spawn(
            "flaky-worker",
            Arc::clone(&bus),
            None,
            move |msg: TestMessage| {
                let _ = seen_tx.send(msg.value);
                if msg.value == 1 {
                    Err("simulated projection failure".to_string())
                } else {
                    Ok(())
                }
            },
        );

        for value in [1, 2] {
            bus.publish(TestMessage {
                tenant_id: tenant,
                value,
            })
            .unwrap();
        }

        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        handle.shutdown();
    }
}
