use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use stockflow_core::TenantId;
use stockflow_events::{EventBus, Subscription, TenantScoped};

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// Messages already queued when shutdown is requested are still handled.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                warn!(worker = self.name, "worker thread panicked");
            }
        }
    }
}

/// Bus subscriber running a handler on its own thread.
///
/// The subscription is taken before the thread starts, so nothing published
/// after `spawn` returns is missed.
#[derive(Debug)]
pub struct EventWorker;

impl EventWorker {
    /// - `tenant_id`: when provided, messages for other tenants are ignored
    /// - `handler`: must tolerate redelivery; its errors are logged, never retried
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: TenantScoped + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, tenant_id, &mut handler))?;

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
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
    E: core::fmt::Display,
{
    let tick = Duration::from_millis(100);
    let mut stopping = false;

    loop {
        if !stopping && shutdown_rx.try_recv().is_ok() {
            stopping = true;
        }

        let next = if stopping {
            sub.try_recv().ok()
        } else {
            match sub.recv_timeout(tick) {
                Ok(msg) => Some(msg),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        };

        let Some(msg) = next else {
            // Drained after shutdown.
            break;
        };

        if let Some(t) = tenant_id {
            if msg.tenant_id() != t {
                continue;
            }
        }

        if let Err(err) = handler(msg) {
            warn!(worker = name, error = %err, "worker handler failed");
        }
    }

    debug!(worker = name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use stockflow_events::InMemoryEventBus;

    #[derive(Debug, Clone)]
    struct Msg(TenantId, u32);

    impl TenantScoped for Msg {
        fn tenant_id(&self) -> TenantId {
            self.0
        }
    }

    #[test]
    fn drains_queue_on_shutdown_and_filters_tenants() {
        let bus: InMemoryEventBus<Msg> = InMemoryEventBus::new();
        let (mine, other) = (TenantId::new(), TenantId::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let handle = EventWorker::spawn("test-worker", &bus, Some(mine), move |m: Msg| {
            sink.lock().unwrap().push(m.1);
            Ok::<(), String>(())
        })
        .unwrap();

        for n in 0..5 {
            bus.publish(Msg(mine, n)).unwrap();
            bus.publish(Msg(other, 100 + n)).unwrap();
        }
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn handler_errors_do_not_stop_the_worker() {
        let bus: InMemoryEventBus<Msg> = InMemoryEventBus::new();
        let tenant = TenantId::new();
        let handled = Arc::new(Mutex::new(0u32));

        let count = Arc::clone(&handled);
        let handle = EventWorker::spawn("failing-worker", &bus, None, move |m: Msg| {
            *count.lock().unwrap() += 1;
            if m.1 % 2 == 0 { Err("even".to_string()) } else { Ok(()) }
        })
        .unwrap();

        for n in 0..4 {
            bus.publish(Msg(tenant, n)).unwrap();
        }
        handle.shutdown();

        assert_eq!(*handled.lock().unwrap(), 4);
    }
}
