//! Host Driver
//!
//! The host is the outside world's entry point into a tree. It owns the
//! [`Runtime`] and an event queue, and enforces the one rule every host must
//! follow: flush after each discrete event.
//!
//! # Loop
//!
//! 1. Flush once on start, so effects registered while building the tree
//!    run their first time.
//! 2. Take the next urgent event, run it, flush.
//! 3. When no urgent event is waiting and a transition is queued, apply it
//!    with [`Runtime::flush_transitions`].
//! 4. Stop on [`HostHandle::shutdown`], when every handle is gone, or on the
//!    first error. The tree is unmounted in every case.
//!
//! Async work (timers, fetches) runs on the same thread, typically through
//! `tokio::task::spawn_local`, and reports back by sending an event through
//! a cloned [`HostHandle`].

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::error::Result;
use crate::reactive::{FlushReport, Runtime};

/// A unit of external input, applied between two flushes.
pub type HostEvent = Box<dyn FnOnce() -> Result<()>>;

enum Message {
    Event(HostEvent),
    Shutdown,
}

/// Sending side of a host's event queue.
#[derive(Clone)]
pub struct HostHandle {
    tx: UnboundedSender<Message>,
}

impl HostHandle {
    /// Queue `event`. Returns false if the host has already stopped.
    pub fn send<F>(&self, event: F) -> bool
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        self.tx.send(Message::Event(Box::new(event))).is_ok()
    }

    /// Ask the host to stop after the events queued before this call.
    pub fn shutdown(&self) -> bool {
        self.tx.send(Message::Shutdown).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What a host run did, summed over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSummary {
    /// Urgent events applied.
    pub events: usize,
    /// Low-priority flushes that applied a transition.
    pub transitions: usize,
    /// Flush and unmount reports, merged.
    pub report: FlushReport,
}

/// Drives one tree from an event queue.
pub struct Host {
    runtime: Runtime,
    tx: UnboundedSender<Message>,
    rx: UnboundedReceiver<Message>,
}

impl Host {
    pub fn new(runtime: Runtime) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { runtime, tx, rx }
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Run until shutdown, then unmount the tree.
    ///
    /// The first error from an event or a flush stops the loop. The tree is
    /// still unmounted before the error is returned.
    pub async fn run(self) -> Result<HostSummary> {
        let Host { runtime, tx, mut rx } = self;
        // Only external handles keep the queue open.
        drop(tx);

        let mut summary = HostSummary::default();
        let outcome = drive(&runtime, &mut rx, &mut summary).await;
        rx.close();

        match runtime.unmount() {
            Ok(report) => summary.report.merge(report),
            Err(err) => warn!(tree = %runtime.config().label, error = %err, "unmount after host stop failed"),
        }

        match outcome {
            Ok(()) => {
                debug!(
                    tree = %runtime.config().label,
                    events = summary.events,
                    transitions = summary.transitions,
                    "host stopped"
                );
                Ok(summary)
            }
            Err(err) => {
                warn!(tree = %runtime.config().label, events = summary.events, error = %err, "host stopped on error");
                Err(err)
            }
        }
    }
}

async fn drive(
    runtime: &Runtime,
    rx: &mut UnboundedReceiver<Message>,
    summary: &mut HostSummary,
) -> Result<()> {
    summary.report.merge(runtime.flush()?);

    loop {
        let message = match rx.try_recv() {
            Ok(message) => message,
            Err(TryRecvError::Empty) => {
                if runtime.has_pending_transition() {
                    summary.report.merge(runtime.flush_transitions()?);
                    summary.transitions += 1;
                    continue;
                }
                match rx.recv().await {
                    Some(message) => message,
                    None => return Ok(()),
                }
            }
            Err(TryRecvError::Disconnected) => return Ok(()),
        };

        match message {
            Message::Shutdown => return Ok(()),
            Message::Event(event) => {
                summary.events += 1;
                event()?;
                summary.report.merge(runtime.flush()?);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;
    use crate::error::ReactiveError;
    use crate::reactive::{Cell, Effect};

    #[tokio::test]
    async fn host_flushes_after_each_event() {
        let rt = Runtime::new();
        let count = Cell::new(&rt, 0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (c, s) = (count.clone(), seen.clone());
        Effect::new(&rt, &[&count], move || {
            s.borrow_mut().push(c.read());
            None
        });

        let host = Host::new(rt.clone());
        let handle = host.handle();
        for _ in 0..2 {
            let c = count.clone();
            assert!(handle.send(move || c.update(|n| n + 1)));
        }
        drop(handle);

        let summary = host.run().await.unwrap();
        assert_eq!(summary.events, 2);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
        assert_eq!(summary.report.effects_run, 3);
        assert!(!rt.is_mounted());
    }

    #[tokio::test]
    async fn transitions_wait_for_drained_queue() {
        let rt = Runtime::new();
        let input = Cell::new(&rt, String::new());
        let list = Cell::new(&rt, Vec::<String>::new());

        let host = Host::new(rt.clone());
        let handle = host.handle();
        for text in ["a", "ab"] {
            let (i, l, r) = (input.clone(), list.clone(), rt.clone());
            handle.send(move || {
                i.write(text.to_string())?;
                r.start_transition(|| {
                    let _ = l.write(vec![text.to_string(); 2]);
                })
            });
        }
        handle.shutdown();

        let summary = host.run().await.unwrap();
        assert_eq!(summary.events, 2);
        // Shutdown was queued behind both events, so no idle moment occurred.
        assert_eq!(summary.transitions, 0);
        assert_eq!(input.read(), "ab");
        assert!(list.read().is_empty());
    }

    #[tokio::test]
    async fn idle_host_applies_latest_transition() {
        let rt = Runtime::new();
        let list = Cell::new(&rt, String::new());

        let host = Host::new(rt.clone());
        let handle = host.handle();
        for text in ["a", "ab", "abc"] {
            let (l, r) = (list.clone(), rt.clone());
            handle.send(move || {
                r.start_transition(|| {
                    let _ = l.write(text.to_string());
                })
            });
        }

        let observed = Rc::new(RefCell::new(None));
        let local = tokio::task::LocalSet::new();
        let (l, o) = (list.clone(), observed.clone());
        let summary = local
            .run_until(async move {
                tokio::task::spawn_local(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    handle.send(move || {
                        *o.borrow_mut() = Some((l.read(), l.version()));
                        Ok(())
                    });
                });
                host.run().await
            })
            .await
            .unwrap();

        assert_eq!(summary.events, 4);
        assert_eq!(summary.transitions, 1);
        assert_eq!(*observed.borrow(), Some(("abc".to_string(), 1)));
    }

    #[tokio::test]
    async fn event_error_stops_host_and_unmounts() {
        let rt = Runtime::new();
        let count = Cell::new(&rt, 0);

        let host = Host::new(rt.clone());
        let handle = host.handle();
        handle.send(|| Err(ReactiveError::callback("boom")));
        let c = count.clone();
        handle.send(move || c.write(5));
        drop(handle);

        let err = host.run().await.unwrap_err();
        assert_eq!(err, ReactiveError::callback("boom"));
        assert_eq!(count.read(), 0);
        assert!(!rt.is_mounted());
    }

    #[tokio::test]
    async fn handle_reports_stopped_host() {
        let rt = Runtime::new();
        let host = Host::new(rt);
        let handle = host.handle();
        handle.shutdown();

        host.run().await.unwrap();
        assert!(handle.is_closed());
        assert!(!handle.send(|| Ok(())));
    }
}
