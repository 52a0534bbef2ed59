//! IDLE (RFC 2177).
//!
//! [`IdleSession::wait_for_new_messages`] holds an IDLE command open on the
//! folder's connection until the server reports a change, the refresh
//! interval elapses, or [`IdleSession::stop_waiting`] is called from
//! another task. DONE is written exactly once per IDLE however many of
//! those happen at the same time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, trace};

use super::{Folder, OpenMode};
use crate::command::Command;
use crate::connection::{Connector, ImapConnection};
use crate::{Error, Result};

/// Why an IDLE ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The server reported new, removed or changed messages.
    Changed,
    /// [`IdleSession::stop_waiting`] was called.
    Stopped,
    /// The refresh interval elapsed without news.
    Refresh,
}

enum Event {
    Readable,
    Stop,
    Refresh,
}

/// Clears the idling flag when the IDLE ends, however it ends.
struct IdlingGuard<'a>(&'a AtomicBool);

impl Drop for IdlingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// IDLE state for one folder and one listener.
///
/// Stopping is final: once [`IdleSession::stop_waiting`] was called, every
/// later wait returns [`IdleOutcome::Stopped`] at once.
pub struct IdleSession<C> {
    folder: Folder<C>,
    idling: AtomicBool,
    stop_requested: AtomicBool,
    done_sent: AtomicBool,
    stop: Notify,
}

impl<C> std::fmt::Debug for IdleSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleSession")
            .field("folder", &self.folder.inner.name)
            .field("idling", &self.idling.load(Ordering::Relaxed))
            .field("stop_requested", &self.stop_requested.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C: Connector> IdleSession<C> {
    pub(crate) fn new(folder: Folder<C>) -> Self {
        Self {
            folder,
            idling: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            done_sent: AtomicBool::new(false),
            stop: Notify::new(),
        }
    }

    /// The folder being watched.
    #[must_use]
    pub const fn folder(&self) -> &Folder<C> {
        &self.folder
    }

    /// Returns true while an IDLE command is outstanding.
    #[must_use]
    pub fn is_idling(&self) -> bool {
        self.idling.load(Ordering::Acquire)
    }

    /// Opens the folder read-only and idles until something happens.
    ///
    /// `on_started` runs once the server has accepted IDLE.
    ///
    /// # Errors
    ///
    /// - [`Error::PushNotSupported`] if the server lacks IDLE.
    /// - [`Error::AlreadyIdling`] if another task is waiting on this session.
    /// - Open, protocol and transport errors; the connection is dropped on
    ///   the latter.
    pub async fn wait_for_new_messages<F>(&self, on_started: F) -> Result<IdleOutcome>
    where
        F: FnOnce() + Send,
    {
        if self
            .idling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyIdling(self.folder.inner.name.clone()));
        }
        let _guard = IdlingGuard(&self.idling);
        if self.stop_requested.load(Ordering::Acquire) {
            return Ok(IdleOutcome::Stopped);
        }
        self.done_sent.store(false, Ordering::Release);

        self.folder.open(OpenMode::ReadOnly).await?;
        let inner = &self.folder.inner;
        let mut session = inner.session.lock().await;
        let conn = session.connection(&inner.name).await?;
        if !conn.has_capability("IDLE") {
            return Err(Error::PushNotSupported);
        }
        let settings = conn.settings();
        let (refresh, idle_timeout, read_timeout) = (
            settings.idle_refresh,
            settings.idle_read_timeout(),
            settings.read_timeout,
        );

        conn.set_read_timeout(Some(idle_timeout));
        let result = self.idle(conn, refresh, on_started).await;
        if let Some(conn) = session.connection.as_mut() {
            conn.set_read_timeout(Some(read_timeout));
        }
        session.settle().await;
        debug!(folder = %inner.name, ?result, "IDLE finished");
        result
    }

    async fn idle<F>(
        &self,
        conn: &mut ImapConnection,
        refresh: Duration,
        on_started: F,
    ) -> Result<IdleOutcome>
    where
        F: FnOnce() + Send,
    {
        let state = &self.folder.inner.state;
        let tag = conn.send_command(&Command::Idle).await?;
        let mut on_started = Some(on_started);
        let mut started = false;
        let mut outcome = None;
        let mut refresh_fired = false;
        let refresh_timer = tokio::time::sleep(refresh);
        tokio::pin!(refresh_timer);

        loop {
            let event = tokio::select! {
                ready = conn.wait_readable() => {
                    ready?;
                    Event::Readable
                }
                () = self.stop.notified() => Event::Stop,
                () = &mut refresh_timer, if !refresh_fired => {
                    refresh_fired = true;
                    Event::Refresh
                }
            };

            match event {
                Event::Readable => {
                    let response = conn.read_response().await?;
                    trace!(%response, "idle");
                    if response.is_continuation() {
                        started = true;
                        if let Some(callback) = on_started.take() {
                            callback();
                        }
                        if self.stop_requested.load(Ordering::Acquire) {
                            outcome.get_or_insert(IdleOutcome::Stopped);
                        } else if refresh_fired {
                            outcome.get_or_insert(IdleOutcome::Refresh);
                        }
                        if outcome.is_some() {
                            self.send_done(conn).await?;
                        }
                    } else if let Some(got) = response.tag() {
                        if got != tag {
                            return Err(Error::Parse(format!("expected tag {tag}, got {got}")));
                        }
                        return Ok(outcome.unwrap_or(IdleOutcome::Refresh));
                    } else if state.apply(&response) {
                        outcome.get_or_insert(IdleOutcome::Changed);
                        if started {
                            self.send_done(conn).await?;
                        }
                    }
                }
                // Before `+` the stop is picked up by the continuation branch.
                Event::Stop if started => {
                    outcome.get_or_insert(IdleOutcome::Stopped);
                    self.send_done(conn).await?;
                }
                Event::Refresh if started => {
                    outcome.get_or_insert(IdleOutcome::Refresh);
                    self.send_done(conn).await?;
                }
                Event::Stop | Event::Refresh => {}
            }
        }
    }

    async fn send_done(&self, conn: &mut ImapConnection) -> Result<()> {
        if self
            .done_sent
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            conn.write_raw(b"DONE\r\n").await?;
        }
        Ok(())
    }

    /// Asks a running wait to end; it returns [`IdleOutcome::Stopped`].
    /// Safe to call any number of times from any task.
    pub fn stop_waiting(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop.notify_one();
    }

    /// Returns true once [`IdleSession::stop_waiting`] was called.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::oneshot;

    use super::*;
    use crate::testing::{greeted, store};

    fn examine(builder: &mut tokio_test::io::Builder) -> &mut tokio_test::io::Builder {
        builder
            .write(b"A0001 EXAMINE \"INBOX\"\r\n")
            .read(b"* 5 EXISTS\r\nA0001 OK [READ-ONLY] done\r\n")
    }

    #[tokio::test]
    async fn test_push_not_supported() {
        let mock = examine(&mut greeted("")).build();
        let store = store(mock);
        let idle = store.folder("INBOX").idle_session();

        let err = idle.wait_for_new_messages(|| {}).await.unwrap_err();
        assert!(matches!(err, Error::PushNotSupported));
        assert!(!idle.is_idling());
    }

    #[tokio::test]
    async fn test_exists_ends_idle_with_change() {
        let mock = examine(&mut greeted("IDLE"))
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* 6 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        let idle = inbox.idle_session();

        let mut started = false;
        let outcome = idle
            .wait_for_new_messages(|| started = true)
            .await
            .unwrap();
        assert_eq!(outcome, IdleOutcome::Changed);
        assert!(started);
        assert_eq!(inbox.message_count(), Some(6));
        assert!(inbox.is_open().await);
    }

    #[tokio::test]
    async fn test_concurrent_stops_send_one_done() {
        let mock = examine(&mut greeted("IDLE"))
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .build();
        let store = store(mock);
        let idle = Arc::new(store.folder("INBOX").idle_session());

        let (started_tx, started_rx) = oneshot::channel();
        let stoppers = {
            let idle = Arc::clone(&idle);
            tokio::spawn(async move {
                started_rx.await.unwrap();
                let handles: Vec<_> = (0..8)
                    .map(|_| {
                        let idle = Arc::clone(&idle);
                        tokio::spawn(async move { idle.stop_waiting() })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap();
                }
            })
        };

        let outcome = idle
            .wait_for_new_messages(move || {
                let _ = started_tx.send(());
            })
            .await
            .unwrap();
        stoppers.await.unwrap();
        assert_eq!(outcome, IdleOutcome::Stopped);

        // Stopping is final.
        let again = idle.wait_for_new_messages(|| {}).await.unwrap();
        assert_eq!(again, IdleOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_stop_from_started_callback() {
        let mock = examine(&mut greeted("IDLE"))
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .build();
        let store = store(mock);
        let idle = store.folder("INBOX").idle_session();

        let outcome = idle
            .wait_for_new_messages(|| idle.stop_waiting())
            .await
            .unwrap();
        assert_eq!(outcome, IdleOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_interval_ends_idle() {
        let mock = examine(&mut greeted("IDLE"))
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .build();
        let store = store(mock);
        let idle = store.folder("INBOX").idle_session();

        let outcome = idle.wait_for_new_messages(|| {}).await.unwrap();
        assert_eq!(outcome, IdleOutcome::Refresh);
    }
}
