//! IDLE push monitoring.
//!
//! [`PushManager`] runs one worker task per watched folder. A worker opens
//! the folder read-only, idles until the server reports a change, tells
//! its listener, and starts over. Failures are retried with exponential
//! backoff; a server without IDLE ends the worker after one
//! [`FolderListener::on_listening_not_supported`] call.
//!
//! The [`WakeLock`] is held for each iteration and released once the
//! server has accepted IDLE, so the host may sleep while nothing happens.

mod wake_lock;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use carteggio_imap::{Connector, IdleOutcome, Store, TcpConnector};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use wake_lock::{NoopWakeLock, WakeGuard, WakeLock};

use crate::account::Account;
use crate::store::{Folder, FolderListener};

/// Retry timing for push workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConfig {
    /// Delay after the first failure.
    pub backoff_base: Duration,
    /// The delay doubles on each further failure up to this.
    pub backoff_ceiling: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(5),
            backoff_ceiling: Duration::from_secs(5 * 60),
        }
    }
}

impl PushConfig {
    /// Timing configured on `account`.
    #[must_use]
    pub fn from_account(account: &Account) -> Self {
        Self {
            backoff_base: account.push_backoff_base(),
            backoff_ceiling: account.push_backoff_ceiling().max(account.push_backoff_base()),
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.saturating_mul(2).min(self.backoff_ceiling)
    }
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Watches folders with IDLE and reports changes to listeners.
///
/// Workers use their own [`Store`], so they never hold the connection of
/// a folder the application is querying.
pub struct PushManager<C = TcpConnector> {
    store: Store<C>,
    config: PushConfig,
    wake_lock: Arc<dyn WakeLock>,
    poll: watch::Sender<u64>,
    shutdown: CancellationToken,
    workers: Mutex<HashMap<String, Worker>>,
}

impl<C> std::fmt::Debug for PushManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushManager")
            .field("config", &self.config)
            .field("monitored", &self.monitored())
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<C> PushManager<C> {
    /// Names of the folders with a running worker, sorted.
    #[must_use]
    pub fn monitored(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_workers().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns true if `folder` has a running worker.
    #[must_use]
    pub fn is_monitoring(&self, folder: &str) -> bool {
        self.lock_workers()
            .get(folder)
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Connector + 'static> PushManager<C> {
    /// Creates a manager whose workers connect through `store`.
    #[must_use]
    pub fn new(store: Store<C>, config: PushConfig, wake_lock: Arc<dyn WakeLock>) -> Self {
        let (poll, _) = watch::channel(0);
        Self {
            store,
            config,
            wake_lock,
            poll,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Starts watching `folder`, replacing any worker already watching a
    /// folder of that name. Does nothing after [`PushManager::shutdown`].
    pub fn start<F: Folder>(&self, folder: F, listener: Arc<dyn FolderListener<F>>) {
        if self.shutdown.is_cancelled() {
            debug!(folder = folder.name(), "push manager shut down, not starting");
            return;
        }
        let name = folder.name().to_string();
        let token = self.shutdown.child_token();
        let worker = PushWorker {
            idle_folder: self.store.folder(&name),
            folder,
            listener,
            wake_lock: Arc::clone(&self.wake_lock),
            config: self.config,
            token: token.clone(),
            poll: self.poll.subscribe(),
        };
        let handle = tokio::spawn(worker.run());
        if let Some(previous) = self.lock_workers().insert(name, Worker { token, handle }) {
            // It shares the IDLE session, so the new worker waits for it.
            previous.token.cancel();
        }
    }

    /// Stops watching `folder` and waits for its worker to finish.
    pub async fn stop(&self, folder: &str) {
        let worker = self.lock_workers().remove(folder);
        if let Some(worker) = worker {
            finish(folder, worker).await;
        }
    }

    /// Stops every worker and waits for them to finish.
    pub async fn stop_all(&self) {
        let workers: Vec<(String, Worker)> = self.lock_workers().drain().collect();
        for worker in &workers {
            worker.1.token.cancel();
        }
        for (name, worker) in workers {
            finish(&name, worker).await;
        }
    }

    /// Ends every worker's current IDLE or backoff early, so each reports
    /// its folder as changed and the application can synchronize.
    pub fn poll_now(&self) {
        debug!("push poll requested");
        self.poll.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Stops every worker and closes the workers' connections. Later
    /// [`PushManager::start`] calls are ignored.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.stop_all().await;
        self.store.close().await;
        info!("push manager shut down");
    }
}

impl<C> Drop for PushManager<C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn finish(folder: &str, worker: Worker) {
    worker.token.cancel();
    if let Err(err) = worker.handle.await {
        warn!(folder, %err, "push worker panicked");
    }
}

struct PushWorker<C, F: Folder> {
    idle_folder: carteggio_imap::Folder<C>,
    folder: F,
    listener: Arc<dyn FolderListener<F>>,
    wake_lock: Arc<dyn WakeLock>,
    config: PushConfig,
    token: CancellationToken,
    poll: watch::Receiver<u64>,
}

impl<C: Connector + 'static, F: Folder> PushWorker<C, F> {
    async fn run(mut self) {
        let name = self.folder.name().to_string();
        info!(folder = %name, "push started");
        let mut delay = self.config.backoff_base;

        while !self.token.is_cancelled() {
            let mut held = Some(self.wake_lock.acquire());
            drop(self.poll.borrow_and_update());

            let result = self.idle_once(&mut held).await;
            let awake = held.unwrap_or_else(|| self.wake_lock.acquire());

            match result {
                Ok(IdleOutcome::Changed) => {
                    delay = self.config.backoff_base;
                    self.listener.on_folder_changed(&self.folder);
                }
                Ok(IdleOutcome::Stopped) => {
                    if self.token.is_cancelled() {
                        break;
                    }
                    delay = self.config.backoff_base;
                    debug!(folder = %name, "polled");
                    self.listener.on_folder_changed(&self.folder);
                }
                Ok(IdleOutcome::Refresh) => delay = self.config.backoff_base,
                Err(carteggio_imap::Error::PushNotSupported) => {
                    warn!(folder = %name, "server does not support IDLE");
                    self.listener.on_listening_not_supported();
                    break;
                }
                Err(err) => {
                    warn!(folder = %name, %err, ?delay, "push failed, retrying");
                    drop(awake);
                    if !self.backoff(delay).await {
                        break;
                    }
                    delay = self.config.next_delay(delay);
                }
            }
        }

        self.idle_folder.close().await;
        info!(folder = %name, "push stopped");
    }

    /// One IDLE, ended early by cancellation or a poll request.
    async fn idle_once(&self, held: &mut Option<WakeGuard>) -> carteggio_imap::Result<IdleOutcome> {
        let session = Arc::new(self.idle_folder.idle_session());
        let stopper = {
            let session = Arc::clone(&session);
            let token = self.token.clone();
            let mut poll = self.poll.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    Ok(()) = poll.changed() => {}
                }
                session.stop_waiting();
            })
        };

        let listener = &self.listener;
        let folder = &self.folder;
        let result = session
            .wait_for_new_messages(|| {
                held.take();
                listener.on_listening_started(folder);
            })
            .await;
        stopper.abort();
        result
    }

    /// Sleeps for `delay`. Returns false if the worker was cancelled.
    async fn backoff(&mut self, delay: Duration) -> bool {
        tokio::select! {
            () = self.token.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
            Ok(()) = self.poll.changed() => true,
        }
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;
    use crate::store::{ImapFolder, ImapMessageStore, MessageStore};
    use crate::testing::{Scripted, account, greeted};

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Started(String),
        Changed(String),
        NotSupported,
    }

    struct Recorder(mpsc::UnboundedSender<Event>);

    impl FolderListener<ImapFolder<Scripted>> for Recorder {
        fn on_folder_changed(&self, folder: &ImapFolder<Scripted>) {
            let _ = self.0.send(Event::Changed(folder.name().to_string()));
        }

        fn on_listening_not_supported(&self) {
            let _ = self.0.send(Event::NotSupported);
        }

        fn on_listening_started(&self, folder: &ImapFolder<Scripted>) {
            let _ = self.0.send(Event::Started(folder.name().to_string()));
        }
    }

    /// Counts guards currently held.
    #[derive(Default)]
    struct CountingLock(Arc<AtomicUsize>);

    impl WakeLock for CountingLock {
        fn acquire(&self) -> WakeGuard {
            self.0.fetch_add(1, Ordering::SeqCst);
            let held = Arc::clone(&self.0);
            WakeGuard::new(move || {
                held.fetch_sub(1, Ordering::SeqCst);
            })
        }
    }

    fn listener() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder(tx)), rx)
    }

    fn quick(account: Account) -> Account {
        Account {
            push_backoff_base_secs: 1,
            push_backoff_ceiling_secs: 4,
            ..account
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let config = PushConfig::from_account(&quick(account()));
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        let mut delay = config.backoff_base;
        let mut seen = Vec::new();
        for _ in 0..4 {
            delay = config.next_delay(delay);
            seen.push(delay.as_secs());
        }
        assert_eq!(seen, vec![2, 4, 4, 4]);
    }

    #[tokio::test]
    async fn test_change_is_reported_and_idle_resumes() {
        // The application's store never connects here.
        let app = Scripted::new(Vec::new());
        let push = greeted("IDLE")
            .write(b"A0002 EXAMINE \"INBOX\"\r\n")
            .read(b"* 5 EXISTS\r\nA0002 OK [READ-ONLY] done\r\n")
            .write(b"A0003 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* 6 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0003 OK IDLE terminated\r\n")
            .write(b"A0004 NOOP\r\n")
            .read(b"A0004 OK done\r\n")
            .write(b"A0005 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0005 OK IDLE terminated\r\n")
            .write(b"A0006 LOGOUT\r\n")
            .read(b"* BYE\r\nA0006 OK done\r\n")
            .build();
        let held = Arc::new(AtomicUsize::new(0));
        let store = ImapMessageStore::with_connectors(
            &account(),
            app,
            Scripted::new(vec![push]),
            Arc::new(CountingLock(Arc::clone(&held))),
        )
        .unwrap();
        let (recorder, mut events) = listener();

        let inbox = store.inbox();
        store.add_message_listener(&inbox, recorder);
        assert!(store.push().is_monitoring("INBOX"));

        assert_eq!(events.recv().await, Some(Event::Started("INBOX".into())));
        assert_eq!(events.recv().await, Some(Event::Changed("INBOX".into())));
        assert_eq!(events.recv().await, Some(Event::Started("INBOX".into())));
        assert_eq!(held.load(Ordering::SeqCst), 0);

        store.close().await;
        assert!(store.push().monitored().is_empty());
        assert_eq!(held.load(Ordering::SeqCst), 0);
        assert_eq!(events.try_recv().ok(), None);
    }

    #[tokio::test]
    async fn test_poll_now_ends_idle_with_change() {
        let push = greeted("IDLE")
            .write(b"A0002 EXAMINE \"INBOX\"\r\n")
            .read(b"* 5 EXISTS\r\nA0002 OK [READ-ONLY] done\r\n")
            .write(b"A0003 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0003 OK IDLE terminated\r\n")
            .write(b"A0004 NOOP\r\n")
            .read(b"A0004 OK done\r\n")
            .write(b"A0005 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0005 OK IDLE terminated\r\n")
            .write(b"A0006 LOGOUT\r\n")
            .read(b"* BYE\r\nA0006 OK done\r\n")
            .build();
        let store = ImapMessageStore::with_connectors(
            &account(),
            Scripted::new(Vec::new()),
            Scripted::new(vec![push]),
            Arc::new(NoopWakeLock),
        )
        .unwrap();
        let (recorder, mut events) = listener();
        store.add_message_listener(&store.inbox(), recorder);

        assert_eq!(events.recv().await, Some(Event::Started("INBOX".into())));
        store.push().poll_now();
        assert_eq!(events.recv().await, Some(Event::Changed("INBOX".into())));
        assert_eq!(events.recv().await, Some(Event::Started("INBOX".into())));

        store.close().await;
    }

    #[tokio::test]
    async fn test_server_without_idle_is_reported_once() {
        let push = greeted("")
            .write(b"A0002 EXAMINE \"INBOX\"\r\n")
            .read(b"* 5 EXISTS\r\nA0002 OK [READ-ONLY] done\r\n")
            .write(b"A0003 LOGOUT\r\n")
            .read(b"* BYE\r\nA0003 OK done\r\n")
            .build();
        let store = ImapMessageStore::with_connectors(
            &account(),
            Scripted::new(Vec::new()),
            Scripted::new(vec![push]),
            Arc::new(NoopWakeLock),
        )
        .unwrap();
        let (recorder, mut events) = listener();
        store.add_message_listener(&store.inbox(), recorder);

        assert_eq!(events.recv().await, Some(Event::NotSupported));
        store.close().await;
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_connect_failure_backs_off_then_recovers() {
        let push = greeted("IDLE")
            .write(b"A0002 EXAMINE \"INBOX\"\r\n")
            .read(b"* 5 EXISTS\r\nA0002 OK [READ-ONLY] done\r\n")
            .write(b"A0003 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0003 OK IDLE terminated\r\n")
            .write(b"A0004 LOGOUT\r\n")
            .read(b"* BYE\r\nA0004 OK done\r\n")
            .build();
        let store = ImapMessageStore::with_connectors(
            &quick(account()),
            Scripted::new(Vec::new()),
            Scripted::with_failures(vec![None, Some(push)]),
            Arc::new(NoopWakeLock),
        )
        .unwrap();
        let (recorder, mut events) = listener();
        store.add_message_listener(&store.inbox(), recorder);

        let started = std::time::Instant::now();
        assert_eq!(events.recv().await, Some(Event::Started("INBOX".into())));
        assert!(started.elapsed() >= Duration::from_secs(1));

        store.close().await;
    }

    #[tokio::test]
    async fn test_start_after_shutdown_is_ignored() {
        let store = ImapMessageStore::with_connectors(
            &account(),
            Scripted::new(Vec::new()),
            Scripted::new(Vec::new()),
            Arc::new(NoopWakeLock),
        )
        .unwrap();
        store.push().shutdown().await;
        let (recorder, _events) = listener();
        store.add_message_listener(&store.inbox(), recorder);
        assert!(!store.push().is_monitoring("INBOX"));
    }
}
