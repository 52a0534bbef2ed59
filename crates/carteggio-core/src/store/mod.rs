//! Message store abstraction.
//!
//! Application code works against [`MessageStore`] and [`Folder`]; the
//! IMAP implementation lives in [`ImapMessageStore`]. The concrete store
//! names its own folder and message types, so nothing is ever downcast.

mod imap;

use std::future::Future;
use std::sync::Arc;

pub use carteggio_imap::SyncPoint;
pub use imap::{ImapFolder, ImapMessageStore};

use crate::error::Result;

/// Receives push events for one folder.
///
/// Callbacks run on the push worker; they should hand work off rather
/// than block.
pub trait FolderListener<F>: Send + Sync {
    /// The server reported a change, or a poll was requested. Run
    /// [`Folder::messages_after`] to find out what is new.
    fn on_folder_changed(&self, folder: &F);

    /// The server cannot push; the worker for this folder has stopped.
    fn on_listening_not_supported(&self);

    /// The server accepted IDLE and is now watching `folder`.
    fn on_listening_started(&self, folder: &F);
}

/// One mailbox of a [`MessageStore`].
pub trait Folder: Clone + Send + Sync + 'static {
    /// Message handle type.
    type Message: Send + Sync;

    /// Local folder name.
    fn name(&self) -> &str;

    /// Opens the folder for reading and writing.
    fn open(&self) -> impl Future<Output = Result<()>> + Send;

    /// Closes the folder, keeping its connection for reuse when possible.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Messages that arrived after `sync_point`, newest first, advancing
    /// `sync_point` past them. The first call on an unknown sync point
    /// only establishes it and returns nothing.
    fn messages_after(
        &self,
        sync_point: &mut SyncPoint,
    ) -> impl Future<Output = Result<Vec<Self::Message>>> + Send;

    /// Fetches flags, dates, sizes and the main header fields.
    fn fetch_envelopes(
        &self,
        messages: &mut [Self::Message],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Fetches the MIME structure; part bodies stay on the server.
    fn fetch_structures(
        &self,
        messages: &mut [Self::Message],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Moves messages into `destination`, creating it if needed.
    fn move_messages(
        &self,
        messages: &[Self::Message],
        destination: &Self,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Downloads one part, identified by a part id from
    /// [`Folder::fetch_structures`], and returns its decoded content.
    fn fetch_part(
        &self,
        message: &mut Self::Message,
        part_id: &str,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// A remote mailbox account.
pub trait MessageStore: Send + Sync {
    /// Folder type.
    type Folder: Folder;

    /// The folder new mail arrives in.
    fn inbox(&self) -> Self::Folder;

    /// The folder private conversations are filed in.
    fn private_folder(&self) -> Self::Folder;

    /// Starts push monitoring of `folder`, replacing any listener it had.
    fn add_message_listener(
        &self,
        folder: &Self::Folder,
        listener: Arc<dyn FolderListener<Self::Folder>>,
    );

    /// Stops every push worker and waits for them to finish.
    fn remove_message_listeners(&self) -> impl Future<Output = ()> + Send;

    /// Restores a sync point saved with [`SyncPoint::save`].
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidSyncPoint`] for text that was not produced
    /// by `save`.
    fn parse_sync_point(&self, saved: &str) -> Result<SyncPoint> {
        Ok(SyncPoint::parse(saved)?)
    }
}
