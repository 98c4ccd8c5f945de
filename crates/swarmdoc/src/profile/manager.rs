//! Writer-serialization actor for the profile document.
//!
//! A dedicated tokio task exclusively owns two FIFO queues and the profile's
//! [`VersionManager`]; every access goes through channel messages, so the
//! caches need no locks. The worker:
//!
//! - services all queued snapshot readers with **one** fetch, broadcasting
//!   the identical result to each;
//! - prioritizes mutation intents over reads, granting one writer at a time
//!   an exclusive mutation window of [`ProfileConfig::max_modification_time`]
//!   in which to call [`ProfileManager::ready_to_put`] or abort;
//! - force-aborts a writer that lets the window expire — the profile is
//!   never written, and the writer's late commit fails with
//!   [`ProfileError::MutationTimeout`].
//!
//! This serializes mutations within one process; a concurrent writer on a
//! different peer is only caught by the version manager's fork check at put
//! time.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::crypto::SecretKey;
use crate::store::ProtectedStore;
use crate::version::{Codec, VersionManager, VersionedDocument};

use super::{Profile, ProfileError};

/// The profile document as handed to and committed by processes
pub type ProfileDocument = VersionedDocument<Profile>;

/// Tuning knobs for the serialization queue
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// How long a granted writer may hold the mutation window
    pub max_modification_time: Duration,
    /// Command channel depth
    pub queue_depth: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            max_modification_time: Duration::from_millis(1000),
            queue_depth: 64,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, ProfileError>>;

enum Command {
    Read {
        pid: Uuid,
        reply: Reply<ProfileDocument>,
    },
    WriteIntent {
        pid: Uuid,
        reply: Reply<ProfileDocument>,
    },
    Commit {
        pid: Uuid,
        doc: ProfileDocument,
        reply: Reply<()>,
    },
    Abort {
        pid: Uuid,
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the profile worker task.
///
/// # Contract
///
/// - [`get_profile`](Self::get_profile) with `intends_to_write = false`
///   blocks until the queue delivers a snapshot or the read fails.
/// - With `intends_to_write = true` it additionally registers a mutation
///   intent: the returned document must be finalized with
///   [`ready_to_put`](Self::ready_to_put) (or released with
///   [`abort`](Self::abort)) before the window expires.
#[derive(Debug, Clone)]
pub struct ProfileManager {
    commands: mpsc::Sender<Command>,
}

impl ProfileManager {
    /// Spawn the worker task that owns `manager` and its queues.
    ///
    /// `protection` signs every profile put when the slot is gated.
    pub fn spawn<C, S>(
        manager: VersionManager<Profile, C, S>,
        protection: Option<SecretKey>,
        config: ProfileConfig,
    ) -> Self
    where
        C: Codec<Profile> + Send + 'static,
        S: ProtectedStore,
    {
        let (tx, rx) = mpsc::channel(config.queue_depth);
        let worker = Worker {
            manager,
            protection,
            config,
            commands: rx,
            readers: VecDeque::new(),
            writers: VecDeque::new(),
            timed_out: HashSet::new(),
            closed: false,
        };
        tokio::spawn(worker.run());
        Self { commands: tx }
    }

    /// Fetch the current profile, optionally registering a mutation intent.
    pub async fn get_profile(
        &self,
        pid: Uuid,
        intends_to_write: bool,
    ) -> Result<ProfileDocument, ProfileError> {
        let (reply, rx) = oneshot::channel();
        let cmd = if intends_to_write {
            Command::WriteIntent { pid, reply }
        } else {
            Command::Read { pid, reply }
        };
        self.commands
            .send(cmd)
            .await
            .map_err(|_| ProfileError::ChannelClosed)?;
        rx.await.map_err(|_| ProfileError::ChannelClosed)?
    }

    /// Commit a mutated profile. May only be called by the process currently
    /// holding the mutation window; blocks until the underlying put
    /// completes or fails.
    pub async fn ready_to_put(&self, doc: ProfileDocument, pid: Uuid) -> Result<(), ProfileError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Commit { pid, doc, reply })
            .await
            .map_err(|_| ProfileError::ChannelClosed)?;
        rx.await.map_err(|_| ProfileError::ChannelClosed)?
    }

    /// Release the mutation window without writing.
    pub async fn abort(&self, pid: Uuid) -> Result<(), ProfileError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Abort { pid, reply })
            .await
            .map_err(|_| ProfileError::ChannelClosed)?;
        rx.await.map_err(|_| ProfileError::ChannelClosed)
    }
}

struct PendingRead {
    pid: Uuid,
    reply: Reply<ProfileDocument>,
}

struct PendingWrite {
    pid: Uuid,
    reply: Reply<ProfileDocument>,
}

struct Worker<C, S> {
    manager: VersionManager<Profile, C, S>,
    protection: Option<SecretKey>,
    config: ProfileConfig,
    commands: mpsc::Receiver<Command>,
    readers: VecDeque<PendingRead>,
    writers: VecDeque<PendingWrite>,
    /// Processes whose window expired; their late commit must fail with a
    /// timeout, not a generic not-holding error
    timed_out: HashSet<Uuid>,
    closed: bool,
}

impl<C, S> Worker<C, S>
where
    C: Codec<Profile> + Send + 'static,
    S: ProtectedStore,
{
    async fn run(mut self) {
        loop {
            if self.closed && self.readers.is_empty() && self.writers.is_empty() {
                break;
            }
            if self.readers.is_empty() && self.writers.is_empty() {
                match self.commands.recv().await {
                    Some(cmd) => self.enqueue(cmd),
                    None => break,
                }
            }
            // Pick up everything already queued before deciding what to do
            while let Ok(cmd) = self.commands.try_recv() {
                self.enqueue(cmd);
            }

            // Mutations go first; reads queued behind a write see the
            // post-mutation snapshot on the next pass
            if let Some(writer) = self.writers.pop_front() {
                self.service_writer(writer).await;
            } else if !self.readers.is_empty() {
                self.service_readers().await;
            }
        }
        debug!("profile worker shut down");
    }

    fn enqueue(&mut self, cmd: Command) {
        match cmd {
            Command::Read { pid, reply } => self.readers.push_back(PendingRead { pid, reply }),
            Command::WriteIntent { pid, reply } => {
                self.writers.push_back(PendingWrite { pid, reply })
            }
            Command::Commit { pid, reply, .. } => {
                // Not inside this pid's window: either it expired or was
                // never granted
                let err = if self.timed_out.remove(&pid) {
                    ProfileError::MutationTimeout
                } else {
                    ProfileError::NotHoldingWindow
                };
                reply.send(Err(err)).ok();
            }
            Command::Abort { pid, reply } => {
                self.timed_out.remove(&pid);
                reply.send(()).ok();
            }
        }
    }

    /// Service every queued reader with a single fetch.
    async fn service_readers(&mut self) {
        let result = self.manager.get().await;
        let readers = std::mem::take(&mut self.readers);
        match result {
            Ok(doc) => {
                for reader in readers {
                    debug!("delivering profile snapshot to process {}", reader.pid);
                    reader.reply.send(Ok(doc.clone())).ok();
                }
            }
            Err(err) => {
                let err = Arc::new(err);
                for reader in readers {
                    reader.reply.send(Err(ProfileError::Get(err.clone()))).ok();
                }
            }
        }
    }

    /// Grant one writer the mutation window, broadcasting the same snapshot
    /// to all currently queued readers.
    async fn service_writer(&mut self, writer: PendingWrite) {
        let pid = writer.pid;
        let doc = match self.manager.get().await {
            Ok(doc) => doc,
            Err(err) => {
                let err = Arc::new(err);
                writer
                    .reply
                    .send(Err(ProfileError::Get(err.clone())))
                    .ok();
                for reader in std::mem::take(&mut self.readers) {
                    reader.reply.send(Err(ProfileError::Get(err.clone()))).ok();
                }
                return;
            }
        };

        for reader in std::mem::take(&mut self.readers) {
            reader.reply.send(Ok(doc.clone())).ok();
        }
        if writer.reply.send(Ok(doc)).is_err() {
            // Caller went away before the grant; nothing to wait for
            return;
        }

        let deadline = Instant::now() + self.config.max_modification_time;
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    None => {
                        self.closed = true;
                        return;
                    }
                    Some(Command::Commit { pid: sender, mut doc, reply }) if sender == pid => {
                        let result = self
                            .manager
                            .put(&mut doc, self.protection.as_ref())
                            .await
                            .map_err(ProfileError::from);
                        reply.send(result).ok();
                        return;
                    }
                    Some(Command::Abort { pid: sender, reply }) if sender == pid => {
                        debug!("process {} released the mutation window", pid);
                        reply.send(()).ok();
                        return;
                    }
                    Some(other) => self.enqueue(other),
                },
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("mutation window expired for process {}", pid);
                    self.timed_out.insert(pid);
                    return;
                }
            }
        }
    }
}
