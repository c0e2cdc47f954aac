// Deployment Journal
// Durable, append-only record of execution state transitions

pub mod messages;
pub mod reducer;

pub use messages::JournalMessage;
pub use reducer::{reduce, replay, InvariantViolation};

use crate::state::DeploymentState;
use crate::ServiceResult;

use futures::stream::{self, Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, SeekFrom, Take,
};
use tokio::sync::{Mutex, RwLock};
use tokio_stream::wrappers::LinesStream;
use tracing::warn;

/// Lazy sequence of journal messages in emission order
pub type JournalStream<'a> = Pin<Box<dyn Stream<Item = Result<JournalMessage, JournalError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt journal entry at line {line}: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },

    #[error("failed to encode journal message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Append-only message log.
///
/// `append` returns only once the message is durable. `read` can be called
/// any number of times and always starts from the first message.
#[async_trait::async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, message: &JournalMessage) -> Result<(), JournalError>;

    fn read(&self) -> JournalStream<'_>;
}

/// Fold every recorded message into a fresh state
pub async fn load_state(journal: &dyn Journal) -> ServiceResult<DeploymentState> {
    let mut messages = journal.read();
    let mut state = DeploymentState::default();

    while let Some(message) = messages.next().await {
        state = reduce(state, &message?)?;
    }

    Ok(state)
}

/// Journal kept in memory, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryJournal {
    messages: RwLock<Vec<JournalMessage>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<JournalMessage>) -> Self {
        Self {
            messages: RwLock::new(messages),
        }
    }

    /// Snapshot of the recorded messages
    pub async fn messages(&self) -> Vec<JournalMessage> {
        self.messages.read().await.clone()
    }
}

#[async_trait::async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, message: &JournalMessage) -> Result<(), JournalError> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    fn read(&self) -> JournalStream<'_> {
        stream::once(async move { self.messages.read().await.clone() })
            .flat_map(|messages| stream::iter(messages.into_iter().map(Ok)))
            .boxed()
    }
}

/// Journal stored as JSON Lines
pub struct FileJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The journal without any partially written final line
    async fn open_complete_lines(&self) -> Result<Option<Take<File>>, JournalError> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JournalError::Io(e)),
        };
        let len = complete_len(&mut file).await?;
        file.seek(SeekFrom::Start(0)).await?;
        Ok(Some(file.take(len)))
    }
}

/// Length up to and including the last newline.
///
/// A crash in the middle of an append leaves an unterminated line behind;
/// that line was never acknowledged and is not part of the journal.
async fn complete_len(file: &mut File) -> std::io::Result<u64> {
    let mut end = file.metadata().await?.len();
    let mut block = vec![0u8; 4096];

    while end > 0 {
        let start = end.saturating_sub(block.len() as u64);
        let chunk = &mut block[..(end - start) as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(chunk).await?;
        if let Some(offset) = chunk.iter().rposition(|byte| *byte == b'\n') {
            return Ok(start + offset as u64 + 1);
        }
        end = start;
    }

    Ok(0)
}

#[async_trait::async_trait]
impl Journal for FileJournal {
    async fn append(&self, message: &JournalMessage) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;
        let complete = complete_len(&mut file).await?;
        if complete < file.metadata().await?.len() {
            warn!(path = %self.path.display(), "discarding incomplete journal entry");
            file.set_len(complete).await?;
        }
        file.write_all(&line).await?;
        file.sync_data().await?;

        Ok(())
    }

    fn read(&self) -> JournalStream<'_> {
        stream::once(self.open_complete_lines())
            .flat_map(|opened| match opened {
                Ok(Some(file)) => LinesStream::new(BufReader::new(file).lines())
                    .enumerate()
                    .filter_map(|(index, line)| async move {
                        match line {
                            Ok(line) if line.trim().is_empty() => None,
                            Ok(line) => Some(
                                serde_json::from_str::<JournalMessage>(&line).map_err(|source| {
                                    JournalError::Corrupt {
                                        line: index + 1,
                                        source,
                                    }
                                }),
                            ),
                            Err(e) => Some(Err(JournalError::Io(e))),
                        }
                    })
                    .boxed(),
                Ok(None) => stream::empty().boxed(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }
}
