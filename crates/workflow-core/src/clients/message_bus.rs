//! Message bus backends: one file-based, one in memory
//!
//! Both deliver each message to exactly its addressee, at most once, and keep
//! a per-run history in send order.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use workflow_types::AgentMessage;
use crate::error::{WorkflowError, Result};
use crate::paths::WorkflowPaths;
use crate::store;
use crate::workflow::traits::MessageBus;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CLAIMED_SUFFIX: &str = ".claimed";

/// Per-recipient inbox directories plus JSON-lines history per run
pub struct FileMessageBus {
    paths: WorkflowPaths,
    sequence: AtomicU64,
    history_lock: Mutex<()>,
}

impl FileMessageBus {
    pub fn new(paths: WorkflowPaths) -> Self {
        Self {
            paths,
            sequence: AtomicU64::new(0),
            history_lock: Mutex::new(()),
        }
    }

    async fn append_history(&self, message: &AgentMessage) -> Result<()> {
        let path = self.paths.bus_history_file(&message.run_id);
        let _guard = self.history_lock.lock().await;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Claim and read every message currently in the inbox, oldest first
    async fn drain_inbox(&self, agent_id: &str) -> Result<Vec<AgentMessage>> {
        let dir = self.paths.bus_inbox_dir(agent_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WorkflowError::Io(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".json") && !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        let mut messages = Vec::new();
        for name in names {
            let path = dir.join(&name);
            let claimed = dir.join(format!("{}{}", name, CLAIMED_SUFFIX));
            // a concurrent poller may have claimed it first
            if fs::rename(&path, &claimed).await.is_err() {
                continue;
            }
            match fs::read(&claimed).await {
                Ok(bytes) => match serde_json::from_slice::<AgentMessage>(&bytes) {
                    Ok(message) => messages.push(message),
                    Err(e) => log::error!("Discarding unreadable bus message {:?}: {}", path, e),
                },
                Err(e) => log::error!("Failed to read claimed bus message {:?}: {}", claimed, e),
            }
            if let Err(e) = fs::remove_file(&claimed).await {
                log::warn!("Failed to remove consumed bus message {:?}: {}", claimed, e);
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl MessageBus for FileMessageBus {
    async fn send(&self, message: AgentMessage) -> Result<()> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let file_name = format!(
            "{}-{:08}-{}.json",
            message.timestamp.format("%Y%m%dT%H%M%S%.9f"),
            sequence,
            message.id
        );
        let path = self.paths.bus_inbox_dir(&message.to).join(file_name);
        store::write_json_atomic(&path, &message).await?;
        self.append_history(&message).await?;
        log::debug!("Bus {:?} {} -> {} (run {})", message.message_type, message.from, message.to, message.run_id);
        Ok(())
    }

    async fn record(&self, message: AgentMessage) -> Result<()> {
        self.append_history(&message).await?;
        log::debug!("Recorded {:?} {} -> {} (run {})", message.message_type, message.from, message.to, message.run_id);
        Ok(())
    }

    async fn poll(&self, agent_id: &str, timeout: Duration) -> Result<Vec<AgentMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            let messages = self.drain_inbox(agent_id).await?;
            if !messages.is_empty() || Instant::now() >= deadline {
                return Ok(messages);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    async fn get_message_history(&self, run_id: &str) -> Result<Vec<AgentMessage>> {
        let path = self.paths.bus_history_file(run_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WorkflowError::Io(e)),
        };
        let mut history = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(message) => history.push(message),
                Err(e) => log::warn!("Skipping malformed history line in {:?}: {}", path, e),
            }
        }
        Ok(history)
    }
}

#[derive(Default)]
struct InMemoryState {
    inboxes: HashMap<String, VecDeque<AgentMessage>>,
    history: HashMap<String, Vec<AgentMessage>>,
}

/// Process-local backend, interchangeable with `FileMessageBus`
#[derive(Default)]
pub struct InMemoryMessageBus {
    state: Mutex<InMemoryState>,
    arrivals: Notify,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn send(&self, message: AgentMessage) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .history
            .entry(message.run_id.clone())
            .or_default()
            .push(message.clone());
        state.inboxes.entry(message.to.clone()).or_default().push_back(message);
        drop(state);
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn record(&self, message: AgentMessage) -> Result<()> {
        self.state
            .lock()
            .await
            .history
            .entry(message.run_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn poll(&self, agent_id: &str, timeout: Duration) -> Result<Vec<AgentMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.arrivals.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(inbox) = state.inboxes.get_mut(agent_id) {
                    if !inbox.is_empty() {
                        return Ok(inbox.drain(..).collect());
                    }
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn get_message_history(&self, run_id: &str) -> Result<Vec<AgentMessage>> {
        Ok(self.state.lock().await.history.get(run_id).cloned().unwrap_or_default())
    }
}
