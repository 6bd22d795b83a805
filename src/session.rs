//! Per-conversation session bookkeeping.
//!
//! Every conversation has one [`SessionState`]. A run gets write access to it
//! through a [`SessionLease`]; at most one lease per conversation is live, and
//! writes through a released lease are ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::RunError;
use crate::stream::{NewMessage, StreamMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub cursor: String,
    pub streaming: bool,
    pub reconnect_attempts: u32,
}

impl SessionState {
    fn new(initial_cursor: &str) -> Self {
        Self {
            session_id: None,
            cursor: initial_cursor.to_string(),
            streaming: false,
            reconnect_attempts: 0,
        }
    }
}

/// One-shot handoff from the resume detector to the next run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    pub session_id: String,
    pub cursor: String,
}

#[derive(Debug)]
struct ConversationSlot {
    state: SessionState,
    owner: Option<u64>,
    pending_resume: Option<ResumeRequest>,
}

#[derive(Debug)]
pub(crate) struct SessionTable {
    slots: Mutex<HashMap<String, ConversationSlot>>,
    next_run_id: AtomicU64,
    initial_cursor: String,
    max_reconnect_attempts: u32,
}

impl SessionTable {
    pub(crate) fn new(initial_cursor: String, max_reconnect_attempts: u32) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(1),
            initial_cursor,
            max_reconnect_attempts,
        })
    }

    pub(crate) fn snapshot(&self, conversation_id: &str) -> SessionState {
        self.lock_slots()
            .get(conversation_id)
            .map(|slot| slot.state.clone())
            .unwrap_or_else(|| SessionState::new(&self.initial_cursor))
    }

    pub(crate) fn queue_resume(&self, conversation_id: &str, request: ResumeRequest) {
        let mut slots = self.lock_slots();
        self.slot_mut(&mut slots, conversation_id).pending_resume = Some(request);
    }

    pub(crate) fn take_resume(&self, conversation_id: &str) -> Option<ResumeRequest> {
        self.lock_slots()
            .get_mut(conversation_id)
            .and_then(|slot| slot.pending_resume.take())
    }

    /// Claims the conversation for a new run and decides how it dispatches.
    ///
    /// A pending resume request always wins over `fresh`. `fresh` is `None` when
    /// the caller explicitly asked to resume.
    pub(crate) fn begin(
        self: &Arc<Self>,
        conversation_id: &str,
        fresh: Option<Result<NewMessage, RunError>>,
    ) -> Result<(SessionLease, StreamMode), RunError> {
        let mut slots = self.lock_slots();
        let slot = self.slot_mut(&mut slots, conversation_id);

        if slot.state.streaming {
            return Err(RunError::already_streaming(conversation_id));
        }

        let mode = match (slot.pending_resume.take(), fresh) {
            (Some(request), _) => {
                if slot.state.reconnect_attempts >= self.max_reconnect_attempts {
                    slot.state.session_id = None;
                    tracing::warn!(
                        conversation_id,
                        attempts = slot.state.reconnect_attempts,
                        "reconnect limit reached; abandoning backend session"
                    );
                    return Err(RunError::reconnect_limit(
                        conversation_id,
                        self.max_reconnect_attempts,
                    ));
                }

                slot.state.reconnect_attempts += 1;
                slot.state.session_id = Some(request.session_id.clone());
                slot.state.cursor = request.cursor.clone();
                StreamMode::Resume(request)
            }
            (None, None) => return Err(RunError::no_pending_resume(conversation_id)),
            (None, Some(fresh)) => {
                let message = fresh?;
                slot.state.reconnect_attempts = 0;
                slot.state.session_id = None;
                slot.state.cursor = self.initial_cursor.clone();
                StreamMode::NewMessage(message)
            }
        };

        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        slot.state.streaming = true;
        slot.owner = Some(run_id);
        tracing::debug!(conversation_id, run_id, mode = mode.label(), "session claimed");

        Ok((
            SessionLease {
                table: Arc::clone(self),
                conversation_id: conversation_id.to_string(),
                run_id,
                released: AtomicBool::new(false),
            },
            mode,
        ))
    }

    fn slot_mut<'a>(
        &self,
        slots: &'a mut HashMap<String, ConversationSlot>,
        conversation_id: &str,
    ) -> &'a mut ConversationSlot {
        slots
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationSlot {
                state: SessionState::new(&self.initial_cursor),
                owner: None,
                pending_resume: None,
            })
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, ConversationSlot>> {
        lock_unpoisoned(&self.slots)
    }
}

/// Exclusive write access to one conversation's [`SessionState`] for one run.
#[derive(Debug)]
pub struct SessionLease {
    table: Arc<SessionTable>,
    conversation_id: String,
    run_id: u64,
    released: AtomicBool,
}

impl SessionLease {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn record_session_id(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        self.with_owned_state(|state| state.session_id = Some(session_id));
    }

    pub fn record_cursor(&self, cursor: impl Into<String>) {
        let cursor = cursor.into();
        self.with_owned_state(|state| state.cursor = cursor);
    }

    /// Marks the conversation as no longer streaming. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut slots = self.table.lock_slots();
        if let Some(slot) = slots.get_mut(&self.conversation_id) {
            if slot.owner == Some(self.run_id) {
                slot.owner = None;
                slot.state.streaming = false;
            }
        }
    }

    fn with_owned_state(&self, update: impl FnOnce(&mut SessionState)) {
        if self.released.load(Ordering::SeqCst) {
            tracing::trace!(run_id = self.run_id, "ignoring write through released lease");
            return;
        }

        let mut slots = self.table.lock_slots();
        if let Some(slot) = slots.get_mut(&self.conversation_id) {
            if slot.owner == Some(self.run_id) {
                update(&mut slot.state);
            }
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.release();
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
