//! Conversation Store (C3): thread-keyed bounded history with LRU eviction and
//! TTL cleanup.
//!
//! Grounded in `original_source/.../agent/react_agent/conversation_manager.py`'s
//! `ConversationManager`: `OrderedDict`-backed LRU map, per-thread trimming,
//! duplicate-against-tail rejection, system messages never stored.

use std::collections::VecDeque;
use std::time::Instant;

use crate::message::Message;

/// One thread's pure conversation (never contains system messages) plus its
/// eviction bookkeeping.
struct ThreadEntry {
    messages: VecDeque<Message>,
    last_access: Instant,
}

/// Aggregate counters mirroring `ConversationManager.get_memory_stats`.
#[derive(Debug, Clone, Copy)]
pub struct ConversationStats {
    pub total_threads: usize,
    pub total_messages: usize,
    pub max_threads: usize,
    pub max_messages_per_thread: usize,
}

/// LRU+TTL-bounded `thread_id -> Vec<Message>` store (spec §4.3).
///
/// Every public method touches the thread's `last_access` and runs the
/// opportunistic TTL sweep roughly every 10 calls, matching the teacher's
/// "cleanup runs opportunistically" cadence rather than a background task.
pub struct ConversationStore {
    threads: std::sync::Mutex<indexmap::IndexMap<String, ThreadEntry>>,
    max_threads: usize,
    max_messages_per_thread: usize,
    ttl: std::time::Duration,
    access_count: std::sync::atomic::AtomicU64,
}

impl ConversationStore {
    pub fn new(max_threads: usize, max_messages_per_thread: usize, ttl: std::time::Duration) -> Self {
        ConversationStore {
            threads: std::sync::Mutex::new(indexmap::IndexMap::new()),
            max_threads,
            max_messages_per_thread,
            ttl,
            access_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Returns `[system] + pure_history + incoming`, deduplicating `incoming`
    /// against the thread's tail (spec P1). `system` is supplied by the caller
    /// (rendered via [`crate::prompts::PromptRegistry`]) since prompt content
    /// is out of this module's scope.
    pub fn prepare(&self, thread_id: &str, system: Message, incoming: Message) -> Vec<Message> {
        self.touch(thread_id);
        let mut out = Vec::new();
        out.push(system);
        let threads = self.threads.lock().expect("conversation lock poisoned");
        if let Some(entry) = threads.get(thread_id) {
            out.extend(entry.messages.iter().cloned());
        }
        drop(threads);
        if !is_duplicate_of_tail(&out, &incoming) {
            out.push(incoming);
        }
        out
    }

    /// Appends a user message, skipping empty content and exact duplicates of
    /// the thread's last message.
    pub fn append_user(&self, thread_id: &str, message: Message) {
        self.append(thread_id, message, |m| matches!(m, Message::User { .. }));
    }

    /// Appends an assistant message under the same empty/duplicate rules.
    pub fn append_assistant(&self, thread_id: &str, message: Message) {
        self.append(thread_id, message, |m| matches!(m, Message::Assistant { .. }));
    }

    fn append(&self, thread_id: &str, message: Message, accept: impl Fn(&Message) -> bool) {
        if message.is_system() || !accept(&message) || message.content().is_empty() {
            return;
        }
        self.touch(thread_id);
        let mut threads = self.threads.lock().expect("conversation lock poisoned");
        let entry = threads.entry(thread_id.to_string()).or_insert_with(|| ThreadEntry {
            messages: VecDeque::new(),
            last_access: Instant::now(),
        });
        let is_dup = entry
            .messages
            .back()
            .map(|last| last.content().as_text() == message.content().as_text())
            .unwrap_or(false);
        if is_dup {
            return;
        }
        entry.messages.push_back(message);
        while entry.messages.len() > self.max_messages_per_thread {
            entry.messages.pop_front();
        }
        drop(threads);
        self.maybe_cleanup();
    }

    /// Clears one thread, or every thread when `thread_id` is `None`.
    pub fn clear(&self, thread_id: Option<&str>) {
        let mut threads = self.threads.lock().expect("conversation lock poisoned");
        match thread_id {
            Some(id) => {
                threads.shift_remove(id);
            }
            None => threads.clear(),
        }
    }

    pub fn stats(&self) -> ConversationStats {
        let threads = self.threads.lock().expect("conversation lock poisoned");
        ConversationStats {
            total_threads: threads.len(),
            total_messages: threads.values().map(|e| e.messages.len()).sum(),
            max_threads: self.max_threads,
            max_messages_per_thread: self.max_messages_per_thread,
        }
    }

    /// Ensures `thread_id` exists, stamps `last_access`, and moves it to the
    /// end of the map (LRU "most recently used" position).
    fn touch(&self, thread_id: &str) {
        let mut threads = self.threads.lock().expect("conversation lock poisoned");
        match threads.shift_remove(thread_id) {
            Some(mut entry) => {
                entry.last_access = Instant::now();
                threads.insert(thread_id.to_string(), entry);
            }
            None => {
                threads.insert(
                    thread_id.to_string(),
                    ThreadEntry {
                        messages: VecDeque::new(),
                        last_access: Instant::now(),
                    },
                );
            }
        }
        drop(threads);
        self.evict_if_over_capacity();
    }

    fn evict_if_over_capacity(&self) {
        let mut threads = self.threads.lock().expect("conversation lock poisoned");
        while threads.len() > self.max_threads {
            threads.shift_remove_index(0);
        }
    }

    fn maybe_cleanup(&self) {
        let n = self
            .access_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if n % 10 != 0 {
            return;
        }
        let mut threads = self.threads.lock().expect("conversation lock poisoned");
        threads.retain(|_, entry| entry.last_access.elapsed() < self.ttl);
    }
}

fn is_duplicate_of_tail(history: &[Message], candidate: &Message) -> bool {
    history
        .last()
        .map(|last| {
            std::mem::discriminant(last) == std::mem::discriminant(candidate)
                && last.content().as_text() == candidate.content().as_text()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: prepare always returns exactly one leading system message (P1).
    #[test]
    fn prepare_begins_with_one_system_message() {
        let store = ConversationStore::new(10, 50, std::time::Duration::from_secs(3600));
        let out = store.prepare("t1", Message::system("sys"), Message::user("hi"));
        assert!(out[0].is_system());
        assert_eq!(out.iter().filter(|m| m.is_system()).count(), 1);
    }

    /// **Scenario**: appending an empty-content message is a no-op.
    #[test]
    fn append_skips_empty_content() {
        let store = ConversationStore::new(10, 50, std::time::Duration::from_secs(3600));
        store.append_user("t1", Message::user(""));
        assert_eq!(store.stats().total_messages, 0);
    }

    /// **Scenario**: appending the same user message twice in a row stores it once.
    #[test]
    fn append_rejects_duplicate_against_tail() {
        let store = ConversationStore::new(10, 50, std::time::Duration::from_secs(3600));
        store.append_user("t1", Message::user("hello"));
        store.append_user("t1", Message::user("hello"));
        assert_eq!(store.stats().total_messages, 1);
    }

    /// **Scenario**: per-thread history is trimmed to max_messages_per_thread, keeping the
    /// most recent messages.
    #[test]
    fn append_trims_to_max_messages_per_thread() {
        let store = ConversationStore::new(10, 3, std::time::Duration::from_secs(3600));
        for i in 0..5 {
            store.append_user("t1", Message::user(format!("msg-{i}")));
        }
        assert_eq!(store.stats().total_messages, 3);
    }

    /// **Scenario**: clearing a specific thread removes only that thread.
    #[test]
    fn clear_specific_thread_leaves_others() {
        let store = ConversationStore::new(10, 50, std::time::Duration::from_secs(3600));
        store.append_user("t1", Message::user("a"));
        store.append_user("t2", Message::user("b"));
        store.clear(Some("t1"));
        assert_eq!(store.stats().total_threads, 1);
    }
}
