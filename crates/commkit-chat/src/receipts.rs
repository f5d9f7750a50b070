//! Read-receipt reconciliation.
//!
//! The service only reports the latest message a partner has read, so a
//! receipt for message M implies every own message created before M is
//! read too. The cascade walks backwards in creation order and stops at
//! the first message already marked read; everything older was settled by
//! an earlier receipt.
//!
//! These are pure functions over a message slice; the chat orchestrator
//! persists whatever they report as changed.

use std::collections::HashSet;

use uuid::Uuid;

use commkit_shared::{ChatMessage, ChatMessageStatus, Identity};

use crate::backend::{ReadReceipt, RemoteMessage};

/// Indices of own (locally sent) messages, ascending by creation time.
fn own_indices_by_time(messages: &[ChatMessage], local: &Identity) -> Vec<usize> {
    let mut indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_own(local))
        .map(|(i, _)| i)
        .collect();
    indices.sort_by_key(|&i| messages[i].created_at);
    indices
}

/// Mark own messages read over the given index range, newest first,
/// stopping at the first already-read message. Returns changed ids.
fn cascade_down(messages: &mut [ChatMessage], order: &[usize]) -> Vec<Uuid> {
    let mut changed = Vec::new();
    for &i in order.iter().rev() {
        let message = &mut messages[i];
        if message.status == ChatMessageStatus::Read {
            break;
        }
        message.status = message.status.advance(ChatMessageStatus::Read);
        changed.push(message.id);
    }
    changed
}

/// Apply a live read receipt for `chat_message_id`: mark that message and
/// every older own message read, stopping at the first already-read one.
/// A receipt for an unknown or not-yet-confirmed message changes nothing.
pub fn apply_read_receipt(
    messages: &mut [ChatMessage],
    local: &Identity,
    chat_message_id: &str,
) -> Vec<Uuid> {
    let order = own_indices_by_time(messages, local);
    let position = order
        .iter()
        .position(|&i| messages[i].chat_message_id.as_deref() == Some(chat_message_id));
    match position {
        Some(position) => cascade_down(messages, &order[..=position]),
        None => Vec::new(),
    }
}

/// Reconcile a fresh full receipt listing, e.g. after loading history:
/// find the newest own message the listing covers and cascade from there.
pub fn reconcile_read_receipts(
    messages: &mut [ChatMessage],
    local: &Identity,
    receipts: &[ReadReceipt],
) -> Vec<Uuid> {
    let receipted: HashSet<&str> = receipts
        .iter()
        .map(|r| r.chat_message_id.as_str())
        .collect();
    let order = own_indices_by_time(messages, local);
    let newest = order.iter().rposition(|&i| {
        messages[i]
            .chat_message_id
            .as_deref()
            .is_some_and(|id| receipted.contains(id))
    });
    match newest {
        Some(position) => cascade_down(messages, &order[..=position]),
        None => Vec::new(),
    }
}

/// True when `remote` is the echo of a message already held locally,
/// identified by the application-assigned id in its metadata.
pub fn is_duplicate(messages: &[ChatMessage], remote: &RemoteMessage) -> bool {
    match remote.app_message_id {
        Some(app_id) => messages.iter().any(|m| m.id == app_id),
        None => false,
    }
}
