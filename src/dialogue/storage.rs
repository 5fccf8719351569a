//! Per-user dialogue storage.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use super::DialogueState;

/// In-memory dialogue state keyed by Telegram user id.
///
/// State is lost on restart, so a half-finished flow simply starts over.
#[derive(Debug, Default)]
pub struct Dialogues {
    states: RwLock<HashMap<i64, DialogueState>>,
}

impl Dialogues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a user; idle if none.
    pub async fn get(&self, user_id: i64) -> DialogueState {
        self.states
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Moves a user to a new state.
    pub async fn set(&self, user_id: i64, state: DialogueState) {
        debug!("Dialogue of {} -> {}", user_id, state);
        let mut states = self.states.write().await;
        if state.is_idle() {
            states.remove(&user_id);
        } else {
            states.insert(user_id, state);
        }
    }

    /// Ends any conversation of a user.
    pub async fn clear(&self, user_id: i64) {
        self.set(user_id, DialogueState::Idle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Money;

    #[tokio::test]
    async fn test_set_get_clear() {
        let dialogues = Dialogues::new();
        assert!(dialogues.get(1).await.is_idle());

        dialogues
            .set(1, DialogueState::HrReceipt { amount: Money::from_minor(100) })
            .await;
        assert_eq!(
            dialogues.get(1).await,
            DialogueState::HrReceipt { amount: Money::from_minor(100) }
        );
        assert!(dialogues.get(2).await.is_idle());
        assert_eq!(dialogues.states.read().await.len(), 1);

        dialogues.clear(1).await;
        assert!(dialogues.get(1).await.is_idle());
        assert!(dialogues.states.read().await.is_empty());
    }
}
