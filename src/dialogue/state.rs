//! Dialogue states.

use std::fmt;

use crate::ledger::Money;

/// What an IT member is reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItAction {
    /// Money arrived on the float.
    Received,
    /// Money spent on an advertising resource.
    Spent { resource: String },
}

/// Step of a multi-message conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DialogueState {
    /// No conversation in progress.
    #[default]
    Idle,

    /// HR: waiting for the spent amount.
    HrAmount,

    /// HR: waiting for a receipt photo, "наличка" or "нет".
    HrReceipt { amount: Money },

    /// IT: waiting for a resource button.
    ItResource,

    /// IT: waiting for an amount (optionally with a receipt photo).
    ItAmount { action: ItAction },

    /// Admin: waiting for `@username` of the recipient.
    AdminGiveTo,

    /// Admin: waiting for the amount handed out.
    AdminGiveAmount { recipient: String },
}

impl DialogueState {
    /// Returns true if no conversation is in progress.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        *self == Self::Idle
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::HrAmount => "hr_amount",
            Self::HrReceipt { .. } => "hr_receipt",
            Self::ItResource => "it_resource",
            Self::ItAmount { .. } => "it_amount",
            Self::AdminGiveTo => "admin_give_to",
            Self::AdminGiveAmount { .. } => "admin_give_amount",
        }
    }
}

impl fmt::Display for DialogueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
