//! Inline keyboards shown by the bot.

use super::types::{CallbackAction, IT_RESOURCES};
use crate::config::Role;
use crate::ledger::RecordId;
use crate::telegram::{InlineKeyboardButton, InlineKeyboardMarkup};

fn button(text: &str, action: &CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::new(text, action.data())
}

/// Main menu for a role.
#[must_use]
pub fn role_menu(role: Role) -> InlineKeyboardMarkup {
    match role {
        Role::Hr => InlineKeyboardMarkup::column([
            button("💵 Потратил", &CallbackAction::HrSpent),
            button("💰 Баланс", &CallbackAction::Balance),
        ]),
        Role::It => InlineKeyboardMarkup::column([
            button("📥 Пришли", &CallbackAction::ItReceived),
            button("💵 Потратил", &CallbackAction::ItSpent),
            button("💰 Баланс", &CallbackAction::Balance),
        ]),
        Role::Admin => InlineKeyboardMarkup::column([
            button("💰 ДАЛ ДЕНЕГ", &CallbackAction::AdminGive),
            button("📊 Статистика", &CallbackAction::AdminStats),
            button("💸 Должен", &CallbackAction::AdminOwed),
        ]),
    }
}

/// Resource picker for IT expenses.
#[must_use]
pub fn it_resources() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::column(
        IT_RESOURCES
            .iter()
            .map(|r| button(r, &CallbackAction::ItResource((*r).to_owned()))),
    )
}

/// Approve / postpone buttons under an expense notification.
#[must_use]
pub fn expense_actions(expense_id: &RecordId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::column([
        button("✅ Оплатил", &CallbackAction::AdminPaid(expense_id.clone())),
        button("⏳ Отложить (Должен)", &CallbackAction::AdminDue(expense_id.clone())),
    ])
}
