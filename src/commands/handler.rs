//! Update handler implementation.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::keyboards;
use super::types::{BotCommand, CallbackAction, IT_RESOURCES, Reply, escape_html};
use crate::config::{CURRENCY, Role, normalize_username};
use crate::dialogue::{DialogueState, Dialogues, ItAction};
use crate::ledger::{
    Expense, Ledger, LedgerError, Money, NewExpense, PayOutcome, Receipt, ReceiptArchive, RecordId,
    UserRecord, now_timestamp,
};
use crate::telegram::types::PhotoSize;
use crate::telegram::{CallbackQuery, Message, Update, User};

const ACCESS_DENIED: &str = "Доступ запрещён.";
const ACCESS_DENIED_START: &str = "Доступ запрещён. Свяжитесь с администратором.";
const AMOUNT_HINT: &str = "Не удалось распознать сумму. Отправь цифры (например: 1500).";
const UNRECOGNIZED: &str = "Не распознал запрос. Используйте /start и кнопки меню.";
const STORAGE_FAILURE: &str = "⚠️ Не удалось обработать запрос. Попробуйте позже.";

type HandlerResult = Result<Vec<Reply>, LedgerError>;

/// Turns incoming updates into replies, driving the dialogue state machine.
pub struct UpdateHandler {
    /// Balances, expenses and the roster.
    ledger: Arc<Ledger>,

    /// Per-user conversation state.
    dialogues: Dialogues,

    /// Receipt uploader; `None` keeps Telegram file ids.
    receipts: Option<ReceiptArchive>,
}

impl UpdateHandler {
    /// Creates a new update handler.
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, receipts: Option<ReceiptArchive>) -> Self {
        Self {
            ledger,
            dialogues: Dialogues::new(),
            receipts,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub const fn dialogues(&self) -> &Dialogues {
        &self.dialogues
    }

    /// Handles one update and returns what should be sent back.
    ///
    /// Storage failures are logged and reported to the user; they never
    /// abort the caller.
    pub async fn handle(&self, update: &Update) -> Vec<Reply> {
        if let Some(query) = &update.callback_query {
            return match self.handle_callback(query).await {
                Ok(replies) => replies,
                Err(e) => {
                    error!("Callback {:?} from {} failed: {}", query.data, query.from.id, e);
                    vec![Reply::alert(&query.id, STORAGE_FAILURE)]
                }
            };
        }

        if let Some(message) = &update.message {
            return match self.handle_message(message).await {
                Ok(replies) => replies,
                Err(e) => {
                    error!("Message in chat {} failed: {}", message.chat.id, e);
                    vec![Reply::text(message.chat.id, STORAGE_FAILURE)]
                }
            };
        }

        debug!("Ignoring update {} without message or callback", update.update_id);
        Vec::new()
    }

    async fn handle_message(&self, message: &Message) -> HandlerResult {
        let Some(from) = message.from.as_ref().filter(|u| !u.is_bot) else {
            return Ok(Vec::new());
        };
        let chat_id = message.chat.id;
        let text = message.text_or_caption().trim();

        if let Some(command) = BotCommand::parse(text) {
            debug!("Handling command {} from {}", command, from.id);
            return match command {
                BotCommand::Start => self.handle_start(from, chat_id).await,
                BotCommand::Help => Ok(vec![Reply::text(chat_id, help_text())]),
                BotCommand::Cancel => {
                    self.dialogues.clear(from.id).await;
                    Ok(vec![Reply::text(chat_id, "Операция отменена.")])
                }
            };
        }

        let Some(user) = self.ledger.ensure_user(from.id, from.username.as_deref()).await? else {
            return Ok(vec![Reply::text(chat_id, ACCESS_DENIED)]);
        };

        match self.dialogues.get(from.id).await {
            DialogueState::Idle => Ok(vec![Reply::text(chat_id, UNRECOGNIZED)]),
            DialogueState::HrAmount => self.hr_amount(from.id, chat_id, text).await,
            DialogueState::HrReceipt { amount } => self.hr_receipt(from.id, &user, message, amount).await,
            DialogueState::ItResource => Ok(vec![Reply::with_keyboard(
                chat_id,
                "Выберите ресурс кнопкой:",
                keyboards::it_resources(),
            )]),
            DialogueState::ItAmount { action } => self.it_amount(from.id, &user, message, action).await,
            DialogueState::AdminGiveTo => self.admin_give_to(from.id, chat_id, text).await,
            DialogueState::AdminGiveAmount { recipient } => {
                self.admin_give_amount(from.id, &user, chat_id, text, &recipient).await
            }
        }
    }

    async fn handle_start(&self, from: &User, chat_id: i64) -> HandlerResult {
        self.dialogues.clear(from.id).await;

        let Some(user) = self.ledger.ensure_user(from.id, from.username.as_deref()).await? else {
            info!("Denied /start from {} ({:?})", from.id, from.username);
            return Ok(vec![Reply::text(chat_id, ACCESS_DENIED_START)]);
        };

        let greeting = match user.role {
            Role::Hr => "👩‍💼 Добро пожаловать, HR. Вы в своём аккаунте.",
            Role::It => "💻 Добро пожаловать, IT. Вы в своём аккаунте.",
            Role::Admin => "🔑 <b>Добро пожаловать, Админ.</b>",
        };
        Ok(vec![Reply::with_keyboard(chat_id, greeting, keyboards::role_menu(user.role))])
    }

    // ---------- HR flow ----------

    async fn hr_amount(&self, user_id: i64, chat_id: i64, text: &str) -> HandlerResult {
        let Some(amount) = Money::parse_amount(text) else {
            return Ok(vec![Reply::text(chat_id, AMOUNT_HINT)]);
        };

        self.dialogues
            .set(user_id, DialogueState::HrReceipt { amount })
            .await;
        Ok(vec![Reply::text(
            chat_id,
            "📸 Прикрепи фото чека или напиши 'наличка'. Если чека нет, отправь 'нет'.",
        )])
    }

    async fn hr_receipt(
        &self,
        tg_id: i64,
        user: &UserRecord,
        message: &Message,
        amount: Money,
    ) -> HandlerResult {
        let chat_id = message.chat.id;
        let text = message.text_or_caption().trim();

        let (receipt, note) = if let Some(photo) = message.largest_photo() {
            let note = (!text.is_empty()).then(|| text.to_owned());
            (Some(self.store_receipt(tg_id, photo).await), note)
        } else {
            match text.to_lowercase().as_str() {
                "наличка" | "наличка." | "нал" => (None, Some("наличка".to_owned())),
                "нет" | "no" => (None, None),
                "" => {
                    return Ok(vec![Reply::text(
                        chat_id,
                        "❌ Отправь фото чека, 'наличка' или 'нет'.",
                    )]);
                }
                _ => (None, Some(text.to_owned())),
            }
        };

        let expense = self
            .ledger
            .record_expense(NewExpense::pending(user, amount, None, receipt, note, now_timestamp()))
            .await?;
        self.dialogues.clear(tg_id).await;

        let headline = format!("Новая расходка от @{} ({})", user.username, user.role);
        let mut replies = self.notify_admin(&expense, &headline).await?;
        replies.push(Reply::text(chat_id, "✅ Заявка отправлена админу."));
        Ok(replies)
    }

    // ---------- IT flow ----------

    async fn it_amount(
        &self,
        tg_id: i64,
        user: &UserRecord,
        message: &Message,
        action: ItAction,
    ) -> HandlerResult {
        let chat_id = message.chat.id;
        let Some(amount) = Money::parse_amount(message.text_or_caption()) else {
            return Ok(vec![Reply::text(chat_id, AMOUNT_HINT)]);
        };

        match action {
            ItAction::Received => {
                let balance = self.ledger.change_balance(&user.id, amount, None).await?;
                self.dialogues.clear(tg_id).await;
                Ok(vec![Reply::text(
                    chat_id,
                    format!("✅ Баланс пополнен на {amount} {CURRENCY}. Текущий баланс: {balance} {CURRENCY}"),
                )])
            }
            ItAction::Spent { resource } => {
                let receipt = match message.largest_photo() {
                    Some(photo) => Some(self.store_receipt(tg_id, photo).await),
                    None => None,
                };

                let expense = self
                    .ledger
                    .record_expense(NewExpense::pending(
                        user,
                        amount,
                        Some(resource.clone()),
                        receipt,
                        None,
                        now_timestamp(),
                    ))
                    .await?;
                // Stored: a failure below must not lead to a second expense on retry.
                self.dialogues.clear(tg_id).await;
                let debit = amount.checked_neg().ok_or(LedgerError::Overflow)?;
                let balance = self.ledger.change_balance(&user.id, debit, None).await?;

                let headline = format!("Новая расходка IT от @{} ({})", user.username, resource);
                let mut replies = self.notify_admin(&expense, &headline).await?;
                replies.push(Reply::text(
                    chat_id,
                    format!("✅ Расход зарегистрирован и списан с баланса. Текущий баланс: {balance} {CURRENCY}"),
                ));
                Ok(replies)
            }
        }
    }

    // ---------- Admin give flow ----------

    async fn admin_give_to(&self, user_id: i64, chat_id: i64, text: &str) -> HandlerResult {
        let target = text.split_whitespace().next().unwrap_or_default();
        let recipient = normalize_username(target);
        if !target.starts_with('@') || recipient.is_empty() {
            return Ok(vec![Reply::text(chat_id, "Укажи username в формате @username.")]);
        }

        self.dialogues
            .set(user_id, DialogueState::AdminGiveAmount { recipient })
            .await;
        Ok(vec![Reply::text(chat_id, "Укажи сумму, которую дал (например: 1500).")])
    }

    async fn admin_give_amount(
        &self,
        tg_id: i64,
        admin: &UserRecord,
        chat_id: i64,
        text: &str,
        recipient: &str,
    ) -> HandlerResult {
        let Some(amount) = Money::parse_amount(text) else {
            return Ok(vec![Reply::text(chat_id, AMOUNT_HINT)]);
        };
        let Some(target) = self.ledger.user_by_username(recipient).await? else {
            warn!("Give-money target @{} has not started the bot", recipient);
            self.dialogues.clear(tg_id).await;
            return Ok(vec![Reply::text(
                chat_id,
                format!(
                    "❌ @{} ещё не запускал бота. Попросите его нажать /start.",
                    escape_html(recipient)
                ),
            )]);
        };

        let balance = self
            .ledger
            .transfer(Some(admin), Some(&target), amount)
            .await?
            .unwrap_or_default();
        self.dialogues.clear(tg_id).await;
        info!("Admin @{} gave {} {} to @{}", admin.username, amount, CURRENCY, target.username);

        let mut replies = Vec::new();
        if let Some(tg_id) = target.tg_id {
            replies.push(Reply::text(
                tg_id,
                format!("💰 Вам зачислено {amount} {CURRENCY} от админа. Баланс: {balance} {CURRENCY}"),
            ));
        }
        replies.push(Reply::text(chat_id, "✅ Операция выполнена."));
        Ok(replies)
    }

    // ---------- Callbacks ----------

    async fn handle_callback(&self, query: &CallbackQuery) -> HandlerResult {
        let Some(action) = query.data.as_deref().and_then(CallbackAction::parse) else {
            debug!("Unknown callback data {:?}", query.data);
            return Ok(vec![Reply::ack(&query.id)]);
        };

        let Some(user) = self
            .ledger
            .ensure_user(query.from.id, query.from.username.as_deref())
            .await?
        else {
            return Ok(vec![Reply::alert(&query.id, ACCESS_DENIED)]);
        };

        if let Some(required) = required_role(&action)
            && user.role != required
        {
            return Ok(vec![Reply::alert(&query.id, role_only_message(required))]);
        }

        let chat_id = query.message.as_ref().map_or(query.from.id, |m| m.chat.id);
        let tg_id = query.from.id;

        match action {
            CallbackAction::Balance => {
                let balance = self.ledger.balance(&user.id).await?;
                Ok(vec![
                    Reply::text(
                        chat_id,
                        format!("💰 Текущий баланс @{}: <b>{balance} {CURRENCY}</b>", user.username),
                    ),
                    Reply::ack(&query.id),
                ])
            }
            CallbackAction::HrSpent => {
                self.dialogues.set(tg_id, DialogueState::HrAmount).await;
                Ok(vec![
                    Reply::text(
                        chat_id,
                        "Отправь сумму (например: 1500), затем прикрепи фото чека или напиши 'наличка'.",
                    ),
                    Reply::ack(&query.id),
                ])
            }
            CallbackAction::ItReceived => {
                self.dialogues
                    .set(tg_id, DialogueState::ItAmount { action: ItAction::Received })
                    .await;
                Ok(vec![
                    Reply::text(chat_id, "Отправь сумму, которая пришла на баланс (например: 5000)."),
                    Reply::ack(&query.id),
                ])
            }
            CallbackAction::ItSpent => {
                self.dialogues.set(tg_id, DialogueState::ItResource).await;
                Ok(vec![
                    Reply::with_keyboard(chat_id, "Выберите ресурс:", keyboards::it_resources()),
                    Reply::ack(&query.id),
                ])
            }
            CallbackAction::ItResource(resource) => {
                if !IT_RESOURCES.contains(&resource.as_str()) {
                    return Ok(vec![Reply::alert(&query.id, "Неизвестный ресурс.")]);
                }
                let prompt = format!(
                    "Ресурс: {}. Теперь отправь сумму и прикрепи фото чека (если есть).",
                    escape_html(&resource)
                );
                self.dialogues
                    .set(tg_id, DialogueState::ItAmount { action: ItAction::Spent { resource } })
                    .await;
                Ok(vec![Reply::text(chat_id, prompt), Reply::ack(&query.id)])
            }
            CallbackAction::AdminGive => {
                self.dialogues.set(tg_id, DialogueState::AdminGiveTo).await;
                Ok(vec![
                    Reply::text(chat_id, "Кому выдали деньги? Укажи @username (например: @mkkdko)."),
                    Reply::ack(&query.id),
                ])
            }
            CallbackAction::AdminStats => {
                let text = self.statistics_text().await?;
                Ok(vec![Reply::text(chat_id, text), Reply::ack(&query.id)])
            }
            CallbackAction::AdminOwed => {
                let text = self.owed_text().await?;
                Ok(vec![Reply::text(chat_id, text), Reply::ack(&query.id)])
            }
            CallbackAction::AdminPaid(id) => self.admin_paid(query, &user, &id).await,
            CallbackAction::AdminDue(id) => self.admin_due(query, &id).await,
        }
    }

    async fn admin_paid(&self, query: &CallbackQuery, admin: &UserRecord, id: &RecordId) -> HandlerResult {
        let (expense, recipient, balance) = match self.ledger.pay_expense(id, admin).await? {
            PayOutcome::NotFound => return Ok(vec![Reply::alert(&query.id, "Заявка не найдена.")]),
            PayOutcome::AlreadyPaid => return Ok(vec![Reply::alert(&query.id, "Уже оплачено.")]),
            PayOutcome::Paid {
                expense,
                recipient,
                recipient_balance,
            } => (expense, recipient, recipient_balance),
        };

        let mut replies = Vec::new();
        match recipient.and_then(|r| r.tg_id) {
            Some(tg_id) => replies.push(Reply::text(
                tg_id,
                format!(
                    "✅ Вам зачислено {} {} по заявке #{}. Баланс: {} {CURRENCY}",
                    expense.amount,
                    expense.currency,
                    expense.id,
                    balance.unwrap_or_default()
                ),
            )),
            None => warn!("Cannot notify @{} about paid expense #{}", expense.username, expense.id),
        }
        replies.push(Reply::toast(&query.id, "Отмечено как оплачено."));
        replies.extend(clear_keyboard(query));
        Ok(replies)
    }

    async fn admin_due(&self, query: &CallbackQuery, id: &RecordId) -> HandlerResult {
        let Some(expense) = self.ledger.expense(id).await? else {
            return Ok(vec![Reply::alert(&query.id, "Заявка не найдена.")]);
        };
        if expense.is_paid() {
            let mut replies = vec![Reply::alert(&query.id, "Уже оплачено.")];
            replies.extend(clear_keyboard(query));
            return Ok(replies);
        }

        let mut replies = Vec::new();
        if let Some(tg_id) = self
            .ledger
            .user_by_username(&expense.username)
            .await?
            .and_then(|u| u.tg_id)
        {
            replies.push(Reply::text(
                tg_id,
                format!(
                    "⏳ Ваша заявка #{} ({} {}) отмечена как ожидающая оплаты.",
                    expense.id, expense.amount, expense.currency
                ),
            ));
        }
        replies.push(Reply::toast(&query.id, "Отложено (Должен)."));
        replies.extend(clear_keyboard(query));
        Ok(replies)
    }

    async fn statistics_text(&self) -> Result<String, LedgerError> {
        let stats = self.ledger.statistics().await?;
        if stats.is_empty() {
            return Ok("Пока нет пользователей.".to_owned());
        }

        let mut text = String::from("📊 <b>Статистика по балансам:</b>");
        for (user, balance) in stats {
            let _ = write!(text, "\n@{} ({}): {balance} {CURRENCY}", user.username, user.role);
        }
        Ok(text)
    }

    async fn owed_text(&self) -> Result<String, LedgerError> {
        let pending = self.ledger.pending_expenses().await?;
        if pending.is_empty() {
            return Ok("Нет заявок, ожидающих оплаты.".to_owned());
        }

        let mut total = Money::ZERO;
        let mut text = String::from("💸 <b>Ожидают оплаты:</b>");
        for expense in &pending {
            total = total.checked_add(expense.amount).ok_or(LedgerError::Overflow)?;
            let _ = write!(
                text,
                "\n#{} @{}: {} {}",
                expense.id, expense.username, expense.amount, expense.currency
            );
            if let Some(resource) = &expense.resource {
                let _ = write!(text, " ({})", escape_html(resource));
            }
        }
        let _ = write!(text, "\n<b>Итого: {total} {CURRENCY}</b>");
        Ok(text)
    }

    // ---------- Helpers ----------

    async fn store_receipt(&self, tg_id: i64, photo: &PhotoSize) -> Receipt {
        match &self.receipts {
            Some(archive) => archive.archive(tg_id, photo).await,
            None => Receipt::TelegramFile(photo.file_id.clone()),
        }
    }

    /// Builds the admin notification for a new expense.
    async fn notify_admin(&self, expense: &Expense, headline: &str) -> HandlerResult {
        let Some(admin) = self.ledger.admin().await? else {
            warn!("Admin has not started the bot; expense #{} not announced", expense.id);
            return Ok(Vec::new());
        };
        let Some(chat_id) = admin.tg_id else {
            warn!("Admin @{} has no Telegram id yet", admin.username);
            return Ok(Vec::new());
        };

        let mut replies = vec![Reply::with_keyboard(
            chat_id,
            expense_caption(expense, headline),
            keyboards::expense_actions(&expense.id),
        )];

        if let Some(url) = &expense.image_url {
            replies.push(Reply::text(chat_id, format!("🧾 Чек: {}", escape_html(url))));
        } else if let Some(file_id) = &expense.photo_id {
            replies.push(Reply::Photo {
                chat_id,
                file_id: file_id.clone(),
                caption: format!("🧾 Чек к заявке #{}", expense.id),
            });
        }
        Ok(replies)
    }
}

impl std::fmt::Debug for UpdateHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateHandler")
            .field("receipts", &self.receipts.is_some())
            .finish_non_exhaustive()
    }
}

/// Role a callback is restricted to, if any.
const fn required_role(action: &CallbackAction) -> Option<Role> {
    match action {
        CallbackAction::Balance => None,
        CallbackAction::HrSpent => Some(Role::Hr),
        CallbackAction::ItReceived | CallbackAction::ItSpent | CallbackAction::ItResource(_) => {
            Some(Role::It)
        }
        CallbackAction::AdminGive
        | CallbackAction::AdminStats
        | CallbackAction::AdminOwed
        | CallbackAction::AdminPaid(_)
        | CallbackAction::AdminDue(_) => Some(Role::Admin),
    }
}

const fn role_only_message(role: Role) -> &'static str {
    match role {
        Role::Hr => "Только HR.",
        Role::It => "Только IT.",
        Role::Admin => "Только админ.",
    }
}

fn clear_keyboard(query: &CallbackQuery) -> Option<Reply> {
    query.message.as_ref().map(|m| Reply::ClearKeyboard {
        chat_id: m.chat.id,
        message_id: m.message_id,
    })
}

fn expense_caption(expense: &Expense, headline: &str) -> String {
    let mut text = format!(
        "💵 <b>{}</b>\nСумма: {} {}",
        escape_html(headline),
        expense.amount,
        expense.currency
    );
    if let Some(note) = &expense.note {
        let _ = write!(text, "\n📝 {}", escape_html(note));
    }
    let _ = write!(
        text,
        "\nЗаявка #{}\nДата: {} UTC",
        expense.id,
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    );
    text
}

fn help_text() -> String {
    let mut text = String::from("Используйте /start для входа. Кнопки доступны в меню.\n");
    for command in BotCommand::all() {
        let _ = write!(text, "\n{command} - {}", command.description());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Roster;
    use crate::ledger::{MemoryStore, Store};
    use crate::telegram::types::Chat;

    const ADMIN: i64 = 1;
    const HR: i64 = 2;
    const IT: i64 = 3;
    const STRANGER: i64 = 4;

    fn handler() -> UpdateHandler {
        let roster = Roster::parse("@mkkdko:hr,@denishr55:it", "boss").unwrap();
        let ledger = Ledger::new(Store::Memory(MemoryStore::new()), roster);
        UpdateHandler::new(Arc::new(ledger), None)
    }

    fn user(id: i64) -> User {
        let username = match id {
            ADMIN => "boss",
            HR => "mkkdko",
            IT => "denishr55",
            _ => "stranger",
        };
        User {
            id,
            is_bot: false,
            first_name: "Test".to_owned(),
            username: Some(username.to_owned()),
        }
    }

    fn message(from: i64, text: &str) -> Update {
        Update {
            update_id: 1,
            message: Some(Message {
                message_id: 100,
                from: Some(user(from)),
                chat: Chat { id: from },
                text: Some(text.to_owned()),
                caption: None,
                photo: None,
            }),
            callback_query: None,
        }
    }

    fn photo(from: i64, caption: &str) -> Update {
        Update {
            update_id: 1,
            message: Some(Message {
                message_id: 101,
                from: Some(user(from)),
                chat: Chat { id: from },
                text: None,
                caption: Some(caption.to_owned()),
                photo: Some(vec![
                    PhotoSize {
                        file_id: "small".to_owned(),
                        file_unique_id: "s".to_owned(),
                        width: 90,
                        height: 90,
                    },
                    PhotoSize {
                        file_id: "big".to_owned(),
                        file_unique_id: "b".to_owned(),
                        width: 800,
                        height: 800,
                    },
                ]),
            }),
            callback_query: None,
        }
    }

    fn callback(from: i64, data: &str) -> Update {
        Update {
            update_id: 1,
            message: None,
            callback_query: Some(CallbackQuery {
                id: format!("cb-{from}"),
                from: user(from),
                message: Some(Message {
                    message_id: 55,
                    from: None,
                    chat: Chat { id: from },
                    text: Some("menu".to_owned()),
                    caption: None,
                    photo: None,
                }),
                data: Some(data.to_owned()),
            }),
        }
    }

    fn texts_to(replies: &[Reply], chat: i64) -> Vec<String> {
        replies
            .iter()
            .filter_map(|r| match r {
                Reply::Text { chat_id, text, .. } if *chat_id == chat => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn keyboard_for(replies: &[Reply], chat: i64) -> Vec<String> {
        replies
            .iter()
            .find_map(|r| match r {
                Reply::Text {
                    chat_id,
                    keyboard: Some(kb),
                    ..
                } if *chat_id == chat => Some(kb.callback_data().into_iter().map(str::to_owned).collect::<Vec<_>>()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn alert_text(replies: &[Reply]) -> Option<String> {
        replies.iter().find_map(|r| match r {
            Reply::CallbackAnswer {
                text: Some(text),
                show_alert: true,
                ..
            } => Some(text.clone()),
            _ => None,
        })
    }

    async fn balance_of(handler: &UpdateHandler, username: &str) -> Money {
        let user = handler.ledger().user_by_username(username).await.unwrap().unwrap();
        handler.ledger().balance(&user.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_denied_for_stranger() {
        let handler = handler();
        let replies = handler.handle(&message(STRANGER, "/start")).await;
        assert_eq!(texts_to(&replies, STRANGER), vec![ACCESS_DENIED_START]);

        let replies = handler.handle(&message(STRANGER, "1500")).await;
        assert_eq!(texts_to(&replies, STRANGER), vec![ACCESS_DENIED]);

        let replies = handler.handle(&callback(STRANGER, "balance")).await;
        assert_eq!(alert_text(&replies).as_deref(), Some(ACCESS_DENIED));
    }

    #[tokio::test]
    async fn test_start_shows_role_menu() {
        let handler = handler();

        let replies = handler.handle(&message(HR, "/start")).await;
        assert_eq!(keyboard_for(&replies, HR), vec!["hr:spent", "balance"]);

        let replies = handler.handle(&message(ADMIN, "/start")).await;
        assert_eq!(keyboard_for(&replies, ADMIN), vec!["admin:give", "admin:stats", "admin:owed"]);
    }

    #[tokio::test]
    async fn test_help_and_idle_messages() {
        let handler = handler();
        let replies = handler.handle(&message(STRANGER, "/help")).await;
        assert!(texts_to(&replies, STRANGER)[0].contains("/start"));

        handler.handle(&message(HR, "/start")).await;
        let replies = handler.handle(&message(HR, "привет")).await;
        assert_eq!(texts_to(&replies, HR), vec![UNRECOGNIZED]);
    }

    #[tokio::test]
    async fn test_hr_expense_and_admin_payment() {
        let handler = handler();
        handler.handle(&message(ADMIN, "/start")).await;
        handler.handle(&message(HR, "/start")).await;

        handler.handle(&callback(HR, "hr:spent")).await;
        let replies = handler.handle(&message(HR, "abc")).await;
        assert_eq!(texts_to(&replies, HR), vec![AMOUNT_HINT]);

        handler.handle(&message(HR, "1500,50")).await;
        let replies = handler.handle(&message(HR, "Наличка")).await;

        assert!(texts_to(&replies, HR)[0].contains("Заявка отправлена"));
        let admin_text = &texts_to(&replies, ADMIN)[0];
        assert!(admin_text.contains("@mkkdko"));
        assert!(admin_text.contains("1500.50 UAH"));
        assert!(admin_text.contains("наличка"));

        let actions = keyboard_for(&replies, ADMIN);
        assert_eq!(actions.len(), 2);
        let paid = actions[0].clone();
        assert!(paid.starts_with("admin:paid:"));
        assert!(handler.dialogues().get(HR).await.is_idle());

        // Not the admin: rejected.
        let replies = handler.handle(&callback(HR, &paid)).await;
        assert_eq!(alert_text(&replies).as_deref(), Some("Только админ."));

        let replies = handler.handle(&callback(ADMIN, &paid)).await;
        assert!(texts_to(&replies, HR)[0].contains("Вам зачислено 1500.50 UAH"));
        assert!(replies.iter().any(|r| matches!(
            r,
            Reply::ClearKeyboard { chat_id: ADMIN, message_id: 55 }
        )));
        assert_eq!(balance_of(&handler, "mkkdko").await, Money::from_minor(150_050));
        assert_eq!(balance_of(&handler, "boss").await, Money::from_minor(-150_050));

        let replies = handler.handle(&callback(ADMIN, &paid)).await;
        assert_eq!(alert_text(&replies).as_deref(), Some("Уже оплачено."));
        assert_eq!(balance_of(&handler, "mkkdko").await, Money::from_minor(150_050));
    }

    #[tokio::test]
    async fn test_it_received_and_spent_with_photo() {
        let handler = handler();
        handler.handle(&message(ADMIN, "/start")).await;
        handler.handle(&message(IT, "/start")).await;

        handler.handle(&callback(IT, "it:received")).await;
        let replies = handler.handle(&message(IT, "5000")).await;
        assert!(texts_to(&replies, IT)[0].contains("Текущий баланс: 5000 UAH"));

        let replies = handler.handle(&callback(IT, "it:spent")).await;
        assert_eq!(keyboard_for(&replies, IT).len(), IT_RESOURCES.len());

        handler.handle(&callback(IT, "res:Таргет")).await;
        let replies = handler.handle(&photo(IT, "1200 грн")).await;

        assert!(texts_to(&replies, IT)[0].contains("Текущий баланс: 3800 UAH"));
        assert!(texts_to(&replies, ADMIN)[0].contains("Новая расходка IT от @denishr55 (Таргет)"));
        assert!(replies.iter().any(|r| matches!(
            r,
            Reply::Photo { chat_id: ADMIN, file_id, .. } if file_id == "big"
        )));

        let pending = handler.ledger().pending_expenses().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].photo_id.as_deref(), Some("big"));
        assert_eq!(pending[0].resource.as_deref(), Some("Таргет"));
    }

    #[tokio::test]
    async fn test_it_only_callbacks() {
        let handler = handler();
        let replies = handler.handle(&callback(HR, "it:received")).await;
        assert_eq!(alert_text(&replies).as_deref(), Some("Только IT."));

        let replies = handler.handle(&callback(IT, "res:Казино")).await;
        assert_eq!(alert_text(&replies).as_deref(), Some("Неизвестный ресурс."));
        assert!(handler.dialogues().get(IT).await.is_idle());
    }

    #[tokio::test]
    async fn test_admin_gives_money() {
        let handler = handler();
        handler.handle(&message(HR, "/start")).await;
        handler.handle(&message(ADMIN, "/start")).await;

        handler.handle(&callback(ADMIN, "admin:give")).await;
        let replies = handler.handle(&message(ADMIN, "mkkdko")).await;
        assert!(texts_to(&replies, ADMIN)[0].contains("@username"));

        handler.handle(&message(ADMIN, "@MkkDko")).await;
        let replies = handler.handle(&message(ADMIN, "700")).await;

        assert_eq!(texts_to(&replies, ADMIN), vec!["✅ Операция выполнена."]);
        assert!(texts_to(&replies, HR)[0].contains("Баланс: 700 UAH"));
        assert_eq!(balance_of(&handler, "boss").await, Money::from_minor(-70_000));
        assert!(handler.dialogues().get(ADMIN).await.is_idle());
    }

    #[tokio::test]
    async fn test_admin_give_to_unknown_member() {
        let handler = handler();
        handler.handle(&message(ADMIN, "/start")).await;
        handler.handle(&callback(ADMIN, "admin:give")).await;
        handler.handle(&message(ADMIN, "@mkkdko")).await;

        let replies = handler.handle(&message(ADMIN, "700")).await;
        assert!(texts_to(&replies, ADMIN)[0].contains("ещё не запускал бота"));
        assert_eq!(balance_of(&handler, "boss").await, Money::ZERO);
    }

    #[tokio::test]
    async fn test_stats_owed_and_due() {
        let handler = handler();
        handler.handle(&message(ADMIN, "/start")).await;
        handler.handle(&message(HR, "/start")).await;
        handler.handle(&callback(HR, "hr:spent")).await;
        handler.handle(&message(HR, "250")).await;
        let replies = handler.handle(&message(HR, "нет")).await;
        let due = keyboard_for(&replies, ADMIN)[1].clone();
        assert!(due.starts_with("admin:due:"));

        let replies = handler.handle(&callback(ADMIN, "admin:stats")).await;
        let stats = &texts_to(&replies, ADMIN)[0];
        assert!(stats.contains("@mkkdko (hr): 0 UAH"));
        assert!(stats.contains("@boss (admin): 0 UAH"));

        let replies = handler.handle(&callback(ADMIN, "admin:owed")).await;
        assert!(texts_to(&replies, ADMIN)[0].contains("Итого: 250 UAH"));

        let replies = handler.handle(&callback(ADMIN, &due)).await;
        assert!(texts_to(&replies, HR)[0].contains("ожидающая оплаты"));
        assert_eq!(handler.ledger().pending_expenses().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_clears_dialogue() {
        let handler = handler();
        handler.handle(&message(HR, "/start")).await;
        handler.handle(&callback(HR, "hr:spent")).await;
        assert_eq!(handler.dialogues().get(HR).await, DialogueState::HrAmount);

        handler.handle(&message(HR, "/cancel")).await;
        assert!(handler.dialogues().get(HR).await.is_idle());
    }

    #[tokio::test]
    async fn test_expense_without_admin_is_still_recorded() {
        let handler = handler();
        handler.handle(&message(HR, "/start")).await;
        handler.handle(&callback(HR, "hr:spent")).await;
        handler.handle(&message(HR, "100")).await;
        let replies = handler.handle(&message(HR, "такси")).await;

        assert_eq!(texts_to(&replies, HR).len(), 1);
        let pending = handler.ledger().pending_expenses().await.unwrap();
        assert_eq!(pending[0].note.as_deref(), Some("такси"));
    }

    #[tokio::test]
    async fn test_hr_photo_receipt_keeps_caption_as_note() {
        let handler = handler();
        handler.handle(&message(HR, "/start")).await;
        handler.handle(&callback(HR, "hr:spent")).await;
        handler.handle(&message(HR, "500")).await;
        handler.handle(&photo(HR, "такси до офиса")).await;

        let pending = handler.ledger().pending_expenses().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].amount, Money::from_minor(50_000));
        assert_eq!(pending[0].photo_id.as_deref(), Some("big"));
        assert_eq!(pending[0].note.as_deref(), Some("такси до офиса"));
    }

    #[tokio::test]
    async fn test_it_spent_retry_after_storage_failure() {
        let dir = std::env::temp_dir().join(format!("ledger_it_spent_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = MemoryStore::open(dir.join("ledger.json")).unwrap();
        let roster = Roster::parse("@denishr55:it", "boss").unwrap();
        let handler = UpdateHandler::new(Arc::new(Ledger::new(Store::Memory(store), roster)), None);

        handler.handle(&message(IT, "/start")).await;
        handler.handle(&callback(IT, "it:spent")).await;
        handler.handle(&callback(IT, "res:Джубл")).await;

        std::fs::remove_dir_all(&dir).unwrap();
        for _ in 0..2 {
            let replies = handler.handle(&message(IT, "100")).await;
            assert_eq!(texts_to(&replies, IT), vec![STORAGE_FAILURE]);
        }
        assert!(handler.ledger().pending_expenses().await.unwrap().is_empty());
        assert_eq!(balance_of(&handler, "denishr55").await, Money::ZERO);
        assert_eq!(handler.dialogues().get(IT).await.name(), "it_amount");

        std::fs::create_dir_all(&dir).unwrap();
        let replies = handler.handle(&message(IT, "100")).await;
        assert!(texts_to(&replies, IT)[0].contains("Текущий баланс: -100 UAH"));
        assert_eq!(handler.ledger().pending_expenses().await.unwrap().len(), 1);
        assert!(handler.dialogues().get(IT).await.is_idle());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_give_to_unknown_escapes_username() {
        let handler = handler();
        handler.handle(&message(ADMIN, "/start")).await;
        handler.handle(&callback(ADMIN, "admin:give")).await;
        handler.handle(&message(ADMIN, "@a<b")).await;

        let replies = handler.handle(&message(ADMIN, "10")).await;
        let text = &texts_to(&replies, ADMIN)[0];
        assert!(text.contains("@a&lt;b"));
        assert!(!text.contains("a<b"));
    }

    #[tokio::test]
    async fn test_due_on_paid_expense() {
        let handler = handler();
        handler.handle(&message(ADMIN, "/start")).await;
        handler.handle(&message(HR, "/start")).await;
        handler.handle(&callback(HR, "hr:spent")).await;
        handler.handle(&message(HR, "250")).await;
        let replies = handler.handle(&message(HR, "нет")).await;
        let actions = keyboard_for(&replies, ADMIN);

        handler.handle(&callback(ADMIN, &actions[0])).await;
        let replies = handler.handle(&callback(ADMIN, &actions[1])).await;

        assert_eq!(alert_text(&replies).as_deref(), Some("Уже оплачено."));
        assert!(texts_to(&replies, HR).is_empty());
    }
}
