mod api;
mod state;

use chrono::{Datelike, Months, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
};
use tokio::time::{interval, Duration};

use api::{ApiClient, ApiError, CreateBooking};
use state::ChatState;

/// Expired-session sweep interval (seconds).
const SESSION_SWEEP_SECS: u64 = 300;
/// How many date buttons to offer at once.
const MAX_DATE_BUTTONS: usize = 8;

#[derive(Clone)]
struct BotState {
    pool: sqlx::SqlitePool,
    api: ApiClient,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let bot_token = std::env::var("BOT_TOKEN").expect("BOT_TOKEN must be set");
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:zapis.db?mode=rwc".into());
    let api_url = std::env::var("API_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".into());

    let pool = SqlitePoolOptions::new()
        .max_connections(3)
        .connect(&database_url)
        .await?;

    let bot = Bot::new(&bot_token);

    tracing::info!("booking bot starting (api: {})", api_url);

    // Sweep abandoned dialogues
    let sweep_pool = pool.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(SESSION_SWEEP_SECS));
        loop {
            ticker.tick().await;
            state::sweep_expired(&sweep_pool).await;
        }
    });

    let state = BotState {
        pool,
        api: ApiClient::new(api_url),
    };

    let message_handler = Update::filter_message().endpoint({
        let state = state.clone();
        move |bot: Bot, msg: Message| {
            let state = state.clone();
            async move {
                if let Err(e) = handle_message(&bot, &msg, &state).await {
                    tracing::error!("message handler: {}", e);
                }
                Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
            }
        }
    });

    let callback_handler = Update::filter_callback_query().endpoint({
        let state = state.clone();
        move |bot: Bot, q: CallbackQuery| {
            let state = state.clone();
            async move {
                if let Err(e) = handle_callback(&bot, &q, &state).await {
                    tracing::error!("callback handler: {}", e);
                }
                Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
            }
        }
    });

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

// ── Message handling (commands + free-text steps) ──

async fn handle_message(bot: &Bot, msg: &Message, state: &BotState) -> anyhow::Result<()> {
    let Some(text) = msg.text() else { return Ok(()) };
    let chat_id = msg.chat.id;

    if let Some(payload) = start_payload(text) {
        return start_dialogue(bot, chat_id, payload, state).await;
    }
    if text.starts_with("/cancel") {
        state::clear(&state.pool, chat_id.0).await?;
        bot.send_message(chat_id, "Хорошо, отменили. Чтобы начать заново — /start")
            .await?;
        return Ok(());
    }
    if text.starts_with("/help") {
        bot.send_message(
            chat_id,
            "Я помогу записаться онлайн 💕\n\n\
             /start — начать запись\n\
             /cancel — отменить текущий шаг\n\
             /help — помощь",
        )
        .await?;
        return Ok(());
    }

    // Free text is only meaningful on the name/phone steps
    let Some(session) = state::load(&state.pool, chat_id.0).await? else {
        bot.send_message(chat_id, "Начнём с команды /start 🙂").await?;
        return Ok(());
    };

    match session.state {
        ChatState::AwaitingName {
            service_id,
            date,
            time,
        } => {
            let name = text.trim();
            if name.is_empty() || name.len() > 100 {
                bot.send_message(chat_id, "Напишите, как вас зовут 🙂").await?;
                return Ok(());
            }
            let next = ChatState::AwaitingPhone {
                service_id,
                date,
                time,
                name: name.to_string(),
            };
            state::save(&state.pool, chat_id.0, &session.vendor_slug, &next).await?;
            bot.send_message(chat_id, "📱 Теперь номер телефона:").await?;
        }

        ChatState::AwaitingPhone {
            service_id,
            date,
            time,
            name,
        } => {
            let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() < 10 {
                bot.send_message(
                    chat_id,
                    "Нужен настоящий номер, например +7 999 123-45-67 🙂",
                )
                .await?;
                return Ok(());
            }
            let phone = text.trim().to_string();
            let next = ChatState::Confirming {
                service_id,
                date: date.clone(),
                time: time.clone(),
                name: name.clone(),
                phone: phone.clone(),
            };
            state::save(&state.pool, chat_id.0, &session.vendor_slug, &next).await?;

            let keyboard = InlineKeyboardMarkup::new(vec![vec![
                InlineKeyboardButton::callback("✅ Подтвердить", "ok"),
                InlineKeyboardButton::callback("❌ Отмена", "abort"),
            ]]);
            bot.send_message(
                chat_id,
                format!(
                    "Проверим:\n\n📅 {} в {}\n👤 {}\n📱 {}\n\nВсё верно?",
                    format_date_ru(&date),
                    time,
                    name,
                    phone
                ),
            )
            .reply_markup(keyboard)
            .await?;
        }

        _ => {
            bot.send_message(chat_id, "Выберите вариант кнопкой ниже 👇")
                .await?;
        }
    }

    Ok(())
}

/// /start, with an optional vendor slug as the deep-link payload.
async fn start_dialogue(
    bot: &Bot,
    chat_id: ChatId,
    payload: &str,
    state: &BotState,
) -> anyhow::Result<()> {
    let slug = if payload.is_empty() {
        match state::load(&state.pool, chat_id.0).await? {
            Some(session) => session.vendor_slug,
            None => {
                bot.send_message(
                    chat_id,
                    "Откройте ссылку мастера — она выглядит как\n\
                     t.me/…?start=<адрес страницы> 🙂",
                )
                .await?;
                return Ok(());
            }
        }
    } else {
        payload.to_string()
    };

    let vendor = match state.api.vendor(&slug).await {
        Ok(v) => v,
        Err(ApiError::Rejected(_)) => {
            bot.send_message(chat_id, "Мастер не найден. Проверьте ссылку 🙂")
                .await?;
            return Ok(());
        }
        Err(e) => {
            tracing::error!("vendor lookup failed: {:?}", e);
            bot.send_message(chat_id, e.user_message()).await?;
            return Ok(());
        }
    };

    let services = match state.api.services(&slug).await {
        Ok(list) => list,
        Err(e) => {
            bot.send_message(chat_id, e.user_message()).await?;
            return Ok(());
        }
    };
    if services.is_empty() {
        bot.send_message(chat_id, "Пока нет услуг для онлайн-записи 😔")
            .await?;
        return Ok(());
    }

    state::save(&state.pool, chat_id.0, &vendor.slug, &ChatState::ChoosingService).await?;

    let buttons: Vec<Vec<InlineKeyboardButton>> = services
        .iter()
        .map(|s| {
            vec![InlineKeyboardButton::callback(
                format!("{} · {} ₽ · {} мин", s.name, s.price, s.duration_min),
                format!("svc:{}", s.id),
            )]
        })
        .collect();

    bot.send_message(
        chat_id,
        format!(
            "✨ <b>{}</b> ✨\n\nПривет! 👋 Выберите услугу:",
            vendor.name
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(InlineKeyboardMarkup::new(buttons))
    .await?;

    Ok(())
}

// ── Callback handling (button clicks) ──

async fn handle_callback(bot: &Bot, q: &CallbackQuery, state: &BotState) -> anyhow::Result<()> {
    let data = q.data.as_deref().unwrap_or("");
    let Some(chat_id) = q.message.as_ref().map(|m| m.chat().id) else {
        bot.answer_callback_query(&q.id).await?;
        return Ok(());
    };

    let Some(session) = state::load(&state.pool, chat_id.0).await? else {
        bot.answer_callback_query(&q.id)
            .text("Сессия истекла. Начните заново: /start")
            .await?;
        return Ok(());
    };
    bot.answer_callback_query(&q.id).await?;
    let slug = session.vendor_slug.clone();

    if let Some(id_str) = data.strip_prefix("svc:") {
        let Ok(service_id) = id_str.parse::<i64>() else { return Ok(()) };
        return offer_dates(bot, chat_id, state, &slug, service_id).await;
    }

    if let Some(date) = data.strip_prefix("date:") {
        let ChatState::ChoosingDate { service_id } = session.state else {
            return stale_step(bot, chat_id).await;
        };
        return offer_times(bot, chat_id, state, &slug, service_id, date).await;
    }

    if let Some(time) = data.strip_prefix("time:") {
        let ChatState::ChoosingTime { service_id, date } = session.state else {
            return stale_step(bot, chat_id).await;
        };
        let next = ChatState::AwaitingName {
            service_id,
            date,
            time: time.to_string(),
        };
        state::save(&state.pool, chat_id.0, &slug, &next).await?;
        bot.send_message(chat_id, "👤 Как вас зовут?").await?;
        return Ok(());
    }

    match data {
        "ok" => {
            let ChatState::Confirming {
                service_id,
                date,
                time,
                name,
                phone,
            } = session.state
            else {
                return stale_step(bot, chat_id).await;
            };

            let result = state
                .api
                .create_booking(
                    &slug,
                    &CreateBooking {
                        service_id,
                        date: &date,
                        time: &time,
                        client_name: &name,
                        client_phone: &phone,
                        source: "telegram",
                        telegram_id: q.from.id.0 as i64,
                    },
                )
                .await;

            match result {
                Ok(created) => {
                    state::clear(&state.pool, chat_id.0).await?;
                    let text = if created.status == "pending" {
                        format!(
                            "⏳ Заявка отправлена!\n📅 {} в {}\n\nМастер подтвердит запись, и вам придёт сообщение.",
                            format_date_ru(&date),
                            time
                        )
                    } else {
                        format!(
                            "✅ Вы записаны!\n📅 {} в {}\n\nЖдём вас! ✨",
                            format_date_ru(&date),
                            time
                        )
                    };
                    bot.send_message(chat_id, text).await?;
                }
                Err(e @ ApiError::Rejected(_)) => {
                    // Most often the slot was taken while the dialogue
                    // was open: show fresh times for the same day
                    bot.send_message(chat_id, e.user_message()).await?;
                    offer_times(bot, chat_id, state, &slug, service_id, &date).await?;
                }
                Err(e) => {
                    tracing::error!("booking via api failed: {:?}", e);
                    bot.send_message(chat_id, e.user_message()).await?;
                }
            }
        }

        "abort" => {
            state::clear(&state.pool, chat_id.0).await?;
            bot.send_message(chat_id, "Запись отменена. Возвращайтесь! /start")
                .await?;
        }

        _ => {}
    }

    Ok(())
}

async fn stale_step(bot: &Bot, chat_id: ChatId) -> anyhow::Result<()> {
    bot.send_message(chat_id, "Эта кнопка устарела. Начните заново: /start")
        .await?;
    Ok(())
}

/// Bookable dates for the service: current plus next month, first
/// `MAX_DATE_BUTTONS` hits.
async fn offer_dates(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    slug: &str,
    service_id: i64,
) -> anyhow::Result<()> {
    let today = Utc::now().date_naive();
    let next_month = today + Months::new(1);

    let mut dates: Vec<String> = Vec::new();
    for (year, month) in [(today.year(), today.month()), (next_month.year(), next_month.month())] {
        match state.api.days(slug, service_id, year, month).await {
            Ok(days) => dates.extend(
                days.into_iter()
                    .filter(|d| d.bookable)
                    .map(|d| d.date),
            ),
            Err(e) => {
                bot.send_message(chat_id, e.user_message()).await?;
                return Ok(());
            }
        }
        if dates.len() >= MAX_DATE_BUTTONS {
            break;
        }
    }
    dates.truncate(MAX_DATE_BUTTONS);

    if dates.is_empty() {
        bot.send_message(chat_id, "Свободных дней пока нет 😔 Загляните позже!")
            .await?;
        return Ok(());
    }

    state::save(
        &state.pool,
        chat_id.0,
        slug,
        &ChatState::ChoosingDate { service_id },
    )
    .await?;

    let buttons: Vec<Vec<InlineKeyboardButton>> = dates
        .chunks(2)
        .map(|chunk| {
            chunk
                .iter()
                .map(|d| InlineKeyboardButton::callback(format_date_ru(d), format!("date:{}", d)))
                .collect()
        })
        .collect();

    bot.send_message(chat_id, "📅 Выберите день:")
        .reply_markup(InlineKeyboardMarkup::new(buttons))
        .await?;
    Ok(())
}

async fn offer_times(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    slug: &str,
    service_id: i64,
    date: &str,
) -> anyhow::Result<()> {
    let slots = match state.api.slots(slug, service_id, date).await {
        Ok(response) => response.slots,
        Err(e) => {
            bot.send_message(chat_id, e.user_message()).await?;
            return Ok(());
        }
    };

    if slots.is_empty() {
        bot.send_message(chat_id, "На этот день всё занято 😔 Выберите другой: /start")
            .await?;
        return Ok(());
    }

    state::save(
        &state.pool,
        chat_id.0,
        slug,
        &ChatState::ChoosingTime {
            service_id,
            date: date.to_string(),
        },
    )
    .await?;

    let buttons: Vec<Vec<InlineKeyboardButton>> = slots
        .chunks(4)
        .map(|chunk| {
            chunk
                .iter()
                .map(|t| InlineKeyboardButton::callback(t.clone(), format!("time:{}", t)))
                .collect()
        })
        .collect();

    bot.send_message(chat_id, format!("🕐 {} — свободное время:", format_date_ru(date)))
        .reply_markup(InlineKeyboardMarkup::new(buttons))
        .await?;
    Ok(())
}

// ── Command parsing ──

/// Deep-link payload of a /start command. Only a bare `/start`, the
/// group form `/start@botname`, or `/start <payload>` count; other
/// commands sharing the prefix (`/startover`) do not.
fn start_payload(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("/start")?;
    if rest.is_empty() {
        return Some("");
    }
    if let Some(mention) = rest.strip_prefix('@') {
        return match mention.split_once(char::is_whitespace) {
            Some((_, payload)) => Some(payload.trim()),
            None => Some(""),
        };
    }
    rest.strip_prefix(char::is_whitespace).map(str::trim)
}

// ── Date formatting ──

fn format_date_ru(date_str: &str) -> String {
    let months = [
        "января", "февраля", "марта", "апреля", "мая", "июня",
        "июля", "августа", "сентября", "октября", "ноября", "декабря",
    ];
    let parts: Vec<&str> = date_str.split('-').collect();
    if parts.len() != 3 {
        return date_str.to_string();
    }
    let day: u32 = parts[2].parse().unwrap_or(0);
    let month: usize = parts[1].parse::<usize>().unwrap_or(1).saturating_sub(1);
    format!("{} {}", day, months.get(month).unwrap_or(&"???"))
}
