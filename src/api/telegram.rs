//! Telegram transport
//!
//! Client chats are fed to the orchestrator through the shared transport
//! rules. Chats listed in `TELEGRAM_OPERATOR_CHAT_IDS` act as the business
//! account and may issue commands:
//!
//! - `/pausar <cliente> [horas]`
//! - `/retomar <cliente>`
//! - `/status <cliente>`
//! - `/responder <cliente> <texto>` sends a message as the store and hands
//!   the conversation to the operator

use crate::core::orchestrator::PauseStatus;
use crate::core::services::pause_for_hours;
use crate::core::transport::{InboundEvent, handle_inbound};
use crate::core::traits::Orchestrator;
use crate::infrastructure::settings::TelegramSettings;
use di::ServiceProvider;
use log::{debug, error, info, warn};
use std::sync::Arc;
use teloxide::prelude::*;

const OPERATOR_PAUSE: &str = "OPERATOR_COMMAND";
const DEFAULT_PAUSE_HOURS: f64 = 2.0;
const USAGE: &str = "Comandos: /pausar <cliente> [horas], /retomar <cliente>, \
                     /status <cliente>, /responder <cliente> <texto>";

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Pause { client: String, hours: f64 },
    Resume { client: String },
    Status { client: String },
    Reply { client: String, text: String },
}

impl OperatorCommand {
    /// `None` for anything that is not a well-formed command.
    pub fn parse(text: &str) -> Option<OperatorCommand> {
        let mut parts = text.trim().splitn(3, char::is_whitespace);
        // Telegram appends `@botname` to commands in groups.
        let command = parts.next()?.split('@').next()?;
        let client = parts.next()?.trim().to_owned();
        if client.is_empty() {
            return None;
        }
        let rest = parts.next().map(str::trim).unwrap_or_default();

        match command {
            "/pausar" => {
                let hours = if rest.is_empty() {
                    DEFAULT_PAUSE_HOURS
                } else {
                    rest.replace(',', ".").parse::<f64>().ok()?
                };
                pause_for_hours(hours).map(|_| OperatorCommand::Pause { client, hours })
            }
            "/retomar" => Some(OperatorCommand::Resume { client }),
            "/status" => Some(OperatorCommand::Status { client }),
            "/responder" if !rest.is_empty() => Some(OperatorCommand::Reply {
                client,
                text: rest.to_owned(),
            }),
            _ => None,
        }
    }
}

/// Inbound event for a client chat message; photos set the media flag.
pub fn client_event(msg: &Message) -> InboundEvent {
    let body = msg.text().or(msg.caption()).unwrap_or_default();
    InboundEvent {
        from: msg.chat.id.0.to_string(),
        body: body.to_owned(),
        has_media: msg.photo().is_some(),
        from_operator: false,
    }
}

fn status_text(client: &str, status: PauseStatus) -> String {
    match status.remaining_minutes {
        Some(minutes) if status.is_paused => {
            format!("⏸️ {client}: pausado, {minutes} min restantes.")
        }
        _ => format!("▶️ {client}: atendimento automático ativo."),
    }
}

/// Long-polls Telegram until the process stops.
pub async fn run(settings: TelegramSettings, provider: ServiceProvider) {
    let Some(token) = settings.bot_token.clone() else {
        debug!("telegram disabled, no bot token");
        return;
    };

    let bot = Bot::new(token);
    let operators: Arc<Vec<i64>> = Arc::new(settings.operator_chat_ids);
    info!("starting telegram long polling ({} operator chats)", operators.len());

    let handler = Update::filter_message().endpoint(move |bot: Bot, msg: Message| {
        let operators = operators.clone();
        let provider = provider.clone();
        async move {
            let scope = provider.create_scope();
            let orchestrator = scope.get_required::<dyn Orchestrator>();

            let result = if operators.contains(&msg.chat.id.0) {
                handle_operator(&bot, &msg, orchestrator.as_ref()).await
            } else {
                handle_client(&bot, &msg, orchestrator.as_ref()).await
            };
            if let Err(e) = result {
                error!("telegram update from chat {} failed: {e:#}", msg.chat.id);
            }
            respond(())
        }
    });

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .build()
        .dispatch()
        .await;
}

async fn handle_client(
    bot: &Bot,
    msg: &Message,
    orchestrator: &dyn Orchestrator,
) -> anyhow::Result<()> {
    if let Some(reply) = handle_inbound(orchestrator, client_event(msg)).await? {
        bot.send_message(msg.chat.id, reply.message).await?;
    }
    Ok(())
}

async fn handle_operator(
    bot: &Bot,
    msg: &Message,
    orchestrator: &dyn Orchestrator,
) -> anyhow::Result<()> {
    let Some(command) = msg.text().and_then(OperatorCommand::parse) else {
        // Operator chatter is never treated as a client message.
        bot.send_message(msg.chat.id, USAGE).await?;
        return Ok(());
    };

    let answer = match command {
        OperatorCommand::Pause { client, hours } => {
            let Some(duration) = pause_for_hours(hours) else {
                bot.send_message(msg.chat.id, USAGE).await?;
                return Ok(());
            };
            orchestrator.pause(&client, duration, OPERATOR_PAUSE).await?;
            status_text(&client, orchestrator.pause_status(&client).await?)
        }
        OperatorCommand::Resume { client } => {
            orchestrator.unpause(&client).await?;
            status_text(&client, orchestrator.pause_status(&client).await?)
        }
        OperatorCommand::Status { client } => {
            status_text(&client, orchestrator.pause_status(&client).await?)
        }
        OperatorCommand::Reply { client, text } => {
            let Ok(chat) = client.parse::<i64>() else {
                warn!("operator reply to non-numeric chat `{client}`");
                bot.send_message(msg.chat.id, USAGE).await?;
                return Ok(());
            };
            bot.send_message(ChatId(chat), text).await?;
            let event = InboundEvent {
                from: client.clone(),
                from_operator: true,
                ..InboundEvent::default()
            };
            handle_inbound(orchestrator, event).await?;
            status_text(&client, orchestrator.pause_status(&client).await?)
        }
    };

    bot.send_message(msg.chat.id, answer).await?;
    Ok(())
}
