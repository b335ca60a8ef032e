use std::sync::Arc;

use teloxide::{
    dispatching::Dispatcher,
    dptree,
    prelude::*,
    types::{BotCommand, MenuButton},
};
use tracing::{info, warn};

use relay_core::{
    applications::ApplicationBook,
    audit::AuditLogger,
    bot::RelayBot,
    config::Config,
    locks::KeyedLocks,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    store::MessageStore,
    texts,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<RelayBot>,
    pub chat_locks: Arc<KeyedLocks<i64>>,
}

pub async fn run_polling(cfg: Arc<Config>, book: Arc<ApplicationBook>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(bot = %me.username(), admin_chat = cfg.admin_chat_id.0, "relay bot started"),
        Err(e) => warn!("get_me failed: {e}"),
    }

    if let Err(e) = setup_commands(&bot).await {
        warn!("failed to set bot commands: {e}");
    }

    // Relaying into the admin group is bursty; keep the RetryAfter retry in
    // the adapter as well.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::from(cfg.as_ref()),
    ));

    let relay_bot = RelayBot::new(
        cfg.admin_chat_id,
        messenger,
        book,
        Arc::new(MessageStore::new()),
        Arc::new(AuditLogger::from_config(&cfg)),
    );

    let state = Arc::new(AppState {
        bot: Arc::new(relay_bot),
        chat_locks: Arc::new(KeyedLocks::default()),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}

/// Command list for the client's "/" menu, plus the menu button itself.
async fn setup_commands(bot: &Bot) -> anyhow::Result<()> {
    bot.set_my_commands(bot_commands()).await?;
    bot.set_chat_menu_button()
        .menu_button(MenuButton::Commands)
        .await?;
    info!(count = texts::BOT_COMMANDS.len(), "bot commands registered");
    Ok(())
}

fn bot_commands() -> Vec<BotCommand> {
    texts::BOT_COMMANDS
        .iter()
        .map(|(cmd, desc)| BotCommand::new(*cmd, *desc))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_list_matches_core_commands() {
        let cmds = bot_commands();
        let names: Vec<&str> = cmds.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(names, vec!["start", "menu", "cancel", "stats", "clear"]);
        assert!(cmds.iter().all(|c| !c.description.is_empty()));
    }
}
