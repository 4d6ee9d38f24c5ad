use std::sync::Arc;

use rand::Rng;
use teloxide::{
    dispatching::{
        dialogue::{self, InMemStorage},
        UpdateFilterExt, UpdateHandler,
    },
    prelude::*,
    types::ParseMode,
    utils::command::BotCommands,
};

use crate::db::models::{Medicine, NewUser, User};
use crate::db::{MedicineStore, StoreError};
use crate::notify::{Notification, Notifier};
use crate::services::{ActionError, MedicineActions, Took};
use crate::utils::{format_medicine_list, parse_add_args, validate_email};
use crate::Error;

#[derive(BotCommands, Debug, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start interacting with the reminder bot.")]
    Start,
    #[command(description = "Display help information about available commands.")]
    Help,
    #[command(description = "Register with your email: /register <email>")]
    Register(String),
    #[command(description = "Abort a pending registration.")]
    Cancel,
    #[command(description = "Add a medicine: /add <name> <quantity> <slot>=<HH:MM> ...")]
    Add(String),
    #[command(description = "List your medicines.")]
    List,
    #[command(
        description = "Answer a reminder: /take <number> <yes|no>",
        parse_with = "split"
    )]
    Take { number: usize, took: Took },
    #[command(description = "Add stock: /restock <number> <amount>", parse_with = "split")]
    Restock { number: usize, amount: i32 },
    #[command(description = "Remove a medicine: /delete <number>")]
    Delete(usize),
}

#[derive(Clone, PartialEq, Debug, Default)]
pub enum State {
    #[default]
    Start,
    AwaitingOtp {
        email: String,
        otp: u32,
    },
}

pub type MyDialogue = Dialogue<State, InMemStorage<State>>;

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct BotContext {
    pub store: Arc<dyn MedicineStore>,
    pub notifier: Arc<dyn Notifier>,
    pub actions: MedicineActions,
}

impl BotContext {
    pub fn new(store: Arc<dyn MedicineStore>, notifier: Arc<dyn Notifier>) -> Self {
        let actions = MedicineActions::new(store.clone(), notifier.clone());
        Self {
            store,
            notifier,
            actions,
        }
    }
}

/// Builds the update handler tree.
///
/// Commands are tried first, then OTP replies while a registration is
/// pending, then a fallback for anything else.
pub fn schema() -> UpdateHandler<Error> {
    dialogue::enter::<Update, InMemStorage<State>, State, _>()
        // Handle command messages
        .branch(
            Update::filter_message()
                .branch(dptree::entry().filter_command::<Command>().endpoint(answer)),
        )
        // Handle OTP replies while a registration is pending
        .branch(Update::filter_message().branch(
            dptree::case![State::AwaitingOtp { email, otp }].endpoint(verify_otp),
        ))
        // Handle all other messages
        .branch(Update::filter_message().endpoint(handle_message))
}

/// Runs the dispatcher until Ctrl+C.
pub async fn run(bot: Bot, ctx: BotContext) {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![InMemStorage::<State>::new(), ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

pub fn generate_otp() -> u32 {
    rand::thread_rng().gen_range(100_000..=999_999)
}

/// The 1-based `number` shown by `/list`.
pub fn medicine_at(user: &User, number: usize) -> Option<&Medicine> {
    number.checked_sub(1).and_then(|i| user.medicines.get(i))
}

/// Handles bot commands and responds accordingly.
///
/// Every command except `/start`, `/help`, `/register` and `/cancel` needs a
/// registered chat; the others reply with a hint to `/register` first.
///
/// # Arguments
///
/// * `bot` - The Telegram Bot instance used to send messages.
/// * `msg` - The received message containing the command.
/// * `cmd` - The parsed command enum.
/// * `ctx` - Store, notifier and medicine actions.
/// * `dialogue` - The dialogue state for the registration flow.
///
/// # Returns
///
/// Returns a Result indicating success or failure of the command handling.
/// User mistakes are answered in the chat, only store failures are errors.
async fn answer(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: BotContext,
    dialogue: MyDialogue,
) -> Result<(), Error> {
    let chat_id = msg.chat.id;

    match cmd {
        Command::Start => {
            log::info!("Received start command from chat {}", chat_id);
            bot.send_message(
                chat_id,
                "Welcome to the medicine reminder bot! Register with /register <email> to get started.",
            )
            .await?;
        }
        Command::Help => {
            bot.send_message(chat_id, Command::descriptions().to_string())
                .await?;
        }
        Command::Register(email) => register(bot, msg, email, ctx, dialogue).await?,
        Command::Cancel => {
            dialogue.exit().await?;
            bot.send_message(chat_id, "Cancelled.").await?;
        }
        Command::Add(args) => {
            let Some(user) = registered_user(&bot, &msg, &ctx).await? else {
                return Ok(());
            };
            let new_medicine = match parse_add_args(&args) {
                Ok(m) => m,
                Err(e) => {
                    bot.send_message(chat_id, e.to_string()).await?;
                    return Ok(());
                }
            };
            match ctx.actions.add_medicine(&user.email, new_medicine).await {
                Ok(medicine) => {
                    bot.send_message(
                        chat_id,
                        format!(
                            "Added {} ({} units, {} reminder times).",
                            medicine.name,
                            medicine.quantity,
                            medicine.timings.len()
                        ),
                    )
                    .await?;
                }
                Err(e) => report_action_error(&bot, chat_id, e).await?,
            }
        }
        Command::List => {
            let Some(user) = registered_user(&bot, &msg, &ctx).await? else {
                return Ok(());
            };
            bot.send_message(chat_id, format_medicine_list(&user.medicines))
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
        }
        Command::Take { number, took } => {
            let Some(user) = registered_user(&bot, &msg, &ctx).await? else {
                return Ok(());
            };
            let Some(medicine) = medicine_at(&user, number) else {
                bot.send_message(chat_id, "No medicine with that number, see /list")
                    .await?;
                return Ok(());
            };
            match ctx.actions.acknowledge(&user.email, medicine.id, took).await {
                Ok(updated) if took == Took::Yes => {
                    bot.send_message(
                        chat_id,
                        format!("Noted. {} left of {}.", updated.quantity, updated.name),
                    )
                    .await?;
                }
                Ok(updated) => {
                    bot.send_message(chat_id, format!("Skipped {}.", updated.name))
                        .await?;
                }
                Err(e) => report_action_error(&bot, chat_id, e).await?,
            }
        }
        Command::Restock { number, amount } => {
            let Some(user) = registered_user(&bot, &msg, &ctx).await? else {
                return Ok(());
            };
            let Some(medicine) = medicine_at(&user, number) else {
                bot.send_message(chat_id, "No medicine with that number, see /list")
                    .await?;
                return Ok(());
            };
            match ctx.actions.restock(&user.email, medicine.id, amount).await {
                Ok(updated) => {
                    bot.send_message(
                        chat_id,
                        format!("{} restocked, now {} units.", updated.name, updated.quantity),
                    )
                    .await?;
                }
                Err(e) => report_action_error(&bot, chat_id, e).await?,
            }
        }
        Command::Delete(number) => {
            let Some(user) = registered_user(&bot, &msg, &ctx).await? else {
                return Ok(());
            };
            let Some(medicine) = medicine_at(&user, number) else {
                bot.send_message(chat_id, "No medicine with that number, see /list")
                    .await?;
                return Ok(());
            };
            match ctx.actions.delete_medicine(&user.email, medicine.id).await {
                Ok(()) => {
                    bot.send_message(chat_id, format!("Removed {}.", medicine.name))
                        .await?;
                }
                Err(e) => report_action_error(&bot, chat_id, e).await?,
            }
        }
    };

    Ok(())
}

/// Starts a registration: validates the email and mails a one-time code.
///
/// # Arguments
///
/// * `email` - The address given to `/register`.
/// * `dialogue` - Moved to `State::AwaitingOtp` once the code is sent.
///
/// # Returns
///
/// `Ok(())` also when the email or chat is already registered; the user is
/// told so in the chat.
async fn register(
    bot: Bot,
    msg: Message,
    email: String,
    ctx: BotContext,
    dialogue: MyDialogue,
) -> Result<(), Error> {
    let chat_id = msg.chat.id;
    let email = match validate_email(&email) {
        Ok(email) => email,
        Err(e) => {
            log::warn!("Rejected registration from chat {}: {}", chat_id, e);
            bot.send_message(chat_id, e.to_string()).await?;
            return Ok(());
        }
    };

    if ctx.store.find_user_by_chat(chat_id.0).await?.is_some() {
        bot.send_message(chat_id, "This chat is already registered.")
            .await?;
        return Ok(());
    }
    if ctx.store.find_user_by_email(&email).await?.is_some() {
        bot.send_message(chat_id, "Email already registered.").await?;
        return Ok(());
    }

    let otp = generate_otp();
    Notification::Otp { code: otp }
        .deliver(ctx.notifier.as_ref(), &email)
        .await;
    dialogue.update(State::AwaitingOtp { email, otp }).await?;

    bot.send_message(chat_id, "OTP sent to your email. Reply with the code, or /cancel.")
        .await?;
    Ok(())
}

/// Checks a reply against the pending OTP and creates the account.
///
/// Parameters:
/// - `(email, otp)`: The pending registration taken from the dialogue state.
/// - `ctx`: Used to create the user bound to this chat.
///
/// A wrong code keeps the dialogue open. A right one ends it whether or not
/// the account could be created.
async fn verify_otp(
    bot: Bot,
    msg: Message,
    (email, otp): (String, u32),
    ctx: BotContext,
    dialogue: MyDialogue,
) -> Result<(), Error> {
    let chat_id = msg.chat.id;
    let entered = msg.text().and_then(|t| t.trim().parse::<u32>().ok());
    if entered != Some(otp) {
        bot.send_message(chat_id, "Invalid OTP").await?;
        return Ok(());
    }

    let created = ctx
        .store
        .create_user(NewUser {
            email: email.clone(),
            chat_id: Some(chat_id.0),
        })
        .await;
    dialogue.exit().await?;

    match created {
        Ok(user) => {
            log::info!("Registered {} for chat {}", user.email, chat_id);
            bot.send_message(chat_id, "OTP verified! Add medicines with /add.")
                .await?;
        }
        Err(e @ (StoreError::EmailTaken(_) | StoreError::ChatTaken(_))) => {
            log::warn!("Registration of {} raced another one: {}", email, e);
            bot.send_message(chat_id, "Email already registered.").await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Fallback for messages that are neither commands nor OTP replies.
async fn handle_message(bot: Bot, msg: Message) -> Result<(), Error> {
    if msg.text().is_some() {
        bot.send_message(
            msg.chat.id,
            "I don't understand that. Type /help for available commands.",
        )
        .await?;
    }
    Ok(())
}

/// The user bound to this chat, or `None` after asking them to register.
async fn registered_user(bot: &Bot, msg: &Message, ctx: &BotContext) -> Result<Option<User>, Error> {
    let user = ctx.store.find_user_by_chat(msg.chat.id.0).await?;
    if user.is_none() {
        bot.send_message(msg.chat.id, "Please /register first.")
            .await?;
    }
    Ok(user)
}

async fn report_action_error(bot: &Bot, chat_id: ChatId, error: ActionError) -> Result<(), Error> {
    match error {
        ActionError::Store(e) => Err(e.into()),
        other => {
            bot.send_message(chat_id, other.to_string()).await?;
            Ok(())
        }
    }
}
