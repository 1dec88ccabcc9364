//! The auto-reply command machine.
//!
//! Stateless across messages: every accepted inbound is interpreted on its
//! own, with subscription state looked up in the store. The reply send and
//! the subscription write are deliberately non-transactional — if the
//! confirmation SMS fails after a JOIN, the farmer is subscribed without
//! confirmation, which is acceptable degraded behavior rather than something
//! to roll back.

use crate::conversation::ConversationStore;
use crate::outbox::Outbox;
use async_trait::async_trait;
use shamba_core::error::ShambaError;
use shamba_core::message::{Direction, MessageCategory};
use shamba_core::phone::PhoneNumber;
use shamba_store::Store;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Markets/counties the price lookup understands. A message consisting of or
/// containing one of these is treated as a price query.
pub const GAZETTEER: &[&str] = &[
    "nairobi", "mombasa", "kisumu", "nakuru", "eldoret", "nyeri", "meru", "kitale", "machakos",
    "kakamega", "embu", "kisii", "thika", "malindi", "garissa",
];

const GREETING_KW: &[&str] = &["hi", "hello", "habari", "mambo", "jambo", "good morning", "good afternoon"];
const THANKS_KW: &[&str] = &["thanks", "thank you", "asante", "asante sana"];

/// Formatted price text for a location keyword. Implemented by the price
/// platform; the engine treats it as a pure function of the location string.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// `Ok(None)` means the location is known but has no current data.
    async fn prices_for(&self, location: &str) -> Result<Option<String>, ShambaError>;
}

/// What the engine decided to do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Unsubscribed,
    Subscribed,
    HelpSent,
    PricesSent,
    LocationNotFound,
    GreetingReply,
    ThankYou,
    UnknownMessage,
}

impl CommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribed => "subscribed",
            Self::HelpSent => "help_sent",
            Self::PricesSent => "prices_sent",
            Self::LocationNotFound => "location_not_found",
            Self::GreetingReply => "greeting_reply",
            Self::ThankYou => "thank_you",
            Self::UnknownMessage => "unknown_message",
        }
    }
}

/// Parsed intent of an accepted inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Stop,
    Join,
    Help,
    Location(String),
    Greeting,
    Thanks,
    Other,
}

/// Interpret the message text. Keyword commands win over location matches,
/// locations over greetings, so "YES NAIROBI" still reads as a JOIN.
fn parse(text: &str) -> Command {
    let normalized = text.trim().to_lowercase();
    let first_word = normalized.split_whitespace().next().unwrap_or("");

    match first_word {
        "stop" | "unsubscribe" | "end" | "quit" => return Command::Stop,
        "join" | "start" | "yes" | "subscribe" => return Command::Join,
        "help" | "info" | "menu" => return Command::Help,
        _ => {}
    }

    for word in normalized.split_whitespace() {
        let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric());
        if GAZETTEER.contains(&cleaned) {
            return Command::Location(cleaned.to_string());
        }
    }

    if GREETING_KW.iter().any(|kw| normalized.starts_with(kw)) {
        return Command::Greeting;
    }
    if THANKS_KW.iter().any(|kw| normalized.starts_with(kw)) {
        return Command::Thanks;
    }

    Command::Other
}

const HELP_MENU: &str = "Shamba price alerts:\n\
    JOIN - subscribe to daily price updates\n\
    STOP - unsubscribe\n\
    HELP - this menu\n\
    Or send a market name (e.g. NAIROBI, MOMBASA, KISUMU) for today's prices.";

/// Drives replies and subscription side effects for accepted inbound
/// messages.
pub struct CommandEngine {
    store: Store,
    outbox: Outbox,
    prices: Arc<dyn PriceProvider>,
    conversations: Arc<ConversationStore>,
}

impl CommandEngine {
    pub fn new(
        store: Store,
        outbox: Outbox,
        prices: Arc<dyn PriceProvider>,
        conversations: Arc<ConversationStore>,
    ) -> Self {
        Self {
            store,
            outbox,
            prices,
            conversations,
        }
    }

    /// Decide and perform the response to one accepted inbound message.
    pub async fn handle(
        &self,
        phone: &PhoneNumber,
        text: &str,
    ) -> Result<CommandAction, ShambaError> {
        let (action, reply) = match parse(text) {
            Command::Stop => {
                self.store.deactivate_subscription(phone).await?;
                info!(%phone, "unsubscribed");
                (
                    CommandAction::Unsubscribed,
                    "You have been unsubscribed from Shamba price alerts. \
                     Reply JOIN any time to subscribe again."
                        .to_string(),
                )
            }
            Command::Join => {
                self.store.activate_subscription(phone, None).await?;
                info!(%phone, "subscribed");
                (
                    CommandAction::Subscribed,
                    format!("Welcome to Shamba price alerts!\n{HELP_MENU}"),
                )
            }
            Command::Help => (CommandAction::HelpSent, HELP_MENU.to_string()),
            Command::Location(location) => self.lookup_prices(phone, &location).await?,
            Command::Greeting => (
                CommandAction::GreetingReply,
                "Hello! Send a market name like NAIROBI for today's crop prices, \
                 or HELP for the full menu."
                    .to_string(),
            ),
            Command::Thanks => (
                CommandAction::ThankYou,
                "Karibu! Send a market name any time for fresh prices.".to_string(),
            ),
            Command::Other => (
                CommandAction::UnknownMessage,
                "Sorry, I didn't understand that. Reply HELP for commands, or send \
                 a market name like NAIROBI or MOMBASA for prices."
                    .to_string(),
            ),
        };

        // Reply failure does not undo the subscription change above.
        let (_, outcome) = self
            .outbox
            .send_logged(phone, &reply, MessageCategory::General)
            .await?;

        if outcome.accepted {
            self.conversations.touch(phone, &reply, Direction::Outgoing);
        } else {
            warn!(
                %phone,
                action = action.as_str(),
                "reply send failed; side effects stay applied"
            );
        }

        Ok(action)
    }

    async fn lookup_prices(
        &self,
        phone: &PhoneNumber,
        location: &str,
    ) -> Result<(CommandAction, String), ShambaError> {
        match self.prices.prices_for(location).await {
            Ok(Some(price_text)) => {
                let mut reply = price_text;
                if !self.store.is_subscribed(phone).await? {
                    reply.push_str("\n\nReply JOIN to get these prices daily.");
                }
                Ok((CommandAction::PricesSent, reply))
            }
            Ok(None) => Ok((
                CommandAction::LocationNotFound,
                format!(
                    "No price data for {} yet. Try NAIROBI, MOMBASA or KISUMU, \
                     or reply HELP.",
                    location.to_uppercase()
                ),
            )),
            Err(e) => {
                debug!(%phone, location, "price lookup failed: {e}");
                Ok((
                    CommandAction::LocationNotFound,
                    format!(
                        "Prices for {} are unavailable right now, please try again later.",
                        location.to_uppercase()
                    ),
                ))
            }
        }
    }
}
