//! # shamba-engine
//!
//! The conversational heart of Shamba: per-phone conversation tracking, the
//! STOP/JOIN/HELP/price-lookup command machine, logged outbound sends, and
//! the classify → store → command pipeline both ingest paths share.

pub mod command;
pub mod conversation;
pub mod outbox;
pub mod pipeline;

pub use command::{CommandAction, CommandEngine, PriceProvider};
pub use conversation::ConversationStore;
pub use outbox::{BulkSendReport, Outbox, SmsSender};
pub use pipeline::{InboundPipeline, PipelineOutcome};
