//! Chatbridge agent library logic.
//!
//! The agent sits next to the source chat surface. It dedups observed
//! messages, forwards them to the relay over the transport link, and renders
//! replies into the view when their conversation is on screen.

pub mod agent;
pub mod config;
pub mod harness;
pub mod link;
pub mod source;

pub use agent::{forward_envelope, Agent, ReplyOutcome};
pub use link::{ConnectionState, LinkClient, LinkError, LinkSettings};
pub use source::{CapturedAttachment, ObservedEvent, SourceView, ViewError};
