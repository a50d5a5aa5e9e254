//! adventure-bot: lets a chat room play a text adventure.
//!
//! `!adventure start` spawns the program on a PTY for the room; messages of
//! the form `> command` are typed into it and whatever it prints back is
//! posted as a reply.
//!
//! # Architecture
//!
//! - [`commands`] — Parsing message bodies into [`commands::Command`]s.
//! - [`handler`] — [`Adventure`], which owns the per-room sessions and
//!   answers commands.
//! - [`settle`] — How long to wait for output after sending input.
//! - [`room`] — The [`Room`] trait the handler talks to, plus a console
//!   implementation.
//! - [`config`] — TOML configuration.

pub mod commands;
pub mod config;
pub mod handler;
pub mod room;
pub mod settle;

pub use config::{Config, ConfigError};
pub use handler::{Adventure, CommandError};
pub use room::{ConsoleRoom, Message, MessageId, Room, RoomError};
pub use settle::{Settle, SettleMode};
