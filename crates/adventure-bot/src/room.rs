//! The boundary to the chat side: rooms, messages, and a console stand-in.
//!
//! The bot only ever needs to know a room's name, its own nick there, and
//! how to send a reply. [`ConsoleRoom`] implements that on top of plain
//! text streams so the bot can be played from a terminal.

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Identifier of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A message received in a room.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    /// The message this one replies to, if it sits in a thread.
    pub parent: Option<MessageId>,
    pub sender: String,
    pub content: String,
}

impl Message {
    /// Where a reply belongs: the thread parent if there is one, else the message itself.
    pub fn thread_root(&self) -> &MessageId {
        self.parent.as_ref().unwrap_or(&self.id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room closed")]
    Closed,
    #[error("room I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A chat room the bot has joined.
#[async_trait]
pub trait Room: Send {
    /// Room name; sessions are keyed by it.
    fn name(&self) -> &str;

    /// The bot's own nick in this room.
    fn nick(&self) -> &str;

    /// Send `text` as a reply to `reply_to`, returning the new message's id.
    async fn send(&mut self, text: &str, reply_to: &MessageId) -> Result<MessageId, RoomError>;
}

/// A room backed by a text stream: replies are written out, one block per message.
///
/// Incoming lines are turned into messages by [`ConsoleRoom::receive`]. A
/// line starting with `^<id> ` is treated as a reply in the thread of
/// message `<id>`.
pub struct ConsoleRoom<W> {
    name: String,
    nick: String,
    sender: String,
    out: W,
    next_id: u64,
}

impl<W: AsyncWrite + Unpin + Send> ConsoleRoom<W> {
    pub fn new(name: impl Into<String>, nick: impl Into<String>, out: W) -> Self {
        Self {
            name: name.into(),
            nick: nick.into(),
            sender: "you".to_string(),
            out,
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId(self.next_id.to_string());
        self.next_id += 1;
        id
    }

    /// Turn a line typed at the console into a message.
    pub fn receive(&mut self, line: &str) -> Message {
        let thread = line.strip_prefix('^').and_then(|rest| rest.split_once(' '));
        let (parent, content) = match thread {
            Some((parent, content)) if !parent.is_empty() => {
                (Some(MessageId::from(parent)), content)
            }
            _ => (None, line),
        };
        Message {
            id: self.allocate_id(),
            parent,
            sender: self.sender.clone(),
            content: content.to_string(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Room for ConsoleRoom<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn nick(&self) -> &str {
        &self.nick
    }

    async fn send(&mut self, text: &str, reply_to: &MessageId) -> Result<MessageId, RoomError> {
        let id = self.allocate_id();
        let mut block = format!("[{id}] {} (re {reply_to}):\n{text}", self.nick);
        if !block.ends_with('\n') {
            block.push('\n');
        }
        self.out.write_all(block.as_bytes()).await?;
        self.out.flush().await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_assigns_sequential_ids() {
        let mut room = ConsoleRoom::new("test", "adventure", Vec::new());
        let first = room.receive("!adventure start");
        let second = room.receive("> look");

        assert_eq!(first.id, MessageId::from("1"));
        assert_eq!(second.id, MessageId::from("2"));
        assert_eq!(second.content, "> look");
        assert!(second.parent.is_none());
    }

    #[test]
    fn test_receive_thread_reply() {
        let mut room = ConsoleRoom::new("test", "adventure", Vec::new());
        let message = room.receive("^4 > get lamp");

        assert_eq!(message.parent, Some(MessageId::from("4")));
        assert_eq!(message.content, "> get lamp");
        assert_eq!(message.thread_root(), &MessageId::from("4"));
    }

    #[test]
    fn test_thread_root_defaults_to_self() {
        let mut room = ConsoleRoom::new("test", "adventure", Vec::new());
        let message = room.receive("^ not a thread");
        assert!(message.parent.is_none());
        assert_eq!(message.thread_root(), &message.id);
    }

    #[tokio::test]
    async fn test_send_writes_block() {
        let mut room = ConsoleRoom::new("test", "adventure", Vec::new());
        let message = room.receive("!adventure status");

        let id = room.send("Adventure not running.", &message.id).await.unwrap();
        assert_eq!(id, MessageId::from("2"));

        let out = String::from_utf8(room.into_inner()).unwrap();
        assert_eq!(out, "[2] adventure (re 1):\nAdventure not running.\n");
    }
}
