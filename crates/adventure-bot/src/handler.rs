//! The per-bot command handler: turns room messages into session operations
//! and session output into replies.
//!
//! Every failure a user can cause ends here as a one-line reply; only a
//! broken room connection is returned to the caller.

use adventure_pty::{PtyError, Registry, Session, SessionConfig};
use log::{debug, info, warn};

use crate::commands::{long_help, Command, Lifecycle, SHORT_DESCRIPTION, USAGE};
use crate::room::{Message, MessageId, Room, RoomError};
use crate::settle::Settle;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Adventure not running.")]
    NotRunning,
    #[error("ERROR: No adventure currently running.")]
    NoSession,
    #[error("Adventure already running.")]
    AlreadyRunning,
    #[error("ERROR: No command.")]
    NoCommand,
    #[error("ERROR: Could not start adventure: {0}")]
    Start(#[source] PtyError),
    #[error("ERROR: Adventure is no longer running.")]
    Exited,
    #[error("ERROR: Adventure is no longer running.")]
    Input(#[source] PtyError),
    #[error(transparent)]
    Room(#[from] RoomError),
}

/// Runs one adventure per room.
pub struct Adventure {
    sessions: Registry,
    session_config: SessionConfig,
    settle: Settle,
}

impl Adventure {
    pub fn new(session_config: SessionConfig, settle: Settle) -> Self {
        Self {
            sessions: Registry::new(),
            session_config,
            settle,
        }
    }

    pub fn sessions(&self) -> &Registry {
        &self.sessions
    }

    /// Handle one message in `room`. Messages that aren't commands are ignored.
    pub async fn on_message<R>(
        &mut self,
        room: &mut R,
        message: &Message,
    ) -> Result<(), RoomError>
    where
        R: Room + ?Sized,
    {
        let Some(command) = Command::parse(&message.content, room.nick()) else {
            return Ok(());
        };
        debug!("&{}: {command:?} from {}", room.name(), message.sender);

        match self.run(room, message, command).await {
            Ok(()) => Ok(()),
            Err(CommandError::Room(e)) => Err(e),
            Err(e) => {
                if let CommandError::Start(source) | CommandError::Input(source) = &e {
                    warn!("&{}: {source}", room.name());
                }
                room.send(&e.to_string(), &message.id).await?;
                Ok(())
            }
        }
    }

    /// The room's session ended outside our control (we left, or were kicked).
    pub async fn on_vacated(&mut self, room: &str) {
        if let Some(session) = self.sessions.remove(room) {
            info!("&{room} vacated, stopping its adventure");
            stop_session(room, session).await;
        }
    }

    /// Stop every session. Call before exiting.
    pub async fn shutdown(&mut self) {
        let mut sessions = std::mem::take(&mut self.sessions);
        if let Err(e) = tokio::task::spawn_blocking(move || sessions.stop_all()).await {
            warn!("shutdown task failed: {e}");
        }
    }

    async fn run<R>(
        &mut self,
        room: &mut R,
        message: &Message,
        command: Command,
    ) -> Result<(), CommandError>
    where
        R: Room + ?Sized,
    {
        match command {
            Command::Lifecycle(Lifecycle::Start) => self.start(room, message).await,
            Command::Lifecycle(Lifecycle::Stop) => self.stop(room, message).await,
            Command::Lifecycle(Lifecycle::Restart) => self.restart(room, message).await,
            Command::Lifecycle(Lifecycle::Status) => self.status(room, message).await,
            Command::Input(text) => self.input(room, message, &text).await,
            Command::Unknown(arg) => {
                let text = format!("Unknown command: '{arg}'\n{USAGE}");
                room.send(&text, &message.id).await?;
                Ok(())
            }
            Command::Usage => {
                room.send(&format!("Usage:\n{USAGE}"), &message.id).await?;
                Ok(())
            }
            Command::Help { specific } => {
                let text = if specific { long_help() } else { SHORT_DESCRIPTION.to_string() };
                room.send(&text, &message.id).await?;
                Ok(())
            }
        }
    }

    async fn start<R>(&mut self, room: &mut R, message: &Message) -> Result<(), CommandError>
    where
        R: Room + ?Sized,
    {
        let name = room.name().to_string();
        match self.sessions.get_mut(&name).map(|session| session.is_running()) {
            Some(true) => return Err(CommandError::AlreadyRunning),
            Some(false) => {
                // The program exited on its own; reap it before starting over.
                if let Some(session) = self.sessions.remove(&name) {
                    stop_session(&name, session).await;
                }
            }
            None => {}
        }
        self.launch(room, message).await
    }

    async fn stop<R>(&mut self, room: &mut R, message: &Message) -> Result<(), CommandError>
    where
        R: Room + ?Sized,
    {
        let name = room.name().to_string();
        let session = self.sessions.remove(&name).ok_or(CommandError::NotRunning)?;
        stop_session(&name, session).await;
        room.send("Adventure stopped.", &message.id).await?;
        Ok(())
    }

    async fn restart<R>(&mut self, room: &mut R, message: &Message) -> Result<(), CommandError>
    where
        R: Room + ?Sized,
    {
        let name = room.name().to_string();
        if let Some(mut session) = self.sessions.remove(&name) {
            let was_running = session.is_running();
            stop_session(&name, session).await;
            if was_running {
                room.send("Adventure stopped.", &message.id).await?;
            }
        }
        self.launch(room, message).await
    }

    async fn status<R>(&mut self, room: &mut R, message: &Message) -> Result<(), CommandError>
    where
        R: Room + ?Sized,
    {
        let running = self
            .sessions
            .get_mut(room.name())
            .is_some_and(|session| session.is_running());
        let text = if running { "Adventure running." } else { "Adventure not running." };
        room.send(text, &message.id).await?;
        Ok(())
    }

    async fn input<R>(
        &mut self,
        room: &mut R,
        message: &Message,
        text: &str,
    ) -> Result<(), CommandError>
    where
        R: Room + ?Sized,
    {
        let name = room.name().to_string();
        let session = self.sessions.get_mut(&name).ok_or(CommandError::NoSession)?;
        if text.is_empty() {
            return Err(CommandError::NoCommand);
        }

        if !session.is_running() {
            if let Some(session) = self.sessions.remove(&name) {
                stop_session(&name, session).await;
            }
            return Err(CommandError::Exited);
        }
        if let Err(e) = session.enter(text) {
            if let Some(session) = self.sessions.remove(&name) {
                stop_session(&name, session).await;
            }
            return Err(CommandError::Input(e));
        }

        let signal = session.output_signal();
        self.settle.wait(&signal).await;
        self.reply_output(room, &name, message.thread_root()).await
    }

    /// Spawn a fresh session for the room and post its opening output.
    async fn launch<R>(&mut self, room: &mut R, message: &Message) -> Result<(), CommandError>
    where
        R: Room + ?Sized,
    {
        let name = room.name().to_string();
        let config = self.session_config.clone();
        let session = tokio::task::spawn_blocking(move || Session::spawn(&config))
            .await
            .map_err(|e| PtyError::Spawn(format!("spawn task failed: {e}")))
            .and_then(|spawned| spawned)
            .map_err(CommandError::Start)?;
        let signal = session.output_signal();
        if let Some(displaced) = self.sessions.put(name.clone(), session) {
            stop_session(&name, displaced).await;
        }
        info!("&{name}: adventure started");

        room.send("Adventure started.", &message.id).await?;
        self.settle.wait(&signal).await;
        self.reply_output(room, &name, &message.id).await
    }

    async fn reply_output<R>(
        &mut self,
        room: &mut R,
        name: &str,
        reply_to: &MessageId,
    ) -> Result<(), CommandError>
    where
        R: Room + ?Sized,
    {
        let Some(session) = self.sessions.get_mut(name) else {
            return Ok(());
        };
        let text = session.drain();
        if text.is_empty() {
            debug!("&{name}: no output to send");
            return Ok(());
        }
        room.send(&text, reply_to).await?;
        Ok(())
    }
}

/// Stop `session` on the blocking pool; stopping waits on the child.
async fn stop_session(room: &str, mut session: Session) {
    match tokio::task::spawn_blocking(move || session.stop()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("&{room}: failed to stop adventure cleanly: {e}"),
        Err(e) => warn!("&{room}: stop task failed: {e}"),
    }
}
