//! Inbound frame handling.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use persona_core::{Character, CharacterId, CharacterPatch, ChatContext, ContentProvider, ProviderError};
use persona_store::{CharacterStore, StoreError};

use super::connection::Connection;
use super::protocol::{self, Inbound, Outbound, ProtocolError};
use super::registry::SessionRegistry;

const UPDATE_SUCCESS: &str = "Character updated successfully";

/// Failure while handling one frame. Reported to the sender only.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("character {0} not found")]
    NotFound(CharacterId),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RelayError {
    /// Text for the `error` frame. Store and provider internals stay in the log.
    pub fn client_message(&self) -> String {
        match self {
            Self::Protocol(e) => e.to_string(),
            Self::NotFound(_) | Self::Store(StoreError::NotFound(_)) => "Character not found".into(),
            Self::Provider(ProviderError::Timeout(_)) => "The character took too long to respond".into(),
            Self::Provider(ProviderError::RateLimited { .. }) => "Too many requests, please try again shortly".into(),
            Self::Provider(_) => "Failed to generate a response".into(),
            Self::Store(_) => "Failed to access character data".into(),
        }
    }
}

/// Routes frames from connected clients to the store and provider, and fans
/// results out through the registry.
pub struct Relay {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn CharacterStore>,
    provider: Arc<dyn ContentProvider>,
}

impl Relay {
    pub fn new(registry: Arc<SessionRegistry>, store: Arc<dyn CharacterStore>, provider: Arc<dyn ContentProvider>) -> Self {
        Self {
            registry,
            store,
            provider,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handle one raw text frame from `conn`. Never fails: errors become an
    /// `error` frame to the sender.
    pub async fn handle_frame(&self, conn: &Arc<Connection>, raw: &str) {
        let result = match protocol::parse(raw) {
            Ok(message) => self.dispatch(conn, message).await,
            Err(e) => Err(RelayError::Protocol(e)),
        };
        if let Err(e) = result {
            warn!(client_id = %conn.id, error = %e, "frame rejected");
            self.registry.send_to(conn, &Outbound::error(e.client_message()));
        }
    }

    #[instrument(skip_all, fields(client_id = %conn.id, kind = message.kind()))]
    async fn dispatch(&self, conn: &Arc<Connection>, message: Inbound) -> Result<(), RelayError> {
        match message {
            Inbound::Join { character_id } => {
                self.registry.join(conn, character_id);
                Ok(())
            }
            Inbound::Chat { character_id, message } => self.chat(conn, character_id, message).await,
            Inbound::Update {
                character_id,
                character_data,
            } => self.update(conn, character_id, &character_data).await,
            Inbound::Ping => {
                self.registry.send_to(conn, &Outbound::Pong);
                Ok(())
            }
        }
    }

    async fn chat(&self, conn: &Connection, id: CharacterId, text: String) -> Result<(), RelayError> {
        let character = self.store.get(id).await?.ok_or(RelayError::NotFound(id))?;
        let context = ChatContext::for_character(&character);
        let reply = self.provider.chat_reply(&context, &text).await?;
        debug!(character_id = %id, provider = self.provider.name(), reply_len = reply.len(), "chat reply generated");
        self.registry.send_to(conn, &Outbound::chat_response(id, text, reply));
        Ok(())
    }

    async fn update(&self, conn: &Connection, id: CharacterId, patch: &CharacterPatch) -> Result<(), RelayError> {
        if self.store.get(id).await?.is_none() {
            return Err(RelayError::NotFound(id));
        }
        let updated = self.store.update(id, patch).await?;
        let delivered = self.publish_update(&updated);
        info!(character_id = %id, delivered, "character updated over relay");
        self.registry.send_to(
            conn,
            &Outbound::UpdateSuccess {
                message: UPDATE_SUCCESS.into(),
            },
        );
        Ok(())
    }

    /// Broadcast a stored character to everyone in its session.
    pub fn publish_update(&self, character: &Character) -> usize {
        self.registry.broadcast(
            character.id,
            &Outbound::CharacterUpdated {
                character: character.clone(),
            },
        )
    }
}
