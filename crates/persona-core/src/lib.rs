pub mod character;
pub mod errors;
pub mod ids;
pub mod prompt;
pub mod provider;

pub use character::{Character, CharacterPatch, CharacterTrait, NewCharacter, Relationship, ValidationErrors};
pub use errors::ProviderError;
pub use ids::{CharacterId, ConnectionId, UserId};
pub use prompt::ChatContext;
pub use provider::ContentProvider;
