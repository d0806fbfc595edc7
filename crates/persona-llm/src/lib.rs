pub mod deadline;
pub mod offline;
pub mod openai;

pub mod mock;

pub use deadline::DeadlineProvider;
pub use mock::{MockProvider, MockResponse};
pub use offline::OfflineProvider;
pub use openai::{OpenAiConfig, OpenAiProvider};
