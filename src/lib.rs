pub mod config;
pub mod gateway;
pub mod language;
pub mod models;
pub mod outcome;
pub mod portrait;
pub mod prompts;
pub mod quota;
pub mod reconcile;
pub mod session;
pub mod store;

pub use config::AppConfig;
pub use gateway::{ChatStream, LlmGateway, OpenAiGateway};
pub use language::Language;
pub use models::{ActionTask, ChatMessage, Sender, TaskStatus, TaskUsefulness};
pub use outcome::SessionOutcome;
pub use portrait::{PortraitDelta, TaskStats, UserPortrait};
pub use quota::DailyQuota;
pub use reconcile::{ReconcileResult, SessionFeedback, SessionHighlights};
pub use session::{ConfirmOutcome, SessionController, SessionState};
pub use store::{PortraitStore, SqliteStore};
