pub mod adapters;
pub mod config;
pub mod error;
pub mod gateway;
pub mod provider;
pub mod rate_limit;
pub mod router;
pub mod security;
pub mod session;
pub mod store;

// Re-exports
pub use adapters::{ModelDescriptor, ProviderAdapter};
pub use config::{NexusConfig, ProviderOverride};
pub use error::{
    GatewayError, ProviderError, SecurityError, StoreError, SwitchError, ValidationError,
};
pub use gateway::{ChatRequest, Completion, Gateway, RetryPolicy};
pub use provider::{AuthKey, ProviderConfig, ProviderEntry, ProviderId, ProviderRegistry};
pub use router::{Command, DisplayResult, Router};
pub use security::{ExecResult, SafeExecutor, ValidationResult};
pub use session::{
    ActiveModelState, ChatMessage, ContextBudget, ConversationContext, ModelSession, Role,
    SessionPhase,
};
pub use store::HistoryStore;
