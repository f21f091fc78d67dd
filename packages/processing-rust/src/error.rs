//! Errors raised while configuring, building or driving event processors.

/// Configuration-level failure of the event processing module.
///
/// Handler and collaborator failures travel as [`anyhow::Error`]; this enum
/// covers misuse of the module itself and wraps build/lifecycle failures with
/// the name of the processor they belong to.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("event processing configuration has not been initialized")]
    NotInitialized,

    #[error("an event processor with name [{name}] already exists")]
    DuplicateProcessor { name: String },

    #[error("event processor [{name}] needs a running Tokio runtime to start")]
    NoRuntime { name: String },

    #[error("event processor [{name}] is still stopping its previous workers")]
    StillStopping { name: String },

    #[error("failed to build event processor [{name}]")]
    ProcessorBuild {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("event processor [{name}] failed to {action}")]
    Lifecycle {
        name: String,
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
