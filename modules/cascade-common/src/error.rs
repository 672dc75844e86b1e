use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No handler registered for {kind} \"{key}\"")]
    MissingHandler { kind: &'static str, key: String },

    #[error("Malformed event vector: {0}")]
    MalformedEvent(String),

    #[error("Effect handler \"{kind}\" failed: {source}")]
    EffectFailed {
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Interceptor \"{id}\" failed: {source}")]
    Interceptor {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
