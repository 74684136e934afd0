//! Injection tokens. The string forms are stable and shared with existing
//! deployments.

use dog_core::Token;

/// Name of a queue registered without one.
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// Shared configuration key used when a registration names none.
pub const DEFAULT_CONFIG_KEY: &str = "default";

/// `Queue_{name}`; an omitted name is `"default"`.
pub fn queue_token(name: Option<&str>) -> Token {
    Token::new(format!("Queue_{}", name.unwrap_or(DEFAULT_QUEUE_NAME)))
}

/// `QueueOptions_{name}`
pub fn queue_options_token(name: &str) -> Token {
    Token::new(format!("QueueOptions_{name}"))
}

/// `Config({key})`; an omitted key is `"default"`.
pub fn shared_config_token(config_key: Option<&str>) -> Token {
    Token::new(format!("Config({})", config_key.unwrap_or(DEFAULT_CONFIG_KEY)))
}

/// Token of the per-key conditional shared configuration holder.
pub fn conditional_dependency_token(config_key: Option<&str>) -> Token {
    Token::new(format!(
        "ConditionalDependency({})",
        config_key.unwrap_or(DEFAULT_CONFIG_KEY)
    ))
}
