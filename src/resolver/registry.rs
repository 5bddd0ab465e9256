use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ValidationError;
use crate::message::MessageType;

use super::{LessShowerTimeRecommendation, MonthlyChangeAlert, Resolver};

/// Table of resolvers keyed by message type.
///
/// Iteration follows `MessageType` order, so every resolution pass visits
/// resolvers in the same sequence.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: BTreeMap<MessageType, Arc<dyn Resolver>>,
}

impl ResolverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding both built-in resolvers with default thresholds.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        let builtin: [Arc<dyn Resolver>; 2] = [
            Arc::new(MonthlyChangeAlert::default()),
            Arc::new(LessShowerTimeRecommendation::default()),
        ];
        for resolver in builtin {
            let message_type = resolver.message_type();
            registry.resolvers.insert(message_type, resolver);
        }
        registry
    }

    /// Adds a resolver.
    ///
    /// # Errors
    ///
    /// - `ValidationError::InvalidDescriptor` if the descriptor is invalid
    /// - `ValidationError::DuplicateResolver` if the message type is taken
    pub fn register(&mut self, resolver: Arc<dyn Resolver>) -> Result<(), ValidationError> {
        let message_type = resolver.message_type();
        resolver.descriptor().validate(message_type)?;
        if self.resolvers.contains_key(&message_type) {
            return Err(ValidationError::DuplicateResolver { message_type });
        }
        self.resolvers.insert(message_type, resolver);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn with(mut self, resolver: Arc<dyn Resolver>) -> Result<Self, ValidationError> {
        self.register(resolver)?;
        Ok(self)
    }

    #[must_use]
    pub fn get(&self, message_type: MessageType) -> Option<&Arc<dyn Resolver>> {
        self.resolvers.get(&message_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MessageType, &Arc<dyn Resolver>)> {
        self.resolvers.iter().map(|(t, r)| (*t, r))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.resolvers.keys()).finish()
    }
}
