//! Process-wide engine context
//!
//! Holds the engine configuration and the counters hosts used to query as
//! global state (live hair object count, internal assertion count). Created
//! with [`EngineContext::init`] and passed explicitly to every groom.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::core::error::{Result, StackError};

#[derive(Debug)]
pub struct EngineContext {
    config: EngineConfig,
    hair_objects: AtomicUsize,
    asserts: AtomicUsize,
    live: AtomicBool,
}

impl EngineContext {
    /// Validate the config and bring up a new context
    pub fn init(config: EngineConfig) -> Result<Arc<Self>> {
        config.validate().map_err(StackError::Config)?;
        tracing::info!(
            parallel_threshold = config.parallel_threshold,
            "strand engine initialized"
        );
        Ok(Arc::new(Self {
            config,
            hair_objects: AtomicUsize::new(0),
            asserts: AtomicUsize::new(0),
            live: AtomicBool::new(true),
        }))
    }

    /// Context with default configuration
    pub fn with_defaults() -> Arc<Self> {
        Arc::new(Self {
            config: EngineConfig::default(),
            hair_objects: AtomicUsize::new(0),
            asserts: AtomicUsize::new(0),
            live: AtomicBool::new(true),
        })
    }

    /// Stop accepting new hair objects
    ///
    /// Existing grooms keep working; the call reports how many were still
    /// registered.
    pub fn shutdown(&self) -> usize {
        self.live.store(false, Ordering::SeqCst);
        let remaining = self.hair_object_count();
        if remaining > 0 {
            tracing::warn!(remaining, "engine shut down with live hair objects");
        } else {
            tracing::info!("strand engine shut down");
        }
        remaining
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of grooms currently registered
    pub fn hair_object_count(&self) -> usize {
        self.hair_objects.load(Ordering::SeqCst)
    }

    /// Number of internal consistency failures recorded so far
    pub fn assert_count(&self) -> usize {
        self.asserts.load(Ordering::SeqCst)
    }

    pub(crate) fn register_hair_object(&self) -> Result<()> {
        if !self.is_live() {
            return Err(StackError::EngineShutdown);
        }
        self.hair_objects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn unregister_hair_object(&self) {
        // Saturating: a double unregister must not wrap the counter.
        let _ = self
            .hair_objects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub(crate) fn record_assert(&self, message: &str) {
        self.asserts.fetch_add(1, Ordering::SeqCst);
        tracing::error!(message, "internal consistency failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let ctx = EngineContext::with_defaults();
        ctx.register_hair_object().unwrap();
        ctx.register_hair_object().unwrap();
        assert_eq!(ctx.hair_object_count(), 2);
        ctx.unregister_hair_object();
        ctx.unregister_hair_object();
        ctx.unregister_hair_object();
        assert_eq!(ctx.hair_object_count(), 0);
    }

    #[test]
    fn test_shutdown_rejects_new_objects() {
        let ctx = EngineContext::with_defaults();
        assert_eq!(ctx.shutdown(), 0);
        assert!(!ctx.is_live());
        assert!(matches!(
            ctx.register_hair_object(),
            Err(StackError::EngineShutdown)
        ));
    }

    #[test]
    fn test_assert_counter() {
        let ctx = EngineContext::with_defaults();
        ctx.record_assert("test");
        assert_eq!(ctx.assert_count(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            guide_neighbors: 0,
            ..EngineConfig::default()
        };
        assert!(EngineContext::init(config).is_err());
    }
}
