//! Engine tunables.
//!
//! Capacities are fixed at init time; they are read from a `config::Config`
//! the same way the backends read their settings, with defaults applied for
//! missing keys.

/// Pool capacities and other init-time tunables.
#[derive(Copy, Clone, Debug)]
pub struct GraphicsConfig {
    /// Capacity of the command-batch pool (max submissions in flight).
    pub max_batches: usize,
    /// Capacity of each per-kind resource pool.
    pub resource_pool_capacity: usize,
    /// Capacity of each cached (deduplicated) descriptor pool.
    pub cached_pool_capacity: usize,
    /// Number of page slots in each staging pool.
    pub staging_pool_capacity: usize,
}

impl Default for GraphicsConfig {
    fn default() -> GraphicsConfig {
        GraphicsConfig {
            max_batches: 32,
            resource_pool_capacity: 4096,
            cached_pool_capacity: 1024,
            staging_pool_capacity: 32,
        }
    }
}

impl GraphicsConfig {
    /// Loads tunables from a configuration object, falling back to defaults
    /// for missing keys.
    pub fn from_config(cfg: &config::Config) -> GraphicsConfig {
        let defaults = GraphicsConfig::default();
        GraphicsConfig {
            max_batches: cfg
                .get::<usize>("graph.max_batches")
                .unwrap_or(defaults.max_batches),
            resource_pool_capacity: cfg
                .get::<usize>("resources.pool_capacity")
                .unwrap_or(defaults.resource_pool_capacity),
            cached_pool_capacity: cfg
                .get::<usize>("resources.cached_pool_capacity")
                .unwrap_or(defaults.cached_pool_capacity),
            staging_pool_capacity: cfg
                .get::<usize>("resources.staging_pool_capacity")
                .unwrap_or(defaults.staging_pool_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_for_missing_keys() {
        let cfg = config::Config::new();
        let gc = GraphicsConfig::from_config(&cfg);
        assert_eq!(gc.max_batches, GraphicsConfig::default().max_batches);
    }

    #[test]
    fn explicit_keys_override_defaults() {
        let mut cfg = config::Config::new();
        cfg.set("graph.max_batches", 4i64).unwrap();
        let gc = GraphicsConfig::from_config(&cfg);
        assert_eq!(gc.max_batches, 4);
    }
}
