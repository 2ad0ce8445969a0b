//! Kernel configuration: pool table and task table size
//!
//! Consumed once by [`crate::Kernel::new`]. Pools are laid out in the order
//! given; pool ids are their table indices.

use crate::error::{KernelError, Result};

/// Maximum number of task slots
pub const MAX_TASKS: usize = 16;

/// Maximum number of buffer pools
pub const MAX_POOLS: usize = 16;

/// One row of the pool table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Payload size of every buffer in the pool (bytes)
    pub buffer_size: usize,
    /// Number of buffers pre-allocated
    pub buffer_count: usize,
    /// Restricted pools are reachable only by explicit pool id
    #[cfg_attr(feature = "serde", serde(default))]
    pub restricted: bool,
}

impl PoolConfig {
    /// Public pool
    pub const fn new(buffer_size: usize, buffer_count: usize) -> Self {
        Self {
            buffer_size,
            buffer_count,
            restricted: false,
        }
    }

    /// Pool excluded from best-fit allocation
    pub const fn restricted(buffer_size: usize, buffer_count: usize) -> Self {
        Self {
            buffer_size,
            buffer_count,
            restricted: true,
        }
    }
}

/// Kernel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KernelConfig {
    /// Number of task slots (ids `0..max_tasks`)
    pub max_tasks: usize,
    /// Pool table, strictly increasing `buffer_size`
    pub pools: Vec<PoolConfig>,
}

impl KernelConfig {
    /// Default pool table
    pub const DEFAULT_POOLS: [PoolConfig; 4] = [
        PoolConfig::new(64, 32),
        PoolConfig::restricted(128, 8),
        PoolConfig::new(660, 16),
        PoolConfig::new(1800, 8),
    ];

    /// Empty pool table with `max_tasks` slots; add pools with [`Self::with_pool`]
    pub fn new(max_tasks: usize) -> Self {
        Self {
            max_tasks,
            pools: Vec::new(),
        }
    }

    /// Append a pool row
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pools.push(pool);
        self
    }

    /// Set the number of task slots
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Check table limits and size ordering
    pub fn validate(&self) -> Result<()> {
        if self.max_tasks == 0 || self.max_tasks > MAX_TASKS {
            return Err(KernelError::InvalidConfig(format!(
                "max_tasks must be in 1..={MAX_TASKS}, got {}",
                self.max_tasks
            )));
        }
        validate_pools(&self.pools)
    }
}

/// Check a pool table on its own: count, non-zero rows and size ordering
pub(crate) fn validate_pools(pools: &[PoolConfig]) -> Result<()> {
    if pools.is_empty() || pools.len() > MAX_POOLS {
        return Err(KernelError::InvalidConfig(format!(
            "pool count must be in 1..={MAX_POOLS}, got {}",
            pools.len()
        )));
    }
    for (id, pool) in pools.iter().enumerate() {
        if pool.buffer_size == 0 || pool.buffer_count == 0 {
            return Err(KernelError::InvalidConfig(format!(
                "pool {id} has zero buffer size or count"
            )));
        }
        if pool.buffer_count > u32::MAX as usize / MAX_POOLS {
            return Err(KernelError::InvalidConfig(format!(
                "pool {id} buffer count {} too large",
                pool.buffer_count
            )));
        }
    }
    // Size classes must be strictly ordered for best-fit selection
    if let Some(w) = pools
        .windows(2)
        .find(|w| w[0].buffer_size >= w[1].buffer_size)
    {
        return Err(KernelError::InvalidConfig(format!(
            "pool sizes must strictly increase: {} then {}",
            w[0].buffer_size, w[1].buffer_size
        )));
    }
    Ok(())
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_tasks: MAX_TASKS,
            pools: Self::DEFAULT_POOLS.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = KernelConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.pools[1].restricted);
        assert!(!cfg.pools[0].restricted);
    }

    #[test]
    fn test_builder() {
        let cfg = KernelConfig::new(4)
            .with_pool(PoolConfig::new(32, 2))
            .with_pool(PoolConfig::new(256, 4));
        assert_eq!(cfg.max_tasks, 4);
        assert_eq!(cfg.pools.len(), 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_unordered_sizes() {
        let cfg = KernelConfig::new(2)
            .with_pool(PoolConfig::new(128, 2))
            .with_pool(PoolConfig::new(128, 2));
        assert!(matches!(cfg.validate(), Err(KernelError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_bad_limits() {
        assert!(KernelConfig::new(0).with_pool(PoolConfig::new(8, 1)).validate().is_err());
        assert!(KernelConfig::new(MAX_TASKS + 1)
            .with_pool(PoolConfig::new(8, 1))
            .validate()
            .is_err());
        assert!(KernelConfig::new(2).validate().is_err());
        assert!(KernelConfig::new(2).with_pool(PoolConfig::new(8, 0)).validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_from_json() {
        let json = r#"{"max_tasks":3,"pools":[{"buffer_size":64,"buffer_count":2},{"buffer_size":512,"buffer_count":1,"restricted":true}]}"#;
        let cfg: KernelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.max_tasks, 3);
        assert!(cfg.pools[1].restricted);
        assert!(cfg.validate().is_ok());
    }
}
