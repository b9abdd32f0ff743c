//! # Batch Configuration
//!
//! Sizing of every pool created by the pool manager, plus logging defaults.
//! All pools share one `PoolConfig`; a pool's capacities never change after
//! creation.

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};
use crate::render::batching::records::InstanceData;

/// Size of one index element in bytes (indices are always `u32`)
pub const INDEX_SIZE: usize = std::mem::size_of::<u32>();

/// # Pool Configuration
///
/// Fixed capacities and strides for one geometry pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of vertices the vertex region can hold
    pub vertex_capacity: u32,
    /// Number of indices the index region can hold
    pub index_capacity: u32,
    /// Size of one vertex in bytes
    pub vertex_stride: u32,
    /// Size of one instance payload in bytes
    pub instance_stride: u32,
    /// Draw slots allocated up front for the object and payload tables
    pub initial_draw_capacity: u32,
    /// Threads per workgroup of the indirect fill compute pass
    pub workgroup_size: u32,
}

impl PoolConfig {
    /// Create a pool configuration with default strides and the given capacity
    /// for both the vertex and the index region
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            vertex_capacity: capacity,
            index_capacity: capacity,
            ..Self::default()
        }
    }

    /// Set the vertex stride
    pub fn with_vertex_stride(mut self, stride: u32) -> Self {
        self.vertex_stride = stride;
        self
    }

    /// Set the instance payload stride
    pub fn with_instance_stride(mut self, stride: u32) -> Self {
        self.instance_stride = stride;
        self
    }

    /// Set the number of draw slots allocated when a pool is created
    pub fn with_initial_draw_capacity(mut self, slots: u32) -> Self {
        self.initial_draw_capacity = slots;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vertex_capacity == 0 || self.index_capacity == 0 {
            return Err(ConfigError::Invalid(
                "vertex and index capacity must be non-zero".to_string(),
            ));
        }
        if i32::try_from(self.vertex_capacity).is_err() {
            return Err(ConfigError::Invalid(format!(
                "vertex capacity {} exceeds the largest base vertex {}",
                self.vertex_capacity,
                i32::MAX
            )));
        }
        if self.vertex_stride == 0 || self.vertex_stride % 4 != 0 {
            return Err(ConfigError::Invalid(format!(
                "vertex stride {} must be a non-zero multiple of 4",
                self.vertex_stride
            )));
        }
        if self.instance_stride == 0 || self.instance_stride % 16 != 0 {
            return Err(ConfigError::Invalid(format!(
                "instance stride {} must be a non-zero multiple of 16",
                self.instance_stride
            )));
        }
        let model_size = std::mem::size_of::<InstanceData>();
        if (self.instance_stride as usize) < model_size {
            return Err(ConfigError::Invalid(format!(
                "instance stride {} is smaller than the {} byte model payload",
                self.instance_stride, model_size
            )));
        }
        if self.initial_draw_capacity == 0 {
            return Err(ConfigError::Invalid(
                "initial draw capacity must be at least 1".to_string(),
            ));
        }
        if self.workgroup_size == 0 {
            return Err(ConfigError::Invalid("workgroup size must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            vertex_capacity: 100_000,
            index_capacity: 100_000,
            // position (3) + normal (3) + uv (2), all f32
            vertex_stride: 32,
            // model matrix (16) + texture/material vector (4), all f32
            instance_stride: 80,
            initial_draw_capacity: 256,
            workgroup_size: 64,
        }
    }
}

/// # Logging Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log filter, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// # Complete Batch Configuration
///
/// Top-level configuration loaded by applications.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Pool sizing
    pub pool: PoolConfig,
    /// Logging defaults
    pub logging: LoggingConfig,
}

impl BatchConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()
    }
}

impl Config for BatchConfig {}
