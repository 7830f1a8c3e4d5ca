// crates/aq_filter/src/lib.rs

//! AquAssim 滤波层
//!
//! 模型无关的粒子滤波核心：
//!
//! - [`particle`]: 粒子与集合（状态向量 + 权重）
//! - [`model`]: 外部模型调用契约 [`ModelRunner`]
//! - [`assimilator`]: 单步序贯蒙特卡洛更新（加权、重采样、核扰动）
//!
//! 粒子权重从不隐式归一化；权重和携带集合对观测的解释能力，
//! 由加权统计在使用处惰性归一。

#![warn(clippy::all)]

pub mod assimilator;
pub mod error;
pub mod model;
pub mod particle;

pub use assimilator::{Assimilator, FilterOutcome, PARTICLE_PREFIX, RESAMPLE_TAG};
pub use error::{FilterError, FilterResult};
pub use model::{ForecastRunner, ForecastSeries, ModelError, ModelRun, ModelRunner};
pub use particle::{ensemble_dimension, Particle};
