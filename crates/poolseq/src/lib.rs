#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod allocator;
mod backend;
pub mod config;
mod error;
mod window;

pub use crate::allocator::*;
pub use crate::backend::*;
pub use crate::config::{AllocatorConfig, ConfigSource, EnvSource};
pub use crate::error::*;
pub use crate::window::*;
