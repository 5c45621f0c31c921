mod interface;
#[cfg(any(test, feature = "memory"))]
mod memory;

pub use interface::*;
#[cfg_attr(docsrs, doc(cfg(feature = "memory")))]
#[cfg(any(test, feature = "memory"))]
pub use memory::*;
