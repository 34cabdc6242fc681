//! # Adapters
//!
//! Concrete implementations of the driven ports:
//!
//! - [`TcpChannel`]: tokio TCP behind [`ByteChannel`](crate::ports::ByteChannel)
//! - [`InMemoryBanList`], [`NoOpBanList`]: [`BanList`](crate::ports::BanList)
//! - `MemoryChannel`: in-process pipe pair (tests, or feature `test-utils`)

pub mod ban_list;
pub mod tcp;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use ban_list::{InMemoryBanList, NoOpBanList};
pub use tcp::TcpChannel;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryChannel;
