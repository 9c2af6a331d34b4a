mod buffer_pool_manager;
mod frame_header;
mod lru_k_replacer;
mod page_guard;

pub use buffer_pool_manager::BufferPoolManager;
pub use frame_header::{FrameHeader, PageData};
pub use lru_k_replacer::LruKReplacer;
pub use page_guard::{ReadPageGuard, WritePageGuard};
