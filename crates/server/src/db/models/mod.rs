pub mod node;
pub mod object_cache;
pub mod object_detail;
pub mod snapshot;
pub mod storage_pool;
pub mod task;
pub mod template;
pub mod template_pool;
pub mod vm;
pub mod volume;
