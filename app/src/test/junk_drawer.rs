use r2d2::Pool;

use infra::memory::MemoryManager;

pub(crate) fn pool() -> Pool<MemoryManager> {
    env_logger::builder().is_test(true).try_init().unwrap_or_default();
    r2d2::Pool::builder()
        .max_size(2)
        .build(MemoryManager::default())
        .expect("build pool")
}
