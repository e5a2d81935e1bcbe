use flowstate_core::ProcessingState;
use flowstate_db::MemoryStore;

/// Route `tracing` output through the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn memory_state() -> ProcessingState<MemoryStore> {
    init_tracing();
    ProcessingState::new(MemoryStore::new())
}
