/// Shared session document and owner-scoped patches.
pub mod models;
/// Replicated session store backends.
pub mod session_store;
/// Storage abstraction layer errors.
pub mod storage;
