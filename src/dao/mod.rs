/// Local device identity persistence.
pub mod identity;
/// Database model definitions.
pub mod models;
/// Shared session store abstraction and its backends.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;
