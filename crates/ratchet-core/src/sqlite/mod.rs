pub mod store;

pub use store::SqlitePatchStore;
