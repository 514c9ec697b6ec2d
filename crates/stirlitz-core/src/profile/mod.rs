//! Password-protected profiles holding an exchanged key.

mod model;
mod store;

pub use model::Profile;
pub use store::ProfileStore;
