pub mod chain_state;
pub mod error;
pub mod handlers;
pub mod helpers;
pub mod orphans;
pub mod persistence;
pub mod store;

pub use chain_state::*;
pub use error::*;
pub use handlers::*;
pub use helpers::*;
pub use orphans::{OrphanEntry, OrphanPool};
pub use persistence::*;
pub use store::*;
