pub mod banlist;
pub mod discouragement;
pub mod network;
pub mod sync;
pub mod types;
