pub mod backup;
pub mod daemon;
pub mod list;
pub mod restore;
