pub mod manager;
pub mod model;
pub mod remote_cmd;
pub mod session;
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::ConnectionManager;
pub use session::{Session, SessionOptions};
