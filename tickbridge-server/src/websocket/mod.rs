pub mod connection;
pub mod messages;

pub use connection::*;
pub use messages::*;
