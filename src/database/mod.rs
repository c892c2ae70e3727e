pub mod schema;
pub mod connection;
pub mod models;

pub use connection::*;
pub use models::*;
pub use schema::*;
