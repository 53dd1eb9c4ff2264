//! SQLite connection pool backing the checkpoint metadata index.

pub mod connection;

pub use connection::DatabaseConnection;
