//! Connection provider abstraction
//!
//! The pool never talks to a database driver directly. It opens, health-checks
//! and closes raw connections through a [`ConnectionProvider`].

use async_trait::async_trait;

/// Boxed error returned by providers and callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Opens and health-checks single database connections
#[async_trait]
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Handle to one live database session
    type Connection: Send + Sync + 'static;

    /// Open a connection to `url`
    async fn open(&self, url: &str) -> Result<Self::Connection, BoxError>;

    /// Check that the connection is usable
    async fn ping(&self, connection: &Self::Connection) -> Result<(), BoxError>;

    /// Close the connection
    ///
    /// Default implementation drops it.
    async fn close(&self, connection: Self::Connection) {
        drop(connection);
    }
}
