use std::future::Future;
use std::pin::Pin;

use halyard_core::{Attributes, Scope};

use crate::error::RemoteError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Typed access to a remote control-plane resource collection.
///
/// Injected into a [`RunContext`](crate::context::RunContext) as
/// `Arc<dyn RemoteClient>`. Methods return boxed futures for dyn
/// compatibility. Implementations may retry internally; the reconciler
/// additionally retries [`RemoteError::Transient`] with backoff.
pub trait RemoteClient: Send + Sync {
    /// Read the current remote attributes. `Ok(None)` = doesn't exist.
    fn get<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Attributes>, RemoteError>>;

    /// Create the object from the full desired attribute set.
    fn create<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        attrs: &'a Attributes,
    ) -> BoxFuture<'a, Result<Attributes, RemoteError>>;

    /// Apply the changed top-level fields.
    fn update<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        delta: &'a Attributes,
    ) -> BoxFuture<'a, Result<Attributes, RemoteError>>;

    /// Tear down the object.
    fn delete<'a>(&'a self, scope: &'a Scope, name: &'a str) -> BoxFuture<'a, Result<(), RemoteError>>;
}
