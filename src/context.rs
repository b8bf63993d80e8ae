//! Exchange-scoped connection metadata.
//!
//! Each exchange establishes a [`RequestScope`] for its connection. The
//! paired [`RequestContext`] is an explicit value threaded through handler
//! code, never a task-local, and stays valid only while the scope is
//! alive. Remote-address resolution is deferred to first access and cached
//! for the remainder of the scope.
//!
//! # Example
//!
//! ```
//! use flowgate::context::RequestScope;
//!
//! let (scope, ctx) = RequestScope::establish(|| "127.0.0.1:4000".to_string());
//!
//! let addr = ctx.remote_address().unwrap();
//! assert_eq!(addr, "127.0.0.1:4000");
//!
//! drop(scope);
//! assert!(ctx.remote_address().is_err());
//! ```

use std::sync::{Arc, OnceLock, Weak};

use crate::error::{FlowgateError, Result};

/// Resolver producing the remote address for a connection.
///
/// Invoked at most once per exchange; the result is memoized.
type AddressResolver = Box<dyn Fn() -> String + Send + Sync>;

struct ScopeInner {
    resolver: AddressResolver,
    remote_address: OnceLock<String>,
}

/// The dynamic scope of one exchange.
///
/// Owns the connection metadata. Dropping the scope invalidates every
/// [`RequestContext`] handed out for it. Concurrent exchanges hold
/// independent scopes and never observe each other's metadata.
pub struct RequestScope {
    inner: Arc<ScopeInner>,
}

impl RequestScope {
    /// Open a scope for one connection.
    ///
    /// `resolver` is called lazily on the first [`RequestContext::remote_address`]
    /// access, then cached.
    pub fn establish<F>(resolver: F) -> (RequestScope, RequestContext)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        let inner = Arc::new(ScopeInner {
            resolver: Box::new(resolver),
            remote_address: OnceLock::new(),
        });

        let ctx = RequestContext {
            scope: Arc::downgrade(&inner),
        };

        (RequestScope { inner }, ctx)
    }

    /// Another context handle into this scope.
    pub fn context(&self) -> RequestContext {
        RequestContext {
            scope: Arc::downgrade(&self.inner),
        }
    }
}

/// Accessor for connection metadata, valid only inside its scope.
///
/// Cheaply cloneable; all clones observe the same memoized metadata.
#[derive(Clone)]
pub struct RequestContext {
    scope: Weak<ScopeInner>,
}

impl RequestContext {
    /// The remote address of the connection.
    ///
    /// Resolved on first call and cached for the lifetime of the scope.
    /// Fails with [`FlowgateError::ContextUnavailable`] once the scope has
    /// been dropped.
    pub fn remote_address(&self) -> Result<String> {
        let inner = self
            .scope
            .upgrade()
            .ok_or(FlowgateError::ContextUnavailable)?;

        let addr = inner
            .remote_address
            .get_or_init(|| (inner.resolver)());

        Ok(addr.clone())
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("in_scope", &(self.scope.strong_count() > 0))
            .finish()
    }
}
