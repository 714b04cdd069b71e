//! Post-run checks against the remote, for acceptance tests and callers that
//! want an independent confirmation of what a run reports.

use halyard_core::{Attributes, ResourceAddr, Scope, Value};
use thiserror::Error;

use crate::error::RemoteError;
use crate::remote::RemoteClient;
use crate::resolve::field_at;
use crate::state::{ResourceState, StateStore};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyError {
    #[error("{0} not found in state")]
    NotInState(ResourceAddr),

    #[error("{0} has no remote scope recorded in state")]
    MissingScope(ResourceAddr),

    #[error("{addr} does not exist at {scope}")]
    NotFound { addr: ResourceAddr, scope: Scope },

    #[error("{addr}: `{field}` is {actual}, expected {expected}")]
    Mismatch {
        addr: ResourceAddr,
        field: String,
        expected: Value,
        actual: Value,
    },

    #[error("{addr} still exists")]
    StillExists { addr: ResourceAddr },

    #[error("{addr}: {source}")]
    Remote {
        addr: ResourceAddr,
        #[source]
        source: RemoteError,
    },
}

/// Re-read a stored instance and check `expectations` (dotted field path,
/// expected value) against what the remote reports now.
pub async fn expect_exists(
    client: &dyn RemoteClient,
    store: &StateStore,
    addr: &ResourceAddr,
    expectations: &[(&str, Value)],
) -> Result<Attributes, VerifyError> {
    let state = store
        .get(addr)
        .ok_or_else(|| VerifyError::NotInState(addr.clone()))?;
    let observed = state
        .observed
        .ok_or_else(|| VerifyError::MissingScope(addr.clone()))?;

    let attributes = client
        .get(&observed.scope, &observed.name)
        .await
        .map_err(|source| VerifyError::Remote {
            addr: addr.clone(),
            source,
        })?
        .ok_or_else(|| VerifyError::NotFound {
            addr: addr.clone(),
            scope: observed.scope.clone(),
        })?;

    for (field, expected) in expectations {
        let actual = field_at(&attributes, field).cloned().unwrap_or(Value::Null);
        if !expected.matches(&actual) {
            return Err(VerifyError::Mismatch {
                addr: addr.clone(),
                field: field.to_string(),
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(attributes)
}

/// Check that every instance of `resource_type` in `resources` (typically a
/// snapshot taken before destroy) is gone remotely.
pub async fn expect_destroyed(
    client: &dyn RemoteClient,
    resources: &[ResourceState],
    resource_type: &str,
) -> Result<(), VerifyError> {
    for state in resources.iter().filter(|r| r.addr.resource_type == resource_type) {
        let observed = state
            .observed
            .as_ref()
            .ok_or_else(|| VerifyError::MissingScope(state.addr.clone()))?;

        let found = client
            .get(&observed.scope, &observed.name)
            .await
            .map_err(|source| VerifyError::Remote {
                addr: state.addr.clone(),
                source,
            })?;
        if found.is_some() {
            return Err(VerifyError::StillExists {
                addr: state.addr.clone(),
            });
        }
    }
    Ok(())
}
