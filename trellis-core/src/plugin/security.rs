//! Security policy and forbidden-operation gating for plugin code.
//!
//! The policy is a call-site gate: plugin code asks the host for a dangerous
//! operation through its sandbox context *before* performing it, and a denial
//! is returned before anything runs. Grants come from the plugin manifest's
//! `permissions` set; the host policy decides which operations are gated at
//! all and which may never be granted.

use crate::plugin::error::SandboxError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Host operations a plugin may request permission for.
///
/// The same enum serves as the manifest's permission vocabulary and as the
/// operation tag checked at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Spawn a child process
    ProcessSpawn,
    /// Create files outside the plugin's own state directory
    FileCreate,
    /// Delete files
    FileDelete,
    /// Change file or account permissions
    PermissionChange,
    /// Evaluate dynamically supplied code
    CodeEval,
    /// Open raw sockets
    RawSocket,
    /// Mutate host process environment variables
    EnvMutation,
    /// Make outbound HTTP/TCP client connections
    NetworkClient,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ProcessSpawn => "process_spawn",
            Self::FileCreate => "file_create",
            Self::FileDelete => "file_delete",
            Self::PermissionChange => "permission_change",
            Self::CodeEval => "code_eval",
            Self::RawSocket => "raw_socket",
            Self::EnvMutation => "env_mutation",
            Self::NetworkClient => "network_client",
        };
        write!(f, "{name}")
    }
}

/// Security policy applied to every plugin execution.
///
/// Operations fall into three classes: ungated (always allowed), gated
/// (allowed only with a manifest grant), and never-allowed (denied even when
/// the manifest asks for them).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityPolicy {
    /// Operations that require an explicit manifest grant
    gated: HashSet<Capability>,
    /// Operations that are denied regardless of grants
    never: HashSet<Capability>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            gated: [
                Capability::ProcessSpawn,
                Capability::FileCreate,
                Capability::FileDelete,
                Capability::PermissionChange,
                Capability::RawSocket,
                Capability::EnvMutation,
            ]
            .into_iter()
            .collect(),
            never: [Capability::CodeEval].into_iter().collect(),
        }
    }
}

impl SecurityPolicy {
    /// Policy with no gates at all. Tests and development only.
    pub fn permissive() -> Self {
        Self { gated: HashSet::new(), never: HashSet::new() }
    }

    /// Gate an additional operation behind a manifest grant.
    pub fn gate(mut self, op: Capability) -> Self {
        self.gated.insert(op);
        self
    }

    /// Deny an operation unconditionally.
    pub fn never_allow(mut self, op: Capability) -> Self {
        self.never.insert(op);
        self.gated.remove(&op);
        self
    }

    /// Check an operation for a plugin with the given grants.
    ///
    /// Returns `ForbiddenOperation` before the operation runs when the policy
    /// denies it.
    pub fn check(
        &self,
        plugin: &str,
        op: Capability,
        granted: &HashSet<Capability>,
    ) -> Result<(), SandboxError> {
        if self.never.contains(&op) {
            return Err(SandboxError::ForbiddenOperation {
                plugin: plugin.to_string(),
                operation: op.to_string(),
            });
        }
        if self.gated.contains(&op) && !granted.contains(&op) {
            return Err(SandboxError::ForbiddenOperation {
                plugin: plugin.to_string(),
                operation: op.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grants(ops: &[Capability]) -> HashSet<Capability> {
        ops.iter().copied().collect()
    }

    #[test]
    fn gated_operation_requires_grant() {
        let policy = SecurityPolicy::default();

        let denied = policy.check("mailer", Capability::ProcessSpawn, &grants(&[]));
        assert!(matches!(denied, Err(SandboxError::ForbiddenOperation { .. })));

        let allowed =
            policy.check("mailer", Capability::ProcessSpawn, &grants(&[Capability::ProcessSpawn]));
        assert!(allowed.is_ok());
    }

    #[test]
    fn never_allowed_ignores_grants() {
        let policy = SecurityPolicy::default();
        let result = policy.check("mailer", Capability::CodeEval, &grants(&[Capability::CodeEval]));
        assert!(matches!(result, Err(SandboxError::ForbiddenOperation { .. })));
    }

    #[test]
    fn ungated_operation_needs_no_grant() {
        let policy = SecurityPolicy::default();
        assert!(policy.check("sms-gateway", Capability::NetworkClient, &grants(&[])).is_ok());
    }

    #[test]
    fn policy_builders() {
        let policy = SecurityPolicy::permissive()
            .gate(Capability::NetworkClient)
            .never_allow(Capability::ProcessSpawn);

        assert!(policy.check("p", Capability::NetworkClient, &grants(&[])).is_err());
        assert!(policy
            .check("p", Capability::ProcessSpawn, &grants(&[Capability::ProcessSpawn]))
            .is_err());
        assert!(policy.check("p", Capability::FileDelete, &grants(&[])).is_ok());
    }

    #[test]
    fn capability_serde_uses_snake_case() {
        let json = serde_json::to_string(&Capability::ProcessSpawn).unwrap();
        assert_eq!(json, "\"process_spawn\"");
    }
}
