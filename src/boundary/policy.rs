//! Policy enforcement gate, run synchronously before every remote call.
//!
//! Checks run in a fixed order and short-circuit on the first failure:
//! approval status, domain allowlist, method allowlist, payload size, retry
//! budget. No partial execution occurs when any check fails.

use std::collections::HashSet;

use serde_json::json;

use crate::catalog::{ApprovalStatus, OperationSpec};

use super::types::{ErrorInfo, ExecuteRequest, PolicyDocument};

pub struct PolicyGate {
    allowed_domains: HashSet<String>,
    allowed_methods: HashSet<String>,
    max_payload_bytes: usize,
    max_retries: u32,
}

impl PolicyGate {
    pub fn new(policy: &PolicyDocument) -> Self {
        Self {
            allowed_domains: policy.allowed_domains.iter().cloned().collect(),
            allowed_methods: policy.allowed_methods.iter().cloned().collect(),
            max_payload_bytes: policy.max_payload_bytes,
            max_retries: policy.max_retries,
        }
    }

    /// Enforce all gate checks for one execution request.
    pub fn enforce(&self, request: &ExecuteRequest, op: &OperationSpec) -> Result<(), ErrorInfo> {
        self.check_approved(op)?;
        self.check_domains(op)?;
        self.check_methods(op)?;
        self.check_payload_size(request)?;
        self.check_retry_budget(request.attempt)?;
        log::info!(
            "policy_enforcement_passed operation={} attempt={}",
            op.operation_id,
            request.attempt
        );
        Ok(())
    }

    fn check_approved(&self, op: &OperationSpec) -> Result<(), ErrorInfo> {
        if op.status != ApprovalStatus::Approved {
            log::warn!(
                "operation_not_approved operation={} status={:?}",
                op.operation_id,
                op.status
            );
            return Err(ErrorInfo::policy_violation(
                format!(
                    "Operation {} is not approved for execution",
                    op.operation_id
                ),
                json!({ "operation_id": op.operation_id, "status": op.status }),
            ));
        }
        Ok(())
    }

    fn check_domains(&self, op: &OperationSpec) -> Result<(), ErrorInfo> {
        let disallowed: Vec<&String> = op
            .allowed_domains
            .iter()
            .filter(|d| !self.allowed_domains.contains(*d))
            .collect();
        if !disallowed.is_empty() {
            log::warn!(
                "operation_domains_disallowed operation={} domains={:?}",
                op.operation_id,
                disallowed
            );
            return Err(ErrorInfo::policy_violation(
                format!("Operation uses disallowed domains: {:?}", disallowed),
                json!({ "operation_id": op.operation_id, "disallowed_domains": disallowed }),
            ));
        }
        Ok(())
    }

    fn check_methods(&self, op: &OperationSpec) -> Result<(), ErrorInfo> {
        let disallowed: Vec<&String> = op
            .allowed_methods
            .iter()
            .filter(|m| !self.allowed_methods.contains(*m))
            .collect();
        if !disallowed.is_empty() {
            log::warn!(
                "operation_methods_disallowed operation={} methods={:?}",
                op.operation_id,
                disallowed
            );
            return Err(ErrorInfo::policy_violation(
                format!("Operation uses disallowed HTTP methods: {:?}", disallowed),
                json!({ "operation_id": op.operation_id, "disallowed_methods": disallowed }),
            ));
        }
        Ok(())
    }

    fn check_payload_size(&self, request: &ExecuteRequest) -> Result<(), ErrorInfo> {
        let payload_size = request.args.to_string().len();
        if payload_size > self.max_payload_bytes {
            log::warn!(
                "payload_too_large size={} max={}",
                payload_size,
                self.max_payload_bytes
            );
            return Err(ErrorInfo::policy_violation(
                format!(
                    "Payload size {} bytes exceeds maximum {} bytes",
                    payload_size, self.max_payload_bytes
                ),
                json!({ "payload_size": payload_size, "max_payload_bytes": self.max_payload_bytes }),
            ));
        }
        Ok(())
    }

    fn check_retry_budget(&self, attempt: u32) -> Result<(), ErrorInfo> {
        if attempt > self.max_retries {
            log::warn!(
                "retry_budget_exceeded attempt={} max={}",
                attempt,
                self.max_retries
            );
            return Err(ErrorInfo::policy_violation(
                format!(
                    "Retry attempt {} exceeds maximum {}",
                    attempt, self.max_retries
                ),
                json!({ "attempt": attempt, "max_retries": self.max_retries }),
            ));
        }
        Ok(())
    }
}
