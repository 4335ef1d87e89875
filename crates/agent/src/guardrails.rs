use agentdesk_core::ToolPolicy;

/// Outcome of the write gate for one tool invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    Execute,
    DryRun,
    Deny { reason_code: &'static str, user_message: String },
}

/// Pure write gate. Read-only tools always execute; write tools are skipped under
/// dry-run and denied when approval is required but missing.
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteGuard;

impl WriteGuard {
    pub fn evaluate(read_only: bool, tool_name: &str, policy: &ToolPolicy) -> GuardDecision {
        if read_only {
            return GuardDecision::Execute;
        }
        if policy.dry_run {
            return GuardDecision::DryRun;
        }
        if policy.require_approval_for_write_tools && !policy.is_approved(tool_name) {
            return GuardDecision::Deny {
                reason_code: "write_approval_required",
                user_message: format!(
                    "Write tool `{tool_name}` requires explicit approval before it can run."
                ),
            };
        }
        GuardDecision::Execute
    }
}
