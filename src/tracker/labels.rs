use super::state::OrchState;

/// Prefix-aware label vocabulary. Every label the orchestrator reads or
/// writes goes through here so a deployment can namespace its labels
/// (e.g. prefix `orch:`) without touching the rest of the code.
#[derive(Debug, Clone)]
pub struct Labels {
    prefix: String,
}

impl Labels {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn make(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// The bare name of a label if it carries our prefix.
    pub fn strip<'a>(&self, label: &'a str) -> Option<&'a str> {
        label.strip_prefix(&self.prefix)
    }

    // State labels.

    pub fn state(&self, state: OrchState) -> String {
        self.make(state.as_str())
    }

    pub fn state_of(&self, labels: &[String]) -> Option<OrchState> {
        labels
            .iter()
            .filter_map(|l| self.strip(l))
            .find_map(OrchState::parse)
    }

    // Role labels.

    pub fn sub_issue(&self) -> String {
        self.make("sub-issue")
    }

    pub fn implementation(&self) -> String {
        self.make("implementation")
    }

    pub fn test(&self) -> String {
        self.make("test")
    }

    pub fn fix_attempt(&self) -> String {
        self.make("fix-attempt")
    }

    // Dynamic back-references.

    pub fn master_ref(&self, issue: u64) -> String {
        self.make(&format!("master-{}", issue))
    }

    pub fn test_ref(&self, issue: u64) -> String {
        self.make(&format!("test-{}", issue))
    }

    pub fn attempt(&self, attempt: u32) -> String {
        self.make(&format!("attempt-{}", attempt))
    }

    /// The master issue a sub-ticket points back to, if any.
    pub fn parse_master_ref(&self, labels: &[String]) -> Option<u64> {
        labels
            .iter()
            .filter_map(|l| self.strip(l))
            .find_map(|name| name.strip_prefix("master-"))
            .and_then(|n| n.parse().ok())
    }

    // Sub-ticket states.

    pub fn pending(&self) -> String {
        self.make("pending")
    }

    pub fn in_progress(&self) -> String {
        self.make("in-progress")
    }

    pub fn agent_complete(&self) -> String {
        self.make("agent-complete")
    }

    pub fn failed(&self) -> String {
        self.make("failed")
    }

    pub fn test_failed(&self) -> String {
        self.make("test-failed")
    }

    pub fn max_attempts_reached(&self) -> String {
        self.make("max-attempts-reached")
    }

    // Service labels. The queue label itself comes from configuration.

    pub fn processing(&self) -> String {
        self.make("processing")
    }

    pub fn orchestrated(&self) -> String {
        self.make("orchestrated")
    }

    // Approval decision labels.

    pub fn approved(&self) -> String {
        self.state(OrchState::Approved)
    }

    pub fn rejected(&self) -> String {
        self.state(OrchState::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_applied_everywhere() {
        let labels = Labels::new("orch:");
        assert_eq!(labels.state(OrchState::Planning), "orch:planning");
        assert_eq!(labels.master_ref(42), "orch:master-42");
        assert_eq!(labels.attempt(3), "orch:attempt-3");
        assert_eq!(labels.agent_complete(), "orch:agent-complete");
    }

    #[test]
    fn state_of_finds_the_single_state_label() {
        let labels = Labels::new("");
        let set = vec![
            "bug".to_string(),
            "implementing".to_string(),
            "master-7".to_string(),
        ];
        assert_eq!(labels.state_of(&set), Some(OrchState::Implementing));
    }

    #[test]
    fn state_of_ignores_foreign_prefixes() {
        let labels = Labels::new("orch:");
        let set = vec!["planning".to_string()];
        assert_eq!(labels.state_of(&set), None);
        let set = vec!["orch:planning".to_string()];
        assert_eq!(labels.state_of(&set), Some(OrchState::Planning));
    }

    #[test]
    fn master_ref_round_trips() {
        let labels = Labels::new("orch:");
        let set = vec![labels.master_ref(99), labels.test()];
        assert_eq!(labels.parse_master_ref(&set), Some(99));
    }
}
