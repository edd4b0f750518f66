//! Role prompt templates. Each stage feeds these to the executor; the
//! response contract (JSON shapes) is validated by the planning artifacts.

use std::path::Path;

/// Architect: original request in, JSON specification out.
pub fn architect_prompt(original_request: &str) -> String {
    format!(
        r#"## Specification

Analyze the following request and produce a specification as a single JSON
object with exactly these fields:

- requirements: array of strings
- acceptance_criteria: array of strings
- technical_approach: string
- edge_cases: array of strings (may be empty)
- dependencies: array of strings (may be empty)
- complexity: one of "low", "medium", "high"

Respond with the JSON object only, no surrounding prose.

## Request

{}"#,
        original_request
    )
}

/// Sculptor: specification in, implementation task list out.
pub fn sculptor_prompt(specification: &str) -> String {
    format!(
        r#"## Implementation Tasks

Break the specification below into an ordered list of implementation tasks.
Respond with a JSON object: {{"tasks": [...]}} where every task has:

- id: stable identifier (T001, T002, ...)
- title: short imperative title
- description: what to implement
- acceptance_criteria: array of strings
- complexity: one of "low", "medium", "high"
- dependencies: array of task ids this task depends on (may be empty)

Respond with the JSON object only.

## Specification

{}"#,
        specification
    )
}

/// Sentinel: specification in, test task list out.
pub fn sentinel_prompt(specification: &str) -> String {
    format!(
        r#"## Test Tasks

Derive an ordered list of test tasks for the specification below. Respond
with a JSON object: {{"tasks": [...]}} where every task has:

- id: stable identifier (V001, V002, ...)
- title: short title naming what is verified
- description: what to test
- test_scenarios: array of strings
- test_type: one of "unit", "integration", "e2e"
- dependencies: array of task ids this test depends on (may be empty)

Respond with the JSON object only.

## Specification

{}"#,
        specification
    )
}

/// Craftsman: implement one sub-ticket inside the worktree.
pub fn craftsman_prompt(title: &str, body: &str, worktree: &Path) -> String {
    format!(
        r#"## Task

{}

{}

## Working copy

All changes go into `{}`. Commit your work when the task is complete."#,
        title,
        body,
        worktree.display()
    )
}

/// Validator: run one test sub-ticket inside the worktree.
pub fn validator_prompt(title: &str, body: &str, worktree: &Path) -> String {
    format!(
        r#"## Test

{}

{}

## Working copy

Run against `{}`. If the test fails, leave a comment starting with
`Error:` describing the failure, including the stack trace and any
relevant output in fenced code blocks."#,
        title,
        body,
        worktree.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn architect_prompt_embeds_request() {
        let prompt = architect_prompt("Add OAuth login");
        assert!(prompt.contains("Add OAuth login"));
        assert!(prompt.contains("acceptance_criteria"));
    }

    #[test]
    fn planner_prompts_strip_nothing_from_spec() {
        let spec = "requirements: log in with Google";
        assert!(sculptor_prompt(spec).contains(spec));
        assert!(sentinel_prompt(spec).contains(spec));
    }

    #[test]
    fn worker_prompts_name_the_worktree() {
        let prompt = craftsman_prompt("T001", "Do it", Path::new("/work/repo-42"));
        assert!(prompt.contains("/work/repo-42"));
        let prompt = validator_prompt("V001", "Check it", Path::new("/work/repo-42"));
        assert!(prompt.contains("Error:"));
    }
}
