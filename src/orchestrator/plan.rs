//! Plan artifacts: the specification and the task lists produced by the
//! planning agents, with field validation and the body markers used to
//! reconstruct a plan from sub-tickets on resume.

use serde::{Deserialize, Serialize};

use crate::error::{OrchError, Result};
use crate::graph::Schedulable;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specification {
    pub requirements: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub technical_approach: String,
    #[serde(default)]
    pub edge_cases: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub complexity: Option<String>,
}

impl Specification {
    /// Parse the architect's response. Required fields must be present and
    /// non-empty; anything else is a planning failure.
    pub fn parse(response: &str) -> Result<Self> {
        let json = extract_json(response)
            .ok_or_else(|| OrchError::Planning("no JSON object in architect response".into()))?;
        let spec: Self = serde_json::from_str(json)
            .map_err(|e| OrchError::Planning(format!("specification does not parse: {}", e)))?;

        if spec.requirements.is_empty() {
            return Err(OrchError::PlanValidation("requirements is empty".into()));
        }
        if spec.acceptance_criteria.is_empty() {
            return Err(OrchError::PlanValidation(
                "acceptance_criteria is empty".into(),
            ));
        }
        if spec.technical_approach.trim().is_empty() {
            return Err(OrchError::PlanValidation(
                "technical_approach is empty".into(),
            ));
        }
        Ok(spec)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("**Requirements**\n");
        for req in &self.requirements {
            out.push_str(&format!("- {}\n", req));
        }
        out.push_str("\n**Acceptance Criteria**\n");
        for criterion in &self.acceptance_criteria {
            out.push_str(&format!("- {}\n", criterion));
        }
        out.push_str(&format!(
            "\n**Technical Approach**\n\n{}\n",
            self.technical_approach
        ));
        if !self.edge_cases.is_empty() {
            out.push_str("\n**Edge Cases**\n");
            for case in &self.edge_cases {
                out.push_str(&format!("- {}\n", case));
            }
        }
        if !self.dependencies.is_empty() {
            out.push_str("\n**Dependencies**\n");
            for dep in &self.dependencies {
                out.push_str(&format!("- {}\n", dep));
            }
        }
        if let Some(complexity) = &self.complexity {
            out.push_str(&format!("\n**Complexity**: {}\n", complexity));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Implementation,
    Test,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub test_scenarios: Vec<String>,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub test_type: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Sub-ticket number, pinned when the ticket is created.
    #[serde(default)]
    pub sub_issue: Option<u64>,
}

impl Schedulable for PlannedTask {
    fn id(&self) -> &str {
        &self.id
    }
    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

#[derive(Debug, Deserialize)]
struct TaskListWire {
    tasks: Vec<PlannedTask>,
}

/// Parse a planner response into a validated, non-empty task list.
pub fn parse_tasks(response: &str, kind: TaskKind) -> Result<Vec<PlannedTask>> {
    let json = extract_json(response)
        .ok_or_else(|| OrchError::Planning("no JSON object in planner response".into()))?;
    let wire: TaskListWire = serde_json::from_str(json)
        .map_err(|e| OrchError::Planning(format!("task list does not parse: {}", e)))?;

    if wire.tasks.is_empty() {
        return Err(OrchError::PlanValidation("task list is empty".into()));
    }

    for task in &wire.tasks {
        if task.id.trim().is_empty() {
            return Err(OrchError::PlanValidation("task without id".into()));
        }
        if task.title.trim().is_empty() {
            return Err(OrchError::PlanValidation(format!(
                "task {} has no title",
                task.id
            )));
        }
        match kind {
            TaskKind::Implementation if task.description.trim().is_empty() => {
                return Err(OrchError::PlanValidation(format!(
                    "task {} has no description",
                    task.id
                )));
            }
            TaskKind::Test if task.test_scenarios.is_empty() => {
                return Err(OrchError::PlanValidation(format!(
                    "test task {} has no test_scenarios",
                    task.id
                )));
            }
            _ => {}
        }
    }

    Ok(wire.tasks)
}

#[derive(Debug, Clone)]
pub struct Plan {
    /// Rendered specification, as written into the orchestration block.
    /// Kept as markdown so a resumed run can recover it from the ticket.
    pub spec_markdown: String,
    pub implementation: Vec<PlannedTask>,
    pub tests: Vec<PlannedTask>,
}

impl Plan {
    /// Task counts plus per-task titles with their sub-ticket numbers, for
    /// the orchestration block.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} implementation tasks, {} test tasks\n\n",
            self.implementation.len(),
            self.tests.len()
        );
        out.push_str("**Implementation**\n");
        for task in &self.implementation {
            out.push_str(&format_task_line(task));
        }
        out.push_str("\n**Tests**\n");
        for task in &self.tests {
            out.push_str(&format_task_line(task));
        }
        out
    }

    /// The test tasks that declare a dependency on the given task id.
    pub fn dependents_of_test<'a>(&'a self, test_id: &str) -> Vec<&'a PlannedTask> {
        self.tests
            .iter()
            .filter(|t| t.dependencies.iter().any(|d| d == test_id))
            .collect()
    }

    pub fn test_by_sub_issue(&self, sub_issue: u64) -> Option<&PlannedTask> {
        self.tests.iter().find(|t| t.sub_issue == Some(sub_issue))
    }
}

fn format_task_line(task: &PlannedTask) -> String {
    match task.sub_issue {
        Some(sub) => format!("- {} — {} (#{})\n", task.id, task.title, sub),
        None => format!("- {} — {}\n", task.id, task.title),
    }
}

/// Sub-ticket body for a planned task. Carries the task id and dependency
/// markers so a resumed orchestration can rebuild the plan from tickets.
pub fn task_body(task: &PlannedTask, kind: TaskKind) -> String {
    let mut body = format!("## {}\n\n{}\n", task.title, task.description);

    match kind {
        TaskKind::Implementation => {
            if !task.acceptance_criteria.is_empty() {
                body.push_str("\n### Acceptance Criteria\n");
                for criterion in &task.acceptance_criteria {
                    body.push_str(&format!("- {}\n", criterion));
                }
            }
        }
        TaskKind::Test => {
            if !task.test_scenarios.is_empty() {
                body.push_str("\n### Test Scenarios\n");
                for scenario in &task.test_scenarios {
                    body.push_str(&format!("- {}\n", scenario));
                }
            }
        }
    }

    body.push_str(&format!("\n<!-- task-id: {} -->\n", task.id));
    if !task.dependencies.is_empty() {
        body.push_str(&format!(
            "<!-- depends-on: {} -->\n",
            task.dependencies.join(",")
        ));
    }
    body
}

/// Recover (task id, dependencies) from a sub-ticket body written by
/// `task_body`.
pub fn parse_task_markers(body: &str) -> (Option<String>, Vec<String>) {
    let mut id = None;
    let mut deps = Vec::new();
    for line in body.lines() {
        let Some(inner) = line
            .trim()
            .strip_prefix("<!--")
            .and_then(|l| l.strip_suffix("-->"))
        else {
            continue;
        };
        let Some((key, value)) = inner.trim().split_once(':') else {
            continue;
        };
        match key.trim() {
            "task-id" => id = Some(value.trim().to_string()),
            "depends-on" => {
                deps = value
                    .split(',')
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect();
            }
            _ => {}
        }
    }
    (id, deps)
}

/// Recover the rendered specification from an orchestration block: the
/// text between the Specification heading and the next section.
pub fn spec_section(block: &str) -> Option<String> {
    let start = block.find("### Specification")?;
    let after = &block[start + "### Specification".len()..];
    let end = after.find("\n### ").unwrap_or(after.len());
    Some(after[..end].trim().to_string())
}

/// Find the outermost JSON object in an agent response, tolerating fenced
/// code blocks and surrounding prose.
fn extract_json(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&response[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC_JSON: &str = r#"{
        "requirements": ["login with Google"],
        "acceptance_criteria": ["user can sign in"],
        "technical_approach": "OAuth2 flow",
        "edge_cases": ["expired token"],
        "dependencies": [],
        "complexity": "medium"
    }"#;

    #[test]
    fn specification_parses_from_fenced_response() {
        let response = format!("Here you go:\n```json\n{}\n```\n", SPEC_JSON);
        let spec = Specification::parse(&response).unwrap();
        assert_eq!(spec.requirements.len(), 1);
        assert_eq!(spec.complexity.as_deref(), Some("medium"));
    }

    #[test]
    fn specification_requires_core_fields() {
        let response = r#"{"requirements": [], "acceptance_criteria": ["x"], "technical_approach": "y"}"#;
        assert!(matches!(
            Specification::parse(response),
            Err(OrchError::PlanValidation(_))
        ));

        let response = r#"{"requirements": ["x"], "acceptance_criteria": ["y"], "technical_approach": "  "}"#;
        assert!(matches!(
            Specification::parse(response),
            Err(OrchError::PlanValidation(_))
        ));
    }

    #[test]
    fn spec_markdown_lists_sections() {
        let spec = Specification::parse(SPEC_JSON).unwrap();
        let md = spec.to_markdown();
        assert!(md.contains("**Requirements**"));
        assert!(md.contains("- login with Google"));
        assert!(md.contains("**Technical Approach**"));
        assert!(md.contains("expired token"));
    }

    #[test]
    fn implementation_tasks_need_descriptions() {
        let response = r#"{"tasks": [{"id": "T001", "title": "Do it", "description": ""}]}"#;
        assert!(parse_tasks(response, TaskKind::Implementation).is_err());

        let response = r#"{"tasks": [{"id": "T001", "title": "Do it", "description": "details"}]}"#;
        let tasks = parse_tasks(response, TaskKind::Implementation).unwrap();
        assert_eq!(tasks[0].id, "T001");
    }

    #[test]
    fn test_tasks_need_scenarios() {
        let response = r#"{"tasks": [{"id": "V001", "title": "Check it"}]}"#;
        assert!(parse_tasks(response, TaskKind::Test).is_err());

        let response =
            r#"{"tasks": [{"id": "V001", "title": "Check it", "test_scenarios": ["happy path"]}]}"#;
        let tasks = parse_tasks(response, TaskKind::Test).unwrap();
        assert_eq!(tasks[0].test_scenarios.len(), 1);
    }

    #[test]
    fn empty_task_list_is_rejected() {
        assert!(parse_tasks(r#"{"tasks": []}"#, TaskKind::Implementation).is_err());
    }

    #[test]
    fn task_body_markers_round_trip() {
        let task = PlannedTask {
            id: "T002".to_string(),
            title: "Wire the session store".to_string(),
            description: "Store sessions in Redis".to_string(),
            acceptance_criteria: vec!["sessions survive restart".to_string()],
            test_scenarios: vec![],
            complexity: None,
            test_type: None,
            dependencies: vec!["T001".to_string(), "T003".to_string()],
            sub_issue: None,
        };
        let body = task_body(&task, TaskKind::Implementation);
        let (id, deps) = parse_task_markers(&body);
        assert_eq!(id.as_deref(), Some("T002"));
        assert_eq!(deps, vec!["T001".to_string(), "T003".to_string()]);
        assert!(body.contains("sessions survive restart"));
    }

    #[test]
    fn summary_names_tasks_with_sub_tickets() {
        let plan = Plan {
            spec_markdown: Specification::parse(SPEC_JSON).unwrap().to_markdown(),
            implementation: vec![PlannedTask {
                id: "T001".to_string(),
                title: "Add OAuth".to_string(),
                description: "d".to_string(),
                acceptance_criteria: vec![],
                test_scenarios: vec![],
                complexity: None,
                test_type: None,
                dependencies: vec![],
                sub_issue: Some(101),
            }],
            tests: vec![PlannedTask {
                id: "V001".to_string(),
                title: "Verify OAuth".to_string(),
                description: String::new(),
                acceptance_criteria: vec![],
                test_scenarios: vec!["login works".to_string()],
                complexity: None,
                test_type: None,
                dependencies: vec![],
                sub_issue: Some(102),
            }],
        };
        let summary = plan.summary();
        assert!(summary.contains("1 implementation tasks, 1 test tasks"));
        assert!(summary.contains("T001 — Add OAuth (#101)"));
        assert!(summary.contains("V001 — Verify OAuth (#102)"));
    }

    #[test]
    fn spec_section_recovers_rendered_spec() {
        let block = "## Orchestration\n\n### Specification\n\n**Requirements**\n- login\n\n### Original Request\n\n> please";
        let spec = spec_section(block).unwrap();
        assert!(spec.contains("**Requirements**"));
        assert!(spec.contains("- login"));
        assert!(!spec.contains("Original Request"));
    }

    #[test]
    fn dependents_of_test_finds_declared_dependencies() {
        let base = PlannedTask {
            id: "V001".to_string(),
            title: "t".to_string(),
            description: String::new(),
            acceptance_criteria: vec![],
            test_scenarios: vec!["s".to_string()],
            complexity: None,
            test_type: None,
            dependencies: vec![],
            sub_issue: Some(1),
        };
        let mut dependent = base.clone();
        dependent.id = "V002".to_string();
        dependent.dependencies = vec!["V001".to_string()];
        dependent.sub_issue = Some(2);

        let plan = Plan {
            spec_markdown: Specification::parse(SPEC_JSON).unwrap().to_markdown(),
            implementation: vec![],
            tests: vec![base, dependent],
        };
        let dependents = plan.dependents_of_test("V001");
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].id, "V002");
    }
}
