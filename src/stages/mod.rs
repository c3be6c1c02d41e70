//! Workflow stages
//!
//! Each stage reads the `WorkflowState` it is handed and writes back through
//! the state's mutators. Stages never call each other; sequencing belongs to
//! the workflow engine.

pub mod analyst;
pub mod intelligence_hub;
pub mod researcher;
pub mod validator;

pub use analyst::Analyst;
pub use intelligence_hub::IntelligenceHub;
pub use researcher::{MissingFactHint, QueryRewriter, Researcher};
pub use validator::{Validator, ValidatorVerdict};

use crate::state::WorkflowState;

/// Passages numbered for citation, followed by any enrichment block.
pub(crate) fn render_context(state: &WorkflowState) -> String {
    let mut sections: Vec<String> = state
        .retrieved_context()
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] ({})\n{}", i + 1, p.source_locator, p.text))
        .collect();

    if sections.is_empty() {
        sections.push("(no passages retrieved)".to_string());
    }

    if let Some(bundle) = state.enrichment() {
        sections.push(format!("External risk context:\n{}", bundle.render()));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentScope, EnrichmentBundle, PassageRef};

    #[test]
    fn test_render_context_numbers_passages() {
        let mut state = WorkflowState::new(DocumentScope::new("doc"), "q", 2);
        assert!(render_context(&state).contains("no passages"));

        state.append_passages(vec![
            PassageRef {
                text: "Revenue grew.".to_string(),
                source_locator: "page-1/chunk-0".to_string(),
                score: 0.8,
            },
            PassageRef {
                text: "Costs fell.".to_string(),
                source_locator: "page-2/chunk-3".to_string(),
                score: 0.4,
            },
        ]);
        state.set_enrichment(Some(EnrichmentBundle {
            entity: "Japan".to_string(),
            risk_signals: vec![],
        }));

        let rendered = render_context(&state);
        assert!(rendered.starts_with("[1] (page-1/chunk-0)\nRevenue grew."));
        assert!(rendered.contains("[2] (page-2/chunk-3)"));
        assert!(rendered.contains("External risk context:"));
    }
}
