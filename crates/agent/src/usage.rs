//! Token usage and cost accounting for sessions.

use taskloom_core::{ModelInfo, Session, TokenUsage};

/// USD cost of one completion under the model's per-million prices.
pub fn completion_cost(model: &ModelInfo, usage: &TokenUsage) -> f64 {
    model.cost_per_1m_in_cached / 1e6 * usage.cache_creation_tokens as f64
        + model.cost_per_1m_out_cached / 1e6 * usage.cache_read_tokens as f64
        + model.cost_per_1m_in / 1e6 * usage.input_tokens as f64
        + model.cost_per_1m_out / 1e6 * usage.output_tokens as f64
}

/// Add one completion's usage to the session's running totals.
pub fn accrue(session: &mut Session, model: &ModelInfo, usage: &TokenUsage) -> f64 {
    let cost = completion_cost(model, usage);
    session.cost += cost;
    session.prompt_tokens += usage.input_tokens + usage.cache_creation_tokens;
    session.completion_tokens += usage.output_tokens + usage.cache_read_tokens;
    cost
}

/// Fold a finished sub-agent session's cost into its parent.
pub fn roll_up(parent: &mut Session, child: &Session) {
    parent.cost += child.cost;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonnet() -> ModelInfo {
        ModelInfo {
            id: "claude-sonnet-4".into(),
            cost_per_1m_in: 3.0,
            cost_per_1m_out: 15.0,
            cost_per_1m_in_cached: 3.75,
            cost_per_1m_out_cached: 0.3,
            ..Default::default()
        }
    }

    fn usage() -> TokenUsage {
        TokenUsage {
            input_tokens: 1000,
            output_tokens: 500,
            cache_creation_tokens: 200,
            cache_read_tokens: 100,
        }
    }

    #[test]
    fn cost_uses_all_four_prices() {
        let cost = completion_cost(&sonnet(), &usage());
        assert!((cost - 0.01128).abs() < 1e-12, "{cost}");
    }

    #[test]
    fn free_model_costs_nothing() {
        assert_eq!(completion_cost(&ModelInfo::default(), &usage()), 0.0);
    }

    #[test]
    fn accrue_accumulates_across_completions() {
        let mut session = Session::new("s1", "t");
        accrue(&mut session, &sonnet(), &usage());
        accrue(&mut session, &sonnet(), &usage());
        assert!((session.cost - 0.02256).abs() < 1e-12);
        assert_eq!(session.prompt_tokens, 2 * 1200);
        assert_eq!(session.completion_tokens, 2 * 600);
    }

    #[test]
    fn roll_up_adds_child_cost() {
        let mut parent = Session::new("p", "t");
        parent.cost = 0.5;
        let mut child = Session::task("call_1", "p", "sub");
        child.cost = 0.25;
        roll_up(&mut parent, &child);
        assert_eq!(parent.cost, 0.75);
        assert_eq!(parent.prompt_tokens, 0);
    }
}
