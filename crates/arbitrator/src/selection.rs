use std::cmp::Ordering;

use pick_core::{DecisionFactors, Direction};

#[derive(Debug, Clone)]
pub struct SelectionRules {
    pub min_picks: usize,
    pub max_picks: usize,
    pub confidence_floor: f64,
}

impl Default for SelectionRules {
    fn default() -> Self {
        Self {
            min_picks: 3,
            max_picks: 6,
            confidence_floor: 0.55,
        }
    }
}

fn rank(a: &DecisionFactors, b: &DecisionFactors) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.model_conviction.total_cmp(&a.model_conviction))
        .then_with(|| a.symbol.cmp(&b.symbol))
}

/// Indices into `factors` of the selected proposals, best first.
///
/// Empty when fewer than `min_picks` clear the floor. When both directions
/// have at least one qualifying proposal, both appear in the selection.
pub fn select(factors: &[DecisionFactors], rules: &SelectionRules) -> Vec<usize> {
    let mut qualifying: Vec<usize> = (0..factors.len())
        .filter(|&i| factors[i].confidence >= rules.confidence_floor)
        .collect();
    if qualifying.len() < rules.min_picks || rules.max_picks == 0 {
        return Vec::new();
    }
    qualifying.sort_by(|&a, &b| rank(&factors[a], &factors[b]));

    let mut selected: Vec<usize> = qualifying.iter().copied().take(rules.max_picks).collect();

    if rules.max_picks >= 2 {
        for direction in [Direction::Long, Direction::Short] {
            let has = selected.iter().any(|&i| factors[i].direction == direction);
            if has {
                continue;
            }
            let best_missing = qualifying.iter().copied().find(|&i| factors[i].direction == direction);
            if let Some(candidate) = best_missing {
                // replace the weakest pick of the over-represented direction
                if let Some(pos) = selected.iter().rposition(|&i| factors[i].direction != direction) {
                    selected[pos] = candidate;
                }
            }
        }
        selected.sort_by(|&a, &b| rank(&factors[a], &factors[b]));
    }

    selected
}
