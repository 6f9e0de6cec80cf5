//! Classification engine. Matches an observation's window title against
//! the configured tag keywords and falls back to idle-based labels when
//! nothing matches.

use std::sync::Arc;

use crate::model::{
    Productivity, Tag, TagKeyword, CATEGORY_AWAY, CATEGORY_IDLE, CATEGORY_UNCLASSIFIED,
};

/// Outcome of classifying one observation. `matched` carries the tag id
/// and confidence only when a keyword won; fallback labels have no
/// classification result to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: Arc<str>,
    pub productivity: Productivity,
    pub matched: Option<(i64, f32)>,
}

pub struct Classifier {
    away_idle_seconds: u32,
    idle_idle_seconds: u32,
}

impl Classifier {
    pub fn new(away_idle_seconds: u32, idle_idle_seconds: u32) -> Self {
        Self {
            away_idle_seconds,
            idle_idle_seconds,
        }
    }

    /// Picks the winning keyword match. The decisive key is the weight;
    /// confidence is reported, never compared. Equal weights break by
    /// longer keyword, then smaller tag id, so the winner does not
    /// depend on candidate ordering.
    pub fn classify(
        &self,
        window_title: &str,
        idle_seconds: u32,
        candidates: &[(Tag, TagKeyword)],
    ) -> Classification {
        let title_lower = window_title.to_lowercase();

        let mut best: Option<(&Tag, &TagKeyword, f32)> = None;
        for (tag, keyword) in candidates {
            if keyword.keyword.is_empty() {
                continue;
            }
            if !title_lower.contains(&keyword.keyword.to_lowercase()) {
                continue;
            }
            let confidence = keyword.weight as f32
                * (keyword.keyword.len() as f32 / window_title.len() as f32)
                * 100.0;
            let wins = match best {
                None => true,
                Some((best_tag, best_keyword, _)) => {
                    (keyword.weight, keyword.keyword.len(), -tag.id)
                        > (best_keyword.weight, best_keyword.keyword.len(), -best_tag.id)
                }
            };
            if wins {
                best = Some((tag, keyword, confidence));
            }
        }

        match best {
            Some((tag, _, confidence)) => Classification {
                category: tag.name.clone(),
                productivity: tag.productivity,
                matched: Some((tag.id, confidence)),
            },
            None => self.idle_fallback(idle_seconds),
        }
    }

    /// Applied when no keyword matches or the tag lookup failed.
    pub fn idle_fallback(&self, idle_seconds: u32) -> Classification {
        let (category, productivity) = if idle_seconds >= self.idle_idle_seconds {
            (CATEGORY_IDLE, Productivity::Nonproductive)
        } else if idle_seconds >= self.away_idle_seconds {
            (CATEGORY_AWAY, Productivity::Nonproductive)
        } else {
            (CATEGORY_UNCLASSIFIED, Productivity::Neutral)
        };
        Classification {
            category: category.into(),
            productivity,
            matched: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::model::{Productivity, Tag, TagKeyword};

    use super::Classifier;

    fn tag(id: i64, name: &str, productivity: Productivity) -> Tag {
        Tag {
            id,
            name: Arc::from(name),
            productivity,
            department_id: None,
            priority_tier: 0,
        }
    }

    fn keyword(tag_id: i64, keyword: &str, weight: u32) -> TagKeyword {
        TagKeyword {
            tag_id,
            keyword: keyword.into(),
            weight,
        }
    }

    fn classifier() -> Classifier {
        Classifier::new(300, 600)
    }

    #[test]
    fn highest_weight_wins_regardless_of_confidence() {
        let candidates = vec![
            (
                tag(1, "Documents", Productivity::Productive),
                keyword(1, "invoice", 5),
            ),
            (
                tag(2, "Inventory", Productivity::Neutral),
                keyword(2, "inv", 2),
            ),
        ];
        // the short keyword yields a smaller confidence AND a smaller
        // weight here; swap weights and the selection must follow the
        // weight, not the confidence
        let result = classifier().classify("invoice.pdf - Preview", 0, &candidates);
        assert_eq!(result.category.as_ref(), "Documents");
        let (tag_id, confidence) = result.matched.unwrap();
        assert_eq!(tag_id, 1);
        let expected = 5.0 * (7.0 / 21.0) * 100.0;
        assert!((confidence - expected).abs() < 1e-3);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let candidates = vec![(
            tag(1, "Mail", Productivity::Neutral),
            keyword(1, "gmail", 3),
        )];
        let result = classifier().classify("GMAIL - inbox", 0, &candidates);
        assert_eq!(result.category.as_ref(), "Mail");
    }

    #[test]
    fn equal_weight_breaks_by_keyword_length_then_tag_id() {
        let candidates = vec![
            (tag(4, "Short", Productivity::Neutral), keyword(4, "doc", 3)),
            (
                tag(7, "Long", Productivity::Productive),
                keyword(7, "docs review", 3),
            ),
        ];
        let result = classifier().classify("docs review - browser", 0, &candidates);
        assert_eq!(result.category.as_ref(), "Long");

        let tied = vec![
            (tag(9, "Nine", Productivity::Neutral), keyword(9, "doc", 3)),
            (tag(2, "Two", Productivity::Neutral), keyword(2, "rev", 3)),
        ];
        let result = classifier().classify("doc rev", 0, &tied);
        assert_eq!(result.category.as_ref(), "Two");
    }

    #[test]
    fn winner_is_independent_of_candidate_order() {
        let mut candidates = vec![
            (tag(1, "A", Productivity::Neutral), keyword(1, "alpha", 2)),
            (tag(2, "B", Productivity::Neutral), keyword(2, "alphabet", 2)),
        ];
        let forward = classifier().classify("alphabet soup", 0, &candidates);
        candidates.reverse();
        let backward = classifier().classify("alphabet soup", 0, &candidates);
        assert_eq!(forward.category, backward.category);
        assert_eq!(forward.category.as_ref(), "B");
    }

    #[test]
    fn idle_fallback_thresholds() {
        let classifier = classifier();
        let idle = classifier.classify("untagged window", 650, &[]);
        assert_eq!(idle.category.as_ref(), "Idle");
        assert_eq!(idle.productivity, Productivity::Nonproductive);
        assert!(idle.matched.is_none());

        let away = classifier.classify("untagged window", 400, &[]);
        assert_eq!(away.category.as_ref(), "Away");
        assert_eq!(away.productivity, Productivity::Nonproductive);

        let active = classifier.classify("untagged window", 10, &[]);
        assert_eq!(active.category.as_ref(), "Unclassified");
        assert_eq!(active.productivity, Productivity::Neutral);
    }

    #[test]
    fn a_match_beats_any_idle_value() {
        let candidates = vec![(
            tag(1, "Reports", Productivity::Productive),
            keyword(1, "report", 1),
        )];
        let result = classifier().classify("quarterly report", 900, &candidates);
        assert_eq!(result.category.as_ref(), "Reports");
    }
}
