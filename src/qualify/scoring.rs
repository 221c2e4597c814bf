//! Rule-based qualification scoring — runs before and alongside the oracle.

use crate::forms::{Choice, Form, FormResponse, Question};

/// Share of the aggregate taken by the oracle when both scores exist.
const ORACLE_BLEND_WEIGHT: f32 = 0.7;

/// Find the first selected choice marked disqualifying, if any.
///
/// A hit ends qualification unconditionally; the aggregate score is never
/// computed.
pub fn find_disqualifying<'a>(
    response: &FormResponse,
    form: &'a Form,
) -> Option<(&'a Question, &'a Choice)> {
    response
        .selected_choices(form)
        .into_iter()
        .find(|(_, choice)| choice.is_disqualifying)
}

/// Weighted mean of selected choice scores, weighted by question weight.
///
/// Returns None when the response selected no scored choices (free-text-only
/// forms lean entirely on the oracle).
pub fn weighted_score(response: &FormResponse, form: &Form) -> Option<u8> {
    let selected = response.selected_choices(form);
    let mut weight_total: u32 = 0;
    let mut acc: u32 = 0;
    for (question, choice) in selected {
        let weight = u32::from(question.qualification_weight.max(1));
        weight_total += weight;
        acc += weight * u32::from(choice.qualification_score);
    }
    if weight_total == 0 {
        return None;
    }
    Some((acc / weight_total).min(100) as u8)
}

/// Blend the rule-based and oracle scores into the final aggregate.
///
/// 70 % oracle / 30 % rules when both are present; whichever exists otherwise.
pub fn blend(rule_score: Option<u8>, oracle_score: Option<u8>) -> Option<u8> {
    match (rule_score, oracle_score) {
        (Some(rules), Some(oracle)) => {
            let blended = ORACLE_BLEND_WEIGHT * f32::from(oracle)
                + (1.0 - ORACLE_BLEND_WEIGHT) * f32::from(rules);
            Some(blended.round().min(100.0) as u8)
        }
        (Some(rules), None) => Some(rules),
        (None, Some(oracle)) => Some(oracle),
        (None, None) => None,
    }
}

/// Compare the aggregate against an event type's minimum. A missing minimum
/// accepts any score; a missing aggregate only passes when no minimum is set.
pub fn meets_minimum(aggregate: Option<u8>, minimum: Option<u8>) -> bool {
    match (aggregate, minimum) {
        (_, None) => true,
        (Some(score), Some(min)) => score >= min,
        (None, Some(_)) => false,
    }
}
