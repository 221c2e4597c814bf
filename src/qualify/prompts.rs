//! Prompt construction for oracle analyses.

use crate::flow::model::EventType;
use crate::forms::{Form, FormResponse, QuestionKind};

/// System prompt for qualification scoring.
///
/// Kept tight: it runs on every completed response.
pub fn qualification_system_prompt() -> String {
    r#"You are a B2B lead-qualification analyst. Score the prospect's answers.

Respond with ONLY a JSON object:
{
  "score": <0-100 qualification score>,
  "intent_score": <1-100 buying intent>,
  "confidence": <0.0-1.0>,
  "reasons": ["<short reason>", ...],
  "summary": "<2-3 sentence prospect summary>",
  "pain_points": ["..."],
  "buying_signals": ["..."],
  "recommended_approach": "<one sentence>",
  "recommended_duration_minutes": <15|30|45|60>
}

Higher weight questions matter more. Be skeptical of vague answers."#
        .to_string()
}

/// User prompt: the answered form, rendered with weights and choice scores.
pub fn qualification_user_prompt(
    form: &Form,
    response: &FormResponse,
    event_type: Option<&EventType>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Prospect: {} <{}>\n\nAnswers:\n",
        response.respondent_name.as_deref().unwrap_or("(no name)"),
        response.respondent_email
    ));

    for answer in &response.answers {
        let Some(question) = form.question(answer.question_id) else {
            continue;
        };
        out.push_str(&format!(
            "- [weight {}] {}\n",
            question.qualification_weight, question.prompt
        ));
        match question.kind {
            QuestionKind::FreeText => {
                out.push_str(&format!(
                    "  answer: {}\n",
                    answer.text.as_deref().unwrap_or("(blank)")
                ));
            }
            QuestionKind::SingleChoice | QuestionKind::MultiChoice => {
                for choice_id in &answer.choice_ids {
                    if let Some(choice) = question.choice(*choice_id) {
                        out.push_str(&format!(
                            "  picked: {} (choice score {})\n",
                            choice.label, choice.qualification_score
                        ));
                    }
                }
            }
        }
    }

    if let Some(et) = event_type {
        if let Some(min) = et.minimum_qualification_score {
            out.push_str(&format!("\nMinimum qualification score: {min}\n"));
        }
        if let Some(custom) = &et.custom_prompt {
            out.push_str(&format!("\nAdditional instructions:\n{custom}\n"));
        }
    }

    out
}

/// System prompt for curated-slot selection.
pub fn curation_system_prompt(count: usize) -> String {
    format!(
        r#"You pick the best meeting times for a qualified prospect.

Respond with ONLY a JSON object:
{{
  "curated_slot_indexes": [<up to {count} zero-based indexes from the candidate list>],
  "confidence": <0.0-1.0>
}}

Prefer sooner slots for urgent prospects and mid-morning times otherwise."#
    )
}

/// User prompt: indexed candidate slots plus what we know about the prospect.
pub fn curation_user_prompt(
    slots: &[&crate::scheduling::slots::AvailabilitySlot],
    insight: Option<&crate::analysis::ProspectInsight>,
) -> String {
    let mut out = String::from("Candidate slots:\n");
    for (i, slot) in slots.iter().enumerate() {
        out.push_str(&format!(
            "{}: {} to {}\n",
            i,
            slot.starts_at.to_rfc3339(),
            slot.ends_at.to_rfc3339()
        ));
    }
    if let Some(insight) = insight {
        out.push_str(&format!("\nProspect: {}\n", insight.summary));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{Answer, Choice, Form, FormResponse, Question};
    use uuid::Uuid;

    #[test]
    fn user_prompt_includes_weights_and_picks() {
        let question = Question::single_choice(
            "Team size?",
            7,
            vec![Choice::new("50+", 85)],
        );
        let choice_id = question.choices[0].id;
        let question_id = question.id;
        let form = Form::new(Uuid::new_v4(), "t", vec![question]);
        let mut response = FormResponse::new(form.id, "ada@example.com");
        response.answers.push(Answer {
            question_id,
            choice_ids: vec![choice_id],
            text: None,
        });

        let prompt = qualification_user_prompt(&form, &response, None);
        assert!(prompt.contains("[weight 7] Team size?"));
        assert!(prompt.contains("picked: 50+ (choice score 85)"));
    }

    #[test]
    fn custom_prompt_is_appended() {
        let form = Form::new(Uuid::new_v4(), "t", vec![]);
        let response = FormResponse::new(form.id, "ada@example.com");
        let mut event_type = crate::flow::model::EventType::new(
            Uuid::new_v4(),
            "Demo",
            crate::flow::status::SchedulingMode::Instant,
        );
        event_type.custom_prompt = Some("Favor healthcare companies.".into());
        let prompt = qualification_user_prompt(&form, &response, Some(&event_type));
        assert!(prompt.contains("Favor healthcare companies."));
    }
}
