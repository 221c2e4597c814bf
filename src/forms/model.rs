//! Form / question / choice / response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A form a tenant publishes to collect prospect answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Form {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    /// Ordered questions. Persisted as a JSON column; question identity lives
    /// inside the document, not in its position.
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
}

impl Form {
    pub fn new(organization_id: Uuid, name: impl Into<String>, questions: Vec<Question>) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            questions,
            created_at: Utc::now(),
        }
    }

    pub fn question(&self, id: Uuid) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }
}

/// What kind of input a question collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Pick one choice.
    SingleChoice,
    /// Pick any number of choices.
    MultiChoice,
    /// Free text, fed to the oracle verbatim.
    FreeText,
}

/// One question on a form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub prompt: String,
    pub kind: QuestionKind,
    /// How much this question contributes to the rule-based aggregate (0–10).
    pub qualification_weight: u8,
    /// Choices for choice questions; empty for free text.
    pub choices: Vec<Choice>,
}

impl Question {
    pub fn single_choice(prompt: impl Into<String>, weight: u8, choices: Vec<Choice>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            kind: QuestionKind::SingleChoice,
            qualification_weight: weight,
            choices,
        }
    }

    pub fn free_text(prompt: impl Into<String>, weight: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            kind: QuestionKind::FreeText,
            qualification_weight: weight,
            choices: Vec::new(),
        }
    }

    pub fn choice(&self, id: Uuid) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == id)
    }
}

/// A selectable answer on a choice question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub id: Uuid,
    pub label: String,
    /// 0–100 contribution when selected.
    pub qualification_score: u8,
    /// Selecting this choice ends qualification regardless of aggregate score.
    pub is_disqualifying: bool,
    /// Message shown to the prospect when this choice disqualifies.
    pub disqualification_message: Option<String>,
}

impl Choice {
    pub fn new(label: impl Into<String>, score: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            qualification_score: score,
            is_disqualifying: false,
            disqualification_message: None,
        }
    }

    pub fn disqualifying(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            qualification_score: 0,
            is_disqualifying: true,
            disqualification_message: Some(message.into()),
        }
    }
}

/// One answer within a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: Uuid,
    /// Selected choice ids for choice questions.
    #[serde(default)]
    pub choice_ids: Vec<Uuid>,
    /// Free-text content, if any.
    #[serde(default)]
    pub text: Option<String>,
}

/// A respondent's completed (or in-progress) set of answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormResponse {
    pub id: Uuid,
    pub form_id: Uuid,
    pub respondent_email: String,
    pub respondent_name: Option<String>,
    pub answers: Vec<Answer>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl FormResponse {
    pub fn new(form_id: Uuid, respondent_email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            form_id,
            respondent_email: respondent_email.into(),
            respondent_name: None,
            answers: Vec::new(),
            completed: false,
            created_at: Utc::now(),
        }
    }

    /// All selected choices, resolved against the form definition.
    pub fn selected_choices<'a>(&self, form: &'a Form) -> Vec<(&'a Question, &'a Choice)> {
        let mut selected = Vec::new();
        for answer in &self.answers {
            let Some(question) = form.question(answer.question_id) else {
                continue;
            };
            for choice_id in &answer.choice_ids {
                if let Some(choice) = question.choice(*choice_id) {
                    selected.push((question, choice));
                }
            }
        }
        selected
    }

    /// Concatenated free-text content, used by the spam gate and the prompt.
    pub fn free_text(&self) -> String {
        self.answers
            .iter()
            .filter_map(|a| a.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
