//! Pre-oracle spam gate for form responses.
//!
//! Runs before any oracle call to catch throwaway submissions cheaply:
//! - link-stuffed free text
//! - known spam phrases
//! - disposable-email domains
//! - keyboard-mash / empty content
//!
//! Each tripped rule adds to the spam score; at or above the configured
//! threshold the flow goes to `spam_detected` without consuming oracle budget.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::forms::FormResponse;

/// Why a response was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamFlag {
    ExcessiveLinks,
    SpamPhrase,
    DisposableEmail,
    GibberishContent,
    EmptyContent,
}

impl SpamFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExcessiveLinks => "excessive_links",
            Self::SpamPhrase => "spam_phrase",
            Self::DisposableEmail => "disposable_email",
            Self::GibberishContent => "gibberish_content",
            Self::EmptyContent => "empty_content",
        }
    }
}

/// A single spam rule with a compiled regex and a score contribution.
struct SpamRule {
    regex: Regex,
    flag: SpamFlag,
    weight: u8,
}

/// Verdict from the spam gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamVerdict {
    /// 0–100 accumulated score.
    pub score: u8,
    pub flags: Vec<SpamFlag>,
}

impl SpamVerdict {
    pub fn clean() -> Self {
        Self { score: 0, flags: Vec::new() }
    }
}

/// Rule-based spam scorer.
pub struct SpamScorer {
    content_rules: Vec<SpamRule>,
    email_rules: Vec<SpamRule>,
    link_regex: Regex,
}

impl SpamScorer {
    /// Scorer with the default rule set.
    pub fn default_rules() -> Self {
        let content_rules = vec![
            SpamRule {
                regex: Regex::new(
                    r"(?i)\b(viagra|casino|crypto\s*giveaway|work\s+from\s+home|earn\s+\$\d+|seo\s+services|backlinks?)\b",
                )
                .unwrap(),
                flag: SpamFlag::SpamPhrase,
                weight: 40,
            },
            SpamRule {
                // Long runs of consonants or repeated characters
                regex: Regex::new(r"(?i)([bcdfghjklmnpqrstvwxz]{7,}|(.)\2{5,})").unwrap(),
                flag: SpamFlag::GibberishContent,
                weight: 25,
            },
        ];
        let email_rules = vec![SpamRule {
            regex: Regex::new(
                r"(?i)@(mailinator|guerrillamail|10minutemail|trashmail|yopmail|sharklasers)\.",
            )
            .unwrap(),
            flag: SpamFlag::DisposableEmail,
            weight: 35,
        }];

        Self {
            content_rules,
            email_rules,
            link_regex: Regex::new(r"https?://\S+").unwrap(),
        }
    }

    /// Score a response. Deterministic and side-effect free.
    pub fn score(&self, response: &FormResponse) -> SpamVerdict {
        let mut score: u32 = 0;
        let mut flags = Vec::new();
        let text = response.free_text();

        let link_count = self.link_regex.find_iter(&text).count();
        if link_count >= 3 {
            score += 30 + 5 * (link_count as u32 - 3).min(6);
            flags.push(SpamFlag::ExcessiveLinks);
        }

        for rule in &self.content_rules {
            if rule.regex.is_match(&text) && !flags.contains(&rule.flag) {
                score += rule.weight as u32;
                flags.push(rule.flag);
            }
        }

        for rule in &self.email_rules {
            if rule.regex.is_match(&response.respondent_email) && !flags.contains(&rule.flag) {
                score += rule.weight as u32;
                flags.push(rule.flag);
            }
        }

        if response.answers.is_empty() {
            score += 20;
            flags.push(SpamFlag::EmptyContent);
        }

        let verdict = SpamVerdict {
            score: score.min(100) as u8,
            flags,
        };
        if verdict.score > 0 {
            debug!(
                response_id = %response.id,
                score = verdict.score,
                flags = ?verdict.flags,
                "Spam gate flagged response"
            );
        }
        verdict
    }
}

impl Default for SpamScorer {
    fn default() -> Self {
        Self::default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{Answer, FormResponse};
    use uuid::Uuid;

    fn response_with_text(email: &str, text: &str) -> FormResponse {
        let mut response = FormResponse::new(Uuid::new_v4(), email);
        response.answers.push(Answer {
            question_id: Uuid::new_v4(),
            choice_ids: Vec::new(),
            text: Some(text.to_string()),
        });
        response
    }

    #[test]
    fn clean_response_scores_zero() {
        let scorer = SpamScorer::default_rules();
        let response = response_with_text(
            "ada@example.com",
            "We're evaluating tools for our sales team of 12.",
        );
        let verdict = scorer.score(&response);
        assert_eq!(verdict.score, 0);
        assert!(verdict.flags.is_empty());
    }

    #[test]
    fn link_stuffing_is_flagged() {
        let scorer = SpamScorer::default_rules();
        let response = response_with_text(
            "ada@example.com",
            "http://a.com http://b.com http://c.com http://d.com",
        );
        let verdict = scorer.score(&response);
        assert!(verdict.flags.contains(&SpamFlag::ExcessiveLinks));
        assert!(verdict.score >= 30);
    }

    #[test]
    fn disposable_email_and_phrases_stack() {
        let scorer = SpamScorer::default_rules();
        let response = response_with_text(
            "bot@mailinator.com",
            "Best SEO services, cheap backlinks for your site",
        );
        let verdict = scorer.score(&response);
        assert!(verdict.flags.contains(&SpamFlag::DisposableEmail));
        assert!(verdict.flags.contains(&SpamFlag::SpamPhrase));
        assert!(verdict.score >= 75);
    }

    #[test]
    fn empty_response_is_suspicious_but_below_default_threshold() {
        let scorer = SpamScorer::default_rules();
        let response = FormResponse::new(Uuid::new_v4(), "ada@example.com");
        let verdict = scorer.score(&response);
        assert!(verdict.flags.contains(&SpamFlag::EmptyContent));
        assert!(verdict.score < 70);
    }
}
