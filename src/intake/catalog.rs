//! Question catalog — the fixed, ordered list of intake prompts.

use std::sync::Arc;

/// Questions asked when no custom catalog is supplied.
pub const DEFAULT_QUESTIONS: &[&str] = &[
    "Are you looking for a health insurance plan?",
    "What is your family size?",
    "What is your household income?",
    "What is your gender?",
];

/// Immutable, cheaply cloneable question list shared by every conversation.
#[derive(Debug, Clone)]
pub struct QuestionCatalog {
    questions: Arc<[String]>,
}

impl QuestionCatalog {
    pub fn new<I, S>(questions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            questions: questions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.questions.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.questions.iter().map(String::as_str)
    }
}

impl Default for QuestionCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_QUESTIONS.iter().copied())
    }
}
