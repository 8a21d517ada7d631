use uuid::Uuid;

/// Namespace for question ids. Ids are derived from subject, topic and prompt so that
/// progress stored in the database keeps pointing at the same question after a restart.
const QUESTION_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_2c3e_84d5_4b07_9e21_c0f3_5d84_a9b2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    id: Uuid,
    subject: String,
    topic: String,
    prompt: String,
    choices: Vec<String>,
    correct_index: usize,
}

impl Question {
    /// Builds a question. Callers validate that `correct_index` points into `choices`.
    pub fn new(
        subject: String,
        topic: String,
        prompt: String,
        choices: Vec<String>,
        correct_index: usize,
    ) -> Self {
        Self {
            id: Self::derive_id(&subject, &topic, &prompt),
            subject,
            topic,
            prompt,
            choices,
            correct_index,
        }
    }

    pub fn derive_id(subject: &str, topic: &str, prompt: &str) -> Uuid {
        let key = format!("{subject}\u{1f}{topic}\u{1f}{prompt}");
        Uuid::new_v5(&QUESTION_NAMESPACE, key.as_bytes())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    pub fn correct_index(&self) -> usize {
        self.correct_index
    }

    pub fn correct_choice(&self) -> &str {
        &self.choices[self.correct_index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(prompt: &str) -> Question {
        Question::new(
            "Math".into(),
            "Algebra".into(),
            prompt.into(),
            vec!["3".into(), "4".into(), "5".into()],
            1,
        )
    }

    #[test]
    fn id_is_stable_for_same_content() {
        assert_eq!(sample("2+2?").id(), sample("2+2?").id());
        assert_ne!(sample("2+2?").id(), sample("2+3?").id());
    }

    #[test]
    fn id_separates_fields() {
        let a = Question::derive_id("ab", "c", "d");
        let b = Question::derive_id("a", "bc", "d");
        assert_ne!(a, b);
    }
}
