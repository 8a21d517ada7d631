/// One walk through the unanswered questions of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub subject: String,
    pub topic: String,
    /// Questions answered in this run.
    pub asked: u32,
    pub score: u32,
}

impl Run {
    pub fn new(subject: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            topic: topic.into(),
            asked: 0,
            score: 0,
        }
    }

    pub fn answered(self, correct: bool) -> Self {
        Self {
            asked: self.asked + 1,
            score: self.score + u32::from(correct),
            ..self
        }
    }

    pub fn percentage(&self) -> f64 {
        if self.asked == 0 {
            return 0.0;
        }
        f64::from(self.score) / f64::from(self.asked) * 100.0
    }
}

/// Per-chat dialogue state: `Idle → QuestionSent → (Idle | Finished)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum QuizState {
    #[default]
    Idle,
    QuestionSent(Run),
    /// Every question of the topic has been answered.
    Finished { subject: String, topic: String },
}

impl QuizState {
    /// The run an answer button belongs to. Answers are taken only while a question is
    /// pending.
    pub fn pending_run(self) -> Option<Run> {
        match self {
            Self::QuestionSent(run) => Some(run),
            Self::Idle | Self::Finished { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_accumulate_score() {
        let run = Run::new("Math", "Algebra").answered(true).answered(false).answered(true);
        assert_eq!((run.asked, run.score), (3, 2));
        assert!((run.percentage() - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(Run::new("Math", "Algebra").percentage(), 0.0);
    }

    #[test]
    fn only_question_sent_takes_answers() {
        let run = Run::new("Math", "Algebra");
        assert_eq!(QuizState::QuestionSent(run.clone()).pending_run(), Some(run));
        assert_eq!(QuizState::Idle.pending_run(), None);
        assert_eq!(
            QuizState::Finished {
                subject: "Math".into(),
                topic: "Algebra".into(),
            }
            .pending_run(),
            None
        );
    }
}
