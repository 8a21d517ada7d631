use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use uuid::Uuid;

use crate::callback::CallbackData;

/// File and folder names double as display names, with underscores read as spaces.
pub(crate) fn display_name(name: &str) -> String {
    name.replace('_', " ")
}

fn button(text: impl Into<String>, data: CallbackData) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, data.to_string())
}

pub(crate) fn subjects_keyboard(subjects: &[&str]) -> InlineKeyboardMarkup {
    let keyboard: Vec<Vec<InlineKeyboardButton>> = subjects
        .iter()
        .enumerate()
        .map(|(i, subject)| vec![button(display_name(subject), CallbackData::Subject(i))])
        .collect();

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn topics_keyboard(subject: usize, topics: &[&str]) -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = topics
        .iter()
        .enumerate()
        .map(|(topic, name)| {
            vec![button(display_name(name), CallbackData::Topic { subject, topic })]
        })
        .collect();
    keyboard.push(vec![button("« Back to subjects", CallbackData::Menu)]);

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn choices_keyboard(question_id: Uuid, choices: &[String]) -> InlineKeyboardMarkup {
    let keyboard: Vec<Vec<InlineKeyboardButton>> = choices
        .iter()
        .enumerate()
        .map(|(choice, text)| {
            vec![button(text.as_str(), CallbackData::Answer { question_id, choice })]
        })
        .collect();

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn finished_keyboard(position: Option<(usize, usize)>) -> InlineKeyboardMarkup {
    let mut keyboard = Vec::new();
    if let Some((subject, topic)) = position {
        keyboard.push(vec![button("🔁 Start over", CallbackData::Restart { subject, topic })]);
    }
    keyboard.push(vec![button("📚 Choose another topic", CallbackData::Menu)]);

    InlineKeyboardMarkup::new(keyboard)
}
