//! Loads quiz questions from CSV files.
//!
//! Two layouts are understood. A headered file names its columns (`subject`, `topic`,
//! `prompt`, `choice_1`..`choice_n`, `correct_choice_index`). A headerless file lists
//! `prompt, choice..., correct` positionally. In both cases a missing subject or topic
//! falls back to the parent directory name and the file stem, so `data/anatomy/tissues.csv`
//! yields the subject `anatomy` and the topic `tissues`.

use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, StringRecord, Trim};
use uuid::Uuid;

use crate::{database::quiz::Question, error::LoadError};

const MIN_CHOICES: usize = 2;
const MAX_CHOICES: usize = 10;

#[derive(Debug, Default)]
pub struct QuestionStore {
    questions: Vec<Question>,
    topics: BTreeMap<String, BTreeMap<String, Vec<usize>>>,
    by_id: HashMap<Uuid, usize>,
}

#[derive(Debug, Default, Clone)]
struct PathDefaults {
    subject: Option<String>,
    topic: Option<String>,
}

impl PathDefaults {
    fn from_path(path: &Path) -> Self {
        let name = |p: Option<&std::ffi::OsStr>| {
            p.map(|s| s.to_string_lossy().trim().to_owned())
                .filter(|s| !s.is_empty())
        };
        Self {
            subject: name(path.parent().and_then(Path::file_name)),
            topic: name(path.file_stem()),
        }
    }
}

#[derive(Debug)]
struct Columns {
    subject: Option<usize>,
    topic: Option<usize>,
    prompt: usize,
    choices: Vec<usize>,
    correct: usize,
}

#[derive(Debug)]
enum Layout {
    Headered(Columns),
    Positional,
}

struct Row {
    subject: String,
    topic: String,
    prompt: String,
    choices: Vec<String>,
    correct: String,
}

impl QuestionStore {
    /// Loads every question under `source`, which is either a CSV file or a directory
    /// searched recursively for `*.csv` files.
    pub fn load(source: impl AsRef<Path>) -> Result<Self, LoadError> {
        let source = source.as_ref();
        let files = if source.is_dir() {
            let mut files = Vec::new();
            collect_csv_files(source, &mut files)?;
            files.sort();
            files
        } else {
            vec![source.to_path_buf()]
        };

        if files.is_empty() {
            return Err(LoadError::Empty {
                origin: source.display().to_string(),
            });
        }

        let mut store = Self::default();
        for path in files {
            let file = File::open(&path).map_err(io_error(&path))?;
            let origin = path.display().to_string();
            let added = store.read_csv(file, &origin, PathDefaults::from_path(&path))?;
            log::info!("Loaded {} questions from {}", added, origin);
        }

        Ok(store)
    }

    /// Parses a single CSV document. Subject and topic must be present as columns.
    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, LoadError> {
        let mut store = Self::default();
        store.read_csv(reader, "<input>", PathDefaults::default())?;
        Ok(store)
    }

    fn read_csv<R: io::Read>(
        &mut self,
        input: R,
        origin: &str,
        defaults: PathDefaults,
    ) -> Result<usize, LoadError> {
        let csv_error = |source| LoadError::Csv {
            origin: origin.to_owned(),
            source,
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .comment(Some(b'#'))
            .from_reader(input);

        let mut layout = None;
        let mut added = 0;

        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            let line = record.position().map_or(0, |p| p.line());

            if layout.is_none() {
                let detected = Layout::detect(&record, &defaults, origin)?;
                let is_header = matches!(detected, Layout::Headered(_));
                layout = Some(detected);
                if is_header {
                    continue;
                }
            }
            let Some(current) = &layout else {
                continue;
            };

            let row = current.row(&record, &defaults, origin, line)?;
            self.insert(row, origin, line)?;
            added += 1;
        }

        if added == 0 {
            return Err(LoadError::Empty {
                origin: origin.to_owned(),
            });
        }

        Ok(added)
    }

    fn insert(&mut self, row: Row, origin: &str, line: u64) -> Result<(), LoadError> {
        if row.choices.len() < MIN_CHOICES || row.choices.len() > MAX_CHOICES {
            return Err(LoadError::ChoiceCount {
                origin: origin.to_owned(),
                line,
                found: row.choices.len(),
            });
        }

        let correct_index = parse_correct(&row.correct).ok_or_else(|| LoadError::InvalidCorrect {
            origin: origin.to_owned(),
            line,
            value: row.correct.clone(),
        })?;
        if correct_index >= row.choices.len() {
            return Err(LoadError::CorrectOutOfRange {
                origin: origin.to_owned(),
                line,
                index: correct_index,
                choices: row.choices.len(),
            });
        }

        let question = Question::new(
            row.subject,
            row.topic,
            row.prompt,
            row.choices,
            correct_index,
        );
        if self.by_id.contains_key(&question.id()) {
            return Err(LoadError::Duplicate {
                origin: origin.to_owned(),
                line,
                subject: question.subject().to_owned(),
                topic: question.topic().to_owned(),
            });
        }

        let index = self.questions.len();
        self.by_id.insert(question.id(), index);
        self.topics
            .entry(question.subject().to_owned())
            .or_default()
            .entry(question.topic().to_owned())
            .or_default()
            .push(index);
        self.questions.push(question);

        Ok(())
    }

    /// Questions of a topic in file order. Unknown subjects or topics yield nothing.
    pub fn questions_for(&self, subject: &str, topic: &str) -> Vec<&Question> {
        self.topics
            .get(subject)
            .and_then(|topics| topics.get(topic))
            .map(|indices| indices.iter().map(|&i| &self.questions[i]).collect())
            .unwrap_or_default()
    }

    pub fn subjects(&self) -> Vec<&str> {
        self.topics.keys().map(String::as_str).collect()
    }

    pub fn topics(&self, subject: &str) -> Vec<&str> {
        self.topics
            .get(subject)
            .map(|topics| topics.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn subject_at(&self, index: usize) -> Option<&str> {
        self.topics.keys().nth(index).map(String::as_str)
    }

    pub fn topic_at(&self, subject_index: usize, topic_index: usize) -> Option<(&str, &str)> {
        let (subject, topics) = self.topics.iter().nth(subject_index)?;
        let topic = topics.keys().nth(topic_index)?;
        Some((subject, topic))
    }

    /// Inverse of [`QuestionStore::topic_at`].
    pub fn position_of(&self, subject: &str, topic: &str) -> Option<(usize, usize)> {
        let subject_index = self.topics.keys().position(|s| s == subject)?;
        let topic_index = self.topics.get(subject)?.keys().position(|t| t == topic)?;
        Some((subject_index, topic_index))
    }

    pub fn get(&self, id: &Uuid) -> Option<&Question> {
        self.by_id.get(id).map(|&i| &self.questions[i])
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

impl Layout {
    /// The first row is a header only when it names a prompt, a correct-answer and at
    /// least one `choice_N` column. A positional row may well contain "Question" as a choice.
    fn detect(
        first: &StringRecord,
        defaults: &PathDefaults,
        origin: &str,
    ) -> Result<Self, LoadError> {
        let names: Vec<String> = first.iter().map(str::to_ascii_lowercase).collect();
        let find = |aliases: &[&str]| names.iter().position(|n| aliases.contains(&n.as_str()));

        let mut numbered: Vec<(usize, usize)> = names
            .iter()
            .enumerate()
            .filter_map(|(col, name)| {
                let n = name.strip_prefix("choice_")?.parse::<usize>().ok()?;
                Some((n, col))
            })
            .collect();
        numbered.sort_unstable();

        let (Some(prompt), Some(correct), false) = (
            find(&["prompt", "question"]),
            find(&["correct_choice_index", "correct"]),
            numbered.is_empty(),
        ) else {
            return Ok(Self::Positional);
        };

        let missing = |column| LoadError::MissingColumn {
            origin: origin.to_owned(),
            column,
        };

        let subject = find(&["subject"]);
        if subject.is_none() && defaults.subject.is_none() {
            return Err(missing("subject"));
        }
        let topic = find(&["topic"]);
        if topic.is_none() && defaults.topic.is_none() {
            return Err(missing("topic"));
        }

        Ok(Self::Headered(Columns {
            subject,
            topic,
            prompt,
            choices: numbered.into_iter().map(|(_, col)| col).collect(),
            correct,
        }))
    }

    fn row(
        &self,
        record: &StringRecord,
        defaults: &PathDefaults,
        origin: &str,
        line: u64,
    ) -> Result<Row, LoadError> {
        let missing = |field: &str| LoadError::MissingField {
            origin: origin.to_owned(),
            line,
            field: field.to_owned(),
        };
        let cell = |col: usize| record.get(col).unwrap_or_default().to_owned();
        let named_or_default = |col: Option<usize>, default: &Option<String>, field: &str| {
            col.map(cell)
                .filter(|value| !value.is_empty())
                .or_else(|| default.clone())
                .ok_or_else(|| missing(field))
        };

        let (subject, topic, prompt, raw_choices, correct) = match self {
            Layout::Headered(columns) => (
                named_or_default(columns.subject, &defaults.subject, "subject")?,
                named_or_default(columns.topic, &defaults.topic, "topic")?,
                cell(columns.prompt),
                columns.choices.iter().map(|&col| cell(col)).collect::<Vec<_>>(),
                cell(columns.correct),
            ),
            Layout::Positional => {
                let mut cells: Vec<String> = record.iter().map(str::to_owned).collect();
                while cells.last().is_some_and(|c| c.is_empty()) {
                    cells.pop();
                }
                if cells.len() < 2 {
                    return Err(missing("correct"));
                }
                let correct = cells.pop().unwrap_or_default();
                let prompt = cells.remove(0);
                (
                    defaults.subject.clone().ok_or_else(|| missing("subject"))?,
                    defaults.topic.clone().ok_or_else(|| missing("topic"))?,
                    prompt,
                    cells,
                    correct,
                )
            }
        };

        if prompt.is_empty() {
            return Err(missing("prompt"));
        }
        if correct.is_empty() {
            return Err(missing("correct_choice_index"));
        }

        Ok(Row {
            subject,
            topic,
            prompt,
            choices: trim_choices(raw_choices).map_err(|n| missing(&format!("choice_{n}")))?,
            correct,
        })
    }
}

/// Drops trailing empty choices. An empty choice followed by a filled one is an error
/// carrying the 1-based number of the empty choice.
fn trim_choices(mut choices: Vec<String>) -> Result<Vec<String>, usize> {
    while choices.last().is_some_and(|c| c.is_empty()) {
        choices.pop();
    }
    match choices.iter().position(String::is_empty) {
        Some(gap) => Err(gap + 1),
        None => Ok(choices),
    }
}

/// A 0-based index or a single letter, where `A` is the first choice.
fn parse_correct(value: &str) -> Option<usize> {
    if let Ok(index) = value.parse::<usize>() {
        return Some(index);
    }
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) if letter.is_ascii_alphabetic() => {
            Some((letter.to_ascii_uppercase() as u8 - b'A') as usize)
        }
        _ => None,
    }
}

fn collect_csv_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), LoadError> {
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(io_error(&path))?;
        let hidden = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        // Symlinks are skipped, so a link cycle cannot make the walk endless.
        if hidden || file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            collect_csv_files(&path, files)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> LoadError + '_ {
    move |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    }
}
