//! Static, read-only question content addressed by round (1-based) and question index (0-based).

use std::{fs, io, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dao::models::SessionCursor;

/// Error raised while loading or validating a question bank.
#[derive(Debug, Error)]
pub enum BankError {
    /// The bank file could not be read.
    #[error("failed to read question bank `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The bank file is not valid JSON for a bank.
    #[error("failed to parse question bank")]
    Parse(#[from] serde_json::Error),
    /// A bank needs at least one round.
    #[error("question bank has no rounds")]
    Empty,
    /// Every round needs at least one question.
    #[error("round {round} has no questions")]
    EmptyRound { round: u32 },
    /// The correct option must be one of the listed options.
    #[error("question {round}-{index}: correct answer `{correct}` is not one of its options")]
    CorrectNotAnOption {
        round: u32,
        index: usize,
        correct: String,
    },
}

/// Presentation kind of a question, derived from its assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    /// Plain text question.
    Text,
    /// Identify a sound clip; gets the longer countdown.
    Audio,
    /// Identify a picture that is gradually unblurred.
    Picture,
}

/// One multiple choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Prompt text.
    pub prompt: String,
    /// Options in display order.
    pub options: Vec<String>,
    /// The correct option, compared by exact string equality.
    pub correct: String,
    /// Optional audio asset reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Optional image asset reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Question {
    /// Kind of the question; audio wins over picture when both assets are set.
    pub fn kind(&self) -> QuestionKind {
        if self.audio.is_some() {
            QuestionKind::Audio
        } else if self.image.is_some() {
            QuestionKind::Picture
        } else {
            QuestionKind::Text
        }
    }
}

/// Ordered group of questions shown after an intro card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Title shown on the intro card.
    pub title: String,
    /// Subtitle shown on the intro card.
    #[serde(default)]
    pub description: String,
    /// Questions in play order.
    pub questions: Vec<Question>,
}

/// Validated list of rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionBank {
    rounds: Vec<Round>,
}

#[derive(Deserialize)]
struct RawBank {
    rounds: Vec<Round>,
}

impl QuestionBank {
    /// Validate and wrap `rounds`.
    pub fn new(rounds: Vec<Round>) -> Result<Self, BankError> {
        if rounds.is_empty() {
            return Err(BankError::Empty);
        }
        for (round, number) in rounds.iter().zip(1u32..) {
            if round.questions.is_empty() {
                return Err(BankError::EmptyRound { round: number });
            }
            for (index, question) in round.questions.iter().enumerate() {
                if !question.options.contains(&question.correct) {
                    return Err(BankError::CorrectNotAnOption {
                        round: number,
                        index,
                        correct: question.correct.clone(),
                    });
                }
            }
        }
        Ok(Self { rounds })
    }

    /// Parse a bank of the form `{ "rounds": [...] }`.
    pub fn from_json(contents: &str) -> Result<Self, BankError> {
        let raw: RawBank = serde_json::from_str(contents)?;
        Self::new(raw.rounds)
    }

    /// Read and parse a bank file.
    pub fn load(path: &Path) -> Result<Self, BankError> {
        let contents = fs::read_to_string(path).map_err(|source| BankError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Number of rounds.
    pub fn round_count(&self) -> u32 {
        u32::try_from(self.rounds.len()).unwrap_or(u32::MAX)
    }

    /// Round `number` (1-based).
    pub fn round(&self, number: u32) -> Option<&Round> {
        let index = usize::try_from(number.checked_sub(1)?).ok()?;
        self.rounds.get(index)
    }

    /// Question at `index` of round `number`.
    pub fn question(&self, number: u32, index: i32) -> Option<&Question> {
        let index = usize::try_from(index).ok()?;
        self.round(number)?.questions.get(index)
    }

    /// Question the cursor points at, if any.
    pub fn question_at(&self, cursor: &SessionCursor) -> Option<&Question> {
        self.question(cursor.current_round, cursor.current_question_index)
    }

    /// Whether the cursor sits on the last question of its round.
    pub fn is_last_in_round(&self, cursor: &SessionCursor) -> bool {
        let Some(round) = self.round(cursor.current_round) else {
            return false;
        };
        usize::try_from(cursor.current_question_index)
            .is_ok_and(|index| index + 1 >= round.questions.len())
    }

    /// Whether the cursor sits on the last question of the last round.
    pub fn is_final(&self, cursor: &SessionCursor) -> bool {
        cursor.current_round == self.round_count() && self.is_last_in_round(cursor)
    }

    /// Small general-purpose bank used when no bank file is configured.
    pub fn builtin() -> Self {
        fn text(prompt: &str, options: [&str; 4], correct: &str) -> Question {
            Question {
                prompt: prompt.into(),
                options: options.iter().map(|o| (*o).to_owned()).collect(),
                correct: correct.into(),
                audio: None,
                image: None,
            }
        }

        let picture = |prompt: &str, image: &str, options: [&str; 4], correct: &str| Question {
            image: Some(image.into()),
            ..text(prompt, options, correct)
        };
        let audio = |prompt: &str, clip: &str, options: [&str; 4], correct: &str| Question {
            audio: Some(clip.into()),
            ..text(prompt, options, correct)
        };

        Self {
            rounds: vec![
                Round {
                    title: "Round 1: General knowledge".into(),
                    description: "Warm up with a few easy ones".into(),
                    questions: vec![
                        text("How many continents are there?", ["5", "6", "7", "8"], "7"),
                        text(
                            "Which planet is known as the red planet?",
                            ["Venus", "Mars", "Jupiter", "Mercury"],
                            "Mars",
                        ),
                        text(
                            "What is the largest ocean on Earth?",
                            ["Atlantic", "Indian", "Arctic", "Pacific"],
                            "Pacific",
                        ),
                    ],
                },
                Round {
                    title: "Round 2: Picture round".into(),
                    description: "The picture sharpens as the clock runs down".into(),
                    questions: vec![
                        picture(
                            "Which landmark is this?",
                            "images/landmark.jpg",
                            ["Big Ben", "Eiffel Tower", "Colosseum", "Leaning Tower of Pisa"],
                            "Eiffel Tower",
                        ),
                        picture(
                            "Which animal is this?",
                            "images/animal.jpg",
                            ["Otter", "Beaver", "Badger", "Meerkat"],
                            "Otter",
                        ),
                    ],
                },
                Round {
                    title: "Round 3: Music round".into(),
                    description: "Name that tune".into(),
                    questions: vec![
                        audio(
                            "Which instrument is playing?",
                            "audio/instrument.mp3",
                            ["Violin", "Cello", "Trumpet", "Harp"],
                            "Cello",
                        ),
                        audio(
                            "Which decade is this track from?",
                            "audio/decade.mp3",
                            ["1960s", "1970s", "1980s", "1990s"],
                            "1980s",
                        ),
                    ],
                },
            ],
        }
    }
}

impl Default for QuestionBank {
    fn default() -> Self {
        Self::builtin()
    }
}
