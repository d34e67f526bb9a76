use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{AnswerEntity, PlayerEntity, QuestionKey, Record, SessionEntity, SessionStatus};

pub const SESSION_COLLECTION: &str = "game_sessions";
pub const PLAYER_COLLECTION: &str = "quiz_players";
pub const ANSWER_COLLECTION: &str = "quiz_answers";

/// Documents read back from a change stream or a query.
pub trait IntoRecord {
    fn into_record(self) -> MongoResult<Record>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub game_code: String,
    pub status: SessionStatus,
    pub current_round: i64,
    pub current_question_index: i64,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub game_session_id: String,
    pub name: String,
    pub score: i64,
    pub is_host: bool,
    #[serde(default)]
    pub selfie_url: Option<String>,
    pub created_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub game_session_id: String,
    pub player_id: String,
    pub question_key: String,
    pub answer: String,
    pub time_remaining: i64,
    pub created_at: DateTime,
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

fn parse_id(collection: &'static str, raw: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(raw).map_err(|err| MongoDaoError::Malformed {
        collection,
        id: raw.to_owned(),
        reason: err.to_string(),
    })
}

fn narrow<T: TryFrom<i64>>(collection: &'static str, id: &str, field: &str, value: i64) -> MongoResult<T> {
    T::try_from(value).map_err(|_| MongoDaoError::Malformed {
        collection,
        id: id.to_owned(),
        reason: format!("`{field}` out of range: {value}"),
    })
}

impl From<&SessionEntity> for MongoSessionDocument {
    fn from(value: &SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_code: value.game_code.clone(),
            status: value.status,
            current_round: i64::from(value.current_round),
            current_question_index: i64::from(value.current_question_index),
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> MongoResult<Self> {
        let c = SESSION_COLLECTION;
        Ok(Self {
            id: parse_id(c, &value.id)?,
            current_round: narrow(c, &value.id, "current_round", value.current_round)?,
            current_question_index: narrow(
                c,
                &value.id,
                "current_question_index",
                value.current_question_index,
            )?,
            game_code: value.game_code,
            status: value.status,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

impl From<&PlayerEntity> for MongoPlayerDocument {
    fn from(value: &PlayerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_session_id: value.game_session_id.to_string(),
            name: value.name.clone(),
            score: i64::from(value.score),
            is_host: value.is_host,
            selfie_url: value.selfie_url.clone(),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoPlayerDocument> for PlayerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPlayerDocument) -> MongoResult<Self> {
        let c = PLAYER_COLLECTION;
        Ok(Self {
            id: parse_id(c, &value.id)?,
            game_session_id: parse_id(c, &value.game_session_id)?,
            score: narrow(c, &value.id, "score", value.score)?,
            name: value.name,
            is_host: value.is_host,
            selfie_url: value.selfie_url,
            created_at: value.created_at.to_system_time(),
        })
    }
}

impl From<&AnswerEntity> for MongoAnswerDocument {
    fn from(value: &AnswerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_session_id: value.game_session_id.to_string(),
            player_id: value.player_id.to_string(),
            question_key: value.question_key.as_str().to_owned(),
            answer: value.answer.clone(),
            time_remaining: i64::from(value.time_remaining),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoAnswerDocument> for AnswerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoAnswerDocument) -> MongoResult<Self> {
        let c = ANSWER_COLLECTION;
        Ok(Self {
            id: parse_id(c, &value.id)?,
            game_session_id: parse_id(c, &value.game_session_id)?,
            player_id: parse_id(c, &value.player_id)?,
            time_remaining: narrow(c, &value.id, "time_remaining", value.time_remaining)?,
            question_key: QuestionKey::from(value.question_key),
            answer: value.answer,
            created_at: value.created_at.to_system_time(),
        })
    }
}

impl IntoRecord for MongoSessionDocument {
    fn into_record(self) -> MongoResult<Record> {
        SessionEntity::try_from(self).map(Record::Session)
    }
}

impl IntoRecord for MongoPlayerDocument {
    fn into_record(self) -> MongoResult<Record> {
        PlayerEntity::try_from(self).map(Record::Player)
    }
}

impl IntoRecord for MongoAnswerDocument {
    fn into_record(self) -> MongoResult<Record> {
        AnswerEntity::try_from(self).map(Record::Answer)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn session_document_keeps_cursor_fields() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let entity = SessionEntity {
            id: Uuid::new_v4(),
            game_code: "PARTY1".into(),
            status: SessionStatus::Leaderboard,
            current_round: 2,
            current_question_index: -1,
            created_at: now,
            updated_at: now,
        };

        let document = MongoSessionDocument::from(&entity);
        assert_eq!(document.id, entity.id.to_string());
        let back = SessionEntity::try_from(document).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn negative_score_is_rejected() {
        let document = MongoPlayerDocument {
            id: Uuid::new_v4().to_string(),
            game_session_id: Uuid::new_v4().to_string(),
            name: "Kim".into(),
            score: -3,
            is_host: false,
            selfie_url: None,
            created_at: DateTime::now(),
        };
        assert!(matches!(
            PlayerEntity::try_from(document),
            Err(MongoDaoError::Malformed { .. })
        ));
    }
}
