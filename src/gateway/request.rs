//! Request envelopes.
//!
//! The backend receives one JSON object per call: `{"action": NAME, ...}`.
//! Known actions are modelled as the typed [`Action`] enum; anything else
//! can be sent through the untyped [`ActionRequest`] or a raw
//! `serde_json::Value`. JSON is produced only when the executor serializes
//! the envelope for the backend.

use crate::core::EntityId;
use chrono::NaiveDateTime;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Key holding the action name in every envelope.
pub const ACTION_KEY: &str = "action";

/// Anything the gateway can send to the backend procedure.
pub trait Envelope: Serialize + Send + Sync {
    /// Key used for performance bookkeeping and error reports.
    ///
    /// Falls back to the short type name when no action is known.
    fn signature(&self) -> Cow<'_, str> {
        Cow::Borrowed(short_type_name::<Self>())
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Accepts ids as JSON numbers or numeric strings.
fn flexible_id<'de, D>(deserializer: D) -> Result<EntityId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(EntityId),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(id),
        RawId::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid id '{}'", text))),
    }
}

/// Supported backend actions with their typed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Action {
    #[serde(rename = "GET_POST_BY_ID", rename_all = "camelCase")]
    GetPostById {
        #[serde(deserialize_with = "flexible_id")]
        post_id: EntityId,
    },

    #[serde(rename = "GET_USER_POSTS", rename_all = "camelCase")]
    GetUserPosts {
        #[serde(deserialize_with = "flexible_id")]
        user_id: EntityId,
    },

    #[serde(rename = "GET_USER_LIKED_POSTS", rename_all = "camelCase")]
    GetUserLikedPosts {
        #[serde(deserialize_with = "flexible_id")]
        user_id: EntityId,
    },

    #[serde(rename = "GET_ALL_POSTS_PAGED")]
    GetAllPostsPaged { page: u32, size: u32 },

    #[serde(rename = "GET_ALL_SCHEDULED_POSTS_PAGED")]
    GetAllScheduledPostsPaged { page: u32, size: u32 },

    #[serde(rename = "LIKE_POST", rename_all = "camelCase")]
    LikePost {
        #[serde(deserialize_with = "flexible_id")]
        post_id: EntityId,
        #[serde(deserialize_with = "flexible_id")]
        user_id: EntityId,
    },

    #[serde(rename = "CHECK_USER_LIKED_POST", rename_all = "camelCase")]
    CheckUserLikedPost {
        #[serde(deserialize_with = "flexible_id")]
        post_id: EntityId,
        #[serde(deserialize_with = "flexible_id")]
        user_id: EntityId,
    },

    #[serde(rename = "DELETE_POST", rename_all = "camelCase")]
    DeletePost {
        #[serde(deserialize_with = "flexible_id")]
        post_id: EntityId,
    },

    #[serde(rename = "GET_COMMENTS_BY_POST_ID", rename_all = "camelCase")]
    GetCommentsByPostId {
        #[serde(deserialize_with = "flexible_id")]
        post_id: EntityId,
        page: u32,
        size: u32,
    },

    #[serde(rename = "GET_POST_COMMENTS_COUNT", rename_all = "camelCase")]
    GetPostCommentsCount {
        #[serde(deserialize_with = "flexible_id")]
        post_id: EntityId,
    },

    #[serde(rename = "CREATE_COMMENT", rename_all = "camelCase")]
    CreateComment {
        #[serde(deserialize_with = "flexible_id")]
        user_id: EntityId,
        #[serde(deserialize_with = "flexible_id")]
        post_id: EntityId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment_timestamp: Option<NaiveDateTime>,
    },

    #[serde(rename = "DELETE_COMMENT", rename_all = "camelCase")]
    DeleteComment {
        #[serde(deserialize_with = "flexible_id")]
        comment_id: EntityId,
        #[serde(deserialize_with = "flexible_id")]
        post_id: EntityId,
    },

    #[serde(rename = "create_scheduled", rename_all = "camelCase")]
    CreateScheduled {
        #[serde(deserialize_with = "flexible_id")]
        author_id: EntityId,
        content: String,
        author_name: String,
        scheduled_for: NaiveDateTime,
    },

    /// Publish every scheduled item whose time has come.
    #[serde(rename = "publish_scheduled")]
    PublishScheduled,
}

impl Action {
    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetPostById { .. } => "GET_POST_BY_ID",
            Self::GetUserPosts { .. } => "GET_USER_POSTS",
            Self::GetUserLikedPosts { .. } => "GET_USER_LIKED_POSTS",
            Self::GetAllPostsPaged { .. } => "GET_ALL_POSTS_PAGED",
            Self::GetAllScheduledPostsPaged { .. } => "GET_ALL_SCHEDULED_POSTS_PAGED",
            Self::LikePost { .. } => "LIKE_POST",
            Self::CheckUserLikedPost { .. } => "CHECK_USER_LIKED_POST",
            Self::DeletePost { .. } => "DELETE_POST",
            Self::GetCommentsByPostId { .. } => "GET_COMMENTS_BY_POST_ID",
            Self::GetPostCommentsCount { .. } => "GET_POST_COMMENTS_COUNT",
            Self::CreateComment { .. } => "CREATE_COMMENT",
            Self::DeleteComment { .. } => "DELETE_COMMENT",
            Self::CreateScheduled { .. } => "create_scheduled",
            Self::PublishScheduled => "publish_scheduled",
        }
    }

    /// True for actions that do not change backend state.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::GetPostById { .. }
                | Self::GetUserPosts { .. }
                | Self::GetUserLikedPosts { .. }
                | Self::GetAllPostsPaged { .. }
                | Self::GetAllScheduledPostsPaged { .. }
                | Self::CheckUserLikedPost { .. }
                | Self::GetCommentsByPostId { .. }
                | Self::GetPostCommentsCount { .. }
        )
    }
}

impl Envelope for Action {
    fn signature(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.name())
    }
}

/// Untyped envelope for actions [`Action`] does not model.
///
/// Parameters are kept in a sorted map so the serialized JSON is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    action: String,
    #[serde(flatten)]
    params: BTreeMap<String, Value>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter. The reserved `action` key is ignored.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key != ACTION_KEY {
            self.params.insert(key, value.into());
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }
}

impl From<Action> for ActionRequest {
    fn from(action: Action) -> Self {
        let mut request = Self::new(action.name());
        if let Ok(Value::Object(fields)) = serde_json::to_value(&action) {
            for (key, value) in fields {
                request.insert(key, value);
            }
        }
        request
    }
}

impl Envelope for ActionRequest {
    fn signature(&self) -> Cow<'_, str> {
        if self.action.is_empty() {
            Cow::Borrowed(short_type_name::<Self>())
        } else {
            Cow::Borrowed(&self.action)
        }
    }
}

fn action_of(map: &Map<String, Value>) -> Option<&str> {
    map.get(ACTION_KEY)
        .and_then(Value::as_str)
        .filter(|action| !action.is_empty())
}

impl Envelope for Value {
    fn signature(&self) -> Cow<'_, str> {
        match self.as_object().and_then(action_of) {
            Some(action) => Cow::Borrowed(action),
            None => Cow::Borrowed(short_type_name::<Self>()),
        }
    }
}

impl Envelope for Map<String, Value> {
    fn signature(&self) -> Cow<'_, str> {
        match action_of(self) {
            Some(action) => Cow::Borrowed(action),
            None => Cow::Borrowed(short_type_name::<Self>()),
        }
    }
}
