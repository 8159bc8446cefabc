use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub live_session_id: String,
    pub user_id: String,
    pub content: String,
    pub date: String,
    pub full_name: String,
    pub image: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LikeType {
    Like,
    Love,
    Haha,
    Wow,
    Sad,
    Angry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub id: String,
    pub live_session_id: String,
    pub user_id: String,
    pub like_type: LikeType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommentsCount {
    pub live_session_id: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LikesCount {
    pub live_session_id: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewsCount {
    pub live_session_id: String,
    pub count: u64,
}

/// Body of the handshake frame identifying who joins which session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionBody {
    pub user_id: String,
    pub live_session_id: String,
}

/// Serializes a record into a JSON payload body.
pub fn to_body<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(value).map(Bytes::from)
}

/// Deserializes a JSON payload body into `T`.
pub fn from_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Deserializes a body that may legitimately carry no value.
///
/// An empty body and the JSON literal `null` both decode to `None`.
pub fn from_optional_body<T: DeserializeOwned>(
    body: &[u8],
) -> Result<Option<T>, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{from_body, from_optional_body, to_body, Comment, Like, LikeType, ViewsCount};

    #[test]
    fn comment_uses_camel_case_fields() {
        let comment = Comment {
            id: "c1".to_string(),
            live_session_id: "S1".to_string(),
            user_id: "u1".to_string(),
            content: "hi".to_string(),
            date: "2024-01-01T00:00:00.000+00:00".to_string(),
            full_name: "Ann".to_string(),
            image: "img.png".to_string(),
        };
        let value: serde_json::Value =
            serde_json::from_slice(&to_body(&comment).expect("encode")).expect("json");
        assert_eq!(value["liveSessionId"], "S1");
        assert_eq!(value["fullName"], "Ann");
        assert_eq!(value["userId"], "u1");
    }

    #[test]
    fn like_type_is_upper_case_on_the_wire() {
        let like = Like {
            id: "l1".to_string(),
            live_session_id: "S1".to_string(),
            user_id: "u1".to_string(),
            like_type: LikeType::Love,
        };
        let value = serde_json::to_value(&like).expect("encode");
        assert_eq!(value["likeType"], "LOVE");
    }

    #[test]
    fn unknown_like_type_is_rejected() {
        let body = json!({
            "id": "l1",
            "liveSessionId": "S1",
            "userId": "u1",
            "likeType": "MEH"
        })
        .to_string();
        assert!(from_body::<Like>(body.as_bytes()).is_err());
    }

    #[test]
    fn optional_body_accepts_empty_and_null() {
        assert_eq!(from_optional_body::<Like>(b"").expect("empty"), None);
        assert_eq!(from_optional_body::<Like>(b" null ").expect("null"), None);
    }

    #[test]
    fn optional_body_decodes_present_value() {
        let body = br#"{"liveSessionId":"S1","count":7}"#;
        let views = from_optional_body::<ViewsCount>(body).expect("decode");
        assert_eq!(views.map(|v| v.count), Some(7));
    }
}
