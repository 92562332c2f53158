//! User preference and topic suggestion handlers

use crate::api::handlers::{AppError, SharedState};
use crate::auth::AuthUser;
use crate::store::{DigestFrequency, TopicSuggestion, UserPreferences};
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;

const MAX_TOPICS: usize = 50;
const MAX_TOPIC_LEN: usize = 64;
const DEFAULT_SUGGESTIONS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct UpdatePreferencesRequest {
    pub topics: Vec<String>,
    #[serde(default)]
    pub digest_frequency: DigestFrequency,
    #[serde(default)]
    pub email_digest: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct SuggestionQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Trim, lowercase and dedup topics, keeping first-seen order
fn normalize_topics(raw: Vec<String>) -> Result<Vec<String>, AppError> {
    let mut topics: Vec<String> = Vec::new();
    for topic in raw {
        let topic = topic.trim().to_lowercase();
        if topic.is_empty() || topics.contains(&topic) {
            continue;
        }
        if topic.chars().count() > MAX_TOPIC_LEN {
            return Err(AppError::BadRequest(format!(
                "Topic longer than {} characters",
                MAX_TOPIC_LEN
            )));
        }
        topics.push(topic);
    }
    if topics.len() > MAX_TOPICS {
        return Err(AppError::BadRequest(format!(
            "At most {} topics can be followed",
            MAX_TOPICS
        )));
    }
    Ok(topics)
}

/// GET /users/me/preferences
pub async fn get_preferences(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<Json<UserPreferences>, AppError> {
    let prefs = state
        .store
        .get_preferences(user.user_id)
        .await?
        .unwrap_or_else(|| UserPreferences::empty(user.user_id));
    Ok(Json(prefs))
}

/// PUT /users/me/preferences
pub async fn update_preferences(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(req): Json<UpdatePreferencesRequest>,
) -> Result<Json<UserPreferences>, AppError> {
    let prefs = UserPreferences {
        user_id: user.user_id,
        topics: normalize_topics(req.topics)?,
        digest_frequency: req.digest_frequency,
        email_digest: req.email_digest,
        updated_at: Utc::now(),
    };
    state.store.upsert_preferences(&prefs).await?;
    tracing::debug!(user_id = %user.user_id, topics = prefs.topics.len(), "Preferences saved");
    Ok(Json(prefs))
}

/// GET /topics/suggestions
///
/// Most common article topics the user does not follow yet.
pub async fn topic_suggestions(
    State(state): State<SharedState>,
    user: AuthUser,
    Query(query): Query<SuggestionQuery>,
) -> Result<Json<Vec<TopicSuggestion>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_SUGGESTIONS).clamp(1, 50);
    let followed = state
        .store
        .get_preferences(user.user_id)
        .await?
        .map(|p| p.topics)
        .unwrap_or_default();

    let suggestions = state
        .store
        .topic_counts(limit + followed.len())
        .await?
        .into_iter()
        .filter(|s| !followed.contains(&s.topic.to_lowercase()))
        .take(limit)
        .collect();
    Ok(Json(suggestions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::MockDocumentStore;
    use crate::store::{DocumentStore, UserNode};
    use crate::test_helpers::{
        mock_server_state_with, test_article, test_auth_config, test_bearer_token, test_router,
        test_user, ScriptedModel,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn request(
        method: &str,
        uri: &str,
        user: &UserNode,
        body: Option<serde_json::Value>,
    ) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", test_bearer_token(user)));
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn app(store: MockDocumentStore) -> Router {
        let model = Arc::new(ScriptedModel::replying(&["ok"]));
        let (state, _) = mock_server_state_with(store, model, Some(test_auth_config()));
        test_router(state)
    }

    #[test]
    fn test_normalize_topics() {
        let topics = normalize_topics(vec![
            " Climate ".into(),
            "climate".into(),
            "".into(),
            "AI".into(),
        ])
        .unwrap();
        assert_eq!(topics, vec!["climate", "ai"]);

        assert!(normalize_topics(vec!["x".repeat(MAX_TOPIC_LEN + 1)]).is_err());
        let many: Vec<String> = (0..=MAX_TOPICS).map(|i| format!("t{}", i)).collect();
        assert!(normalize_topics(many).is_err());
    }

    #[tokio::test]
    async fn test_preferences_default_then_update() {
        let user = test_user();
        let app = app(MockDocumentStore::new());

        let resp = app
            .clone()
            .oneshot(request("GET", "/users/me/preferences", &user, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["digest_frequency"], "daily");
        assert_eq!(body["topics"], serde_json::json!([]));

        let resp = app
            .clone()
            .oneshot(request(
                "PUT",
                "/users/me/preferences",
                &user,
                Some(serde_json::json!({
                    "topics": ["Science", "science", "Sport"],
                    "digest_frequency": "weekly",
                    "email_digest": true
                })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(request("GET", "/users/me/preferences", &user, None))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["topics"], serde_json::json!(["science", "sport"]));
        assert_eq!(body["digest_frequency"], "weekly");
        assert_eq!(body["email_digest"], true);
    }

    #[tokio::test]
    async fn test_suggestions_exclude_followed_topics() {
        let user = test_user();
        let mut a = test_article("Rover lands");
        a.topics = vec!["space".into(), "science".into()];
        let mut b = test_article("Telescope images");
        b.topics = vec!["space".into()];
        let mut c = test_article("Cup final");
        c.topics = vec!["sport".into()];
        let store = MockDocumentStore::new()
            .with_article(a)
            .await
            .with_article(b)
            .await
            .with_article(c)
            .await;
        store
            .upsert_preferences(&UserPreferences {
                topics: vec!["sport".into()],
                ..UserPreferences::empty(user.id)
            })
            .await
            .unwrap();

        let resp = app(store)
            .oneshot(request("GET", "/topics/suggestions?limit=5", &user, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let suggestions: Vec<TopicSuggestion> =
            serde_json::from_value(json_body(resp).await).unwrap();
        assert_eq!(suggestions[0].topic, "space");
        assert_eq!(suggestions[0].article_count, 2);
        assert!(suggestions.iter().all(|s| s.topic != "sport"));
    }
}
