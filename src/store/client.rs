//! Neo4j client for the document store

use crate::chat::types::{Citation, MessageRole};
use crate::store::models::*;
use crate::store::traits::{title_from_message, DocumentStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use neo4rs::{query, Graph};
use std::sync::Arc;
use uuid::Uuid;

/// Client for Neo4j operations
pub struct Neo4jStore {
    graph: Arc<Graph>,
}

impl Neo4jStore {
    /// Create a new Neo4j client and ensure constraints exist
    pub async fn new(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context("Failed to connect to Neo4j")?;

        let client = Self {
            graph: Arc::new(graph),
        };
        client.init_schema().await?;

        Ok(client)
    }

    async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE CONSTRAINT user_id IF NOT EXISTS FOR (u:User) REQUIRE u.id IS UNIQUE",
            "CREATE CONSTRAINT user_email IF NOT EXISTS FOR (u:User) REQUIRE u.email IS UNIQUE",
            "CREATE CONSTRAINT feed_id IF NOT EXISTS FOR (f:Feed) REQUIRE f.id IS UNIQUE",
            "CREATE CONSTRAINT article_id IF NOT EXISTS FOR (a:Article) REQUIRE a.id IS UNIQUE",
            "CREATE CONSTRAINT digest_id IF NOT EXISTS FOR (d:Digest) REQUIRE d.id IS UNIQUE",
            "CREATE CONSTRAINT chat_session_id IF NOT EXISTS FOR (s:ChatSession) REQUIRE s.id IS UNIQUE",
            "CREATE CONSTRAINT chat_message_id IF NOT EXISTS FOR (m:ChatMessage) REQUIRE m.id IS UNIQUE",
            "CREATE INDEX refresh_token_hash IF NOT EXISTS FOR (t:RefreshToken) ON (t.token_hash)",
            "CREATE INDEX article_published IF NOT EXISTS FOR (a:Article) ON (a.published_at)",
        ];

        for statement in statements {
            if let Err(e) = self.graph.run(query(statement)).await {
                tracing::warn!(statement, error = %e, "Schema statement failed");
            }
        }
        tracing::debug!("Neo4j schema initialized");
        Ok(())
    }

    // ========================================================================
    // Node parsing
    // ========================================================================

    fn opt_string(node: &neo4rs::Node, key: &str) -> Option<String> {
        node.get::<String>(key).ok().filter(|s| !s.is_empty())
    }

    fn parse_time(node: &neo4rs::Node, key: &str) -> DateTime<Utc> {
        node.get::<String>(key)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(Utc::now)
    }

    fn parse_uuid_list(values: Vec<String>) -> Vec<Uuid> {
        values.iter().filter_map(|s| s.parse().ok()).collect()
    }

    fn node_to_user(node: &neo4rs::Node) -> Result<UserNode> {
        Ok(UserNode {
            id: node.get::<String>("id")?.parse()?,
            email: node.get("email")?,
            name: node.get("name")?,
            password_hash: Self::opt_string(node, "password_hash"),
            created_at: Self::parse_time(node, "created_at"),
            last_login_at: Self::parse_time(node, "last_login_at"),
        })
    }

    fn node_to_refresh_token(node: &neo4rs::Node) -> Result<RefreshTokenNode> {
        Ok(RefreshTokenNode {
            token_hash: node.get("token_hash")?,
            user_id: node.get::<String>("user_id")?.parse()?,
            expires_at: Self::parse_time(node, "expires_at"),
            created_at: Self::parse_time(node, "created_at"),
            revoked: node.get("revoked").unwrap_or(false),
        })
    }

    fn node_to_preferences(node: &neo4rs::Node) -> Result<UserPreferences> {
        Ok(UserPreferences {
            user_id: node.get::<String>("user_id")?.parse()?,
            topics: node.get("topics").unwrap_or_default(),
            digest_frequency: node
                .get::<String>("digest_frequency")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            email_digest: node.get("email_digest").unwrap_or(false),
            updated_at: Self::parse_time(node, "updated_at"),
        })
    }

    fn node_to_feed(node: &neo4rs::Node) -> Result<FeedNode> {
        Ok(FeedNode {
            id: node.get::<String>("id")?.parse()?,
            user_id: node.get::<String>("user_id")?.parse()?,
            url: node.get("url")?,
            title: Self::opt_string(node, "title"),
            created_at: Self::parse_time(node, "created_at"),
            updated_at: Self::parse_time(node, "updated_at"),
        })
    }

    fn node_to_article(node: &neo4rs::Node) -> Result<ArticleNode> {
        Ok(ArticleNode {
            id: node.get::<String>("id")?.parse()?,
            feed_id: Self::opt_string(node, "feed_id").and_then(|s| s.parse().ok()),
            title: node.get("title")?,
            url: node.get("url")?,
            source: node.get("source").unwrap_or_default(),
            summary: Self::opt_string(node, "summary"),
            content: Self::opt_string(node, "content"),
            topics: node.get("topics").unwrap_or_default(),
            published_at: Self::parse_time(node, "published_at"),
        })
    }

    fn node_to_digest(node: &neo4rs::Node) -> Result<DigestNode> {
        let date: String = node.get("date")?;
        Ok(DigestNode {
            id: node.get::<String>("id")?.parse()?,
            user_id: node.get::<String>("user_id")?.parse()?,
            date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .with_context(|| format!("Invalid digest date: {}", date))?,
            title: node.get("title")?,
            summary: Self::opt_string(node, "summary"),
            article_ids: Self::parse_uuid_list(node.get("article_ids").unwrap_or_default()),
            created_at: Self::parse_time(node, "created_at"),
        })
    }

    fn node_to_chat_session(node: &neo4rs::Node) -> Result<ChatSessionNode> {
        Ok(ChatSessionNode {
            id: node.get::<String>("id")?.parse()?,
            user_id: node.get::<String>("user_id")?.parse()?,
            digest_id: Self::opt_string(node, "digest_id").and_then(|s| s.parse().ok()),
            title: Self::opt_string(node, "title"),
            created_at: Self::parse_time(node, "created_at"),
            updated_at: Self::parse_time(node, "updated_at"),
            message_count: node.get("message_count").unwrap_or(0),
        })
    }

    fn node_to_chat_message(node: &neo4rs::Node) -> Result<ChatMessageNode> {
        let role = match node.get::<String>("role")?.as_str() {
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        };
        // citations are stored as a JSON string
        let citations: Vec<Citation> = Self::opt_string(node, "citations")
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Ok(ChatMessageNode {
            id: node.get::<String>("id")?.parse()?,
            session_id: node.get::<String>("session_id")?.parse()?,
            role,
            content: node.get("content").unwrap_or_default(),
            citations,
            follow_up_questions: node.get("follow_up_questions").unwrap_or_default(),
            created_at: Self::parse_time(node, "created_at"),
        })
    }

    async fn count(&self, q: neo4rs::Query) -> Result<usize> {
        let mut result = self.graph.execute(q).await?;
        match result.next().await? {
            Some(row) => {
                let total: i64 = row.get("total")?;
                Ok(total.max(0) as usize)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl DocumentStore for Neo4jStore {
    async fn health_check(&self) -> Result<bool> {
        let mut result = self.graph.execute(query("RETURN 1 AS ok")).await?;
        Ok(result.next().await?.is_some())
    }

    // ========================================================================
    // Users
    // ========================================================================

    async fn create_user(&self, user: &UserNode) -> Result<()> {
        let q = query(
            r#"
            CREATE (u:User {
                id: $id,
                email: $email,
                name: $name,
                password_hash: $password_hash,
                created_at: $created_at,
                last_login_at: $last_login_at
            })
            "#,
        )
        .param("id", user.id.to_string())
        .param("email", user.email.to_lowercase())
        .param("name", user.name.clone())
        .param("password_hash", user.password_hash.clone().unwrap_or_default())
        .param("created_at", user.created_at.to_rfc3339())
        .param("last_login_at", user.last_login_at.to_rfc3339());

        self.graph
            .run(q)
            .await
            .with_context(|| format!("Failed to create user {}", user.email))?;
        Ok(())
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserNode>> {
        let q = query("MATCH (u:User {id: $id}) RETURN u").param("id", id.to_string());
        let mut result = self.graph.execute(q).await?;
        match result.next().await? {
            Some(row) => {
                let node: neo4rs::Node = row.get("u")?;
                Ok(Some(Self::node_to_user(&node)?))
            }
            None => Ok(None),
        }
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserNode>> {
        let q = query("MATCH (u:User {email: $email}) RETURN u")
            .param("email", email.trim().to_lowercase());
        let mut result = self.graph.execute(q).await?;
        match result.next().await? {
            Some(row) => {
                let node: neo4rs::Node = row.get("u")?;
                Ok(Some(Self::node_to_user(&node)?))
            }
            None => Ok(None),
        }
    }

    async fn touch_user_login(&self, id: Uuid) -> Result<()> {
        let q = query("MATCH (u:User {id: $id}) SET u.last_login_at = $now")
            .param("id", id.to_string())
            .param("now", Utc::now().to_rfc3339());
        self.graph.run(q).await?;
        Ok(())
    }

    // ========================================================================
    // Refresh tokens
    // ========================================================================

    async fn create_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let q = query(
            "CREATE (rt:RefreshToken {
                token_hash: $token_hash,
                user_id: $user_id,
                expires_at: $expires_at,
                created_at: $created_at,
                revoked: false
            })",
        )
        .param("token_hash", token_hash.to_string())
        .param("user_id", user_id.to_string())
        .param("expires_at", expires_at.to_rfc3339())
        .param("created_at", Utc::now().to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn validate_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenNode>> {
        let q = query("MATCH (rt:RefreshToken {token_hash: $token_hash}) RETURN rt")
            .param("token_hash", token_hash.to_string());

        let mut result = self.graph.execute(q).await?;
        match result.next().await? {
            Some(row) => {
                let node: neo4rs::Node = row.get("rt")?;
                let token = Self::node_to_refresh_token(&node)?;
                Ok(token.is_valid_at(Utc::now()).then_some(token))
            }
            None => Ok(None),
        }
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool> {
        let q = query(
            "MATCH (rt:RefreshToken {token_hash: $token_hash, revoked: false})
             SET rt.revoked = true
             RETURN rt",
        )
        .param("token_hash", token_hash.to_string());

        let mut result = self.graph.execute(q).await?;
        Ok(result.next().await?.is_some())
    }

    async fn revoke_all_user_tokens(&self, user_id: Uuid) -> Result<u64> {
        let q = query(
            "MATCH (rt:RefreshToken {user_id: $user_id, revoked: false})
             SET rt.revoked = true
             RETURN count(rt) AS total",
        )
        .param("user_id", user_id.to_string());

        Ok(self.count(q).await? as u64)
    }

    // ========================================================================
    // Preferences
    // ========================================================================

    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<UserPreferences>> {
        let q = query("MATCH (p:Preferences {user_id: $user_id}) RETURN p")
            .param("user_id", user_id.to_string());
        let mut result = self.graph.execute(q).await?;
        match result.next().await? {
            Some(row) => {
                let node: neo4rs::Node = row.get("p")?;
                Ok(Some(Self::node_to_preferences(&node)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        let q = query(
            r#"
            MERGE (p:Preferences {user_id: $user_id})
            SET p.topics = $topics,
                p.digest_frequency = $digest_frequency,
                p.email_digest = $email_digest,
                p.updated_at = $updated_at
            "#,
        )
        .param("user_id", prefs.user_id.to_string())
        .param("topics", prefs.topics.clone())
        .param("digest_frequency", prefs.digest_frequency.to_string())
        .param("email_digest", prefs.email_digest)
        .param("updated_at", prefs.updated_at.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    async fn create_feed(&self, feed: &FeedNode) -> Result<()> {
        let q = query(
            r#"
            CREATE (f:Feed {
                id: $id,
                user_id: $user_id,
                url: $url,
                title: $title,
                created_at: $created_at,
                updated_at: $updated_at
            })
            "#,
        )
        .param("id", feed.id.to_string())
        .param("user_id", feed.user_id.to_string())
        .param("url", feed.url.clone())
        .param("title", feed.title.clone().unwrap_or_default())
        .param("created_at", feed.created_at.to_rfc3339())
        .param("updated_at", feed.updated_at.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn get_feed(&self, id: Uuid) -> Result<Option<FeedNode>> {
        let q = query("MATCH (f:Feed {id: $id}) RETURN f").param("id", id.to_string());
        let mut result = self.graph.execute(q).await?;
        match result.next().await? {
            Some(row) => {
                let node: neo4rs::Node = row.get("f")?;
                Ok(Some(Self::node_to_feed(&node)?))
            }
            None => Ok(None),
        }
    }

    async fn list_feeds(&self, user_id: Uuid) -> Result<Vec<FeedNode>> {
        let q = query("MATCH (f:Feed {user_id: $user_id}) RETURN f ORDER BY f.created_at ASC")
            .param("user_id", user_id.to_string());
        let mut result = self.graph.execute(q).await?;
        let mut feeds = Vec::new();
        while let Some(row) = result.next().await? {
            let node: neo4rs::Node = row.get("f")?;
            feeds.push(Self::node_to_feed(&node)?);
        }
        Ok(feeds)
    }

    async fn update_feed(&self, feed: &FeedNode) -> Result<()> {
        let q = query(
            "MATCH (f:Feed {id: $id})
             SET f.url = $url, f.title = $title, f.updated_at = $updated_at",
        )
        .param("id", feed.id.to_string())
        .param("url", feed.url.clone())
        .param("title", feed.title.clone().unwrap_or_default())
        .param("updated_at", feed.updated_at.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn delete_feed(&self, id: Uuid) -> Result<bool> {
        let q = query(
            "MATCH (f:Feed {id: $id})
             WITH f, f.id AS id
             DETACH DELETE f
             RETURN id",
        )
        .param("id", id.to_string());
        let mut result = self.graph.execute(q).await?;
        Ok(result.next().await?.is_some())
    }

    // ========================================================================
    // Articles
    // ========================================================================

    async fn list_articles(
        &self,
        filter: &ArticleFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ArticleNode>, usize)> {
        let where_clause = r#"
            WHERE ($topic = '' OR any(t IN a.topics WHERE toLower(t) = toLower($topic)))
              AND ($feed_id = '' OR a.feed_id = $feed_id)
              AND ($search = ''
                   OR toLower(a.title) CONTAINS toLower($search)
                   OR toLower(coalesce(a.summary, '')) CONTAINS toLower($search))
        "#;
        let topic = filter.topic.clone().unwrap_or_default();
        let feed_id = filter.feed_id.map(|id| id.to_string()).unwrap_or_default();
        let search = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let data_q = query(&format!(
            "MATCH (a:Article) {} RETURN a ORDER BY a.published_at DESC SKIP $offset LIMIT $limit",
            where_clause
        ))
        .param("topic", topic.clone())
        .param("feed_id", feed_id.clone())
        .param("search", search.clone())
        .param("offset", offset as i64)
        .param("limit", limit as i64);

        let count_q = query(&format!(
            "MATCH (a:Article) {} RETURN count(a) AS total",
            where_clause
        ))
        .param("topic", topic)
        .param("feed_id", feed_id)
        .param("search", search);

        let mut result = self.graph.execute(data_q).await?;
        let mut articles = Vec::new();
        while let Some(row) = result.next().await? {
            let node: neo4rs::Node = row.get("a")?;
            let mut article = Self::node_to_article(&node)?;
            article.content = None;
            articles.push(article);
        }
        let total = self.count(count_q).await?;
        Ok((articles, total))
    }

    async fn get_article(&self, id: Uuid) -> Result<Option<ArticleNode>> {
        let q = query("MATCH (a:Article {id: $id}) RETURN a").param("id", id.to_string());
        let mut result = self.graph.execute(q).await?;
        match result.next().await? {
            Some(row) => {
                let node: neo4rs::Node = row.get("a")?;
                Ok(Some(Self::node_to_article(&node)?))
            }
            None => Ok(None),
        }
    }

    async fn get_articles(&self, ids: &[Uuid]) -> Result<Vec<ArticleNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let q = query("MATCH (a:Article) WHERE a.id IN $ids RETURN a").param("ids", id_strings);
        let mut result = self.graph.execute(q).await?;
        let mut found = std::collections::HashMap::new();
        while let Some(row) = result.next().await? {
            let node: neo4rs::Node = row.get("a")?;
            let article = Self::node_to_article(&node)?;
            found.insert(article.id, article);
        }
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn upsert_article(&self, article: &ArticleNode) -> Result<()> {
        let q = query(
            r#"
            MERGE (a:Article {id: $id})
            SET a.feed_id = $feed_id,
                a.title = $title,
                a.url = $url,
                a.source = $source,
                a.summary = $summary,
                a.content = $content,
                a.topics = $topics,
                a.published_at = $published_at
            "#,
        )
        .param("id", article.id.to_string())
        .param(
            "feed_id",
            article.feed_id.map(|id| id.to_string()).unwrap_or_default(),
        )
        .param("title", article.title.clone())
        .param("url", article.url.clone())
        .param("source", article.source.clone())
        .param("summary", article.summary.clone().unwrap_or_default())
        .param("content", article.content.clone().unwrap_or_default())
        .param("topics", article.topics.clone())
        .param("published_at", article.published_at.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn topic_counts(&self, limit: usize) -> Result<Vec<TopicSuggestion>> {
        let q = query(
            r#"
            MATCH (a:Article)
            UNWIND a.topics AS topic
            WITH toLower(topic) AS topic, count(a) AS article_count
            RETURN topic, article_count
            ORDER BY article_count DESC, topic ASC
            LIMIT $limit
            "#,
        )
        .param("limit", limit as i64);

        let mut result = self.graph.execute(q).await?;
        let mut topics = Vec::new();
        while let Some(row) = result.next().await? {
            let topic: String = row.get("topic")?;
            let count: i64 = row.get("article_count")?;
            topics.push(TopicSuggestion {
                topic,
                article_count: count.max(0) as usize,
            });
        }
        Ok(topics)
    }

    // ========================================================================
    // Digests
    // ========================================================================

    async fn list_digests(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<DigestNode>, usize)> {
        let data_q = query(
            r#"
            MATCH (d:Digest {user_id: $user_id})
            RETURN d ORDER BY d.date DESC, d.created_at DESC
            SKIP $offset LIMIT $limit
            "#,
        )
        .param("user_id", user_id.to_string())
        .param("offset", offset as i64)
        .param("limit", limit as i64);
        let count_q = query("MATCH (d:Digest {user_id: $user_id}) RETURN count(d) AS total")
            .param("user_id", user_id.to_string());

        let mut result = self.graph.execute(data_q).await?;
        let mut digests = Vec::new();
        while let Some(row) = result.next().await? {
            let node: neo4rs::Node = row.get("d")?;
            digests.push(Self::node_to_digest(&node)?);
        }
        let total = self.count(count_q).await?;
        Ok((digests, total))
    }

    async fn get_digest(&self, id: Uuid) -> Result<Option<DigestNode>> {
        let q = query("MATCH (d:Digest {id: $id}) RETURN d").param("id", id.to_string());
        let mut result = self.graph.execute(q).await?;
        match result.next().await? {
            Some(row) => {
                let node: neo4rs::Node = row.get("d")?;
                Ok(Some(Self::node_to_digest(&node)?))
            }
            None => Ok(None),
        }
    }

    async fn create_digest(&self, digest: &DigestNode) -> Result<()> {
        let article_ids: Vec<String> = digest.article_ids.iter().map(|id| id.to_string()).collect();
        let q = query(
            r#"
            CREATE (d:Digest {
                id: $id,
                user_id: $user_id,
                date: $date,
                title: $title,
                summary: $summary,
                article_ids: $article_ids,
                created_at: $created_at
            })
            "#,
        )
        .param("id", digest.id.to_string())
        .param("user_id", digest.user_id.to_string())
        .param("date", digest.date.format("%Y-%m-%d").to_string())
        .param("title", digest.title.clone())
        .param("summary", digest.summary.clone().unwrap_or_default())
        .param("article_ids", article_ids)
        .param("created_at", digest.created_at.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    // ========================================================================
    // Chat sessions & messages
    // ========================================================================

    async fn create_chat_session(&self, session: &ChatSessionNode) -> Result<()> {
        let q = query(
            r#"
            CREATE (s:ChatSession {
                id: $id,
                user_id: $user_id,
                digest_id: $digest_id,
                title: $title,
                created_at: $created_at,
                updated_at: $updated_at,
                message_count: $message_count
            })
            "#,
        )
        .param("id", session.id.to_string())
        .param("user_id", session.user_id.to_string())
        .param(
            "digest_id",
            session.digest_id.map(|id| id.to_string()).unwrap_or_default(),
        )
        .param("title", session.title.clone().unwrap_or_default())
        .param("created_at", session.created_at.to_rfc3339())
        .param("updated_at", session.updated_at.to_rfc3339())
        .param("message_count", session.message_count);

        self.graph.run(q).await?;
        Ok(())
    }

    async fn get_chat_session(&self, id: Uuid) -> Result<Option<ChatSessionNode>> {
        let q = query("MATCH (s:ChatSession {id: $id}) RETURN s").param("id", id.to_string());

        let mut result = self.graph.execute(q).await?;
        if let Some(row) = result.next().await? {
            let node: neo4rs::Node = row.get("s")?;
            Ok(Some(Self::node_to_chat_session(&node)?))
        } else {
            Ok(None)
        }
    }

    async fn list_chat_sessions(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ChatSessionNode>, usize)> {
        let data_q = query(
            r#"
            MATCH (s:ChatSession {user_id: $user_id})
            RETURN s ORDER BY s.updated_at DESC
            SKIP $offset LIMIT $limit
            "#,
        )
        .param("user_id", user_id.to_string())
        .param("offset", offset as i64)
        .param("limit", limit as i64);
        let count_q = query("MATCH (s:ChatSession {user_id: $user_id}) RETURN count(s) AS total")
            .param("user_id", user_id.to_string());

        let mut result = self.graph.execute(data_q).await?;
        let mut sessions = Vec::new();
        while let Some(row) = result.next().await? {
            let node: neo4rs::Node = row.get("s")?;
            sessions.push(Self::node_to_chat_session(&node)?);
        }
        let total = self.count(count_q).await?;
        Ok((sessions, total))
    }

    async fn delete_chat_session(&self, id: Uuid) -> Result<bool> {
        let q = query(
            r#"
            MATCH (s:ChatSession {id: $id})
            OPTIONAL MATCH (s)-[:HAS_MESSAGE]->(m:ChatMessage)
            WITH s, s.id AS id, collect(m) AS messages
            FOREACH (m IN messages | DETACH DELETE m)
            DETACH DELETE s
            RETURN id
            "#,
        )
        .param("id", id.to_string());

        let mut result = self.graph.execute(q).await?;
        Ok(result.next().await?.is_some())
    }

    async fn append_chat_message(&self, message: &ChatMessageNode) -> Result<()> {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        let citations =
            serde_json::to_string(&message.citations).context("Failed to encode citations")?;
        let q = query(
            r#"
            MATCH (s:ChatSession {id: $session_id})
            WITH s, coalesce(s.message_count, 0) AS seq
            CREATE (m:ChatMessage {
                id: $id,
                session_id: $session_id,
                role: $role,
                content: $content,
                citations: $citations,
                follow_up_questions: $follow_up_questions,
                created_at: $created_at,
                seq: seq
            })
            CREATE (s)-[:HAS_MESSAGE]->(m)
            SET s.message_count = seq + 1,
                s.updated_at = $created_at,
                s.title = CASE
                    WHEN coalesce(s.title, '') = '' AND $role = 'user' THEN $title
                    ELSE s.title
                END
            RETURN m.id AS id
            "#,
        )
        .param("id", message.id.to_string())
        .param("session_id", message.session_id.to_string())
        .param("role", role)
        .param("content", message.content.clone())
        .param("citations", citations)
        .param("follow_up_questions", message.follow_up_questions.clone())
        .param("created_at", message.created_at.to_rfc3339())
        .param("title", title_from_message(&message.content));

        let mut result = self.graph.execute(q).await?;
        if result.next().await?.is_none() {
            anyhow::bail!("Chat session {} not found", message.session_id);
        }
        Ok(())
    }

    async fn list_chat_messages(
        &self,
        session_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ChatMessageNode>, usize)> {
        let data_q = query(
            r#"
            MATCH (m:ChatMessage {session_id: $session_id})
            RETURN m ORDER BY m.seq ASC
            SKIP $offset LIMIT $limit
            "#,
        )
        .param("session_id", session_id.to_string())
        .param("offset", offset as i64)
        .param("limit", limit as i64);
        let count_q =
            query("MATCH (m:ChatMessage {session_id: $session_id}) RETURN count(m) AS total")
                .param("session_id", session_id.to_string());

        let mut result = self.graph.execute(data_q).await?;
        let mut messages = Vec::new();
        while let Some(row) = result.next().await? {
            let node: neo4rs::Node = row.get("m")?;
            messages.push(Self::node_to_chat_message(&node)?);
        }
        let total = self.count(count_q).await?;
        Ok((messages, total))
    }
}
