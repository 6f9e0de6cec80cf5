//! Storage seam for the server. The relational engine behind the
//! connection pool is an external collaborator; [Store] is the boundary
//! the classification and reporting engines talk to. [MemoryStore] is
//! the in-process realization used by the default server and the tests.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{
    ClassificationResult, KeylogEntry, MonitoredUser, Observation, Productivity, Tag, TagKeyword,
};

/// Row filter for the reporting queries. All conditions are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct ObservationFilter {
    pub category: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub monitored_user_id: Option<i64>,
}

impl ObservationFilter {
    pub fn matches(&self, observation: &Observation) -> bool {
        if let Some(category) = &self.category {
            if observation.category.as_ref() != category {
                return false;
            }
        }
        if let Some(start) = self.start {
            if observation.captured_at < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if observation.captured_at > end {
                return false;
            }
        }
        if let Some(user_id) = self.monitored_user_id {
            if observation.monitored_user_id != user_id {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn user(&self, id: i64) -> Result<Option<MonitoredUser>>;

    async fn user_by_os_name(&self, os_user: &str) -> Result<Option<MonitoredUser>>;

    /// Snapshot of the keyword configuration visible to one observation:
    /// keywords of tags scoped to the given department plus globally
    /// scoped tags, department-scoped first.
    async fn keyword_candidates(
        &self,
        department_id: Option<i64>,
    ) -> Result<Vec<(Tag, TagKeyword)>>;

    /// Persists an observation together with its classification result
    /// in one write section. A duplicate id is ignored, which bounds the
    /// pipeline to one classification write per observation.
    async fn insert_classified(
        &self,
        observation: Observation,
        result: Option<ClassificationResult>,
    ) -> Result<()>;

    async fn insert_keylog(&self, entry: KeylogEntry) -> Result<()>;

    async fn observations(&self, filter: &ObservationFilter) -> Result<Vec<Observation>>;

    async fn observation(&self, id: Uuid) -> Result<Option<Observation>>;

    /// Manual override of category/productivity. Returns the updated
    /// observation, or None when the id is unknown.
    async fn apply_override(
        &self,
        id: Uuid,
        category: Option<&str>,
        productivity: Option<Productivity>,
    ) -> Result<Option<Observation>>;
}

#[derive(Default)]
struct Inner {
    users: HashMap<i64, MonitoredUser>,
    tags: HashMap<i64, Tag>,
    keywords: Vec<TagKeyword>,
    observations: Vec<Observation>,
    results: Vec<ClassificationResult>,
    keylogs: Vec<KeylogEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the administrator configuration. Keywords without an owning
    /// tag are dropped with a warning.
    pub async fn seed(
        &self,
        users: Vec<MonitoredUser>,
        tags: Vec<Tag>,
        keywords: Vec<TagKeyword>,
    ) {
        let mut inner = self.inner.write().await;
        for user in users {
            inner.users.insert(user.id, user);
        }
        for tag in tags {
            inner.tags.insert(tag.id, tag);
        }
        for keyword in keywords {
            if inner.tags.contains_key(&keyword.tag_id) {
                inner.keywords.push(keyword);
            } else {
                tracing::warn!("dropping keyword {:?} for unknown tag", keyword.keyword);
            }
        }
    }

    pub async fn classification_result(&self, observation_id: Uuid) -> Option<ClassificationResult> {
        self.inner
            .read()
            .await
            .results
            .iter()
            .find(|r| r.observation_id == observation_id)
            .cloned()
    }

    pub async fn keylogs_for(&self, monitored_user_id: i64) -> Vec<KeylogEntry> {
        self.inner
            .read()
            .await
            .keylogs
            .iter()
            .filter(|k| k.monitored_user_id == monitored_user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn user(&self, id: i64) -> Result<Option<MonitoredUser>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn user_by_os_name(&self, os_user: &str) -> Result<Option<MonitoredUser>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.os_user.as_ref() == os_user)
            .cloned())
    }

    async fn keyword_candidates(
        &self,
        department_id: Option<i64>,
    ) -> Result<Vec<(Tag, TagKeyword)>> {
        let inner = self.inner.read().await;
        let mut candidates = vec![];
        // department-scoped tags first, then global
        for scoped in [true, false] {
            for keyword in &inner.keywords {
                let Some(tag) = inner.tags.get(&keyword.tag_id) else {
                    continue;
                };
                let in_scope = match tag.department_id {
                    Some(dept) => scoped && department_id == Some(dept),
                    None => !scoped,
                };
                if in_scope {
                    candidates.push((tag.clone(), keyword.clone()));
                }
            }
        }
        Ok(candidates)
    }

    async fn insert_classified(
        &self,
        observation: Observation,
        result: Option<ClassificationResult>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.observations.iter().any(|o| o.id == observation.id) {
            return Ok(());
        }
        inner.observations.push(observation);
        if let Some(result) = result {
            inner.results.push(result);
        }
        Ok(())
    }

    async fn insert_keylog(&self, entry: KeylogEntry) -> Result<()> {
        self.inner.write().await.keylogs.push(entry);
        Ok(())
    }

    async fn observations(&self, filter: &ObservationFilter) -> Result<Vec<Observation>> {
        Ok(self
            .inner
            .read()
            .await
            .observations
            .iter()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect())
    }

    async fn observation(&self, id: Uuid) -> Result<Option<Observation>> {
        Ok(self
            .inner
            .read()
            .await
            .observations
            .iter()
            .find(|o| o.id == id)
            .cloned())
    }

    async fn apply_override(
        &self,
        id: Uuid,
        category: Option<&str>,
        productivity: Option<Productivity>,
    ) -> Result<Option<Observation>> {
        let mut inner = self.inner.write().await;
        let Some(observation) = inner.observations.iter_mut().find(|o| o.id == id) else {
            return Ok(None);
        };
        if let Some(category) = category {
            observation.category = category.into();
        }
        if let Some(productivity) = productivity {
            observation.productivity = productivity;
        }
        Ok(Some(observation.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    use crate::model::{
        ClassificationResult, MonitoredUser, Observation, Productivity, Tag, TagKeyword,
    };

    use super::{MemoryStore, ObservationFilter, Store};

    fn user(id: i64, department_id: Option<i64>) -> MonitoredUser {
        MonitoredUser {
            id,
            name: Arc::from(format!("user {id}")),
            os_user: Arc::from(format!("os{id}")),
            department_id,
        }
    }

    fn tag(id: i64, department_id: Option<i64>) -> Tag {
        Tag {
            id,
            name: Arc::from(format!("tag {id}")),
            productivity: Productivity::Productive,
            department_id,
            priority_tier: 0,
        }
    }

    fn keyword(tag_id: i64, keyword: &str, weight: u32) -> TagKeyword {
        TagKeyword {
            tag_id,
            keyword: keyword.into(),
            weight,
        }
    }

    fn observation(id: Uuid, category: &str) -> Observation {
        Observation {
            id,
            monitored_user_id: 1,
            captured_at: Utc::now(),
            window_title: "w".into(),
            idle_seconds: 0,
            domain: None,
            application: None,
            duration_seconds: 10,
            screenshot: None,
            face_presence_seconds: None,
            category: category.into(),
            productivity: Productivity::Neutral,
        }
    }

    #[tokio::test]
    async fn keyword_candidates_scope_department_before_global() {
        let store = MemoryStore::new();
        store
            .seed(
                vec![],
                vec![tag(1, None), tag(2, Some(9)), tag(3, Some(8))],
                vec![
                    keyword(1, "global", 1),
                    keyword(2, "dept nine", 1),
                    keyword(3, "dept eight", 1),
                ],
            )
            .await;

        let candidates = store.keyword_candidates(Some(9)).await.unwrap();
        let keywords: Vec<&str> = candidates
            .iter()
            .map(|(_, k)| k.keyword.as_str())
            .collect();
        assert_eq!(keywords, vec!["dept nine", "global"]);

        let global_only = store.keyword_candidates(None).await.unwrap();
        assert_eq!(global_only.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_observation_id_writes_once() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store
            .insert_classified(
                observation(id, "first"),
                Some(ClassificationResult {
                    observation_id: id,
                    tag_id: 1,
                    confidence: 10.0,
                }),
            )
            .await
            .unwrap();
        store
            .insert_classified(observation(id, "second"), None)
            .await
            .unwrap();

        let stored = store.observation(id).await.unwrap().unwrap();
        assert_eq!(stored.category.as_ref(), "first");
        assert!(store.classification_result(id).await.is_some());
    }

    #[tokio::test]
    async fn override_updates_only_named_fields() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store
            .insert_classified(observation(id, "Unclassified"), None)
            .await
            .unwrap();

        let updated = store
            .apply_override(id, Some("Development"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.category.as_ref(), "Development");
        assert_eq!(updated.productivity, Productivity::Neutral);

        let missing = store
            .apply_override(Uuid::new_v4(), Some("x"), None)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn filter_is_conjunctive() {
        let store = MemoryStore::new();
        store.seed(vec![user(1, None)], vec![], vec![]).await;
        let kept = Uuid::new_v4();
        store
            .insert_classified(observation(kept, "Development"), None)
            .await
            .unwrap();
        store
            .insert_classified(observation(Uuid::new_v4(), "Idle"), None)
            .await
            .unwrap();

        let filter = ObservationFilter {
            category: Some("Development".into()),
            monitored_user_id: Some(1),
            ..Default::default()
        };
        let rows = store.observations(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, kept);
    }
}
