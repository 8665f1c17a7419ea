//! List, detail and delete over one remote collection.

use crate::api::Repository;
use crate::error::ApiError;
use crate::models::Resource;

/// Local mirror of a remote collection plus the currently opened item.
pub struct CollectionView<R: Resource> {
    items: Vec<R>,
    selected: Option<String>,
    notice: Option<String>,
    refresh_on_delete: bool,
}

impl<R: Resource> Default for CollectionView<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> CollectionView<R> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            selected: None,
            notice: None,
            refresh_on_delete: false,
        }
    }

    /// Re-fetch the whole list after every successful delete.
    pub fn refresh_on_delete(mut self, refresh: bool) -> Self {
        self.refresh_on_delete = refresh;
        self
    }

    pub fn items(&self) -> &[R] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Last user-facing message from a failed action.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn selected(&self) -> Option<&R> {
        let id = self.selected.as_deref()?;
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn close(&mut self) {
        self.selected = None;
    }

    fn fail(&mut self, action: &str, err: ApiError) -> ApiError {
        tracing::warn!("{} {} failed: {}", action, R::FEATURE, err);
        self.notice = Some(err.user_message());
        err
    }

    /// Replaces the local collection with the remote one.
    pub async fn list(&mut self, repo: &dyn Repository<R>) -> Result<(), ApiError> {
        match repo.list().await {
            Ok(items) => {
                self.items = items;
                self.notice = None;
                if self.selected().is_none() {
                    self.selected = None;
                }
                Ok(())
            }
            Err(err) => Err(self.fail("list", err)),
        }
    }

    /// Opens an item, fetching it only if it is not already in memory.
    pub async fn select(&mut self, repo: &dyn Repository<R>, id: &str) -> Result<&R, ApiError> {
        if !self.items.iter().any(|item| item.id() == id) {
            match repo.get(id).await {
                Ok(item) => self.items.push(item),
                Err(err) => return Err(self.fail("open", err)),
            }
        }
        self.selected = Some(id.to_string());
        self.notice = None;
        self.selected()
            .ok_or_else(|| ApiError::Decode(format!("{} {} returned under another id", R::FEATURE, id)))
    }

    /// Deletes remotely, then locally. A failed delete leaves the collection untouched.
    pub async fn delete(&mut self, repo: &dyn Repository<R>, id: &str) -> Result<(), ApiError> {
        if let Err(err) = repo.delete(id).await {
            return Err(self.fail("delete", err));
        }

        self.items.retain(|item| item.id() != id);
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        self.notice = None;

        if self.refresh_on_delete {
            self.list(repo).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Task, TaskDraft, TaskStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeTasks {
        remote: Mutex<Vec<Task>>,
        locked: &'static str,
        gets: AtomicUsize,
        lists: AtomicUsize,
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Task {}", id),
            status: TaskStatus::Open,
            priority: Priority::Medium,
            due_date: None,
            assignees: vec![],
        }
    }

    impl FakeTasks {
        fn new(ids: &[&str]) -> Self {
            Self {
                remote: Mutex::new(ids.iter().map(|id| task(id)).collect()),
                locked: "locked",
                gets: AtomicUsize::new(0),
                lists: AtomicUsize::new(0),
            }
        }
    }

    fn not_found() -> ApiError {
        ApiError::Http {
            status: 404,
            message: "Task not found".into(),
        }
    }

    #[async_trait]
    impl Repository<Task> for FakeTasks {
        async fn list(&self) -> Result<Vec<Task>, ApiError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(self.remote.lock().unwrap().clone())
        }

        async fn get(&self, id: &str) -> Result<Task, ApiError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let remote = self.remote.lock().unwrap();
            remote.iter().find(|t| t.id == id).cloned().ok_or_else(not_found)
        }

        async fn create(&self, draft: &TaskDraft) -> Result<Task, ApiError> {
            let mut created = task("new");
            created.title = draft.title.clone();
            self.remote.lock().unwrap().push(created.clone());
            Ok(created)
        }

        async fn update(&self, id: &str, draft: &TaskDraft) -> Result<Task, ApiError> {
            let mut remote = self.remote.lock().unwrap();
            let existing = remote.iter_mut().find(|t| t.id == id).ok_or_else(not_found)?;
            existing.title = draft.title.clone();
            Ok(existing.clone())
        }

        async fn delete(&self, id: &str) -> Result<(), ApiError> {
            if id == self.locked {
                return Err(ApiError::Http {
                    status: 409,
                    message: "Task has linked evidence".into(),
                });
            }
            let mut remote = self.remote.lock().unwrap();
            let before = remote.len();
            remote.retain(|t| t.id != id);
            if remote.len() == before {
                return Err(not_found());
            }
            Ok(())
        }
    }

    fn ids(view: &CollectionView<Task>) -> Vec<String> {
        view.items().iter().map(|t| t.id.clone()).collect()
    }

    #[tokio::test]
    async fn select_uses_memory_before_fetching() {
        let repo = FakeTasks::new(&["1", "2"]);
        let mut view = CollectionView::<Task>::new();
        view.list(&repo).await.unwrap();

        assert_eq!(view.select(&repo, "2").await.unwrap().id, "2");
        assert_eq!(repo.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn select_fetches_items_not_in_memory() {
        let repo = FakeTasks::new(&["1", "2"]);
        let mut view = CollectionView::<Task>::new();
        assert_eq!(view.select(&repo, "1").await.unwrap().title, "Task 1");
        assert_eq!(repo.gets.load(Ordering::SeqCst), 1);

        assert!(view.select(&repo, "9").await.is_err());
        assert_eq!(view.notice(), Some("Task not found"));
    }

    #[tokio::test]
    async fn delete_removes_item_and_closes_detail() {
        let repo = FakeTasks::new(&["1", "2", "3"]);
        let mut view = CollectionView::<Task>::new();
        view.list(&repo).await.unwrap();
        view.select(&repo, "2").await.unwrap();

        view.delete(&repo, "2").await.unwrap();
        assert_eq!(ids(&view), vec!["1", "3"]);
        assert!(view.selected().is_none());
    }

    #[tokio::test]
    async fn failed_delete_leaves_list_unchanged() {
        let repo = FakeTasks::new(&["1", "locked", "3"]);
        let mut view = CollectionView::<Task>::new();
        view.list(&repo).await.unwrap();
        view.select(&repo, "locked").await.unwrap();
        let before: Vec<String> = ids(&view);

        let err = view.delete(&repo, "locked").await.unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert_eq!(ids(&view), before);
        assert_eq!(view.selected().map(|t| t.id.as_str()), Some("locked"));
        assert_eq!(view.notice(), Some("Task has linked evidence"));
    }

    #[tokio::test]
    async fn delete_can_refresh_the_list() {
        let repo = FakeTasks::new(&["1", "2"]);
        let mut view = CollectionView::<Task>::new().refresh_on_delete(true);
        view.list(&repo).await.unwrap();
        repo.remote.lock().unwrap().push(task("4"));

        view.delete(&repo, "1").await.unwrap();
        assert_eq!(ids(&view), vec!["2", "4"]);
        assert_eq!(repo.lists.load(Ordering::SeqCst), 2);
    }
}
