//! Units of background work and the context they run in.
//!
//! Scheduling is left to the caller: each task is a plain function over a
//! [`TaskContext`], safe to run from any thread. Work on one project is
//! serialized through [`ProjectLocks`]; different projects run concurrently.

pub mod autoconfirm;
pub mod impact;
pub mod parsing;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::RippleSettings;
use crate::errors::RippleResult;
use crate::impact::llm::{CompletionClient, OllamaClient};
use crate::indexer::parser::ParserRegistry;
use crate::store::database::Database;
use crate::store::events::EventSink;
use crate::store::objects::ObjectStore;
use crate::workflow::{ApprovalOutcome, Workflow};

/// One mutex per project id, created on first use.
#[derive(Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `project_id`. Hold `.lock()` on the result for the
    /// duration of the project-scoped work.
    pub fn get(&self, project_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

/// Everything a task needs, constructed once and shared.
pub struct TaskContext {
    pub db: Database,
    pub objects: Arc<dyn ObjectStore>,
    pub events: Arc<dyn EventSink>,
    pub registry: ParserRegistry,
    pub settings: RippleSettings,
    pub llm: Option<Arc<dyn CompletionClient>>,
    pub locks: ProjectLocks,
}

impl TaskContext {
    /// The LLM client is an Ollama client when `settings.llm_enabled`.
    pub fn new(
        db: Database,
        objects: Arc<dyn ObjectStore>,
        events: Arc<dyn EventSink>,
        settings: RippleSettings,
    ) -> Self {
        let llm: Option<Arc<dyn CompletionClient>> = if settings.llm_enabled {
            Some(Arc::new(OllamaClient::from_settings(&settings)))
        } else {
            None
        };
        Self {
            db,
            objects,
            events,
            registry: ParserRegistry::new(),
            settings,
            llm,
            locks: ProjectLocks::new(),
        }
    }

    pub fn with_llm(mut self, client: Option<Arc<dyn CompletionClient>>) -> Self {
        self.llm = client;
        self
    }

    pub fn workflow(&self) -> Workflow<'_> {
        Workflow::new(
            &self.db,
            self.objects.as_ref(),
            self.events.as_ref(),
            &self.registry,
        )
    }

    /// Approve under the project lock and rebuild the dependency graph from
    /// the promoted snapshots.
    pub fn approve_change(&self, change_id: &str, user_id: &str) -> RippleResult<ApprovalOutcome> {
        let project_id = self
            .db
            .get_change_request(change_id)?
            .map(|c| c.project_id)
            .ok_or_else(|| {
                crate::errors::RippleError::NotFound(format!("change request {change_id}"))
            })?;
        let lock = self.locks.get(&project_id);
        let _guard = lock.lock();
        let outcome = self.workflow().approve(change_id, user_id)?;
        parsing::rebuild_dependency_graph(&self.db, &project_id)?;
        Ok(outcome)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::StrictnessMode;
    use crate::store::database::fixtures::{seed_component, seed_project, temp_db};
    use crate::store::events::RecordingEventSink;
    use crate::store::objects::InMemoryObjectStore;

    pub(crate) struct TestContext {
        pub _dir: tempfile::TempDir,
        pub ctx: Arc<TaskContext>,
        pub objects: Arc<InMemoryObjectStore>,
        pub events: Arc<RecordingEventSink>,
    }

    /// Project p1 owned by `owner` with component X (author) and Y (alice,
    /// bob). No LLM client.
    pub(crate) fn test_context(mode: StrictnessMode) -> TestContext {
        test_context_with_llm(mode, None)
    }

    pub(crate) fn test_context_with_llm(
        mode: StrictnessMode,
        llm: Option<Arc<dyn CompletionClient>>,
    ) -> TestContext {
        let (dir, db) = temp_db();
        seed_project(&db, "p1", "owner", mode);
        seed_component(&db, "p1", "X", &["author"]);
        seed_component(&db, "p1", "Y", &["alice", "bob"]);
        let objects = Arc::new(InMemoryObjectStore::new());
        let events = Arc::new(RecordingEventSink::new());
        let settings = RippleSettings {
            llm_enabled: false,
            parse_workers: 2,
            ..RippleSettings::default()
        };
        let ctx = TaskContext::new(db, objects.clone(), events.clone(), settings).with_llm(llm);
        TestContext {
            _dir: dir,
            ctx: Arc::new(ctx),
            objects,
            events,
        }
    }

    #[test]
    fn test_project_locks_are_shared_per_project() {
        let locks = ProjectLocks::new();
        let a = locks.get("p1");
        let b = locks.get("p1");
        let c = locks.get("p2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);

        let _guard = a.lock();
        assert!(b.try_lock().is_none());
        assert!(c.try_lock().is_some());
    }

    #[test]
    fn test_llm_client_follows_settings() {
        let (_dir, db) = temp_db();
        let objects: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let events: Arc<dyn EventSink> = Arc::new(RecordingEventSink::new());
        let enabled = TaskContext::new(
            Database::new(db.db_path()).unwrap(),
            objects.clone(),
            events.clone(),
            RippleSettings::default(),
        );
        assert_eq!(enabled.llm.as_ref().map(|c| c.name()), Some("ollama"));

        let disabled = TaskContext::new(
            db,
            objects,
            events,
            RippleSettings {
                llm_enabled: false,
                ..RippleSettings::default()
            },
        );
        assert!(disabled.llm.is_none());
    }
}
