use std::sync::{Arc, Mutex};

use ratchet_core::{
    InMemoryPatchStore, LauncherContext, LockSettings, MigrationContext, MigrationError,
    MigrationErrorKind, MigrationLauncher, MigrationListener, MigrationResult, MigrationTask,
    OrderedStrategy, PatchInfoStore, TaskSource,
};

struct NoopSession;

impl MigrationContext for NoopSession {
    fn commit(&mut self) -> MigrationResult<()> {
        Ok(())
    }

    fn rollback(&mut self) -> MigrationResult<()> {
        Ok(())
    }
}

struct ScriptedTask {
    name: String,
    level: i64,
    fail: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl MigrationTask for ScriptedTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> Option<i64> {
        Some(self.level)
    }

    fn execute(&self, _context: &mut dyn MigrationContext) -> MigrationResult<()> {
        if self.fail {
            return Err(MigrationError::execution("scripted failure"));
        }
        self.log.lock().unwrap().push(format!("run:{}", self.level));
        Ok(())
    }
}

struct FixedSource {
    tasks: Vec<Arc<dyn MigrationTask>>,
}

impl TaskSource for FixedSource {
    fn discover(&self, _search_path: &str) -> MigrationResult<Vec<Arc<dyn MigrationTask>>> {
        Ok(self.tasks.clone())
    }
}

struct EventLog {
    log: Arc<Mutex<Vec<String>>>,
    fail_on_success: bool,
}

impl MigrationListener for EventLog {
    fn started(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("started:{}:{context}", task.name()));
        Ok(())
    }

    fn succeeded(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()> {
        if self.fail_on_success {
            return Err(MigrationError::execution("audit sink unavailable"));
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("succeeded:{}:{context}", task.name()));
        Ok(())
    }

    fn failed(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("failed:{}:{context}", task.name()));
        Ok(())
    }
}

fn fast_lock_settings() -> LockSettings {
    LockSettings {
        poll_interval_ms: 1,
        max_poll_attempts: 10,
        forced_release_after: None,
    }
}

fn task(level: i64, fail: bool, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn MigrationTask> {
    Arc::new(ScriptedTask {
        name: format!("patch_{level:04}"),
        level,
        fail,
        log: log.clone(),
    })
}

fn launcher_with(
    levels: &[i64],
    failing_level: Option<i64>,
    exec_log: &Arc<Mutex<Vec<String>>>,
) -> (MigrationLauncher, Arc<InMemoryPatchStore>) {
    let store = Arc::new(InMemoryPatchStore::new("orders", "node-a"));
    let mut launcher = MigrationLauncher::new("orders", Arc::new(OrderedStrategy));
    launcher.set_lock_settings(fast_lock_settings());
    launcher.add_context(LauncherContext::new(
        "node-a",
        store.clone(),
        Box::new(NoopSession),
    ));
    launcher.add_source(Arc::new(FixedSource {
        tasks: levels
            .iter()
            .map(|&level| task(level, failing_level == Some(level), exec_log))
            .collect(),
    }));
    launcher.add_search_path("memory:orders");
    (launcher, store)
}

#[test]
fn migrating_from_level_one_applies_the_pending_tail() {
    let exec_log = Arc::new(Mutex::new(Vec::new()));
    let (mut launcher, store) = launcher_with(&[1, 2, 3, 4, 5], None, &exec_log);
    store.advance_level(1).unwrap();

    let applied = launcher.run_migrations().unwrap();

    assert_eq!(applied, 4);
    assert_eq!(store.current_level().unwrap(), 5);
    assert_eq!(
        exec_log.lock().unwrap().clone(),
        vec!["run:2", "run:3", "run:4", "run:5"]
    );
    assert!(!store.is_locked().unwrap());
}

#[test]
fn second_run_applies_nothing_and_broadcasts_nothing() {
    let exec_log = Arc::new(Mutex::new(Vec::new()));
    let event_log = Arc::new(Mutex::new(Vec::new()));
    let (mut launcher, store) = launcher_with(&[1, 2, 3], None, &exec_log);
    launcher.add_listener(Arc::new(EventLog {
        log: event_log.clone(),
        fail_on_success: false,
    }));

    assert_eq!(launcher.run_migrations().unwrap(), 3);
    exec_log.lock().unwrap().clear();
    event_log.lock().unwrap().clear();

    assert_eq!(launcher.run_migrations().unwrap(), 0);
    assert!(exec_log.lock().unwrap().is_empty());
    assert!(event_log.lock().unwrap().is_empty());
    assert_eq!(store.current_level().unwrap(), 3);
}

#[test]
fn failure_aborts_remaining_tasks_and_keeps_the_level() {
    let exec_log = Arc::new(Mutex::new(Vec::new()));
    let event_log = Arc::new(Mutex::new(Vec::new()));
    let (mut launcher, store) = launcher_with(&[1, 2, 3], Some(2), &exec_log);
    launcher.add_listener(Arc::new(EventLog {
        log: event_log.clone(),
        fail_on_success: false,
    }));

    let error = launcher.run_migrations().unwrap_err();

    assert_eq!(error.kind, MigrationErrorKind::Execution);
    assert_eq!(error.task.as_deref(), Some("patch_0002"));
    assert_eq!(store.current_level().unwrap(), 1);
    assert_eq!(exec_log.lock().unwrap().clone(), vec!["run:1"]);

    let events = event_log.lock().unwrap().clone();
    let failures: Vec<&String> = events.iter().filter(|e| e.starts_with("failed:")).collect();
    assert_eq!(failures, vec!["failed:patch_0002:node-a"]);
    assert!(!events.iter().any(|e| e.contains("patch_0003")));
    assert!(!store.is_locked().unwrap());
}

#[test]
fn listener_errors_abort_the_run_and_still_release_the_lock() {
    let exec_log = Arc::new(Mutex::new(Vec::new()));
    let (mut launcher, store) = launcher_with(&[1], None, &exec_log);
    launcher.add_listener(Arc::new(EventLog {
        log: Arc::new(Mutex::new(Vec::new())),
        fail_on_success: true,
    }));

    let error = launcher.run_migrations().unwrap_err();
    assert!(error.message.contains("audit sink unavailable"));
    assert!(!store.is_locked().unwrap());
}

#[test]
fn read_only_run_rejects_pending_work_before_touching_the_store() {
    let exec_log = Arc::new(Mutex::new(Vec::new()));
    let (mut launcher, store) = launcher_with(&[1, 2], None, &exec_log);
    launcher.set_read_only(true);

    let error = launcher.run_migrations().unwrap_err();

    assert_eq!(error.kind, MigrationErrorKind::Validation);
    assert_eq!(store.current_level().unwrap(), 0);
    assert!(!store.is_locked().unwrap());
    assert!(exec_log.lock().unwrap().is_empty());
}

#[test]
fn read_only_run_reports_success_when_nothing_is_pending() {
    let exec_log = Arc::new(Mutex::new(Vec::new()));
    let (mut launcher, store) = launcher_with(&[1, 2], None, &exec_log);
    store.advance_level(1).unwrap();
    store.advance_level(2).unwrap();
    launcher.set_read_only(true);

    assert_eq!(launcher.run_migrations().unwrap(), 0);
}

#[test]
fn duplicate_levels_are_rejected_before_any_execution() {
    let exec_log = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::new(InMemoryPatchStore::new("orders", "node-a"));
    let mut launcher = MigrationLauncher::new("orders", Arc::new(OrderedStrategy));
    launcher.set_lock_settings(fast_lock_settings());
    launcher.add_context(LauncherContext::new(
        "node-a",
        store.clone(),
        Box::new(NoopSession),
    ));
    launcher.add_source(Arc::new(FixedSource {
        tasks: vec![task(2, false, &exec_log), task(2, false, &exec_log)],
    }));
    launcher.add_search_path("memory:orders");

    let error = launcher.run_migrations().unwrap_err();
    assert_eq!(error.kind, MigrationErrorKind::Validation);
    assert!(exec_log.lock().unwrap().is_empty());
    assert_eq!(store.current_level().unwrap(), 0);
}

#[test]
fn sibling_contexts_are_stamped_forward_but_never_regressed() {
    let exec_log = Arc::new(Mutex::new(Vec::new()));
    let store_a = Arc::new(InMemoryPatchStore::new("orders", "node-a"));
    let store_b = Arc::new(InMemoryPatchStore::new("orders", "node-b"));
    let mut launcher = MigrationLauncher::new("orders", Arc::new(OrderedStrategy));
    launcher.set_lock_settings(fast_lock_settings());
    launcher.add_context(LauncherContext::new(
        "node-a",
        store_a.clone(),
        Box::new(NoopSession),
    ));
    launcher.add_context(LauncherContext::new(
        "node-b",
        store_b.clone(),
        Box::new(NoopSession),
    ));
    launcher.add_source(Arc::new(FixedSource {
        tasks: vec![
            task(1, false, &exec_log),
            task(2, false, &exec_log),
            task(3, false, &exec_log),
        ],
    }));
    launcher.add_search_path("memory:orders");

    // node-b already moved further via a different path; the success
    // notifications from node-a must not pull it back.
    store_b.advance_level(5).unwrap();

    let applied = launcher.run_migrations().unwrap();

    assert_eq!(applied, 3);
    assert_eq!(store_a.current_level().unwrap(), 3);
    assert_eq!(store_b.current_level().unwrap(), 5);
    assert_eq!(
        exec_log.lock().unwrap().clone(),
        vec!["run:1", "run:2", "run:3"]
    );
}

#[test]
fn lagging_sibling_is_advanced_by_success_notifications() {
    let exec_log = Arc::new(Mutex::new(Vec::new()));
    let store_a = Arc::new(InMemoryPatchStore::new("orders", "node-a"));
    let store_b = Arc::new(InMemoryPatchStore::new("orders", "node-b"));
    let mut launcher = MigrationLauncher::new("orders", Arc::new(OrderedStrategy));
    launcher.set_lock_settings(fast_lock_settings());
    launcher.add_context(LauncherContext::new(
        "node-a",
        store_a.clone(),
        Box::new(NoopSession),
    ));
    launcher.add_context(LauncherContext::new(
        "node-b",
        store_b.clone(),
        Box::new(NoopSession),
    ));
    launcher.add_source(Arc::new(FixedSource {
        tasks: vec![task(1, false, &exec_log), task(2, false, &exec_log)],
    }));
    launcher.add_search_path("memory:orders");

    let applied = launcher.run_migrations().unwrap();

    // node-a's successes stamp node-b forward, so node-b's own pass has
    // nothing left to apply.
    assert_eq!(applied, 2);
    assert_eq!(store_a.current_level().unwrap(), 2);
    assert_eq!(store_b.current_level().unwrap(), 2);
    assert_eq!(exec_log.lock().unwrap().clone(), vec!["run:1", "run:2"]);
}
