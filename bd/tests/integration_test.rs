//! Integration tests for BotDaemon
//!
//! These tests drive the orchestrator facade end to end with a fake auth
//! provider, in-process runners and an in-memory account store.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use botdaemon::config::Config;
use botdaemon::events::{BotEvent, Subscription, Topic, read_account_events, spawn_event_logger};
use botdaemon::login::LoginSettings;
use botdaemon::provider::{AuthProvider, LoginCode, ProviderError, ScanStatus};
use botdaemon::runner::{BotRunner, RunContext, RunError};
use botdaemon::session::SessionSettings;
use botdaemon::store::MemoryStore;
use botdaemon::{AccountId, LoginState, Orchestrator, OrchestratorError, SessionStatus};
use botstore::AccountRecord;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Fakes
// =============================================================================

/// Provider that replays scan results, then answers `Wait` forever
struct FakeProvider {
    polls: Mutex<VecDeque<ScanStatus>>,
}

impl FakeProvider {
    fn new(polls: Vec<ScanStatus>) -> Self {
        Self {
            polls: Mutex::new(polls.into()),
        }
    }

    fn waits_then_ok(waits: usize, ticket: &str) -> Self {
        let mut polls = vec![ScanStatus::Wait; waits];
        polls.push(ScanStatus::Ok {
            ticket: ticket.to_string(),
        });
        Self::new(polls)
    }

    fn always_wait() -> Self {
        Self::new(vec![])
    }
}

#[async_trait]
impl AuthProvider for FakeProvider {
    async fn request_login_code(&self) -> Result<LoginCode, ProviderError> {
        Ok(LoginCode {
            login_code: "abc".to_string(),
            qr_payload: "https://h5.qzone.qq.com/qqq/code/abc?_proxy=1&from=ide".to_string(),
        })
    }

    async fn poll_scan_status(&self, login_code: &str) -> Result<ScanStatus, ProviderError> {
        assert_eq!(login_code, "abc");
        Ok(self.polls.lock().pop_front().unwrap_or(ScanStatus::Wait))
    }

    async fn exchange_ticket(&self, ticket: &str) -> Result<String, ProviderError> {
        assert_eq!(ticket, "t1");
        Ok("xyz".to_string())
    }
}

/// Runs until cancelled, reporting a tick of state first
struct FarmRunner;

#[async_trait]
impl BotRunner for FarmRunner {
    async fn run(&self, ctx: RunContext) -> Result<(), RunError> {
        ctx.require_auth_code()?;
        ctx.state_update(serde_json::json!({"coins": 10}));
        ctx.cancelled().await;
        Ok(())
    }
}

/// Never looks at its cancellation token
struct DeafRunner;

#[async_trait]
impl BotRunner for DeafRunner {
    async fn run(&self, _ctx: RunContext) -> Result<(), RunError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

fn settings() -> SessionSettings {
    SessionSettings {
        login: LoginSettings {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(10),
            max_poll_attempts: 10_000,
            max_consecutive_errors: 3,
        },
        force_stop_timeout: Duration::from_millis(200),
        cancel_timeout: Duration::from_millis(500),
        ..SessionSettings::default()
    }
}

fn orchestrator(
    provider: FakeProvider,
    runner: Arc<dyn BotRunner>,
    settings: SessionSettings,
    accounts: Vec<AccountRecord>,
) -> Orchestrator {
    Orchestrator::builder(&Config::default())
        .provider(Arc::new(provider))
        .runner(runner)
        .store(Arc::new(MemoryStore::with_accounts(accounts)))
        .settings(settings)
        .build()
        .expect("Failed to build orchestrator")
}

fn id(s: &str) -> AccountId {
    AccountId::from(s)
}

/// Collect account events until a terminal QR event (bounded)
async fn login_events(events: &mut Subscription) -> Vec<BotEvent> {
    let mut seen = Vec::new();
    let collect = async {
        while let Some(event) = events.recv().await {
            let terminal = event.is_login_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("login did not finish in time");
    seen
}

async fn wait_for_status(orch: &Orchestrator, account: &str, status: SessionStatus) {
    let mut rx = orch.session(&id(account)).expect("session exists").watch_status();
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == status))
        .await
        .expect("status not reached in time")
        .expect("session dropped");
}

fn qr_names(events: &[BotEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| e.event_name())
        .filter(|name| name.starts_with("qr:"))
        .collect()
}

// =============================================================================
// Login scenarios
// =============================================================================

#[tokio::test]
async fn test_login_success_then_start() {
    let orch = orchestrator(
        FakeProvider::waits_then_ok(3, "t1"),
        Arc::new(FarmRunner),
        settings(),
        vec![AccountRecord::new("42", "farm")],
    );
    orch.load_accounts().await.unwrap();
    let mut events = orch.subscribe("observer", Topic::account("42"));

    orch.start_login(&id("42")).await.unwrap();
    let seen = login_events(&mut events).await;

    assert_eq!(qr_names(&seen), vec!["qr:ready", "qr:scanned", "qr:success"]);
    assert!(matches!(seen.last(), Some(BotEvent::QrSuccess { auth_code, .. }) if auth_code == "xyz"));

    // Running only after an explicit start
    wait_for_status(&orch, "42", SessionStatus::Idle).await;
    orch.start_bot(&id("42")).await.unwrap();
    assert_eq!(orch.session(&id("42")).unwrap().status(), SessionStatus::Running);

    orch.shutdown().await;
}

#[tokio::test]
async fn test_login_expiry_returns_to_idle() {
    let settings = SessionSettings {
        login: LoginSettings {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(150),
            max_poll_attempts: 10_000,
            max_consecutive_errors: 3,
        },
        ..settings()
    };
    let orch = orchestrator(
        FakeProvider::always_wait(),
        Arc::new(FarmRunner),
        settings,
        vec![AccountRecord::new("7", "alt")],
    );
    orch.load_accounts().await.unwrap();
    let mut events = orch.subscribe("observer", Topic::account("7"));

    let handle = orch.start_login(&id("7")).await.unwrap();
    let seen = login_events(&mut events).await;

    assert!(matches!(seen.last(), Some(BotEvent::QrExpired { .. })));
    assert_eq!(handle.wait().await, LoginState::Expired);
    wait_for_status(&orch, "7", SessionStatus::Idle).await;
}

#[tokio::test]
async fn test_concurrent_start_login_admits_one() {
    let orch = orchestrator(
        FakeProvider::always_wait(),
        Arc::new(FarmRunner),
        settings(),
        vec![AccountRecord::new("42", "farm")],
    );
    orch.load_accounts().await.unwrap();

    let attempts = (0..8).map(|_| {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start_login(&id("42")).await })
    });
    let results = futures::future::join_all(attempts).await;

    let mut started = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => started += 1,
            Err(e) => assert!(matches!(e, OrchestratorError::AlreadyLoggingIn(_)), "unexpected: {e}"),
        }
    }
    assert_eq!(started, 1);

    orch.cancel_login(&id("42")).await.unwrap();
}

#[tokio::test]
async fn test_cancelled_login_never_succeeds() {
    let provider = FakeProvider::waits_then_ok(50, "t1");
    let orch = orchestrator(
        provider,
        Arc::new(FarmRunner),
        settings(),
        vec![AccountRecord::new("42", "farm")],
    );
    orch.load_accounts().await.unwrap();
    let mut events = orch.subscribe("observer", Topic::account("42"));

    let handle = orch.start_login(&id("42")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(orch.cancel_login(&id("42")).await.unwrap(), Some(LoginState::Cancelled));
    assert_eq!(handle.state(), LoginState::Cancelled);

    // Give a late poll every chance to slip through
    tokio::time::sleep(Duration::from_millis(700)).await;
    let mut names = Vec::new();
    while let Some(event) = events.try_recv() {
        names.push(event.event_name());
    }
    assert!(names.contains(&"qr:cancelled"));
    assert!(!names.contains(&"qr:success"));
    assert_eq!(handle.state(), LoginState::Cancelled);
    assert!(!orch.session(&id("42")).unwrap().record().has_auth_code());
}

// =============================================================================
// Run and stop
// =============================================================================

#[tokio::test]
async fn test_forced_stop_is_live() {
    let orch = orchestrator(
        FakeProvider::always_wait(),
        Arc::new(DeafRunner),
        settings(),
        vec![AccountRecord::new("1", "deaf")],
    );
    orch.load_accounts().await.unwrap();
    orch.start_bot(&id("1")).await.unwrap();

    let started = Instant::now();
    orch.stop_bot(&id("1")).await.unwrap();

    assert_eq!(orch.session(&id("1")).unwrap().status(), SessionStatus::Stopped);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200), "stopped too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "stop took {elapsed:?}");
}

#[tokio::test]
async fn test_missing_auth_code_faults_until_reset() {
    let orch = orchestrator(
        FakeProvider::always_wait(),
        Arc::new(FarmRunner),
        settings(),
        vec![AccountRecord::new("1", "fresh")],
    );
    orch.load_accounts().await.unwrap();
    let mut status = orch.subscribe("dashboard", Topic::StatusChanges);

    orch.start_bot(&id("1")).await.unwrap();
    wait_for_status(&orch, "1", SessionStatus::Error).await;

    let mut saw_error = false;
    while let Some(event) = status.try_recv() {
        saw_error |= matches!(event, BotEvent::BotError { .. });
    }
    assert!(saw_error);

    orch.reset_bot(&id("1")).await.unwrap();
    assert_eq!(orch.session(&id("1")).unwrap().status(), SessionStatus::Idle);
}

// =============================================================================
// Registry-wide operations
// =============================================================================

#[tokio::test]
async fn test_auto_start_survives_one_failure() {
    let accounts = (1..=4)
        .map(|i| {
            AccountRecord::new(i.to_string(), format!("bot {i}"))
                .with_auto_start(true)
                .with_config(serde_json::json!({}))
        })
        .map(|mut record| {
            record.auth_code = Some("xyz".to_string());
            record
        })
        .collect();
    let orch = orchestrator(FakeProvider::always_wait(), Arc::new(FarmRunner), settings(), accounts);
    orch.load_accounts().await.unwrap();
    orch.start_bot(&id("3")).await.unwrap();

    let report = orch.auto_start_bots().await.unwrap();

    assert_eq!(report.started.len(), 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, id("3"));
    for summary in orch.list_accounts() {
        assert_eq!(summary.status, SessionStatus::Running, "{}", summary.id);
    }

    orch.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_twice() {
    let accounts = vec![AccountRecord::new("1", "a"), AccountRecord::new("2", "b")];
    let orch = orchestrator(FakeProvider::always_wait(), Arc::new(DeafRunner), settings(), accounts);
    orch.load_accounts().await.unwrap();
    orch.start_bot(&id("1")).await.unwrap();
    orch.start_login(&id("2")).await.unwrap();

    assert_eq!(orch.shutdown().await, 2);
    assert!(orch.list_accounts().is_empty());
    assert_eq!(orch.shutdown().await, 0);
    assert!(orch.list_accounts().is_empty());
}

#[tokio::test]
async fn test_event_logger_persists_account_events() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let orch = orchestrator(
        FakeProvider::waits_then_ok(1, "t1"),
        Arc::new(FarmRunner),
        settings(),
        vec![AccountRecord::new("42", "farm")],
    );
    let cancel = CancellationToken::new();
    let logger = spawn_event_logger(orch.hub().clone(), temp_dir.path(), cancel.clone()).unwrap();
    orch.load_accounts().await.unwrap();

    orch.start_login(&id("42")).await.unwrap().wait().await;
    wait_for_status(&orch, "42", SessionStatus::Idle).await;
    cancel.cancel();
    logger.await.unwrap();

    let entries = read_account_events(temp_dir.path(), &id("42")).unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.event.event_name()).collect();
    assert!(names.contains(&"qr:success"));
    assert!(names.contains(&"botLog"));
    assert_eq!(names.iter().filter(|n| **n == "bot:statusChange").count(), 2);
}
