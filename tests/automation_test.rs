//! State-machine tests against a scripted fake portal.
//!
//! The fake `PageDriver` models the destination's upload surface: a queue of
//! ready-to-submit items, a single-item editor, and the submit/next/delete
//! controls. All timing runs under tokio's paused clock so pacing delays and
//! the per-item wall-clock ceiling are exercised deterministically.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stock_pilot::automation::fields::GENERIC_FALLBACK_DESCRIPTION;
use stock_pilot::automation::item_loop::ItemLoop;
use stock_pilot::automation::run_state::RunState;
use stock_pilot::core::types::{
    EmptyContentPolicy, RunConfiguration, RunOptions, Severity,
};
use stock_pilot::{PageDriver, PageGuard, RunContext, RunError};

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

const UPLOAD_URL: &str = "https://www.dreamstime.com/upload";

// ─────────────────────────────────────────────────────────────────────────────
// Fake portal
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FakeItem {
    edit_id: u64,
    scraped_id: String,
    title: String,
    description: String,
}

impl FakeItem {
    fn new(edit_id: u64, scraped_id: &str, title: &str, description: &str) -> Self {
        Self {
            edit_id,
            scraped_id: scraped_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Default)]
struct PortalState {
    queue: Vec<FakeItem>,
    open: Option<FakeItem>,
    submitted: Vec<FakeItem>,
    deleted: Vec<FakeItem>,
    url: String,
    challenge_active: bool,
    /// When set, the first key-down clears the challenge (press-and-hold works).
    challenge_solvable_by_hold: bool,
    /// Extra latency injected into every field write.
    field_write_delay: Duration,
    submit_clicks: u32,
    navigations: u32,
    key_downs: u32,
    key_ups: u32,
}

struct FakePortal {
    state: Mutex<PortalState>,
}

impl FakePortal {
    fn with_queue(queue: Vec<FakeItem>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PortalState {
                queue,
                url: UPLOAD_URL.to_string(),
                ..Default::default()
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PortalState> {
        self.state.lock().unwrap()
    }

    fn submitted_ids(&self) -> Vec<String> {
        self.lock().submitted.iter().map(|i| i.scraped_id.clone()).collect()
    }
}

const ENTRY_SELECTORS: &[&str] = &[
    "div.js-readyToSubmit a.js-upload-edit",
    "a.js-upload-edit",
    "div.upload-item a",
];

#[async_trait]
impl PageDriver for FakePortal {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut s = self.lock();
        s.navigations += 1;
        s.url = url.to_string();
        // Leaving the editor returns the open item to the head of the queue.
        if let Some(open) = s.open.take() {
            s.queue.insert(0, open);
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.lock().url.clone())
    }

    async fn title(&self) -> Result<String> {
        let s = self.lock();
        Ok(if s.challenge_active {
            "Access Denied".to_string()
        } else {
            "Upload management".to_string()
        })
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let s = self.lock();
        let n = if ENTRY_SELECTORS.contains(&selector) {
            s.queue.len()
        } else {
            match selector {
                "input#title" | "textarea#description" | "#js-originalfilename"
                | "a#submitbutton" | "#js-next-submit" | "a#js-delete-submit" => {
                    usize::from(s.open.is_some())
                }
                "a#js-upload span" => 1,
                _ => 0,
            }
        };
        Ok(n)
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let mut s = self.lock();
        if ENTRY_SELECTORS.contains(&selector) {
            if s.open.is_none() {
                if s.queue.is_empty() {
                    return Err(anyhow!("no edit targets left"));
                }
                let item = s.queue.remove(0);
                s.url = format!("https://www.dreamstime.com/editimage/{}", item.edit_id);
                s.open = Some(item);
            }
            return Ok(());
        }
        match selector {
            "a#submitbutton" => {
                s.submit_clicks += 1;
                let item = s.open.take().ok_or_else(|| anyhow!("no item open"))?;
                s.submitted.push(item);
                Ok(())
            }
            "#js-next-submit" => {
                if let Some(current) = s.open.take() {
                    s.queue.push(current);
                    let next = s.queue.remove(0);
                    s.open = Some(next);
                }
                Ok(())
            }
            "a#js-delete-submit" => {
                let item = s.open.take().ok_or_else(|| anyhow!("no item open"))?;
                s.deleted.push(item);
                Ok(())
            }
            _ => Err(anyhow!("unknown control: {}", selector)),
        }
    }

    async fn type_text(&self, _selector: &str, _text: &str, _delay: Duration) -> Result<()> {
        Ok(())
    }

    async fn read_value(&self, selector: &str) -> Result<String> {
        let s = self.lock();
        Ok(match (selector, s.open.as_ref()) {
            ("input#title", Some(item)) => item.title.clone(),
            ("textarea#description", Some(item)) => item.description.clone(),
            _ => String::new(),
        })
    }

    async fn inner_text(&self, selector: &str) -> Result<String> {
        let s = self.lock();
        Ok(match selector {
            "#js-originalfilename" => s
                .open
                .as_ref()
                .map(|i| i.scraped_id.clone())
                .unwrap_or_default(),
            "a#js-upload span" => (s.queue.len() + usize::from(s.open.is_some())).to_string(),
            _ => String::new(),
        })
    }

    async fn set_field_value_with_events(&self, selector: &str, value: &str) -> Result<()> {
        let delay = self.lock().field_write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut s = self.lock();
        let item = s.open.as_mut().ok_or_else(|| anyhow!("no item open"))?;
        match selector {
            "input#title" => item.title = value.to_string(),
            "textarea#description" => item.description = value.to_string(),
            _ => return Err(anyhow!("unknown field: {}", selector)),
        }
        Ok(())
    }

    async fn select_option(&self, _selector: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let started = tokio::time::Instant::now();
        loop {
            if self.count(selector).await? > 0 {
                return Ok(true);
            }
            if started.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn ready_state(&self, _timeout: Duration) -> Result<String> {
        Ok("complete".to_string())
    }

    async fn body_text(&self) -> Result<String> {
        let s = self.lock();
        Ok(if s.challenge_active {
            "Press & Hold to confirm you are a human".to_string()
        } else {
            "Ready to submit".to_string()
        })
    }

    async fn focus(&self, _selector: &str) -> Result<()> {
        Ok(())
    }

    async fn key_down(&self, _key: &str) -> Result<()> {
        let mut s = self.lock();
        s.key_downs += 1;
        if s.challenge_solvable_by_hold {
            s.challenge_active = false;
        }
        Ok(())
    }

    async fn key_up(&self, _key: &str) -> Result<()> {
        self.lock().key_ups += 1;
        Ok(())
    }

    async fn link_hrefs(&self, selector: &str) -> Result<Vec<String>> {
        let s = self.lock();
        if selector == ENTRY_SELECTORS[0] {
            return Ok(s
                .queue
                .iter()
                .map(|i| format!("/editimage/{}", i.edit_id))
                .collect());
        }
        Ok(Vec::new())
    }

    async fn screenshot_element(&self, _selector: &str) -> Result<Vec<u8>> {
        Err(anyhow!("screenshots not supported by the fake portal"))
    }

    async fn cookies(&self) -> Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }

    async fn set_cookies(&self, _cookies: &[serde_json::Value]) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

fn config_from_json(json: &str) -> RunConfiguration {
    let options: RunOptions = serde_json::from_str(json).unwrap();
    RunConfiguration::from_options(&options)
}

async fn run_loop(
    portal: Arc<FakePortal>,
    cfg: RunConfiguration,
    empty_policy: EmptyContentPolicy,
    ctx: RunContext,
) -> (Result<(), RunError>, RunState, RunContext) {
    let driver: Arc<dyn PageDriver> = portal;
    let guard = PageGuard::new(Arc::clone(&driver), UPLOAD_URL);
    let mut state = RunState::new(ctx.stop_flag());
    let result = {
        let mut item_loop = ItemLoop {
            driver: Arc::clone(&driver),
            guard: &guard,
            ctx: &ctx,
            cfg: &cfg,
            upload_url: UPLOAD_URL,
            vision: None,
            empty_policy,
            state: &mut state,
        };
        item_loop.run().await
    };
    (result, state, ctx)
}

// ─────────────────────────────────────────────────────────────────────────────
// End-to-end scenarios
// ─────────────────────────────────────────────────────────────────────────────

/// Two distinct pre-filled items, quota 2 → both submitted, final success event.
#[tokio::test(start_paused = true)]
async fn two_prefilled_items_complete_the_batch() {
    init_logger();
    let portal = FakePortal::with_queue(vec![
        FakeItem::new(1001, "sunset.jpg", "Sunset over the bay", "Golden light on calm water."),
        FakeItem::new(1002, "forest.jpg", "Misty pine forest", "Fog drifting between trees."),
    ]);

    let cfg = config_from_json(r#"{"repeatCount": 2, "template": "none", "aiImage": "no"}"#);
    let (result, state, ctx) = run_loop(
        Arc::clone(&portal),
        cfg,
        EmptyContentPolicy::UseGenericFallback,
        RunContext::new(),
    )
    .await;

    result.expect("run should complete");
    assert_eq!(state.processed, 2);
    assert_eq!(state.successful, 2);
    assert_eq!(portal.submitted_ids(), vec!["sunset.jpg", "forest.jpg"]);

    let events = ctx.events_snapshot();
    let last = events.last().expect("events emitted");
    assert_eq!(last.severity, Severity::Success);
    assert!(last.message.contains("Completed processing 2 image(s)"));
}

/// Empty item + unavailable generator, generic-fallback policy → the item is
/// still submitted, carrying the documented placeholder content.
#[tokio::test(start_paused = true)]
async fn empty_item_generic_fallback_is_submitted() {
    init_logger();
    let portal = FakePortal::with_queue(vec![FakeItem::new(2001, "IMG_0001.png", "", "")]);

    let cfg = config_from_json(r#"{"repeatCount": 1, "template": "none", "aiImage": "no"}"#);
    let (result, state, _ctx) = run_loop(
        Arc::clone(&portal),
        cfg,
        EmptyContentPolicy::UseGenericFallback,
        RunContext::new(),
    )
    .await;

    result.expect("run should complete");
    assert_eq!(state.processed, 1);
    assert_eq!(state.successful, 1);

    let submitted = portal.lock().submitted.clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].title, "AI Generated Image IMG_0001.png");
    assert_eq!(submitted[0].description, GENERIC_FALLBACK_DESCRIPTION);
}

/// Same item under `requireGeneration` → never submitted; the loop drains
/// without counting it as a success.
#[tokio::test(start_paused = true)]
async fn empty_item_require_generation_is_skipped() {
    init_logger();
    let portal = FakePortal::with_queue(vec![FakeItem::new(2002, "IMG_0002.png", "", "")]);

    let cfg = config_from_json(r#"{"repeatCount": 1, "template": "none", "aiImage": "no"}"#);
    let (result, state, _ctx) = run_loop(
        Arc::clone(&portal),
        cfg,
        EmptyContentPolicy::RequireGeneration,
        RunContext::new(),
    )
    .await;

    result.expect("run should end gracefully");
    assert_eq!(state.successful, 0);
    assert!(portal.lock().submitted.is_empty(), "skip policy must never submit");
}

/// `skip` policy: the empty item is abandoned without even attempting generation.
#[tokio::test(start_paused = true)]
async fn empty_item_skip_policy_never_submits() {
    init_logger();
    let portal = FakePortal::with_queue(vec![FakeItem::new(2003, "IMG_0003.png", "", "")]);

    let cfg = config_from_json(r#"{"repeatCount": 1, "template": "none", "aiImage": "no"}"#);
    let (result, state, _ctx) = run_loop(
        Arc::clone(&portal),
        cfg,
        EmptyContentPolicy::Skip,
        RunContext::new(),
    )
    .await;

    result.expect("run should end gracefully");
    assert_eq!(state.successful, 0);
    assert!(portal.lock().submitted.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Duplicate handling
// ─────────────────────────────────────────────────────────────────────────────

/// Policy `stop` over scraped IDs [A, A, B]: the run ends at the second A,
/// which must never be submitted.
#[tokio::test(start_paused = true)]
async fn duplicate_stop_terminates_without_second_submit() {
    init_logger();
    let portal = FakePortal::with_queue(vec![
        FakeItem::new(3001, "A", "First copy", "desc"),
        FakeItem::new(3002, "A", "Second copy", "desc"),
        FakeItem::new(3003, "B", "Different", "desc"),
    ]);

    let cfg = config_from_json(
        r#"{"repeatCount": 99, "template": "none", "aiImage": "no", "sameIdAction": "stop"}"#,
    );
    let (result, state, _ctx) = run_loop(
        Arc::clone(&portal),
        cfg,
        EmptyContentPolicy::UseGenericFallback,
        RunContext::new(),
    )
    .await;

    result.expect("duplicate-stop is a graceful completion");
    // Only the count reached strictly before the duplicate.
    assert_eq!(state.processed, 1);
    assert_eq!(portal.lock().submit_clicks, 1, "second A must never be submitted");
    assert_eq!(portal.submitted_ids(), vec!["A"]);
}

/// Policy `skip` with MAX_RETRIES = 3 over [A, A, A, A]: the fourth
/// occurrence force-increments `processed` instead of looping forever.
#[tokio::test(start_paused = true)]
async fn duplicate_skip_force_counts_after_max_retries() {
    init_logger();
    let portal = FakePortal::with_queue(vec![
        FakeItem::new(4001, "A", "t", "d"),
        FakeItem::new(4002, "A", "t", "d"),
        FakeItem::new(4003, "A", "t", "d"),
        FakeItem::new(4004, "A", "t", "d"),
    ]);

    let cfg = config_from_json(
        r#"{"repeatCount": 2, "template": "none", "aiImage": "no", "sameIdAction": "skip"}"#,
    );
    let (result, state, _ctx) = run_loop(
        Arc::clone(&portal),
        cfg,
        EmptyContentPolicy::UseGenericFallback,
        RunContext::new(),
    )
    .await;

    result.expect("run should terminate");
    // First A is genuinely submitted; the force-count covers the second slot.
    assert_eq!(state.processed, 2);
    assert_eq!(portal.lock().submit_clicks, 1);
    assert_eq!(state.duplicate_retries, 0, "counter resets after the forced count");
}

// ─────────────────────────────────────────────────────────────────────────────
// Pacing / stop / deadlines
// ─────────────────────────────────────────────────────────────────────────────

/// A stop issued mid-run is observed at the next checkpoint and surfaces as
/// `RunError::StopRequested`, not as a failure of any item.
#[tokio::test(start_paused = true)]
async fn stop_request_interrupts_the_loop() {
    init_logger();
    let portal = FakePortal::with_queue(vec![
        FakeItem::new(5001, "one.jpg", "t1", "d1"),
        FakeItem::new(5002, "two.jpg", "t2", "d2"),
        FakeItem::new(5003, "three.jpg", "t3", "d3"),
    ]);

    let ctx = RunContext::new();
    let stopper = ctx.clone();
    tokio::spawn(async move {
        // Lands inside the first item's post-submit pacing delay.
        tokio::time::sleep(Duration::from_secs(12)).await;
        stopper.request_stop();
    });

    let cfg = config_from_json(r#"{"repeatCount": 3, "template": "none", "aiImage": "no"}"#);
    let (result, state, _ctx) = run_loop(
        Arc::clone(&portal),
        cfg,
        EmptyContentPolicy::UseGenericFallback,
        ctx,
    )
    .await;

    assert!(matches!(result, Err(RunError::StopRequested)));
    assert!(state.processed >= 1, "first item completes before the stop lands");
    assert!(state.processed < 3, "stop must cut the batch short");
}

/// `pauseAfter` inserts the extra pause on schedule; the batch still completes.
#[tokio::test(start_paused = true)]
async fn pause_after_interval_is_applied() {
    init_logger();
    let portal = FakePortal::with_queue(vec![
        FakeItem::new(5101, "a.jpg", "t", "d"),
        FakeItem::new(5102, "b.jpg", "t", "d"),
        FakeItem::new(5103, "c.jpg", "t", "d"),
    ]);

    let started = tokio::time::Instant::now();
    let cfg = config_from_json(
        r#"{"repeatCount": 3, "template": "none", "aiImage": "no", "pauseAfter": 1, "pauseDuration": 30}"#,
    );
    let (result, state, _ctx) = run_loop(
        Arc::clone(&portal),
        cfg,
        EmptyContentPolicy::UseGenericFallback,
        RunContext::new(),
    )
    .await;

    result.expect("run should complete");
    assert_eq!(state.processed, 3);
    // Two scheduled pauses (after items 1 and 2; none after the last).
    assert!(
        started.elapsed() >= Duration::from_secs(60),
        "pause windows must be honored (elapsed {:?})",
        started.elapsed()
    );
}

/// An item whose cycle overruns the wall-clock ceiling is deleted, not
/// submitted, and does not count toward the quota.
#[tokio::test(start_paused = true)]
async fn overrunning_item_is_deleted_not_submitted() {
    init_logger();
    let portal = FakePortal::with_queue(vec![FakeItem::new(6001, "slow.jpg", "Prefilled", "d")]);
    portal.lock().field_write_delay = Duration::from_secs(70);

    let cfg = config_from_json(r#"{"repeatCount": 1, "template": "none", "aiImage": "no"}"#);
    let (result, state, _ctx) = run_loop(
        Arc::clone(&portal),
        cfg,
        EmptyContentPolicy::UseGenericFallback,
        RunContext::new(),
    )
    .await;

    result.expect("run should survive the abandoned item");
    assert_eq!(state.processed, 0);
    let s = portal.lock();
    assert_eq!(s.deleted.len(), 1);
    assert!(s.submitted.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Guard behavior
// ─────────────────────────────────────────────────────────────────────────────

/// A driver that stays stuck until a configured number of reloads.
struct StuckDriver {
    reloads: Mutex<u32>,
    recovers_after: Option<u32>,
}

impl StuckDriver {
    fn new(recovers_after: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            reloads: Mutex::new(0),
            recovers_after,
        })
    }

    fn reload_count(&self) -> u32 {
        *self.reloads.lock().unwrap()
    }

    fn recovered(&self) -> bool {
        match self.recovers_after {
            Some(n) => *self.reloads.lock().unwrap() >= n,
            None => false,
        }
    }
}

#[async_trait]
impl PageDriver for StuckDriver {
    async fn navigate(&self, _url: &str) -> Result<()> {
        Ok(())
    }
    async fn reload(&self) -> Result<()> {
        *self.reloads.lock().unwrap() += 1;
        Ok(())
    }
    async fn current_url(&self) -> Result<String> {
        Ok(UPLOAD_URL.to_string())
    }
    async fn title(&self) -> Result<String> {
        Ok("Upload management".to_string())
    }
    async fn count(&self, _selector: &str) -> Result<usize> {
        Ok(0)
    }
    async fn click(&self, _selector: &str) -> Result<()> {
        Err(anyhow!("page unresponsive"))
    }
    async fn type_text(&self, _s: &str, _t: &str, _d: Duration) -> Result<()> {
        Err(anyhow!("page unresponsive"))
    }
    async fn read_value(&self, _selector: &str) -> Result<String> {
        Ok(String::new())
    }
    async fn inner_text(&self, _selector: &str) -> Result<String> {
        Ok(String::new())
    }
    async fn set_field_value_with_events(&self, _s: &str, _v: &str) -> Result<()> {
        Err(anyhow!("page unresponsive"))
    }
    async fn select_option(&self, _s: &str, _v: &str) -> Result<()> {
        Err(anyhow!("page unresponsive"))
    }
    async fn wait_for_selector(&self, _s: &str, _t: Duration) -> Result<bool> {
        Ok(false)
    }
    async fn ready_state(&self, _timeout: Duration) -> Result<String> {
        if self.recovered() {
            Ok("complete".to_string())
        } else {
            Ok("loading".to_string())
        }
    }
    async fn body_text(&self) -> Result<String> {
        Ok(String::new())
    }
    async fn focus(&self, _selector: &str) -> Result<()> {
        Ok(())
    }
    async fn key_down(&self, _key: &str) -> Result<()> {
        Ok(())
    }
    async fn key_up(&self, _key: &str) -> Result<()> {
        Ok(())
    }
    async fn link_hrefs(&self, _selector: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn screenshot_element(&self, _selector: &str) -> Result<Vec<u8>> {
        Err(anyhow!("page unresponsive"))
    }
    async fn cookies(&self) -> Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }
    async fn set_cookies(&self, _cookies: &[serde_json::Value]) -> Result<()> {
        Ok(())
    }
}

/// After exactly `max` failed attempts the guard reports a terminal failure —
/// a bounded loop, not recursion, for any max including zero.
#[tokio::test(start_paused = true)]
async fn stuck_recovery_is_bounded_for_any_max() {
    init_logger();
    for max in [0u32, 1, 3, 7] {
        let driver = StuckDriver::new(None);
        let guard = PageGuard::new(
            driver.clone(),
            UPLOAD_URL,
        )
        .with_max_stuck_retries(max);

        let ctx = RunContext::new();
        let mut attempts = 0;
        let recovered = guard.recover_stuck(&ctx, &mut attempts).await.unwrap();
        assert!(!recovered, "must be terminal at max={}", max);
        assert_eq!(attempts, max, "attempt counter must stop at the bound");
        assert_eq!(driver.reload_count(), max, "one reload per attempt");
    }
}

/// Recovery succeeds once the page answers again, and the counter resets.
#[tokio::test(start_paused = true)]
async fn stuck_recovery_resets_counter_on_success() {
    init_logger();
    let driver = StuckDriver::new(Some(2));
    let guard = PageGuard::new(driver.clone(), UPLOAD_URL)
        .with_max_stuck_retries(3);

    let ctx = RunContext::new();
    let mut attempts = 0;
    let recovered = guard.recover_stuck(&ctx, &mut attempts).await.unwrap();
    assert!(recovered);
    assert_eq!(attempts, 0, "counter resets on successful recovery");
    assert_eq!(driver.reload_count(), 2);
}

/// A press-and-hold that actually works: the challenge clears during the
/// hold and no manual wait is needed.
#[tokio::test(start_paused = true)]
async fn challenge_bypass_clears_solvable_challenge() {
    init_logger();
    let portal = FakePortal::with_queue(vec![]);
    {
        let mut s = portal.lock();
        s.challenge_active = true;
        s.challenge_solvable_by_hold = true;
    }
    let driver: Arc<dyn PageDriver> = portal.clone();
    let guard = PageGuard::new(driver, UPLOAD_URL);

    let ctx = RunContext::new();
    guard.ensure_no_challenge(&ctx).await.expect("bypass should clear it");

    let s = portal.lock();
    assert!(s.key_downs >= 1, "activation key must be held");
    assert_eq!(s.key_ups, s.key_downs, "every hold must be released");
}

/// A challenge that never clears exhausts the bounded manual wait and is
/// terminal for the run.
#[tokio::test(start_paused = true)]
async fn unresolved_challenge_is_run_fatal() {
    init_logger();
    let portal = FakePortal::with_queue(vec![]);
    portal.lock().challenge_active = true;

    let driver: Arc<dyn PageDriver> = portal.clone();
    let guard = PageGuard::new(driver, UPLOAD_URL)
        .with_bypass_hold(Duration::from_millis(500), Duration::from_secs(2))
        .with_manual_wait(Duration::from_secs(1), Duration::from_secs(5));

    let ctx = RunContext::new();
    let err = guard.ensure_no_challenge(&ctx).await.unwrap_err();
    assert!(matches!(err, RunError::ChallengeUnresolved(_)));
}

/// The manual-intervention wait honors the stop flag immediately.
#[tokio::test(start_paused = true)]
async fn manual_wait_aborts_on_stop() {
    init_logger();
    let portal = FakePortal::with_queue(vec![]);
    portal.lock().challenge_active = true;

    let driver: Arc<dyn PageDriver> = portal.clone();
    let guard = PageGuard::new(driver, UPLOAD_URL)
        .with_manual_wait(Duration::from_secs(5), Duration::from_secs(300));

    let ctx = RunContext::new();
    let stopper = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        stopper.request_stop();
    });

    let started = tokio::time::Instant::now();
    let err = guard.wait_for_manual_resolution(&ctx).await.unwrap_err();
    assert!(matches!(err, RunError::StopRequested));
    assert!(
        started.elapsed() < Duration::from_secs(15),
        "stop must cut the 300s ceiling short"
    );
}

/// Fail-closed authentication matrix on the fake portal: an upload-area URL
/// is decisive, everything ambiguous is "not authenticated".
#[tokio::test(start_paused = true)]
async fn authentication_check_fails_closed() {
    init_logger();
    let portal = FakePortal::with_queue(vec![]);
    let driver: Arc<dyn PageDriver> = portal.clone();
    let guard = PageGuard::new(driver, UPLOAD_URL);

    // On the upload surface → authenticated.
    assert!(guard.is_authenticated().await);

    // Ambiguous page: no login markers, but no authenticated markers either.
    portal.lock().url = "https://www.dreamstime.com/about".to_string();
    assert!(!guard.is_authenticated().await, "ambiguity must fail closed");
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop-level error recovery
// ─────────────────────────────────────────────────────────────────────────────

/// A portal whose submit control is missing on the first pass: the item is
/// abandoned with an error event, the loop recovers by re-navigating, and
/// the second pass succeeds.
struct NoSubmitPortal {
    inner: Arc<FakePortal>,
    submit_hidden_once: AtomicBool,
}

#[async_trait]
impl PageDriver for NoSubmitPortal {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.inner.navigate(url).await
    }
    async fn reload(&self) -> Result<()> {
        self.inner.reload().await
    }
    async fn current_url(&self) -> Result<String> {
        self.inner.current_url().await
    }
    async fn title(&self) -> Result<String> {
        self.inner.title().await
    }
    async fn count(&self, selector: &str) -> Result<usize> {
        if selector == "a#submitbutton" && !self.submit_hidden_once.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        self.inner.count(selector).await
    }
    async fn click(&self, selector: &str) -> Result<()> {
        self.inner.click(selector).await
    }
    async fn type_text(&self, s: &str, t: &str, d: Duration) -> Result<()> {
        self.inner.type_text(s, t, d).await
    }
    async fn read_value(&self, selector: &str) -> Result<String> {
        self.inner.read_value(selector).await
    }
    async fn inner_text(&self, selector: &str) -> Result<String> {
        self.inner.inner_text(selector).await
    }
    async fn set_field_value_with_events(&self, s: &str, v: &str) -> Result<()> {
        self.inner.set_field_value_with_events(s, v).await
    }
    async fn select_option(&self, s: &str, v: &str) -> Result<()> {
        self.inner.select_option(s, v).await
    }
    async fn wait_for_selector(&self, s: &str, t: Duration) -> Result<bool> {
        self.inner.wait_for_selector(s, t).await
    }
    async fn ready_state(&self, t: Duration) -> Result<String> {
        self.inner.ready_state(t).await
    }
    async fn body_text(&self) -> Result<String> {
        self.inner.body_text().await
    }
    async fn focus(&self, s: &str) -> Result<()> {
        self.inner.focus(s).await
    }
    async fn key_down(&self, k: &str) -> Result<()> {
        self.inner.key_down(k).await
    }
    async fn key_up(&self, k: &str) -> Result<()> {
        self.inner.key_up(k).await
    }
    async fn link_hrefs(&self, s: &str) -> Result<Vec<String>> {
        self.inner.link_hrefs(s).await
    }
    async fn screenshot_element(&self, s: &str) -> Result<Vec<u8>> {
        self.inner.screenshot_element(s).await
    }
    async fn cookies(&self) -> Result<Vec<serde_json::Value>> {
        self.inner.cookies().await
    }
    async fn set_cookies(&self, c: &[serde_json::Value]) -> Result<()> {
        self.inner.set_cookies(c).await
    }
}

#[tokio::test(start_paused = true)]
async fn missing_submit_control_is_item_level_not_run_level() {
    init_logger();
    let inner = FakePortal::with_queue(vec![FakeItem::new(7001, "x.jpg", "t", "d")]);
    let driver: Arc<dyn PageDriver> = Arc::new(NoSubmitPortal {
        inner: Arc::clone(&inner),
        submit_hidden_once: AtomicBool::new(false),
    });

    let guard = PageGuard::new(Arc::clone(&driver), UPLOAD_URL);
    let ctx = RunContext::new();
    let cfg = config_from_json(r#"{"repeatCount": 1, "template": "none", "aiImage": "no"}"#);
    let mut state = RunState::new(ctx.stop_flag());
    let result = {
        let mut item_loop = ItemLoop {
            driver: Arc::clone(&driver),
            guard: &guard,
            ctx: &ctx,
            cfg: &cfg,
            upload_url: UPLOAD_URL,
            vision: None,
            empty_policy: EmptyContentPolicy::UseGenericFallback,
            state: &mut state,
        };
        item_loop.run().await
    };

    result.expect("a missing submit control must not end the run");
    // First pass abandons, second pass submits.
    assert_eq!(state.successful, 1);
    assert_eq!(inner.submitted_ids(), vec!["x.jpg"]);
    let events = ctx.events_snapshot();
    assert!(
        events
            .iter()
            .any(|e| e.severity == Severity::Error && e.message.contains("Submit button not found")),
        "the failure must be reported as an item-level error event"
    );
}

// Static guarantee that the real CDP driver satisfies the same seam the
// fakes implement.
#[allow(dead_code)]
fn cdp_page_is_a_page_driver(page: stock_pilot::browser::session::CdpPage) -> Box<dyn PageDriver> {
    Box::new(page)
}
