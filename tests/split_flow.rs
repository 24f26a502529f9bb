// End-to-end split flow against an in-process backend (axum on an ephemeral port)

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use flowsplit::allocation::{percent_of, round_cents, segments_from_buckets};
use flowsplit::api::types::{
    ActionExecutionResult, ActionResultStatus, Bucket, BucketType, CreateSplitPlan, Deposit,
    DepositStatus, PlanActionInput, PlanStatus, SplitAction, SplitExecutionResponse, SplitPlan,
    SplitPlanPreview,
};
use flowsplit::api::{BucketApi, PlanApi};
use flowsplit::buckets::BucketBook;
use flowsplit::flow::backend::BackendTransfers;
use flowsplit::flow::{BucketStatus, ExecutionStatus, FlowError, FlowState, SourceAccount};
use flowsplit::{ApiClient, ClientConfig, FlowStep, SplitFlowController};

const TOKEN: &str = "test-token";

#[derive(Default)]
struct Backend {
    buckets: Vec<Bucket>,
    deposits: Vec<Deposit>,
    plan: Option<SplitPlan>,
    /// Buckets whose actions only execute through the retry endpoint
    stuck: HashSet<String>,
    approvals: u32,
    retries: u32,
}

type Shared = Arc<Mutex<Backend>>;
type Reply = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn fail(status: StatusCode, detail: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "detail": detail })))
}

fn authorize(headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    let expected = format!("Bearer {}", TOKEN);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(fail(StatusCode::UNAUTHORIZED, "Not authenticated")),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Reply {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))
}

/// The backend's preview split: fixed buckets first, then percentages of the
/// rest (normalized above 100), with any drift folded into the first action
fn server_allocation(total_amount: f64, buckets: &[Bucket]) -> Vec<PlanActionInput> {
    let mut actions: Vec<PlanActionInput> = Vec::new();
    let mut remaining = total_amount;

    for bucket in buckets.iter().filter(|b| b.bucket_type == BucketType::Fixed) {
        let amount = bucket.allocation_value.min(remaining);
        if amount > 0.0 {
            actions.push(PlanActionInput { bucket_id: bucket.id.clone(), amount: round_cents(amount) });
            remaining -= amount;
        }
    }

    let percentage: Vec<&Bucket> = buckets
        .iter()
        .filter(|b| b.bucket_type == BucketType::Percentage)
        .collect();
    let total_percentage: f64 = percentage.iter().map(|b| b.allocation_value).sum();
    if total_percentage > 0.0 && remaining > 0.0 {
        for bucket in percentage {
            let share = if total_percentage > 100.0 {
                bucket.allocation_value / total_percentage * 100.0
            } else {
                bucket.allocation_value
            };
            let amount = round_cents(percent_of(remaining, share));
            if amount > 0.0 {
                actions.push(PlanActionInput { bucket_id: bucket.id.clone(), amount });
            }
        }
    }

    let allocated: f64 = actions.iter().map(|a| a.amount).sum();
    if let Some(first) = actions.first_mut() {
        if (total_amount - allocated).abs() > 0.01 {
            first.amount = round_cents(first.amount + (total_amount - allocated));
        }
    }
    actions
}

async fn list_buckets(State(db): State<Shared>, headers: HeaderMap) -> Reply {
    authorize(&headers)?;
    to_json(&db.lock().buckets)
}

async fn reorder_buckets(State(db): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    authorize(&headers)?;
    let ids: Vec<String> = serde_json::from_value(body["bucket_ids"].clone())
        .map_err(|_| fail(StatusCode::UNPROCESSABLE_ENTITY, "bucket_ids required"))?;

    let mut db = db.lock();
    if ids.len() != db.buckets.len() || ids.iter().any(|id| !db.buckets.iter().any(|b| &b.id == id)) {
        return Err(fail(StatusCode::BAD_REQUEST, "Bucket list does not match"));
    }
    for bucket in db.buckets.iter_mut() {
        bucket.sort_order = ids.iter().position(|id| id == &bucket.id).unwrap_or(0) as i32;
    }
    db.buckets.sort_by_key(|b| b.sort_order);
    to_json(&db.buckets)
}

async fn pending_deposits(State(db): State<Shared>, headers: HeaderMap) -> Reply {
    authorize(&headers)?;
    let pending: Vec<Deposit> = db
        .lock()
        .deposits
        .iter()
        .filter(|d| d.status == DepositStatus::Pending)
        .cloned()
        .collect();
    to_json(&pending)
}

async fn get_deposit(State(db): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Reply {
    authorize(&headers)?;
    let db = db.lock();
    let deposit = db
        .deposits
        .iter()
        .find(|d| d.id == id)
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "Deposit not found"))?;
    to_json(deposit)
}

async fn preview_plan(State(db): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Reply {
    authorize(&headers)?;
    let db = db.lock();
    let deposit = db
        .deposits
        .iter()
        .find(|d| d.id == id)
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "Deposit not found"))?;
    let preview = SplitPlanPreview {
        deposit_id: deposit.id.clone(),
        total_amount: deposit.amount,
        actions: server_allocation(deposit.amount, &db.buckets),
    };
    to_json(&preview)
}

async fn create_plan(State(db): State<Shared>, headers: HeaderMap, Json(body): Json<CreateSplitPlan>) -> Reply {
    authorize(&headers)?;
    let mut db = db.lock();
    if !db.deposits.iter().any(|d| d.id == body.deposit_id) {
        return Err(fail(StatusCode::NOT_FOUND, "Deposit not found"));
    }
    let plan = SplitPlan {
        id: "plan-1".to_string(),
        deposit_id: body.deposit_id.clone(),
        total_amount: body.total_amount,
        status: PlanStatus::Draft,
        approved_at: None,
        executed_at: None,
        actions: body
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| SplitAction {
                id: format!("action-{}", i + 1),
                split_plan_id: "plan-1".to_string(),
                bucket_id: a.bucket_id.clone(),
                amount: a.amount,
                executed: false,
                executed_at: None,
            })
            .collect(),
    };
    db.plan = Some(plan.clone());
    to_json(&plan)
}

async fn approve_plan(State(db): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Reply {
    authorize(&headers)?;
    let mut db = db.lock();
    db.approvals += 1;
    let plan = db
        .plan
        .as_mut()
        .filter(|p| p.id == id)
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "Split plan not found"))?;
    if plan.status != PlanStatus::Draft && plan.status != PlanStatus::PendingApproval {
        return Err(fail(StatusCode::BAD_REQUEST, "Plan already approved"));
    }
    plan.status = PlanStatus::Approved;
    plan.approved_at = Some(chrono::Utc::now());
    let plan = plan.clone();
    to_json(&plan)
}

/// Each poll executes the next open action, skipping stuck buckets
async fn plan_by_deposit(State(db): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Reply {
    authorize(&headers)?;
    let mut db = db.lock();
    let stuck = db.stuck.clone();
    let plan = db
        .plan
        .as_mut()
        .filter(|p| p.deposit_id == id)
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "Split plan not found"))?;

    if plan.status != PlanStatus::Draft {
        plan.status = PlanStatus::Executing;
        if let Some(action) = plan
            .actions
            .iter_mut()
            .find(|a| !a.executed && !stuck.contains(&a.bucket_id))
        {
            action.executed = true;
            action.executed_at = Some(chrono::Utc::now());
        }
        if plan.actions.iter().all(|a| a.executed) {
            plan.status = PlanStatus::Completed;
        }
    }
    let plan = plan.clone();
    to_json(&plan)
}

async fn retry_plan(State(db): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Reply {
    authorize(&headers)?;
    let mut db = db.lock();
    db.retries += 1;
    let plan = db
        .plan
        .as_mut()
        .filter(|p| p.id == id)
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "Split plan not found"))?;

    let mut results = Vec::new();
    for action in plan.actions.iter_mut().filter(|a| !a.executed) {
        action.executed = true;
        results.push(ActionExecutionResult {
            action_id: Some(action.id.clone()),
            bucket_id: action.bucket_id.clone(),
            status: ActionResultStatus::Completed,
            amount: action.amount,
            error: None,
            external_url: None,
            transaction_id: Some(format!("tx-{}", action.id)),
        });
    }
    plan.status = PlanStatus::Completed;

    let resp = SplitExecutionResponse {
        plan_id: plan.id.clone(),
        status: "completed".to_string(),
        total_amount: plan.total_amount,
        completed_amount: results.iter().map(|r| r.amount).sum(),
        failed_amount: 0.0,
        manual_amount: 0.0,
        action_results: results,
        completed_at: Some(chrono::Utc::now()),
    };
    to_json(&resp)
}

fn bucket(id: &str, kind: BucketType, value: f64, sort_order: i32) -> Bucket {
    Bucket {
        id: id.to_string(),
        name: id.to_string(),
        emoji: None,
        color: Some("#0EA5A5".to_string()),
        bucket_type: kind,
        allocation_value: value,
        target_amount: None,
        current_balance: 0.0,
        sort_order,
        is_active: true,
    }
}

fn seeded() -> Backend {
    Backend {
        buckets: vec![
            bucket("savings", BucketType::Percentage, 15.0, 1),
            bucket("tithe", BucketType::Percentage, 10.0, 0),
            bucket("emergency", BucketType::Fixed, 120.0, 2),
        ],
        deposits: vec![Deposit {
            id: "dep-1".to_string(),
            amount: 1200.0,
            status: DepositStatus::Pending,
            source: Some("Acme Payroll".to_string()),
            description: None,
            detected_at: chrono::Utc::now(),
            processed_at: None,
        }],
        ..Default::default()
    }
}

async fn spawn_backend(backend: Backend) -> (String, Shared) {
    let db: Shared = Arc::new(Mutex::new(backend));
    let api = Router::new()
        .route("/buckets", get(list_buckets))
        .route("/buckets/reorder", post(reorder_buckets))
        .route("/deposits/pending", get(pending_deposits))
        .route("/deposits/:id", get(get_deposit))
        .route("/split-plans", post(create_plan))
        .route("/split-plans/preview/:id", get(preview_plan))
        .route("/split-plans/by-deposit/:id", get(plan_by_deposit))
        .route("/split-plans/:id/approve", post(approve_plan))
        .route("/split-plans/:id/retry", post(retry_plan));
    let app = Router::new().nest("/api/v1", api).with_state(db.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/api/v1", addr), db)
}

fn client(base_url: &str, token: Option<&str>) -> (ApiClient, ClientConfig) {
    let cfg = ClientConfig {
        api_base_url: base_url.to_string(),
        access_token: token.map(str::to_string),
        timeout_ms: 2_000,
        completion_delay_ms: 0,
        ..Default::default()
    };
    (ApiClient::new(&cfg).unwrap(), cfg)
}

async fn flow_at_confirm(api: &ApiClient) -> SplitFlowController {
    let deposit = api.get_deposit("dep-1").await.unwrap();
    let mut book = BucketBook::new();
    book.refresh(api).await.unwrap();

    let mut flow = SplitFlowController::with_completion_delay(Duration::ZERO);
    flow.start_from_deposit(&deposit, Some(SourceAccount::new("acct-1", "Checking")))
        .unwrap();
    flow.set_segments(segments_from_buckets(book.buckets(), deposit.amount));
    flow.continue_to_allocate().unwrap();
    flow.proceed_to_confirm().unwrap();
    flow
}

#[tokio::test]
async fn test_split_runs_to_completion() {
    let (base, db) = spawn_backend(seeded()).await;
    let (api, _) = client(&base, Some(TOKEN));

    let mut flow = flow_at_confirm(&api).await;
    let order: Vec<&str> = flow
        .state()
        .allocations
        .iter()
        .map(|a| a.bucket_id.as_str())
        .collect();
    assert_eq!(order, vec!["tithe", "savings", "emergency"]);
    // fixed 120 of 1200 shows up as 10%
    assert_eq!(flow.state().allocations[2].percentage, 10.0);

    let transfers = BackendTransfers::new(&api, Duration::from_millis(5), Some(50));
    let status = flow.confirm_split(&transfers).await.unwrap();

    assert_eq!(status, ExecutionStatus::Complete);
    assert_eq!(flow.current_step(), FlowStep::Complete);
    assert_eq!(transfers.plan_id().as_deref(), Some("plan-1"));

    let db = db.lock();
    let plan = db.plan.as_ref().unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(db.approvals, 1);
    let amounts: Vec<f64> = plan.actions.iter().map(|a| a.amount).collect();
    assert_eq!(amounts, vec![120.0, 180.0, 120.0]);
}

#[tokio::test]
async fn test_stuck_bucket_fails_then_retry_completes() {
    let mut backend = seeded();
    backend.stuck.insert("emergency".to_string());
    let (base, db) = spawn_backend(backend).await;
    let (api, _) = client(&base, Some(TOKEN));

    let mut flow = flow_at_confirm(&api).await;
    let transfers = BackendTransfers::new(&api, Duration::from_millis(5), Some(4));

    let status = flow.confirm_split(&transfers).await.unwrap();

    assert_eq!(status, ExecutionStatus::Partial);
    assert_eq!(flow.current_step(), FlowStep::Processing);
    assert_eq!(flow.state().status_of("tithe"), Some(BucketStatus::Complete));
    assert_eq!(flow.state().status_of("savings"), Some(BucketStatus::Complete));
    assert_eq!(flow.state().status_of("emergency"), Some(BucketStatus::Error));
    assert!(flow
        .state()
        .error_of("emergency")
        .unwrap()
        .starts_with("Timed out"));

    let status = flow.retry(&transfers).await.unwrap();

    assert_eq!(status, ExecutionStatus::Complete);
    assert_eq!(flow.current_step(), FlowStep::Complete);
    assert_eq!(flow.state().error_of("emergency"), None);
    assert_eq!(db.lock().retries, 1);
}

#[tokio::test]
async fn test_existing_plan_is_reused() {
    let (base, db) = spawn_backend(seeded()).await;
    let (api, _) = client(&base, Some(TOKEN));

    let created = api
        .create_split_plan(&CreateSplitPlan {
            deposit_id: "dep-1".to_string(),
            total_amount: 1200.0,
            actions: vec![
                PlanActionInput { bucket_id: "tithe".into(), amount: 120.0 },
                PlanActionInput { bucket_id: "savings".into(), amount: 180.0 },
                PlanActionInput { bucket_id: "emergency".into(), amount: 120.0 },
            ],
        })
        .await
        .unwrap();
    api.approve_split_plan(&created.id).await.unwrap();

    let mut flow = flow_at_confirm(&api).await;
    let transfers = BackendTransfers::new(&api, Duration::from_millis(5), Some(50));
    flow.confirm_split(&transfers).await.unwrap();

    // the approved plan was picked up, not approved again
    assert_eq!(db.lock().approvals, 1);
    assert_eq!(flow.current_step(), FlowStep::Complete);
}

#[tokio::test]
async fn test_unknown_deposit_leaves_flow() {
    let (base, _db) = spawn_backend(seeded()).await;
    let (api, _) = client(&base, Some(TOKEN));

    let mut flow = SplitFlowController::with_completion_delay(Duration::ZERO);
    flow.start_flow(500.0, Some(SourceAccount::new("acct-1", "Checking")))
        .unwrap();
    flow.set_segments(vec![flowsplit::Segment::new("tithe", "Tithe", 10.0, "#000")]);
    flow.continue_to_allocate().unwrap();
    flow.proceed_to_confirm().unwrap();

    let transfers = BackendTransfers::new(&api, Duration::from_millis(5), Some(5));
    let err = flow.confirm_split(&transfers).await.unwrap_err();

    assert!(matches!(err, FlowError::PlanNotFound(_)));
    assert_eq!(flow.state(), &FlowState::default());
}

#[tokio::test]
async fn test_server_detail_is_surfaced() {
    let (base, _db) = spawn_backend(seeded()).await;
    let (anonymous, _) = client(&base, None);

    let err = anonymous.get_buckets().await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(err.to_string(), "Not authenticated");

    let (api, _) = client(&base, Some(TOKEN));
    let err = api.get_deposit("nope").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_preview_and_pending_deposits() {
    let (base, _db) = spawn_backend(seeded()).await;
    let (api, _) = client(&base, Some(TOKEN));

    let pending = api.pending_deposits().await.unwrap();
    assert_eq!(pending.len(), 1);

    let preview = api.preview_split_plan("dep-1").await.unwrap();
    let amounts: Vec<(String, f64)> = preview
        .actions
        .into_iter()
        .map(|a| (a.bucket_id, a.amount))
        .collect();
    // fixed first, then percentages of the rest; the unallocated share joins the first bucket
    assert_eq!(amounts[0], ("emergency".to_string(), 930.0));
    assert_eq!(amounts[1], ("savings".to_string(), 162.0));
    assert_eq!(amounts[2], ("tithe".to_string(), 108.0));
    let total: f64 = amounts.iter().map(|(_, amount)| amount).sum();
    assert!((total - 1200.0).abs() < 0.01);
}

#[tokio::test]
async fn test_bucket_reorder_against_backend() {
    let (base, db) = spawn_backend(seeded()).await;
    let (api, _) = client(&base, Some(TOKEN));

    let mut book = BucketBook::new();
    book.refresh(&api).await.unwrap();

    let order = vec!["emergency".to_string(), "tithe".to_string(), "savings".to_string()];
    book.reorder(&api, &order).await.unwrap();
    assert_eq!(db.lock().buckets[0].id, "emergency");

    // server rejects a partial list; the local order rolls back
    let err = book.reorder(&api, &["tithe".to_string()]).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    let ids: Vec<&str> = book.buckets().iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["emergency", "tithe", "savings"]);
    assert_eq!(book.error(), Some("Bucket list does not match"));
}
