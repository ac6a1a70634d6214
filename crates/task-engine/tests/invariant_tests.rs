//! Money-conservation and ordering invariants checked across whole
//! operation sequences.

use chrono::Utc;
use std::sync::Arc;
use task_engine::{
    BudgetEntry, MemoryFunds, NativeRewardEntry, RegistryConfig, RequestKind, RewardEntry,
    SubmissionJudgement, TaskRegistry, TaskState,
};
use task_types::{Address, NativeAmount, TaskError, TaskId, TokenAmount};

const OWNER: Address = Address::from_bytes([0x01; 32]);
const CREATOR: Address = Address::from_bytes([0x02; 32]);
const MANAGER: Address = Address::from_bytes([0x03; 32]);
const DISPUTER: Address = Address::from_bytes([0x04; 32]);
const EXECUTOR: Address = Address::from_bytes([0x05; 32]);
const HELPER: Address = Address::from_bytes([0x06; 32]);
const TKN: Address = Address::from_bytes([0x10; 32]);

fn native(units: u128) -> NativeAmount {
    NativeAmount::from_base_units(units).unwrap()
}

fn token(units: u128) -> TokenAmount {
    TokenAmount::from_base_units(units).unwrap()
}

fn deadline() -> u64 {
    Utc::now().timestamp() as u64 + 86_400
}

async fn setup() -> (Arc<MemoryFunds>, TaskRegistry) {
    let funds = Arc::new(MemoryFunds::default());
    funds.deposit_native(CREATOR, native(1_000)).await;
    funds.deposit_token(TKN, CREATOR, token(1_000)).await;
    let registry = TaskRegistry::new(RegistryConfig { owner: OWNER }, funds.clone());
    (funds, registry)
}

/// Creates a task with a 100 TKN budget and drives it to `Taken` with the
/// executor entitled to the full 100.
async fn taken_token_task(registry: &TaskRegistry) -> TaskId {
    let task_id = registry
        .create_task(
            CREATOR,
            "ipfs://task".into(),
            deadline(),
            MANAGER,
            DISPUTER,
            NativeAmount::ZERO,
            vec![BudgetEntry {
                token: TKN,
                amount: token(100),
            }],
            vec![],
        )
        .await
        .unwrap();
    let application_id = registry
        .apply_for_task(
            EXECUTOR,
            task_id,
            "ipfs://app".into(),
            vec![],
            vec![RewardEntry {
                next_token: true,
                to: EXECUTOR,
                amount: token(100),
            }],
        )
        .await
        .unwrap();
    registry
        .accept_applications(MANAGER, task_id, &[application_id])
        .await
        .unwrap();
    registry
        .take_task(EXECUTOR, task_id, application_id)
        .await
        .unwrap();
    task_id
}

async fn total_tkn(funds: &MemoryFunds) -> u128 {
    funds.token_balance(TKN, CREATOR).await
        + funds.token_balance(TKN, EXECUTOR).await
        + funds.pool_token(TKN).await
}

#[tokio::test]
async fn test_partial_payments_never_exceed_entitlement() {
    let (funds, registry) = setup().await;
    let task_id = taken_token_task(&registry).await;

    registry
        .partial_payment(MANAGER, task_id, &[], &[token(60)])
        .await
        .unwrap();
    assert_eq!(funds.token_balance(TKN, EXECUTOR).await, 60);

    // 60 already paid, only 40 remain.
    assert_eq!(
        registry
            .partial_payment(MANAGER, task_id, &[], &[token(50)])
            .await
            .unwrap_err(),
        TaskError::PartialRewardAboveFullReward
    );
    assert_eq!(funds.token_balance(TKN, EXECUTOR).await, 60);

    registry
        .partial_payment(MANAGER, task_id, &[], &[token(40)])
        .await
        .unwrap();
    assert_eq!(funds.token_balance(TKN, EXECUTOR).await, 100);
    assert_eq!(funds.pool_token(TKN).await, 0);

    // Acceptance afterwards settles nothing further.
    let submission_id = registry
        .create_submission(EXECUTOR, task_id, "ipfs://work".into())
        .await
        .unwrap();
    registry
        .review_submission(
            MANAGER,
            task_id,
            submission_id,
            SubmissionJudgement::Accepted,
            String::new(),
        )
        .await
        .unwrap();
    assert_eq!(funds.token_balance(TKN, EXECUTOR).await, 100);
    assert_eq!(total_tkn(&funds).await, 1_000);
}

#[tokio::test]
async fn test_conservation_across_every_close_path() {
    let (funds, registry) = setup().await;

    // Close via acceptance.
    let task_id = taken_token_task(&registry).await;
    let submission_id = registry
        .create_submission(EXECUTOR, task_id, "a".into())
        .await
        .unwrap();
    registry
        .review_submission(
            MANAGER,
            task_id,
            submission_id,
            SubmissionJudgement::Accepted,
            String::new(),
        )
        .await
        .unwrap();
    assert_eq!(total_tkn(&funds).await, 1_000);
    assert_eq!(funds.pool_token(TKN).await, 0);

    // Close via dispute with a partial award.
    let task_id = taken_token_task(&registry).await;
    registry
        .complete_by_dispute(DISPUTER, task_id, &[], &[token(25)])
        .await
        .unwrap();
    assert_eq!(total_tkn(&funds).await, 1_000);
    assert_eq!(funds.pool_token(TKN).await, 0);

    // Close via consented cancel.
    let task_id = taken_token_task(&registry).await;
    let request_id = registry
        .cancel_task(MANAGER, task_id, "abort".into())
        .await
        .unwrap()
        .expect("request id");
    registry
        .accept_request(EXECUTOR, task_id, RequestKind::CancelTask, request_id, true)
        .await
        .unwrap();
    assert_eq!(total_tkn(&funds).await, 1_000);
    assert_eq!(funds.pool_token(TKN).await, 0);
}

#[tokio::test]
async fn test_request_ordering_is_enforced() {
    let (_, registry) = setup().await;
    let task_id = taken_token_task(&registry).await;
    let request_id = registry
        .cancel_task(MANAGER, task_id, "abort".into())
        .await
        .unwrap()
        .expect("request id");

    // Execute before accept.
    assert_eq!(
        registry
            .execute_request(MANAGER, task_id, RequestKind::CancelTask, request_id)
            .await
            .unwrap_err(),
        TaskError::RequestNotAccepted
    );

    registry
        .accept_request(EXECUTOR, task_id, RequestKind::CancelTask, request_id, false)
        .await
        .unwrap();

    // Accept twice.
    assert_eq!(
        registry
            .accept_request(EXECUTOR, task_id, RequestKind::CancelTask, request_id, false)
            .await
            .unwrap_err(),
        TaskError::RequestAlreadyAccepted
    );

    registry
        .execute_request(EXECUTOR, task_id, RequestKind::CancelTask, request_id)
        .await
        .unwrap();
    assert_eq!(
        registry.get_task(task_id).await.unwrap().state,
        TaskState::Closed
    );
}

#[tokio::test]
async fn test_budget_and_reward_growth() {
    let (funds, registry) = setup().await;
    funds.deposit_token(TKN, HELPER, token(500)).await;

    let task_id = registry
        .create_task(
            CREATOR,
            "ipfs://task".into(),
            deadline(),
            MANAGER,
            DISPUTER,
            NativeAmount::ZERO,
            vec![BudgetEntry {
                token: TKN,
                amount: token(100),
            }],
            vec![],
        )
        .await
        .unwrap();
    let application_id = registry
        .apply_for_task(
            EXECUTOR,
            task_id,
            "ipfs://app".into(),
            vec![],
            vec![RewardEntry {
                next_token: true,
                to: EXECUTOR,
                amount: token(100),
            }],
        )
        .await
        .unwrap();

    // The raised reward does not fit the current budget.
    assert_eq!(
        registry
            .increase_reward(EXECUTOR, task_id, application_id, &[], &[token(50)])
            .await
            .unwrap_err(),
        TaskError::ManualBudgetIncreaseNeeded
    );

    // Anyone may top up the budget; the increase array is positional.
    assert_eq!(
        registry
            .increase_budget(HELPER, task_id, NativeAmount::ZERO, &[])
            .await
            .unwrap_err(),
        TaskError::BudgetLengthMismatch
    );
    registry
        .increase_budget(HELPER, task_id, NativeAmount::ZERO, &[token(50)])
        .await
        .unwrap();
    assert_eq!(funds.pool_token(TKN).await, 150);

    registry
        .increase_reward(EXECUTOR, task_id, application_id, &[], &[token(50)])
        .await
        .unwrap();
    let task = registry.get_task(task_id).await.unwrap();
    assert_eq!(task.applications[0].reward[0].amount, token(150));
}

#[tokio::test]
async fn test_underfunded_creation_leaves_no_trace() {
    let (funds, registry) = setup().await;
    let poor = Address::from_bytes([0x42; 32]);
    funds.deposit_native(poor, native(10)).await;

    assert_eq!(
        registry
            .create_task(
                poor,
                "ipfs://task".into(),
                deadline(),
                MANAGER,
                DISPUTER,
                native(5),
                vec![BudgetEntry {
                    token: TKN,
                    amount: token(100),
                }],
                vec![],
            )
            .await
            .unwrap_err(),
        TaskError::TokenTransferFailed { token: TKN }
    );

    // The native escrow from the same call was rolled back.
    assert_eq!(funds.native_balance(poor).await, 10);
    assert_eq!(funds.pool_native().await, 0);
    assert_eq!(registry.task_count(), 0);
    assert_eq!(
        registry.get_tasks(&[TaskId(0)]).await.unwrap_err(),
        TaskError::TaskDoesNotExist
    );
}

#[tokio::test]
async fn test_budget_cap_checked_before_funds_move() {
    let (funds, registry) = setup().await;
    let rich = Address::from_bytes([0x21; 32]);
    funds.deposit_native(rich, NativeAmount::MAX).await;

    let task_id = registry
        .create_task(
            rich,
            "ipfs://task".into(),
            deadline(),
            MANAGER,
            DISPUTER,
            NativeAmount::MAX,
            vec![],
            vec![],
        )
        .await
        .unwrap();

    // The committed budget already sits at the 96-bit cap; a 1-unit top-up
    // must fail before any of the helper's money moves.
    funds.deposit_native(HELPER, native(10)).await;
    assert_eq!(
        registry
            .increase_budget(HELPER, task_id, native(1), &[])
            .await
            .unwrap_err(),
        TaskError::Overflow
    );
    assert_eq!(funds.native_balance(HELPER).await, 10);
    assert_eq!(
        funds.pool_native().await,
        NativeAmount::MAX.to_base_units()
    );
    let task = registry.get_task(task_id).await.unwrap();
    assert_eq!(task.escrow.native_committed, NativeAmount::MAX);
}

#[tokio::test]
async fn test_failed_accept_and_execute_has_no_effect() {
    let (funds, registry) = setup().await;

    // A closed task gives the owner a rescue handle into the shared pool.
    let drained = registry
        .create_task(
            CREATOR,
            "ipfs://done".into(),
            deadline(),
            MANAGER,
            DISPUTER,
            NativeAmount::ZERO,
            vec![],
            vec![],
        )
        .await
        .unwrap();
    registry
        .cancel_task(MANAGER, drained, "done".into())
        .await
        .unwrap();

    // Taken task backed by a 50 native escrow.
    let task_id = registry
        .create_task(
            CREATOR,
            "ipfs://task".into(),
            deadline(),
            MANAGER,
            DISPUTER,
            native(50),
            vec![],
            vec![],
        )
        .await
        .unwrap();
    let application_id = registry
        .apply_for_task(
            EXECUTOR,
            task_id,
            "ipfs://app".into(),
            vec![NativeRewardEntry {
                to: EXECUTOR,
                amount: native(50),
            }],
            vec![],
        )
        .await
        .unwrap();
    registry
        .accept_applications(MANAGER, task_id, &[application_id])
        .await
        .unwrap();
    registry
        .take_task(EXECUTOR, task_id, application_id)
        .await
        .unwrap();
    let request_id = registry
        .cancel_task(MANAGER, task_id, "abort".into())
        .await
        .unwrap()
        .expect("request id");

    // Drain the pool so the cancel refund cannot settle.
    registry
        .rescue_native(OWNER, drained, OWNER, native(50))
        .await
        .unwrap();

    assert_eq!(
        registry
            .accept_request(EXECUTOR, task_id, RequestKind::CancelTask, request_id, true)
            .await
            .unwrap_err(),
        TaskError::NativeTransferFailed
    );

    // The failed call left nothing behind: consent rolled back, task still
    // taken.
    let task = registry.get_task(task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Taken);
    assert!(!task.requests(RequestKind::CancelTask)[0].accepted);

    // With the funds returned the same accept-and-execute goes through.
    funds.deposit_native(pool(), native(50)).await;
    registry
        .accept_request(EXECUTOR, task_id, RequestKind::CancelTask, request_id, true)
        .await
        .unwrap();
    assert_eq!(
        registry.get_task(task_id).await.unwrap().state,
        TaskState::Closed
    );
}

fn pool() -> Address {
    task_engine::MemoryFundsConfig::default().pool
}

#[tokio::test]
async fn test_malformed_schedules_rejected_at_apply() {
    let (_, registry) = setup().await;
    let task_id = registry
        .create_task(
            CREATOR,
            "ipfs://task".into(),
            deadline(),
            MANAGER,
            DISPUTER,
            native(50),
            vec![BudgetEntry {
                token: TKN,
                amount: token(100),
            }],
            vec![],
        )
        .await
        .unwrap();

    // Schedule not closed by a marker.
    assert_eq!(
        registry
            .apply_for_task(
                EXECUTOR,
                task_id,
                "a".into(),
                vec![],
                vec![RewardEntry {
                    next_token: false,
                    to: EXECUTOR,
                    amount: token(10),
                }],
            )
            .await
            .unwrap_err(),
        TaskError::RewardDoesntEndWithNextToken
    );

    // Reward group above the budget entry.
    assert_eq!(
        registry
            .apply_for_task(
                EXECUTOR,
                task_id,
                "b".into(),
                vec![],
                vec![RewardEntry {
                    next_token: true,
                    to: EXECUTOR,
                    amount: token(101),
                }],
            )
            .await
            .unwrap_err(),
        TaskError::RewardAboveBudget
    );

    // Native reward above the native budget.
    assert_eq!(
        registry
            .apply_for_task(
                EXECUTOR,
                task_id,
                "c".into(),
                vec![NativeRewardEntry {
                    to: EXECUTOR,
                    amount: native(51),
                }],
                vec![],
            )
            .await
            .unwrap_err(),
        TaskError::RewardAboveBudget
    );
}

#[tokio::test]
async fn test_split_rewards_pay_every_recipient() {
    let (funds, registry) = setup().await;
    let task_id = registry
        .create_task(
            CREATOR,
            "ipfs://task".into(),
            deadline(),
            MANAGER,
            DISPUTER,
            NativeAmount::ZERO,
            vec![BudgetEntry {
                token: TKN,
                amount: token(100),
            }],
            vec![],
        )
        .await
        .unwrap();

    // Executor splits the reward with a helper inside one budget group.
    let application_id = registry
        .apply_for_task(
            EXECUTOR,
            task_id,
            "ipfs://app".into(),
            vec![],
            vec![
                RewardEntry {
                    next_token: false,
                    to: EXECUTOR,
                    amount: token(70),
                },
                RewardEntry {
                    next_token: true,
                    to: HELPER,
                    amount: token(30),
                },
            ],
        )
        .await
        .unwrap();
    registry
        .accept_applications(MANAGER, task_id, &[application_id])
        .await
        .unwrap();
    registry
        .take_task(EXECUTOR, task_id, application_id)
        .await
        .unwrap();

    let submission_id = registry
        .create_submission(EXECUTOR, task_id, "ipfs://work".into())
        .await
        .unwrap();
    registry
        .review_submission(
            MANAGER,
            task_id,
            submission_id,
            SubmissionJudgement::Accepted,
            String::new(),
        )
        .await
        .unwrap();

    assert_eq!(funds.token_balance(TKN, EXECUTOR).await, 70);
    assert_eq!(funds.token_balance(TKN, HELPER).await, 30);
    assert_eq!(funds.pool_token(TKN).await, 0);
}
