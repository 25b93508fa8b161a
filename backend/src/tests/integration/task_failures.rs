use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::services::{AdapterError, EmailConfirmation, MockEmailAdapter};
use crate::tests::fixtures::{LeavingRequestFixture, team_address};
use crate::tests::helpers::{TestHarness, executed_steps, logged_email_ids, pending_steps};
use crate::workflows::leaving::email_ids::{CLU4, LINE_MANAGER_THANKYOU};
use crate::workflows::tasks::{BASIC_TASK, NOTIFICATION_EMAIL};
use crate::workflows::{Step, Workflow};

fn thank_then_finish() -> Workflow {
    Workflow::new(
        "thanks",
        vec![
            Step::new("thank", NOTIFICATION_EMAIL)
                .as_start()
                .with_info("email_id", LINE_MANAGER_THANKYOU)
                .with_info("recipient", "line_manager")
                .with_targets(&["finish"]),
            Step::new("finish", BASIC_TASK),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn test_email_outage_is_retried_on_next_tick() {
    let harness = TestHarness::builder().workflow(thank_then_finish()).build();
    let fixture = LeavingRequestFixture::default();
    let flow = harness.start("thanks", &fixture).await;

    harness.email.set_unavailable(true);
    let report = harness.tick().await;
    assert_eq!(report.failed_tasks, 1);
    assert_eq!(report.executed, 0);
    assert!(report.errors.is_empty());

    let history = harness.history(&flow).await;
    assert_eq!(pending_steps(&history), vec!["thank"]);
    assert!(history[0].note.as_deref().unwrap().starts_with("adapter failure: email unavailable"));
    assert!(harness.notifications(&flow).await.is_empty());

    // Still down: the same record is retried, nothing new is scheduled.
    harness.tick().await;
    assert_eq!(harness.history(&flow).await.len(), 1);

    harness.email.set_unavailable(false);
    let report = harness.tick().await;
    assert_eq!(report.executed, 2);
    assert_eq!(report.finished, 1);
    assert_eq!(harness.email.sent_to(&fixture.manager_email).len(), 1);
    assert_eq!(executed_steps(&harness.history(&flow).await), vec!["thank", "finish"]);
}

#[tokio::test]
async fn test_rejected_send_is_logged_only_once_it_succeeds() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut email = MockEmailAdapter::new();
    let counter = calls.clone();
    email
        .expect_send()
        .times(2)
        .returning(move |_, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AdapterError::Rejected {
                    service: "email".to_string(),
                    message: "template not approved".to_string(),
                })
            } else {
                Ok(EmailConfirmation {
                    id: "notify-1".to_string(),
                })
            }
        });

    let harness = TestHarness::builder()
        .email(Arc::new(email))
        .workflow(
            Workflow::new(
                "clu4",
                vec![Step::new("notify_clu4", NOTIFICATION_EMAIL)
                    .as_start()
                    .with_info("email_id", CLU4)
                    .with_info("recipient", "clu4")],
            )
            .unwrap(),
        )
        .build();
    let flow = harness.start("clu4", &LeavingRequestFixture::default()).await;

    let report = harness.tick().await;
    assert_eq!(report.failed_tasks, 1);
    assert!(harness.notifications(&flow).await.is_empty());

    harness.settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(logged_email_ids(&harness.notifications(&flow).await), vec![CLU4]);
    assert!(harness.flow(&flow).await.is_finished());
    assert!(harness.email.sent_to(&team_address("clu4")).is_empty());
}
