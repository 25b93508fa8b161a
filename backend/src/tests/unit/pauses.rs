use crate::config::EngineConfig;
use crate::tests::fixtures::{self, LeavingRequestFixture, team_address};
use crate::tests::helpers::{TestHarness, executed_steps, pending_steps};
use crate::workflows::leaving::email_ids::COMAEA;
use crate::workflows::tasks::{BASIC_TASK, NOTIFICATION_EMAIL, PAUSE_TASK, PAUSE_UNTIL};
use crate::workflows::{FlowEvent, ParkReason, Step, Workflow};

fn gate(step_id: &str, task_name: &str) -> Step {
    Step::new(step_id, task_name)
        .as_start()
        .with_targets(&[step_id, "next"])
}

fn gated(name: &str, gate: Step) -> Workflow {
    Workflow::new(name, vec![gate, Step::new("next", BASIC_TASK)]).unwrap()
}

#[tokio::test]
async fn test_pause_until_waits_then_releases() {
    let harness = TestHarness::builder()
        .workflow(gated(
            "wait_for_lm",
            gate("wait", PAUSE_UNTIL).with_info("until", "line_manager_complete"),
        ))
        .build();
    let fixture = LeavingRequestFixture::default();
    let flow = harness.start("wait_for_lm", &fixture).await;

    harness.tick().await;
    harness.tick().await;

    let history = harness.history(&flow).await;
    assert_eq!(history.len(), 3);
    assert_eq!(pending_steps(&history), vec!["wait"]);
    for record in history.iter().filter(|r| r.is_executed()) {
        assert!(record.is_self_loop());
        assert!(!record.done);
    }

    harness.update_leaver(fixture.id, |r| r.line_manager_complete = Some(fixtures::at(2024, 6, 3, 11)));
    let report = harness.tick().await;
    assert_eq!(report.executed, 2);
    assert_eq!(report.finished, 1);

    let history = harness.history(&flow).await;
    assert_eq!(executed_steps(&history), vec!["wait", "wait", "wait", "next"]);
    let release = &history[2];
    assert_eq!(release.targets, vec!["next".to_string()]);
    assert!(release.done);
    assert!(harness.flow(&flow).await.is_finished());
}

#[tokio::test]
async fn test_pause_task_without_condition_proceeds() {
    let harness = TestHarness::builder()
        .workflow(gated("split", gate("hold", PAUSE_TASK)))
        .build();
    let flow = harness.start("split", &LeavingRequestFixture::default()).await;

    harness.tick().await;

    assert_eq!(executed_steps(&harness.history(&flow).await), vec!["hold", "next"]);
    assert!(harness.flow(&flow).await.is_finished());
}

#[tokio::test]
async fn test_unconditional_pause_can_be_held() {
    let harness = TestHarness::builder()
        .config(EngineConfig {
            hold_unconditional_pauses: true,
            ..EngineConfig::default()
        })
        .workflow(gated("split", gate("hold", PAUSE_TASK)))
        .build();
    let flow = harness.start("split", &LeavingRequestFixture::default()).await;

    harness.tick().await;
    harness.tick_daily(3).await;

    let history = harness.history(&flow).await;
    assert!(history.iter().filter(|r| r.is_executed()).all(|r| r.is_self_loop()));
    assert_eq!(pending_steps(&history), vec!["hold"]);
    assert!(!harness.flow(&flow).await.is_finished());
}

#[tokio::test]
async fn test_pass_condition_waits_past_leaving_date() {
    let harness = TestHarness::builder()
        // Friday, the fixture's last working day.
        .at(fixtures::at(2024, 6, 7, 9))
        .workflow(
            Workflow::new(
                "comaea",
                vec![
                    Step::new("should_notify", PAUSE_TASK)
                        .as_start()
                        .with_info("pass_condition", "after_leaving_date")
                        .with_targets(&["should_notify", "notify"]),
                    Step::new("notify", NOTIFICATION_EMAIL)
                        .with_info("email_id", COMAEA)
                        .with_info("recipient", "comaea"),
                ],
            )
            .unwrap(),
        )
        .build();
    let flow = harness.start("comaea", &LeavingRequestFixture::default()).await;

    harness.settle().await;
    // Saturday to Monday, the leaving date itself.
    harness.tick_daily(3).await;
    assert!(harness.email.sent_to(&team_address("comaea")).is_empty());

    harness.tick_daily(1).await;
    let sent = harness.email.sent_to(&team_address("comaea"));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template_id, COMAEA);
    assert!(harness.flow(&flow).await.is_finished());
}

#[tokio::test]
async fn test_pause_without_flag_fails_the_record() {
    let harness = TestHarness::builder()
        .workflow(gated("broken", gate("wait", PAUSE_UNTIL)))
        .build();
    let fixture = LeavingRequestFixture::default();
    let flow = harness.start("broken", &fixture).await;

    let report = harness
        .engine
        .notify(fixture.id, FlowEvent::LineManagerSubmitted, None)
        .await
        .unwrap();

    assert_eq!(report.parked, ParkReason::TaskFailed);
    assert_eq!(report.failed.as_deref(), Some("invalid task info: 'until' is missing"));
    let history = harness.history(&flow).await;
    assert_eq!(pending_steps(&history), vec!["wait"]);
    assert_eq!(history[0].note.as_deref(), Some("invalid task info: 'until' is missing"));
}
