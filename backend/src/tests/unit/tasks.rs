use serde_json::json;
use std::collections::HashMap;

use crate::services::{DirectoryRecord, StubDirectory};
use crate::tests::fixtures::{self, LeavingRequestFixture, SRE_CHANNEL, team_address};
use crate::tests::helpers::{TestHarness, executed_steps, logged_email_ids, pending_steps};
use crate::workflows::leaving::email_ids::*;
use crate::workflows::tasks::*;
use crate::workflows::{DueRule, FlowEvent, ParkReason, ReminderCadence, Step, Workflow};

fn workflow(name: &str, steps: Vec<Step>) -> Workflow {
    Workflow::new(name, steps).unwrap()
}

fn record_note<'a>(history: &'a [leavers_shared::TaskRecord], step_id: &str) -> Option<&'a str> {
    history
        .iter()
        .rev()
        .find(|r| r.step_id == step_id)
        .and_then(|r| r.note.as_deref())
}

#[tokio::test]
async fn test_notification_email_sent_once_per_flow() {
    let harness = TestHarness::builder()
        .workflow(workflow(
            "thanks",
            vec![
                Step::new("start", BASIC_TASK).as_start().with_targets(&["thank"]),
                Step::new("thank", NOTIFICATION_EMAIL)
                    .with_info("email_id", LINE_MANAGER_THANKYOU)
                    .with_info("recipient", "line_manager")
                    .with_targets(&["thank_again"]),
                Step::new("thank_again", NOTIFICATION_EMAIL)
                    .with_info("email_id", LINE_MANAGER_THANKYOU)
                    .with_info("recipient", "line_manager"),
            ],
        ))
        .build();
    let fixture = LeavingRequestFixture::default();
    let flow = harness.start("thanks", &fixture).await;

    harness.settle().await;

    let sent = harness.email.sent_to(&fixture.manager_email);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template_id, LINE_MANAGER_THANKYOU);
    assert_eq!(sent[0].personalisation["leaver_name"], fixture.leaver_name);

    let history = harness.history(&flow).await;
    assert_eq!(executed_steps(&history), vec!["start", "thank", "thank_again"]);
    assert_eq!(
        record_note(&history, "thank_again"),
        Some("line_manager_thankyou already sent")
    );
    assert_eq!(logged_email_ids(&harness.notifications(&flow).await), vec![LINE_MANAGER_THANKYOU]);
    assert!(harness.flow(&flow).await.is_finished());
}

#[tokio::test]
async fn test_team_email_without_mailbox_fails_and_stays_pending() {
    let mut settings = fixtures::notification_settings();
    settings.mailboxes.remove("comaea");
    let harness = TestHarness::builder()
        .settings(settings)
        .workflow(workflow(
            "comaea",
            vec![Step::new("notify", NOTIFICATION_EMAIL)
                .as_start()
                .with_info("email_id", COMAEA)
                .with_info("recipient", "comaea")],
        ))
        .build();
    let fixture = LeavingRequestFixture::default();
    let flow = harness.start("comaea", &fixture).await;

    let report = harness
        .engine
        .notify(fixture.id, FlowEvent::LeaverSubmitted, None)
        .await
        .unwrap();
    assert_eq!(report.parked, ParkReason::TaskFailed);
    assert_eq!(report.executed, 0);
    assert!(report.failed.unwrap().starts_with("no recipient"));

    let history = harness.history(&flow).await;
    assert_eq!(pending_steps(&history), vec!["notify"]);
    assert_eq!(record_note(&history, "notify"), Some("no recipient: no address known for 'comaea'"));
    assert!(harness.email.sent().is_empty());
    assert!(harness.notifications(&flow).await.is_empty());
}

#[tokio::test]
async fn test_flag_condition_follows_one_branch() {
    let harness = TestHarness::builder()
        .workflow(workflow(
            "branch",
            vec![
                Step::new("is_lm_done", FLAG_CONDITION)
                    .as_start()
                    .with_info("flag", "line_manager_complete")
                    .with_info("if_true", "done")
                    .with_info("if_false", "chase")
                    .with_targets(&["done", "chase"]),
                Step::new("done", BASIC_TASK),
                Step::new("chase", BASIC_TASK),
            ],
        ))
        .build();
    let flow = harness.start("branch", &LeavingRequestFixture::default()).await;

    harness.settle().await;

    let history = harness.history(&flow).await;
    assert_eq!(executed_steps(&history), vec!["is_lm_done", "chase"]);
    assert_eq!(history[0].targets, vec!["chase".to_string()]);
}

#[tokio::test]
async fn test_uksbs_check_reminds_hr_until_leaver_is_found() {
    let harness = TestHarness::builder()
        .directory(StubDirectory::default())
        .workflow(workflow(
            "uksbs",
            vec![
                Step::new("check", CHECK_UKSBS_LEAVER)
                    .as_start()
                    .with_info("if_found", "found")
                    .with_info("if_missing", "remind")
                    .with_targets(&["remind", "found"]),
                Step::new("remind", REMINDER_EMAIL)
                    .with_info("recipient", "hr")
                    .with_reminder(ReminderCadence::daily(
                        LEAVER_NOT_IN_UKSBS_REMINDER,
                        DueRule::FlowStart { working_days: 0 },
                    ))
                    .with_targets(&["check"]),
                Step::new("found", BASIC_TASK),
            ],
        ))
        .build();
    let fixture = LeavingRequestFixture::default();
    let flow = harness.start("uksbs", &fixture).await;

    let first = harness.tick().await;
    assert_eq!(first.executed, 2);
    harness.tick().await;
    harness.tick().await;

    // Daily cadence: one reminder however often the same day is ticked.
    assert_eq!(harness.email.sent_to(&team_address("hr")).len(), 1);
    assert_eq!(pending_steps(&harness.history(&flow).await), vec!["check"]);

    harness.directory.insert(DirectoryRecord {
        id: "20001".to_string(),
        email: fixture.leaver_email.clone(),
        name: Some(fixture.leaver_name.clone()),
    });
    harness.settle().await;

    let history = harness.history(&flow).await;
    assert!(harness.flow(&flow).await.is_finished());
    let found = history.iter().find(|r| r.step_id == "found").unwrap();
    assert_eq!(found.task_info["uksbs_checked"], json!(true));
    assert_eq!(harness.email.sent_to(&team_address("hr")).len(), 1);
}

#[tokio::test]
async fn test_payroll_submission_is_not_repeated() {
    let harness = TestHarness::builder()
        .workflow(workflow(
            "payroll",
            vec![
                Step::new("submit", PAYROLL_SUBMISSION).as_start().with_targets(&["resubmit"]),
                Step::new("resubmit", PAYROLL_SUBMISSION),
            ],
        ))
        .build();
    let fixture = LeavingRequestFixture::default();
    let flow = harness.start("payroll", &fixture).await;

    harness.settle().await;

    let submissions = harness.payroll.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].leaver_email, fixture.leaver_email);
    assert_eq!(submissions[0].leaving_date, Some(fixture.leaving_date));

    let history = harness.history(&flow).await;
    let resubmit = history.iter().find(|r| r.step_id == "resubmit").unwrap();
    assert_eq!(resubmit.task_info["payroll_reference"], json!("stub-payroll-1"));
    assert_eq!(resubmit.note.as_deref(), Some("already submitted (stub-payroll-1)"));
}

#[tokio::test]
async fn test_service_desk_ticket_for_configured_group() {
    let harness = TestHarness::builder()
        .workflow(workflow(
            "tickets",
            vec![
                Step::new("lsd", SERVICE_DESK_TICKET)
                    .as_start()
                    .with_info("group", "lsd_team")
                    .with_info("subject", "Leaver account removal")
                    .with_targets(&["unknown"]),
                Step::new("unknown", SERVICE_DESK_TICKET).with_info("group", "facilities"),
            ],
        ))
        .build();
    let fixture = LeavingRequestFixture::default();
    let flow = harness.start("tickets", &fixture).await;

    harness.tick().await;

    let opened = harness.tickets.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].group, "LSD Team");
    assert_eq!(opened[0].subject, format!("Leaver account removal: {}", fixture.leaver_name));
    assert!(opened[0].body.contains(&fixture.manager_email));

    let history = harness.history(&flow).await;
    assert_eq!(pending_steps(&history), vec!["unknown"]);
    assert_eq!(
        record_note(&history, "unknown"),
        Some("no ticket group: 'facilities' is not configured")
    );
}

#[tokio::test]
async fn test_steps_sharing_a_group_each_open_a_ticket() {
    let harness = TestHarness::builder()
        .workflow(workflow(
            "tickets",
            vec![
                Step::new("remove_accounts", SERVICE_DESK_TICKET)
                    .as_start()
                    .with_info("group", "lsd_team")
                    .with_targets(&["collect_kit"]),
                Step::new("collect_kit", SERVICE_DESK_TICKET).with_info("group", "lsd_team"),
            ],
        ))
        .build();
    let flow = harness.start("tickets", &LeavingRequestFixture::default()).await;

    harness.settle().await;

    let opened = harness.tickets.opened();
    assert_eq!(opened.len(), 2);
    assert!(opened.iter().all(|t| t.group == "LSD Team"));
    assert_eq!(
        logged_email_ids(&harness.notifications(&flow).await),
        vec!["ticket:remove_accounts", "ticket:collect_kit"]
    );
    assert!(harness.flow(&flow).await.is_finished());
}

#[tokio::test]
async fn test_sre_reminder_replies_in_chat_thread() {
    let harness = TestHarness::builder()
        // Day after the fixture's last working day.
        .at(fixtures::at(2024, 6, 10, 9))
        .workflow(workflow(
            "sre",
            vec![
                Step::new("post", CHAT_NOTIFICATION).as_start().with_targets(&["remind"]),
                Step::new("remind", PROCESSOR_REMINDER_EMAIL)
                    .with_info("recipient", "sre")
                    .with_info("until", "sre_complete")
                    .with_info("chat_thread", true)
                    .with_reminder(ReminderCadence::processor_fan(SRE_REMINDER, &["day_after_lwd"]))
                    .with_targets(&["remind", "done"]),
                Step::new("done", BASIC_TASK),
            ],
        ))
        .build();
    let fixture = LeavingRequestFixture::default();
    let flow = harness.start("sre", &fixture).await;

    harness.settle().await;

    let posts = harness.chat.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].channel_id, SRE_CHANNEL);
    assert!(posts[0].thread_ref.is_none());
    assert_eq!(posts[1].thread_ref.as_deref(), Some(posts[0].ts.as_str()));

    let sent = harness.email.sent_to(&team_address("sre"));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template_id, "sre_reminder_day_after_lwd");

    let history = harness.history(&flow).await;
    let remind = history.iter().find(|r| r.step_id == "remind").unwrap();
    assert_eq!(remind.task_info["chat_ts"], json!(posts[0].ts));

    harness.update_leaver(fixture.id, |r| r.sre_complete = Some(fixtures::at(2024, 6, 10, 12)));
    harness.settle().await;
    assert!(harness.flow(&flow).await.is_finished());
    assert_eq!(harness.chat.posts().len(), 2);
}

#[tokio::test]
async fn test_chat_notification_without_channel_carries_on() {
    let harness = TestHarness::builder()
        .without_chat()
        .workflow(workflow(
            "sre",
            vec![Step::new("post", CHAT_NOTIFICATION).as_start()],
        ))
        .build();
    let flow = harness.start("sre", &LeavingRequestFixture::default()).await;

    harness.tick().await;

    let history = harness.history(&flow).await;
    assert_eq!(record_note(&history, "post"), Some("chat not configured"));
    assert!(harness.flow(&flow).await.is_finished());
    assert!(harness.chat.posts().is_empty());
}

#[tokio::test]
async fn test_processor_fan_routes_line_manager_entry_to_manager() {
    let harness = TestHarness::builder()
        // Two working days after the fixture's leaving date.
        .at(fixtures::at(2024, 6, 12, 9))
        .workflow(workflow(
            "bp",
            vec![Step::new("remind", PROCESSOR_REMINDER_EMAIL)
                .as_start()
                .with_info("recipient", "security_building_pass")
                .with_info("until", "security_building_pass_complete")
                .with_info("processor_emails", "pass-office@example.gov.uk, guards@example.gov.uk")
                .with_reminder(ReminderCadence::processor_fan(
                    SECURITY_OFFBOARD_BP_REMINDER,
                    &["two_days_after_ld_lm", "two_days_after_ld_proc"],
                ))
                .with_targets(&["remind"])],
        ))
        .build();
    let fixture = LeavingRequestFixture::default();
    let flow = harness.start("bp", &fixture).await;

    harness.settle().await;

    let to_manager = harness.email.sent_to(&fixture.manager_email);
    assert_eq!(to_manager.len(), 1);
    assert_eq!(to_manager[0].template_id, "security_offboard_bp_reminder_two_days_after_ld_lm");
    for processor in ["pass-office@example.gov.uk", "guards@example.gov.uk"] {
        let sent = harness.email.sent_to(processor);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template_id, "security_offboard_bp_reminder_two_days_after_ld_proc");
    }
    assert!(harness.email.sent_to(&team_address("security_building_pass")).is_empty());

    let mut logged = logged_email_ids(&harness.notifications(&flow).await)
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    logged.sort();
    assert_eq!(
        logged,
        vec![
            "security_offboard_bp_reminder_two_days_after_ld_lm".to_string(),
            "security_offboard_bp_reminder_two_days_after_ld_proc".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_reminder_templates_come_from_settings() {
    let mut settings = fixtures::notification_settings();
    settings.templates = HashMap::from([(LINE_MANAGER_REMINDER.to_string(), "tmpl-lm-reminder".to_string())]);
    let harness = TestHarness::builder()
        // Two working days after the flow starts on Monday.
        .at(fixtures::at(2024, 6, 3, 9))
        .settings(settings)
        .workflow(workflow(
            "lm",
            vec![Step::new("remind", REMINDER_EMAIL)
                .as_start()
                .with_info("recipient", "line_manager")
                .with_info("until", "line_manager_complete")
                .with_reminder(ReminderCadence::daily(
                    LINE_MANAGER_REMINDER,
                    DueRule::FlowStart { working_days: 2 },
                ))
                .with_targets(&["remind"])],
        ))
        .build();
    let fixture = LeavingRequestFixture::default();
    let flow = harness.start("lm", &fixture).await;

    harness.settle().await;
    assert!(harness.email.sent().is_empty());

    // Tuesday, then Wednesday.
    harness.tick_daily(2).await;
    let sent = harness.email.sent_to(&fixture.manager_email);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template_id, "tmpl-lm-reminder");

    harness.tick_daily(1).await;
    assert_eq!(harness.email.sent_to(&fixture.manager_email).len(), 2);

    harness.update_leaver(fixture.id, |r| r.line_manager_complete = Some(fixtures::at(2024, 6, 6, 8)));
    harness.tick_daily(1).await;
    assert_eq!(harness.email.sent_to(&fixture.manager_email).len(), 2);
    assert!(harness.flow(&flow).await.is_finished());
}
