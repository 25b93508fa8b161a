// The full leaving workflow, driven day by day against the stub adapters

use leavers_shared::Flow;

use crate::tests::fixtures::{self, LeavingRequestFixture, SRE_CHANNEL, team_address};
use crate::tests::helpers::{TestHarness, logged_email_ids, pending_steps};
use crate::workflows::leaving::{JOIN_STEP, email_ids::*};

async fn started(harness: &TestHarness, fixture: &LeavingRequestFixture) -> Flow {
    let flow = harness.start_leaving(fixture).await;
    harness.settle().await;
    flow
}

fn sent_templates(harness: &TestHarness, recipient: &str) -> Vec<String> {
    harness
        .email
        .sent_to(recipient)
        .into_iter()
        .map(|email| email.template_id)
        .collect()
}

#[tokio::test]
async fn test_first_tick_stops_at_line_manager() {
    // Monday, leaving the following Monday.
    let harness = TestHarness::new();
    let fixture = LeavingRequestFixture::default();
    let flow = started(&harness, &fixture).await;

    assert_eq!(
        sent_templates(&harness, &fixture.leaver_email),
        vec![LEAVER_THANK_YOU.to_string(), LEAVER_QUESTIONNAIRE.to_string()]
    );
    assert_eq!(
        sent_templates(&harness, &fixture.manager_email),
        vec![LINE_MANAGER_NOTIFICATION.to_string()]
    );
    // The 3rd is the payroll cut-off.
    assert_eq!(
        sent_templates(&harness, &team_address("hr")),
        vec![LEAVER_IN_PAY_CUT_OFF_HR.to_string()]
    );
    assert!(
        logged_email_ids(&harness.notifications(&flow).await)
            .contains(&"leaver_in_pay_cut_off_hr_email:2024-06-03")
    );

    let history = harness.history(&flow).await;
    let mut pending = pending_steps(&history);
    pending.sort();
    assert_eq!(
        pending,
        vec![
            "has_line_manager_completed",
            "send_hr_pay_cut_off_reminder",
            "send_line_manager_reminder",
        ]
    );
    assert!(harness.payroll.submissions().is_empty());
}

#[tokio::test]
async fn test_line_manager_reminded_each_business_day() {
    let harness = TestHarness::new();
    let fixture = LeavingRequestFixture::default();
    let flow = started(&harness, &fixture).await;

    // Tuesday 4th to Monday 10th.
    harness.tick_daily(7).await;

    let reminders: Vec<_> = harness
        .notifications(&flow)
        .await
        .into_iter()
        .filter(|entry| {
            entry
                .email_id
                .as_deref()
                .is_some_and(|id| id.starts_with(LINE_MANAGER_REMINDER))
        })
        .map(|entry| (entry.email_id.unwrap_or_default(), entry.sent_date))
        .collect();
    assert_eq!(
        reminders,
        [(2024, 6, 5), (2024, 6, 6), (2024, 6, 7), (2024, 6, 10)]
            .into_iter()
            .map(|(y, m, d)| {
                let day = fixtures::date(y, m, d);
                (format!("{}:{}", LINE_MANAGER_REMINDER, day), day)
            })
            .collect::<Vec<_>>()
    );
    assert_eq!(
        harness
            .email
            .sent_to(&fixture.manager_email)
            .iter()
            .filter(|email| email.template_id == LINE_MANAGER_REMINDER)
            .count(),
        4
    );
    assert_eq!(sent_templates(&harness, &team_address("hr")).len(), 1);
}

#[tokio::test]
async fn test_leaver_offboarded_end_to_end() {
    let harness = TestHarness::new();
    let fixture = LeavingRequestFixture::default();
    let flow = started(&harness, &fixture).await;

    harness.update_leaver(fixture.id, |r| r.line_manager_complete = Some(fixtures::at(2024, 6, 3, 14)));
    harness.settle().await;

    assert_eq!(
        sent_templates(&harness, &fixture.manager_email)
            .iter()
            .filter(|t| *t == LINE_MANAGER_THANKYOU)
            .count(),
        1
    );
    assert_eq!(harness.payroll.submissions().len(), 1);
    let mut groups: Vec<String> = harness.tickets.opened().into_iter().map(|t| t.group).collect();
    groups.sort();
    assert_eq!(groups, vec!["Asset Management".to_string(), "LSD Team".to_string()]);

    for (team, email_id) in [
        ("security_pass_office", FEETHAM_SECURITY_PASS_OFFICE),
        ("it_ops", IT_OPS_ASSET),
        ("clu4", CLU4),
        ("ocs", OCS),
        ("ocs_oab_locker", OCS_OAB_LOCKER),
        ("business_continuity", BUSINESS_CONTINUITY),
        ("security_building_pass", SECURITY_OFFBOARD_BP_NOTIFICATION),
        ("sre", SRE_NOTIFICATION),
    ] {
        assert_eq!(sent_templates(&harness, &team_address(team)), vec![email_id.to_string()], "{}", team);
    }
    // Not a health and safety leaver, no ROSA kit, leaving date still ahead.
    assert!(harness.email.sent_to(&team_address("health_and_safety")).is_empty());
    assert!(harness.email.sent_to(&team_address("security_rosa_kit")).is_empty());
    assert!(harness.email.sent_to(&team_address("comaea")).is_empty());

    let posts = harness.chat.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].channel_id, SRE_CHANNEL);
    assert!(!harness.flow(&flow).await.is_finished());

    // Through to Tuesday 11th, the day after the leaving date.
    harness.tick_daily(8).await;

    assert_eq!(sent_templates(&harness, &team_address("comaea")), vec![COMAEA.to_string()]);
    let bp_reminders = sent_templates(&harness, &team_address("security_building_pass"));
    assert!(bp_reminders.contains(&"security_offboard_bp_reminder_day_after_lwd".to_string()));
    assert!(bp_reminders.contains(&"security_offboard_bp_reminder_one_day_after_ld".to_string()));
    let sre_reminders = sent_templates(&harness, &team_address("sre"));
    assert!(sre_reminders.contains(&"sre_reminder_day_after_lwd".to_string()));
    assert!(sre_reminders.contains(&"sre_reminder_one_day_after_ld".to_string()));

    let posts = harness.chat.posts();
    assert!(posts.len() >= 3);
    assert!(posts[1..].iter().all(|p| p.thread_ref.as_deref() == Some(posts[0].ts.as_str())));
    assert!(
        harness
            .email
            .sent_to(&fixture.manager_email)
            .iter()
            .any(|email| email.template_id == LINE_MANAGER_OFFLINE_SERVICE_NOW)
    );
    assert!(!harness.flow(&flow).await.is_finished());

    harness.update_leaver(fixture.id, |r| {
        let done = Some(fixtures::at(2024, 6, 11, 12));
        r.security_building_pass_complete = done;
        r.sre_complete = done;
        r.service_now_offline_complete = done;
    });
    harness.settle().await;

    let finished = harness.flow(&flow).await;
    assert!(finished.is_finished());
    let history = harness.history(&flow).await;
    assert!(history.iter().all(|r| r.is_executed()));
    let completed = history
        .iter()
        .filter(|r| r.step_id == JOIN_STEP && r.note.as_deref() == Some("leaver complete"))
        .count();
    assert_eq!(completed, 1);

    let documents = harness.index.documents();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].id, fixture.id.to_string());
    assert_eq!(documents[0].fields["status"], "offboarded");
}

#[tokio::test]
async fn test_cancelled_request_ends_every_branch() {
    let harness = TestHarness::new();
    let fixture = LeavingRequestFixture::default();
    let flow = started(&harness, &fixture).await;
    harness.update_leaver(fixture.id, |r| r.line_manager_complete = Some(fixtures::at(2024, 6, 3, 14)));
    harness.settle().await;

    let logged = harness.notifications(&flow).await.len();
    let sent = harness.email.sent().len();
    assert!(!pending_steps(&harness.history(&flow).await).is_empty());

    harness.update_leaver(fixture.id, |r| r.cancelled = Some(fixtures::at(2024, 6, 4, 9)));
    harness.tick_daily(1).await;

    assert!(harness.flow(&flow).await.is_finished());
    let history = harness.history(&flow).await;
    assert!(pending_steps(&history).is_empty());
    assert_eq!(harness.notifications(&flow).await.len(), logged);
    assert_eq!(harness.email.sent().len(), sent);
    assert!(harness.index.documents().is_empty());
    assert!(
        history
            .iter()
            .filter(|r| r.executed_at >= Some(fixtures::at(2024, 6, 4, 0)))
            .all(|r| r.note.as_deref() == Some("leaving request cancelled"))
    );
}
