//! The `leaving` workflow: off-boarding a leaver from first notification to
//! the final join once every team has done its part.
//!
//! After the line manager has submitted their form the flow fans out into one
//! branch per team. Branches waiting on a team pair a pause with a reminder;
//! both re-enqueue themselves until the team's completion flag is set and then
//! end in `are_all_tasks_complete`.

use serde_json::Value;

use super::conditions::SkipCondition;
use super::definition::{Step, Workflow};
use super::reminders::{DueRule, PROCESSOR_FAN_OFFSETS, ReminderCadence};
use super::tasks::{
    BASIC_TASK, CHAT_NOTIFICATION, CHECK_UKSBS_LEAVER, CHECK_UKSBS_LINE_MANAGER, LEAVER_COMPLETE,
    NOTIFICATION_EMAIL, PAUSE_TASK, PAUSE_UNTIL, PAYROLL_SUBMISSION, PROCESSOR_REMINDER_EMAIL,
    REMINDER_EMAIL, SERVICE_DESK_TICKET,
};
use crate::config::NotificationSettings;
use crate::error::EngineResult;

pub const LEAVING_WORKFLOW: &str = "leaving";
pub const JOIN_STEP: &str = "are_all_tasks_complete";

pub mod email_ids {
    pub const LEAVER_THANK_YOU: &str = "leaver_thank_you_email";
    pub const LEAVER_QUESTIONNAIRE: &str = "leaver_questionnaire_email";
    pub const LEAVER_NOT_IN_UKSBS_REMINDER: &str = "leaver_not_in_uksbs_reminder";
    pub const LINE_MANAGER_CORRECTION: &str = "line_manager_correction";
    pub const LINE_MANAGER_NOTIFICATION: &str = "line_manager_notification";
    pub const LINE_MANAGER_REMINDER: &str = "line_manager_reminder";
    pub const LINE_MANAGER_THANKYOU: &str = "line_manager_thankyou";
    pub const LEAVER_IN_PAY_CUT_OFF_HR: &str = "leaver_in_pay_cut_off_hr_email";
    pub const FEETHAM_SECURITY_PASS_OFFICE: &str = "feetham_security_pass_office_email";
    pub const IT_OPS_ASSET: &str = "it_ops_asset_email";
    pub const CLU4: &str = "clu4_email";
    pub const OCS: &str = "ocs_email";
    pub const OCS_OAB_LOCKER: &str = "ocs_oab_locker_email";
    pub const HEALTH_AND_SAFETY: &str = "health_and_safety_email";
    pub const COMAEA: &str = "comaea_email";
    pub const BUSINESS_CONTINUITY: &str = "business_continuity_leaver_email";
    pub const SECURITY_OFFBOARD_BP_NOTIFICATION: &str = "security_offboard_bp_leaver_notification";
    pub const SECURITY_OFFBOARD_RK_NOTIFICATION: &str = "security_offboard_rk_leaver_notification";
    pub const SECURITY_OFFBOARD_BP_REMINDER: &str = "security_offboard_bp_reminder";
    pub const SECURITY_OFFBOARD_RK_REMINDER: &str = "security_offboard_rk_reminder";
    pub const SRE_NOTIFICATION: &str = "sre_notification";
    pub const SRE_REMINDER: &str = "sre_reminder";
    pub const LINE_MANAGER_OFFLINE_SERVICE_NOW: &str = "line_manager_offline_service_now";
}

use email_ids::*;

const SRE_REMINDER_KEYS: &[&str] = &["day_after_lwd", "one_day_after_ld", "two_days_after_ld_proc"];

fn email(step_id: &str, email_id: &str, recipient: &str) -> Step {
    Step::new(step_id, NOTIFICATION_EMAIL)
        .with_info("email_id", email_id)
        .with_info("recipient", recipient)
}

fn team_email(step_id: &str, email_id: &str, team: &str) -> Step {
    email(step_id, email_id, team).with_targets(&[JOIN_STEP])
}

fn pause(step_id: &str, until: &str, onward: &str) -> Step {
    Step::new(step_id, PAUSE_UNTIL)
        .with_info("until", until)
        .with_targets(&[step_id, onward])
}

fn processor_reminder(
    step_id: &str,
    team: &str,
    until: &str,
    cadence: ReminderCadence,
    settings: &NotificationSettings,
) -> Step {
    let mut step = Step::new(step_id, PROCESSOR_REMINDER_EMAIL)
        .with_info("recipient", team)
        .with_info("until", until)
        .with_reminder(cadence)
        .with_targets(&[step_id, JOIN_STEP]);
    let processors = settings.mailbox(team);
    if !processors.is_empty() {
        step = step.with_info(
            "processor_emails",
            Value::Array(processors.iter().cloned().map(Value::String).collect()),
        );
    }
    step
}

pub fn leaving_workflow(settings: &NotificationSettings) -> EngineResult<Workflow> {
    let all_processor_keys: Vec<&str> = PROCESSOR_FAN_OFFSETS.iter().map(|(key, _, _)| *key).collect();

    let fan_out = [
        "send_uksbs_leaver_details",
        "send_service_now_leaver_details",
        "send_lsd_team_leaver_details",
        "send_feetham_leaver_details",
        "send_it_ops_leaver_details",
        "notify_clu4_of_leaving",
        "notify_ocs_of_leaving",
        "notify_ocs_of_oab_locker",
        "notify_health_and_safety",
        "should_notify_comaea_team",
        "notify_business_continuity_team",
        "send_security_bp_notification",
        "send_security_rk_notification",
        "send_sre_notification",
        "has_line_manager_updated_service_now",
        "send_line_manager_offline_service_now_reminder",
    ];
    let mut setup_targets = vec!["setup_scheduled_tasks"];
    setup_targets.extend(fan_out);

    let steps = vec![
        // Leaver
        Step::new("setup_leaving", BASIC_TASK)
            .as_start()
            .with_targets(&["send_leaver_thank_you_email"]),
        email("send_leaver_thank_you_email", LEAVER_THANK_YOU, "leaver")
            .with_targets(&["send_leaver_questionnaire_email"]),
        email("send_leaver_questionnaire_email", LEAVER_QUESTIONNAIRE, "leaver")
            .with_targets(&["check_uksbs_leaver"]),
        // UK SBS checks
        Step::new("check_uksbs_leaver", CHECK_UKSBS_LEAVER)
            .with_info("if_found", "check_uksbs_line_manager")
            .with_info("if_missing", "send_leaver_not_in_uksbs_reminder")
            .with_targets(&["send_leaver_not_in_uksbs_reminder", "check_uksbs_line_manager"]),
        Step::new("send_leaver_not_in_uksbs_reminder", REMINDER_EMAIL)
            .with_info("recipient", "hr")
            .with_reminder(ReminderCadence::daily(
                LEAVER_NOT_IN_UKSBS_REMINDER,
                DueRule::FlowStart { working_days: 0 },
            ))
            .with_targets(&["check_uksbs_leaver"]),
        Step::new("check_uksbs_line_manager", CHECK_UKSBS_LINE_MANAGER)
            .with_info("if_found", "notify_line_manager")
            .with_info("if_missing", "send_line_manager_correction_reminder")
            .with_targets(&["send_line_manager_correction_reminder", "notify_line_manager"]),
        Step::new("send_line_manager_correction_reminder", REMINDER_EMAIL)
            .with_info("recipient", "leaver")
            .with_reminder(ReminderCadence::daily(
                LINE_MANAGER_CORRECTION,
                DueRule::FlowStart { working_days: 0 },
            ))
            .with_targets(&["check_uksbs_line_manager"]),
        // Line manager
        email("notify_line_manager", LINE_MANAGER_NOTIFICATION, "line_manager").with_targets(&[
            "has_line_manager_completed",
            "send_line_manager_reminder",
            "send_hr_pay_cut_off_reminder",
        ]),
        pause("has_line_manager_completed", "line_manager_complete", "thank_line_manager"),
        Step::new("send_line_manager_reminder", REMINDER_EMAIL)
            .with_info("recipient", "line_manager")
            .with_info("until", "line_manager_complete")
            .with_reminder(ReminderCadence::daily(
                LINE_MANAGER_REMINDER,
                DueRule::FlowStart { working_days: 2 },
            ))
            .with_targets(&["send_line_manager_reminder"]),
        Step::new("send_hr_pay_cut_off_reminder", REMINDER_EMAIL)
            .with_info("recipient", "hr")
            .with_info("until", "line_manager_complete")
            .with_reminder(ReminderCadence::payroll_cut_off(LEAVER_IN_PAY_CUT_OFF_HR))
            .with_targets(&["send_hr_pay_cut_off_reminder"]),
        email("thank_line_manager", LINE_MANAGER_THANKYOU, "line_manager")
            .with_targets(&["setup_scheduled_tasks"]),
        // Split flow
        Step::new("setup_scheduled_tasks", PAUSE_TASK).with_targets(&setup_targets),
        // UK SBS
        Step::new("send_uksbs_leaver_details", PAYROLL_SUBMISSION)
            .skip_when(SkipCondition::IsTransfer)
            .skip_when(SkipCondition::ManuallyOffboardedFromUksbs)
            .with_targets(&[JOIN_STEP]),
        // Service desk
        Step::new("send_service_now_leaver_details", SERVICE_DESK_TICKET)
            .with_info("group", "service_now_asset")
            .with_info("subject", "Leaver asset collection")
            .with_targets(&[JOIN_STEP]),
        Step::new("send_lsd_team_leaver_details", SERVICE_DESK_TICKET)
            .with_info("group", "lsd_team")
            .with_info("subject", "Leaver account removal")
            .with_targets(&[JOIN_STEP]),
        // Team notifications
        team_email("send_feetham_leaver_details", FEETHAM_SECURITY_PASS_OFFICE, "security_pass_office"),
        team_email("send_it_ops_leaver_details", IT_OPS_ASSET, "it_ops"),
        team_email("notify_clu4_of_leaving", CLU4, "clu4"),
        team_email("notify_ocs_of_leaving", OCS, "ocs"),
        team_email("notify_ocs_of_oab_locker", OCS_OAB_LOCKER, "ocs_oab_locker"),
        team_email("notify_health_and_safety", HEALTH_AND_SAFETY, "health_and_safety")
            .skip_when(SkipCondition::IsNotHsflLeaver),
        Step::new("should_notify_comaea_team", PAUSE_TASK)
            .with_info("pass_condition", "after_leaving_date")
            .with_targets(&["should_notify_comaea_team", "notify_comaea_team"]),
        team_email("notify_comaea_team", COMAEA, "comaea"),
        team_email("notify_business_continuity_team", BUSINESS_CONTINUITY, "business_continuity"),
        // Security (building pass)
        email(
            "send_security_bp_notification",
            SECURITY_OFFBOARD_BP_NOTIFICATION,
            "security_building_pass",
        )
        .with_targets(&["have_security_carried_out_bp_leaving_tasks", "send_security_bp_reminder"]),
        pause(
            "have_security_carried_out_bp_leaving_tasks",
            "security_building_pass_complete",
            JOIN_STEP,
        ),
        processor_reminder(
            "send_security_bp_reminder",
            "security_building_pass",
            "security_building_pass_complete",
            ReminderCadence::processor_fan(SECURITY_OFFBOARD_BP_REMINDER, &all_processor_keys),
            settings,
        ),
        // Security (ROSA kit)
        email(
            "send_security_rk_notification",
            SECURITY_OFFBOARD_RK_NOTIFICATION,
            "security_rosa_kit",
        )
        .skip_when(SkipCondition::IsNotRosaUser)
        .with_targets(&["have_security_carried_out_rk_leaving_tasks", "send_security_rk_reminder"]),
        pause(
            "have_security_carried_out_rk_leaving_tasks",
            "security_rosa_kit_complete",
            JOIN_STEP,
        ),
        processor_reminder(
            "send_security_rk_reminder",
            "security_rosa_kit",
            "security_rosa_kit_complete",
            ReminderCadence::processor_fan(SECURITY_OFFBOARD_RK_REMINDER, &all_processor_keys),
            settings,
        ),
        // SRE (e-mail and chat)
        email("send_sre_notification", SRE_NOTIFICATION, "sre").with_targets(&["post_sre_slack_message"]),
        Step::new("post_sre_slack_message", CHAT_NOTIFICATION)
            .with_targets(&["have_sre_carried_out_leaving_tasks", "send_sre_reminder"]),
        pause("have_sre_carried_out_leaving_tasks", "sre_complete", JOIN_STEP),
        processor_reminder(
            "send_sre_reminder",
            "sre",
            "sre_complete",
            ReminderCadence::processor_fan(SRE_REMINDER, SRE_REMINDER_KEYS),
            settings,
        )
        .with_info("chat_thread", true),
        // Line manager (ServiceNow offline assets)
        pause(
            "has_line_manager_updated_service_now",
            "service_now_offline_complete",
            JOIN_STEP,
        ),
        Step::new("send_line_manager_offline_service_now_reminder", REMINDER_EMAIL)
            .with_info("recipient", "line_manager")
            .with_info("until", "service_now_offline_complete")
            .with_reminder(ReminderCadence::daily(
                LINE_MANAGER_OFFLINE_SERVICE_NOW,
                DueRule::LastWorkingDay { working_days: -5 },
            ))
            .with_targets(&["send_line_manager_offline_service_now_reminder", JOIN_STEP]),
        // End
        Step::new(JOIN_STEP, LEAVER_COMPLETE),
    ];

    Workflow::new(LEAVING_WORKFLOW, steps)
}
