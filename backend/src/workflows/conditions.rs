// Workflow Conditions - Named predicates over the leaving request
//
// Skip conditions are evaluated by the executor before a task runs. Flags are
// consulted by pause, reminder and condition tasks to decide whether the
// external step they wait on has happened.

use chrono::NaiveDate;
use leavers_shared::LeavingRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipCondition {
    IsTransfer,
    ManuallyOffboardedFromUksbs,
    IsNotHsflLeaver,
    IsNotRosaUser,
}

impl SkipCondition {
    pub fn applies(&self, request: &LeavingRequest) -> bool {
        match self {
            SkipCondition::IsTransfer => request.is_transfer,
            SkipCondition::ManuallyOffboardedFromUksbs => request.manually_offboarded_from_uksbs,
            SkipCondition::IsNotHsflLeaver => !request.is_hsfl_leaver,
            SkipCondition::IsNotRosaUser => !request.is_rosa_user,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SkipCondition::IsTransfer => "is_transfer",
            SkipCondition::ManuallyOffboardedFromUksbs => "manually_offboarded_from_uksbs",
            SkipCondition::IsNotHsflLeaver => "is_not_hsfl_leaver",
            SkipCondition::IsNotRosaUser => "is_not_rosa_user",
        }
    }
}

impl fmt::Display for SkipCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeavingFlag {
    LineManagerComplete,
    SreComplete,
    SecurityBuildingPassComplete,
    SecurityRosaKitComplete,
    ServiceNowOfflineComplete,
    AfterLeavingDate,
}

impl LeavingFlag {
    pub fn holds(&self, request: &LeavingRequest, today: NaiveDate) -> bool {
        match self {
            LeavingFlag::LineManagerComplete => request.line_manager_complete.is_some(),
            LeavingFlag::SreComplete => request.sre_complete.is_some(),
            LeavingFlag::SecurityBuildingPassComplete => request.security_building_pass_complete.is_some(),
            LeavingFlag::SecurityRosaKitComplete => request.security_rosa_kit_complete.is_some(),
            LeavingFlag::ServiceNowOfflineComplete => request.service_now_offline_complete.is_some(),
            LeavingFlag::AfterLeavingDate => request.leaving_date.is_some_and(|d| today > d),
        }
    }
}

impl FromStr for LeavingFlag {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
    }
}
