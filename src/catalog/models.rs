use serde::{Deserialize, Serialize};

pub const DEFAULT_STATS_DAYS: u32 = 7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub icon: String,
    pub url: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Body of a create request. Only `name` is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewTool {
    pub name: String,
    pub description: String,
    pub category: String,
    pub icon: String,
    pub url: String,
    pub is_active: Option<bool>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub url: Option<String>,
    pub is_active: Option<bool>,
}

impl ToolUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.icon.is_none()
            && self.url.is_none()
            && self.is_active.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUsage {
    pub id: i64,
    pub tool_id: i64,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: String,
}

/// Listing filter. Inactive tools are only visible to admin listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolFilter {
    pub category: Option<String>,
    pub q: Option<String>,
    #[serde(skip)]
    pub include_inactive: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DaysQuery {
    pub days: Option<u32>,
}

impl DaysQuery {
    pub fn days(&self) -> u32 {
        match self.days {
            Some(0) | None => DEFAULT_STATS_DAYS,
            Some(d) => d,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolStats {
    pub total_tools: i64,
    pub active_tools: i64,
    pub categories: Vec<String>,
    pub total_categories: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UsageStats {
    pub total_usage: i64,
    pub today_usage: i64,
    pub period_usage: i64,
    pub period_days: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolUsageStats {
    pub tool_id: i64,
    pub total_usage: i64,
    pub recent_usage: i64,
    pub period_days: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OverviewStats {
    pub total_tools: i64,
    pub total_usage: i64,
    pub today_usage: i64,
    pub last_updated: String,
}

/// JSON envelope shared by every catalog response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok(data)
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_query_defaults_to_a_week() {
        assert_eq!(DaysQuery { days: None }.days(), 7);
        assert_eq!(DaysQuery { days: Some(0) }.days(), 7);
        assert_eq!(DaysQuery { days: Some(30) }.days(), 30);
    }

    #[test]
    fn test_envelope_omits_empty_fields() {
        let ok = serde_json::to_value(ApiResponse::ok(1)).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "data": 1}));

        let err = serde_json::to_value(ApiResponse::error("nope")).unwrap();
        assert_eq!(err, serde_json::json!({"success": false, "error": "nope"}));
    }

    #[test]
    fn test_tool_update_is_empty() {
        assert!(ToolUpdate::default().is_empty());
        let update: ToolUpdate = serde_json::from_str(r#"{"is_active": false}"#).unwrap();
        assert!(!update.is_empty());
    }
}
