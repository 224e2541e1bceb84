use serde::{Serialize, Deserialize};
use utoipa::ToSchema;
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub github_id: i64,
    pub github_username: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(skip_serializing)]
    pub access_token_sealed: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub slug: String,
    pub repo_full_name: String,
    pub repo_url: String,
    pub branch: String,
    pub root_directory: String,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub runtime: Option<String>,
    pub port: i32,
    #[serde(skip_serializing)]
    pub webhook_id: Option<i64>,
    #[serde(skip_serializing)]
    pub webhook_secret_sealed: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored only in sealed form; see `EnvVarDisplay` for the API shape.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct EnvVar {
    pub id: Uuid,
    pub project_id: Uuid,
    pub key: String,
    pub value_sealed: String,
    pub created_at: DateTime<Utc>,
}

pub const MASKED_VALUE: &str = "\u{2022}\u{2022}\u{2022}\u{2022}\u{2022}\u{2022}\u{2022}\u{2022}";

/// The only representation of an env var that leaves the API. The value is
/// always masked; cleartext exists solely in the container-injection path.
#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct EnvVarDisplay {
    pub id: Uuid,
    pub key: String,
    pub value: &'static str,
    pub created_at: DateTime<Utc>,
}

impl EnvVar {
    pub fn to_display(&self) -> EnvVarDisplay {
        EnvVarDisplay { id: self.id, key: self.key.clone(), value: MASKED_VALUE, created_at: self.created_at }
    }
}

/// Closed set of deployment states. The lowercase string form is the
/// persistence encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Building,
    Deploying,
    Live,
    Failed,
    Cancelled,
    Superseded,
}

impl DeploymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::Live => "live",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Superseded => "superseded",
        }
    }

    /// Terminal states are never revised; `live` is special-cased since it can
    /// still be superseded by a newer promotion.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Superseded)
    }

    /// Cancel is legal only while the pipeline is still working on the row.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Building | Self::Deploying)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DeploymentStatus {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "pending" => Ok(Self::Pending),
            "building" => Ok(Self::Building),
            "deploying" => Ok(Self::Deploying),
            "live" => Ok(Self::Live),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "superseded" => Ok(Self::Superseded),
            other => Err(format!("unknown deployment status: {other}")),
        }
    }
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone, ToSchema)]
pub struct Deployment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub commit_author: Option<String>,
    pub branch: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: DeploymentStatus,
    pub image_tag: Option<String>,
    #[serde(skip_serializing)]
    pub container_id: Option<String>,
    pub url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_round_trip() {
        for s in [
            DeploymentStatus::Pending,
            DeploymentStatus::Building,
            DeploymentStatus::Deploying,
            DeploymentStatus::Live,
            DeploymentStatus::Failed,
            DeploymentStatus::Cancelled,
            DeploymentStatus::Superseded,
        ] {
            assert_eq!(DeploymentStatus::try_from(s.as_str().to_string()).unwrap(), s);
        }
        assert!(DeploymentStatus::try_from("bogus".to_string()).is_err());
    }

    #[test]
    fn terminal_and_cancellable_partition() {
        assert!(DeploymentStatus::Failed.is_terminal());
        assert!(DeploymentStatus::Cancelled.is_terminal());
        assert!(DeploymentStatus::Superseded.is_terminal());
        assert!(!DeploymentStatus::Live.is_terminal());
        assert!(DeploymentStatus::Pending.is_cancellable());
        assert!(DeploymentStatus::Building.is_cancellable());
        assert!(DeploymentStatus::Deploying.is_cancellable());
        assert!(!DeploymentStatus::Live.is_cancellable());
        assert!(!DeploymentStatus::Failed.is_cancellable());
    }

    #[test]
    fn env_var_display_is_masked() {
        let v = EnvVar {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            key: "API_KEY".into(),
            value_sealed: "sealed".into(),
            created_at: Utc::now(),
        };
        let d = v.to_display();
        assert_eq!(d.value, MASKED_VALUE);
        let json = serde_json::to_string(&d).unwrap();
        assert!(!json.contains("sealed"));
    }
}
