// Re-export dependencies used in public interfaces of common types

use std::fmt::Display;
use std::str::FromStr;

pub use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the `images.name` column.
pub const MAX_IMAGE_NAME_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum DockyardError {
    #[error("Invalid Request: {0}")]
    Invalid(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

// Define the primary Result type for dockyard operations
pub type Result<T> = std::result::Result<T, DockyardError>;

/// Lifecycle of a build record.
///
/// There is deliberately no failure variant: a failed build keeps its
/// current status and is recognisable only through `Build::is_success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    New,
    Running,
    Finished,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::New => "new",
            BuildStatus::Running => "running",
            BuildStatus::Finished => "finished",
        }
    }
}

impl Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = DockyardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(BuildStatus::New),
            "running" => Ok(BuildStatus::Running),
            "finished" => Ok(BuildStatus::Finished),
            other => Err(DockyardError::Invalid(format!("unknown build status '{other}'"))),
        }
    }
}

/// Image definition as submitted by a client, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewImage {
    pub name: String,
    pub base: String,
    pub code: String,
}

impl NewImage {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DockyardError::Invalid("image name must not be empty".to_string()));
        }
        if self.name.chars().count() > MAX_IMAGE_NAME_LEN {
            return Err(DockyardError::Invalid(format!(
                "image name must be at most {MAX_IMAGE_NAME_LEN} characters"
            )));
        }
        if self.base.trim().is_empty() {
            return Err(DockyardError::Invalid("base image must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Stored image definition. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub name: String,
    pub base: String,
    pub code: String,
}

impl Image {
    /// Engine tag for this image: the name with spaces replaced by underscores.
    pub fn tag(&self) -> String {
        self.name.replace(' ', "_")
    }

    pub fn dockerfile(&self) -> String {
        format!("FROM {}\n{}", self.base, self.code)
    }
}

/// One attempt to turn an [`Image`] into a running container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    pub image_id: i64,
    pub container_id: Option<String>,
    pub is_success: bool,
    pub status: BuildStatus,
}

impl Build {
    /// A freshly accepted build: status `new`, optimistic success flag, no container.
    pub fn new(id: i64, image_id: i64) -> Self {
        Self {
            id,
            image_id,
            container_id: None,
            is_success: true,
            status: BuildStatus::New,
        }
    }
}

impl Display for Build {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Build(id: {}, image_id: {}, status: {}, is_success: {}, container_id: {:?})",
            self.id, self.image_id, self.status, self.is_success, self.container_id
        )
    }
}
