use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request to run the editor buffer in an execution session
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct RunPythonRequest {
    pub session_id: String,
    pub content: String,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Folder of the edited file, relative to the user's root
    #[serde(default)]
    pub path: String,
}

/// Captured result of a run
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct RunPythonResponse {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    pub success: bool,
}

/// Request to install a package into a session's virtual environment
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct InstallPackageRequest {
    pub session_id: String,
    pub package_name: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct InstallPackageResponse {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Response returned after tearing a session down
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct CleanupResponse {
    pub status: String,
}

fn default_file_name() -> String {
    "script.py".to_string()
}
