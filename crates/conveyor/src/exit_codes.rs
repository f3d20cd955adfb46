//! Exit codes for the CLI

use conveyor_core::ConveyorError;

/// Flow passed, or the command succeeded
pub const SUCCESS: i32 = 0;

/// Flow failed, or a general error
pub const FAILURE: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// Workspace discovery error
pub const WORKSPACE_ERROR: i32 = 3;

/// Exit code for an error that stopped a command
pub fn for_error(error: &anyhow::Error) -> i32 {
    match error.chain().find_map(|cause| cause.downcast_ref::<ConveyorError>()) {
        Some(ConveyorError::Config(_)) => CONFIG_ERROR,
        Some(ConveyorError::Workspace(_)) | Some(ConveyorError::Graph(_)) => WORKSPACE_ERROR,
        _ => FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use conveyor_core::error::{ConfigError, WorkspaceError};

    #[test]
    fn test_error_codes() {
        let config: anyhow::Error = ConveyorError::from(ConfigError::NotFound("/repo".into())).into();
        assert_eq!(for_error(&config), CONFIG_ERROR);

        let workspace = Err::<(), _>(ConveyorError::from(WorkspaceError::RootManifestNotFound("/repo".into())))
            .context("failed to discover packages")
            .unwrap_err();
        assert_eq!(for_error(&workspace), WORKSPACE_ERROR);

        assert_eq!(for_error(&anyhow::anyhow!("boom")), FAILURE);
    }
}
