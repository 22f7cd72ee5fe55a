// ABOUTME: Secrets command implementation.
// ABOUTME: Creates or edits the local sealed secrets file.

use std::path::Path;

use jailwarden::error::Result;
use jailwarden::output::Output;
use jailwarden::secrets;

use crate::cli::SecretsAction;

pub async fn secrets(path: &Path, action: SecretsAction, output: Output) -> Result<()> {
    match action {
        SecretsAction::Init => {
            secrets::init(path)?;
            output.success(&format!(
                "Created {} (mode 0600); key in {} unless ${} is set",
                path.display(),
                secrets::key_path(path).display(),
                secrets::KEY_ENV_VAR
            ));
        }
        SecretsAction::Edit => {
            secrets::edit(path, &secrets::editor()).await?;
            output.success(&format!("Saved {}", path.display()));
        }
    }
    Ok(())
}
