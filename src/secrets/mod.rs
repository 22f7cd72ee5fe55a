// ABOUTME: Encrypted env-style secrets file merged over the configured environment.
// ABOUTME: Creates the sealed file and its key, and edits it through a private plaintext copy.

mod cipher;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::config::is_env_name;

pub use cipher::{CipherError, SEALED_HEADER, SecretKey, random_hex};

/// Hex-encoded key that takes precedence over the key file.
pub const KEY_ENV_VAR: &str = "JAILWARDEN_SECRETS_KEY";

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("failed to read secrets file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write secrets file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}:{line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("secrets file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("secrets file not found: {} (run `jailwarden secrets init`)", .0.display())]
    NotFound(PathBuf),

    #[error("editor `{editor}` failed: {reason}")]
    Editor { editor: String, reason: String },

    #[error("secrets key not found at {} (restore it or set {KEY_ENV_VAR})", .0.display())]
    KeyNotFound(PathBuf),

    #[error("invalid secrets key from {origin}: {source}")]
    Key { origin: String, source: CipherError },

    #[error("cannot open secrets file {}: {source}", path.display())]
    Sealed { path: PathBuf, source: CipherError },

    #[error("secrets file {} does not decrypt to UTF-8 text", .0.display())]
    NotUtf8(PathBuf),
}

/// Outcome of merging secrets into an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretsMerge {
    /// Secrets were found and layered over the environment.
    Merged(BTreeMap<String, String>),
    /// No secrets file exists; the environment is unchanged.
    Skipped(BTreeMap<String, String>),
}

impl SecretsMerge {
    pub fn into_env(self) -> BTreeMap<String, String> {
        match self {
            SecretsMerge::Merged(env) | SecretsMerge::Skipped(env) => env,
        }
    }

    pub fn env_mut(&mut self) -> &mut BTreeMap<String, String> {
        match self {
            SecretsMerge::Merged(env) | SecretsMerge::Skipped(env) => env,
        }
    }

    pub fn was_merged(&self) -> bool {
        matches!(self, SecretsMerge::Merged(_))
    }
}

/// Parse `KEY=VALUE` lines. Blank lines, `#` comments and an `export ` prefix are accepted.
pub fn parse(content: &str, path: &Path) -> Result<BTreeMap<String, String>, SecretsError> {
    let mut vars = BTreeMap::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();

        let parse_error = |reason: String| SecretsError::Parse {
            path: path.to_path_buf(),
            line: index + 1,
            reason,
        };

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| parse_error("expected KEY=VALUE".to_string()))?;
        let key = key.trim();

        if !is_env_name(key) {
            return Err(parse_error(format!("invalid variable name `{}`", key)));
        }

        vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }

    Ok(vars)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Key file kept next to the secrets file: `secrets.env` uses `secrets.key`.
pub fn key_path(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == "key" => path.with_extension("key.key"),
        _ => path.with_extension("key"),
    }
}

/// Key from `$JAILWARDEN_SECRETS_KEY`, otherwise from the key file.
pub fn load_key(path: &Path) -> Result<SecretKey, SecretsError> {
    if let Some(hex) = std::env::var(KEY_ENV_VAR).ok().filter(|v| !v.trim().is_empty()) {
        return SecretKey::from_hex(&hex).map_err(|source| SecretsError::Key {
            origin: KEY_ENV_VAR.to_string(),
            source,
        });
    }

    let key_file = key_path(path);
    match std::fs::read_to_string(&key_file) {
        Ok(hex) => SecretKey::from_hex(&hex).map_err(|source| SecretsError::Key {
            origin: key_file.display().to_string(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(SecretsError::KeyNotFound(key_file))
        }
        Err(source) => Err(SecretsError::Read {
            path: key_file,
            source,
        }),
    }
}

fn load_or_create_key(path: &Path) -> Result<SecretKey, SecretsError> {
    match load_key(path) {
        Err(SecretsError::KeyNotFound(key_file)) => {
            let key = SecretKey::generate();
            write_private(&key_file, format!("{}\n", key.to_hex()).as_bytes(), false)?;
            tracing::debug!(path = %key_file.display(), "generated secrets key");
            Ok(key)
        }
        other => other,
    }
}

/// Decrypt the secrets file to its plaintext.
fn open(path: &Path, sealed: &str, key: &SecretKey) -> Result<String, SecretsError> {
    let plaintext = key.open(sealed).map_err(|source| SecretsError::Sealed {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(plaintext).map_err(|_| SecretsError::NotUtf8(path.to_path_buf()))
}

/// Read and decrypt the secrets file, `None` if it does not exist.
pub async fn load(path: &Path) -> Result<Option<BTreeMap<String, String>>, SecretsError> {
    let sealed = match tokio::fs::read_to_string(path).await {
        Ok(sealed) => sealed,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SecretsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let key = load_key(path)?;
    let plaintext = open(path, &sealed, &key)?;
    parse(&plaintext, path).map(Some)
}

/// Layer the secrets file over `env`. Secrets win on conflicting keys.
pub async fn merge_env(
    mut env: BTreeMap<String, String>,
    path: &Path,
) -> Result<SecretsMerge, SecretsError> {
    match load(path).await? {
        None => {
            tracing::debug!(path = %path.display(), "no secrets file, skipping");
            Ok(SecretsMerge::Skipped(env))
        }
        Some(secrets) => {
            tracing::debug!(path = %path.display(), count = secrets.len(), "merging secrets");
            env.extend(secrets);
            Ok(SecretsMerge::Merged(env))
        }
    }
}

/// Write `bytes` through a sibling temporary file so the target is never partially written.
/// The result is readable only by its owner.
fn write_private(path: &Path, bytes: &[u8], replace: bool) -> Result<(), SecretsError> {
    let write_error = |source: std::io::Error| SecretsError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent).map_err(write_error)?;
            parent
        }
        None => Path::new("."),
    };

    let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(write_error)?;
    staged.write_all(bytes).map_err(write_error)?;
    staged.as_file().sync_all().map_err(write_error)?;

    let persisted = if replace {
        staged.persist(path)
    } else {
        staged.persist_noclobber(path)
    };
    match persisted {
        Ok(_) => Ok(()),
        Err(e) if !replace && e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(SecretsError::AlreadyExists(path.to_path_buf()))
        }
        Err(e) => Err(write_error(e.error)),
    }
}

/// Validate `content`, then seal it into `path`, creating the key on first use.
pub fn store(path: &Path, content: &str) -> Result<(), SecretsError> {
    parse(content, path)?;
    let key = load_or_create_key(path)?;
    seal_into(path, content, &key, true)
}

fn seal_into(
    path: &Path,
    content: &str,
    key: &SecretKey,
    replace: bool,
) -> Result<(), SecretsError> {
    let sealed = key
        .seal(content.as_bytes())
        .map_err(|source| SecretsError::Sealed {
            path: path.to_path_buf(),
            source,
        })?;
    write_private(path, sealed.as_bytes(), replace)
}

const TEMPLATE: &str = "\
# KEY=VALUE pairs injected into the application environment.
# Values here override `env` in the config file.
# SECRET_KEY_BASE=change-me
";

/// Create a sealed secrets file holding a commented template.
///
/// An existing key (file or environment) is reused; otherwise a new key file is written.
pub fn init(path: &Path) -> Result<(), SecretsError> {
    if path.exists() {
        return Err(SecretsError::AlreadyExists(path.to_path_buf()));
    }
    let key = load_or_create_key(path)?;
    seal_into(path, TEMPLATE, &key, false)
}

/// Editor from `$VISUAL`, then `$EDITOR`, then `vi`.
pub fn editor() -> String {
    std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .ok()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| "vi".to_string())
}

/// Decrypt into a private scratch file, open it in `editor`, then validate and re-seal.
///
/// The sealed file is left untouched when the editor fails or the result does not parse.
pub async fn edit(path: &Path, editor: &str) -> Result<(), SecretsError> {
    let sealed = match std::fs::read_to_string(path) {
        Ok(sealed) => sealed,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SecretsError::NotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(SecretsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let key = load_key(path)?;
    let plaintext = open(path, &sealed, &key)?;

    let scratch_error = |source: std::io::Error| SecretsError::Write {
        path: std::env::temp_dir(),
        source,
    };
    let mut scratch = tempfile::Builder::new()
        .prefix("jailwarden-secrets-")
        .suffix(".env")
        .tempfile()
        .map_err(scratch_error)?;
    scratch
        .write_all(plaintext.as_bytes())
        .map_err(scratch_error)?;
    scratch.flush().map_err(scratch_error)?;

    let editor_error = |reason: String| SecretsError::Editor {
        editor: editor.to_string(),
        reason,
    };

    // Through the shell so editors configured with arguments ("code --wait") work.
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("{} \"$1\"", editor))
        .arg("sh")
        .arg(scratch.path())
        .status()
        .await
        .map_err(|e| editor_error(e.to_string()))?;

    if !status.success() {
        return Err(editor_error(format!("exited with {}", status)));
    }

    // Editors may replace the file rather than write in place, so read by path.
    let edited = std::fs::read_to_string(scratch.path()).map_err(|source| SecretsError::Read {
        path: scratch.path().to_path_buf(),
        source,
    })?;
    parse(&edited, path)?;
    seal_into(path, &edited, &key, true)
}
