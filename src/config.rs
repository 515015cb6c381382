use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const APP_ID: &str = "APP_ID";
pub const PRIVATE_KEY_PATH: &str = "PRIVATE_KEY_PATH";
pub const WEBHOOK_SECRET: &str = "WEBHOOK_SECRET";
pub const ENTERPRISE_HOSTNAME: &str = "ENTERPRISE_HOSTNAME";
pub const PORT: &str = "PORT";

/// Comment body posted on every newly opened pull request, read from the working directory.
pub const MESSAGE_PATH: &str = "message.md";

const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    PrivateKey,
    CommentTemplate,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::PrivateKey => f.write_str("private key"),
            FileKind::CommentTemplate => f.write_str("comment template"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<&'static str>),

    #[error("Error reading {kind} file at {}: {source}", .path.display())]
    UnreadableFile {
        kind: FileKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("The {kind} file at {} is empty", .path.display())]
    EmptyFile { kind: FileKind, path: PathBuf },

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

impl ConfigError {
    /// What the operator should do about it.
    pub fn remediation(&self) -> String {
        match self {
            ConfigError::MissingVariables(_) => {
                "Please create a .env file based on .env.example".to_string()
            },
            ConfigError::UnreadableFile { kind: FileKind::CommentTemplate, .. } => {
                format!("Please ensure {} exists in the project root", MESSAGE_PATH)
            },
            ConfigError::UnreadableFile { kind: FileKind::PrivateKey, .. } => format!(
                "Please ensure the {} environment variable points to a valid private key file",
                PRIVATE_KEY_PATH
            ),
            ConfigError::EmptyFile { kind: FileKind::CommentTemplate, .. } => format!(
                "Please write the comment to post on new pull requests into {}",
                MESSAGE_PATH
            ),
            ConfigError::EmptyFile { kind: FileKind::PrivateKey, .. } => format!(
                "Please download a private key from your GitHub App's settings and point {} at it",
                PRIVATE_KEY_PATH
            ),
            ConfigError::InvalidValue { name, .. } => match *name {
                APP_ID => "APP_ID must be the numeric id of your GitHub App".to_string(),
                _ => format!("{} must be a number between 1 and 65535", name),
            },
        }
    }
}

/// Everything the process needs, loaded once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub app_id: u64,
    pub private_key: String,
    pub webhook_secret: String,
    pub enterprise_hostname: Option<String>,
    pub port: u16,
    pub comment_template: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(|name| env::var(name).ok(), MESSAGE_PATH)
    }

    /// Builds the config from `lookup` (an environment-like source) and the comment
    /// template at `template_path`. Empty values count as missing.
    pub fn load<F>(lookup: F, template_path: impl AsRef<Path>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let required = [APP_ID, PRIVATE_KEY_PATH, WEBHOOK_SECRET];
        let missing: Vec<&'static str> = required
            .into_iter()
            .filter(|name| get(*name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingVariables(missing));
        }

        let raw_app_id = get(APP_ID).unwrap_or_default();
        let app_id = raw_app_id
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue {
                name: APP_ID,
                value: raw_app_id.clone(),
            })?;

        let port = match get(PORT) {
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: PORT,
                        value: raw,
                    })
                },
            },
            None => DEFAULT_PORT,
        };

        let private_key = read_file(
            FileKind::PrivateKey,
            get(PRIVATE_KEY_PATH).unwrap_or_default(),
        )?;
        let comment_template = read_file(FileKind::CommentTemplate, template_path)?;

        Ok(Self {
            app_id,
            private_key,
            webhook_secret: get(WEBHOOK_SECRET).unwrap_or_default(),
            enterprise_hostname: get(ENTERPRISE_HOSTNAME).map(|host| host.trim().to_string()),
            port,
            comment_template,
        })
    }
}

/// Reads a required file; whitespace-only contents count as empty.
fn read_file(kind: FileKind, path: impl AsRef<Path>) -> Result<String, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::UnreadableFile {
        kind,
        path: path.to_path_buf(),
        source,
    })?;

    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyFile {
            kind,
            path: path.to_path_buf(),
        });
    }

    Ok(contents)
}
