use std::fmt;
use std::fs;
use std::str::FromStr;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use config::Config;
use config::ConfigError as ExternalConfigError;
use config::File;
use config::FileFormat;
use directories::ProjectDirs;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration build/deserialize error")]
    Config(#[from] ExternalConfigError),
    #[error("Failed to read Cargo.toml")]
    ManifestIo(#[from] std::io::Error),
    #[error("Failed to parse Cargo.toml")]
    ManifestParse(#[from] toml::de::Error),
    #[error("Failed to serialize [package.metadata.ul4]")]
    ManifestSerialize(#[from] toml::ser::Error),
    #[error("invalid tag delimiters {start:?} / {end:?}")]
    InvalidDelimiters { start: String, end: String },
}

/// How literal indentation and line feeds around tags are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Whitespace {
    /// Output the template text exactly as written.
    #[default]
    Keep,
    /// Drop all indentation and line feeds.
    Strip,
    /// Drop lines that only hold a block tag and the indentation the block
    /// structure introduces.
    Smart,
}

impl Whitespace {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Whitespace::Keep => "keep",
            Whitespace::Strip => "strip",
            Whitespace::Smart => "smart",
        }
    }
}

impl fmt::Display for Whitespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownWhitespace(pub String);

impl fmt::Display for UnknownWhitespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "whitespace mode {:?} unknown (expected keep, strip or smart)",
            self.0
        )
    }
}

impl std::error::Error for UnknownWhitespace {}

impl FromStr for Whitespace {
    type Err = UnknownWhitespace;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(Whitespace::Keep),
            "strip" => Ok(Whitespace::Strip),
            "smart" => Ok(Whitespace::Smart),
            other => Err(UnknownWhitespace(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    whitespace: Whitespace,
    startdelim: String,
    enddelim: String,
    template_dirs: Vec<Utf8PathBuf>,
    extension: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            whitespace: Whitespace::Keep,
            startdelim: "<?".to_string(),
            enddelim: "?>".to_string(),
            template_dirs: Vec::new(),
            extension: "ul4".to_string(),
        }
    }
}

impl Settings {
    pub fn new(project_root: &Utf8Path) -> Result<Self, ConfigError> {
        let user_config_file = ProjectDirs::from("", "", "ul4")
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.config_dir().join("ul4.toml")).ok());

        Self::load_from_paths(project_root, user_config_file.as_deref())
    }

    fn load_from_paths(
        project_root: &Utf8Path,
        user_config_path: Option<&Utf8Path>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = user_config_path {
            builder = builder.add_source(
                File::from(path.as_std_path())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let manifest_path = project_root.join("Cargo.toml");
        if manifest_path.exists() {
            let content = fs::read_to_string(&manifest_path)?;
            let manifest: toml::Value = toml::from_str(&content)?;

            let table = ["package", "metadata", "ul4"]
                .iter()
                .try_fold(&manifest, |current, &key| current.get(key))
                .and_then(toml::Value::as_table);

            if let Some(table) = table {
                let ul4_toml = toml::to_string(table)?;
                builder = builder.add_source(File::from_str(&ul4_toml, FileFormat::Toml));
            }
        }

        for name in [".ul4.toml", "ul4.toml"] {
            builder = builder.add_source(
                File::from(project_root.join(name).as_std_path())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let config = builder.build()?;
        let mut settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        settings.template_dirs = settings
            .template_dirs
            .into_iter()
            .map(|dir| {
                if dir.is_absolute() {
                    dir
                } else {
                    project_root.join(dir)
                }
            })
            .collect();

        tracing::debug!(
            whitespace = %settings.whitespace,
            dirs = settings.template_dirs.len(),
            "loaded ul4 settings"
        );
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.startdelim.is_empty()
            || self.enddelim.is_empty()
            || self.startdelim == self.enddelim
        {
            return Err(ConfigError::InvalidDelimiters {
                start: self.startdelim.clone(),
                end: self.enddelim.clone(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn with_whitespace(mut self, whitespace: Whitespace) -> Self {
        self.whitespace = whitespace;
        self
    }

    #[must_use]
    pub fn with_template_dirs(mut self, dirs: Vec<Utf8PathBuf>) -> Self {
        self.template_dirs = dirs;
        self
    }

    #[must_use]
    pub fn whitespace(&self) -> Whitespace {
        self.whitespace
    }

    #[must_use]
    pub fn startdelim(&self) -> &str {
        &self.startdelim
    }

    #[must_use]
    pub fn enddelim(&self) -> &str {
        &self.enddelim
    }

    #[must_use]
    pub fn template_dirs(&self) -> &[Utf8PathBuf] {
        &self.template_dirs
    }

    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }
}
