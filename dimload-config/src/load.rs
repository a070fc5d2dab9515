use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory holding the configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried for every configuration file, first match wins.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separates nested keys, as in `APP_SOURCE__CONNECTION__HOST`.
const ENV_SEPARATOR: &str = "__";

const LIST_SEPARATOR: &str = ",";

/// Configuration documents loadable with [`load_config`].
pub trait Config {
    /// Keys whose environment overrides hold comma-separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// One layer of the configuration hierarchy.
#[derive(Debug, Clone, Copy)]
enum Layer {
    Base,
    Environment(Environment),
}

impl Layer {
    fn file_stem(self) -> &'static str {
        match self {
            Layer::Base => "base",
            Layer::Environment(environment) => environment.as_str(),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Base => f.write_str("base configuration"),
            Layer::Environment(environment) => write!(f, "{environment} configuration"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("cannot read the working directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("no {layer} file in `{directory}`, tried {attempted}")]
    ConfigurationFileMissing {
        layer: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("invalid {layer} in `{path}`: {source}")]
    ConfigurationFileLoad {
        layer: String,
        path: PathBuf,
        source: config::ConfigError,
    },

    #[error("invalid loader environment: {0}")]
    Environment(#[from] io::Error),

    #[error("cannot merge configuration layers: {0}")]
    Builder(#[source] config::ConfigError),

    #[error("configuration does not match the expected shape: {0}")]
    Deserialization(#[source] config::ConfigError),
}

/// Loads configuration from the `configuration` directory of the working directory.
///
/// See [`load_config_from`] for the layers and their precedence.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let working_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;

    load_config_from(&working_dir.join(CONFIGURATION_DIR))
}

/// Loads configuration from `directory`.
///
/// Layers, lowest precedence first: `base.*`, `{environment}.*` with the environment taken
/// from `APP_ENVIRONMENT`, then `APP_`-prefixed environment variables. Each file may be
/// TOML, YAML or JSON.
pub fn load_config_from<T>(directory: &Path) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let environment = Environment::load()?;

    let mut builder = config::Config::builder();
    for layer in [Layer::Base, Layer::Environment(environment)] {
        builder = add_layer(builder, directory, layer)?;
    }

    builder
        .add_source(environment_overrides::<T>())
        .build()
        .map_err(LoadConfigError::Builder)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

/// Adds the file of `layer` to `builder`, failing early when the file itself is invalid.
fn add_layer(
    builder: ConfigBuilder<DefaultState>,
    directory: &Path,
    layer: Layer,
) -> Result<ConfigBuilder<DefaultState>, LoadConfigError> {
    let path = find_layer_file(directory, layer)?;
    let builder = builder.add_source(config::File::from(path.clone()));

    if let Err(source) = builder.clone().build() {
        return Err(LoadConfigError::ConfigurationFileLoad {
            layer: layer.to_string(),
            path,
            source,
        });
    }

    Ok(builder)
}

fn find_layer_file(directory: &Path, layer: Layer) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{}.{extension}", layer.file_stem())))
        .collect();

    if let Some(path) = candidates.iter().find(|path| path.is_file()) {
        return Ok(path.clone());
    }

    Err(LoadConfigError::ConfigurationFileMissing {
        layer: layer.to_string(),
        directory: directory.to_path_buf(),
        attempted: candidates
            .iter()
            .map(|path| format!("`{}`", path.display()))
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn environment_overrides<T: Config>() -> config::Environment {
    let source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if T::LIST_PARSE_KEYS.is_empty() {
        return source;
    }

    T::LIST_PARSE_KEYS.iter().fold(
        source.try_parsing(true).list_separator(LIST_SEPARATOR),
        |source, key| source.with_list_parse_key(key),
    )
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use std::fs;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        port: u16,
    }

    impl Config for Sample {
        const LIST_PARSE_KEYS: &'static [&'static str] = &[];
    }

    fn configuration_dir(test: &str) -> PathBuf {
        let directory = std::env::temp_dir().join(format!(
            "dimload-config-{test}-{}",
            std::process::id()
        ));
        fs::create_dir_all(&directory).unwrap();

        directory
    }

    #[test]
    fn missing_directory_is_reported() {
        let directory = std::env::temp_dir().join("dimload-config-does-not-exist");
        let err = load_config_from::<Sample>(&directory).unwrap_err();

        assert!(matches!(err, LoadConfigError::MissingConfigurationDirectory(_)));
    }

    #[test]
    fn environment_file_overrides_base() {
        let directory = configuration_dir("override");
        fs::write(directory.join("base.toml"), "name = \"base\"\nport = 5432\n").unwrap();
        fs::write(directory.join("dev.yaml"), "port: 6543\n").unwrap();
        fs::write(directory.join("prod.json"), "{\"port\": 7654}").unwrap();

        let sample = load_config_from::<Sample>(&directory).unwrap();
        let environment = Environment::load().unwrap();

        assert_eq!(sample.name, "base");
        match environment {
            Environment::Dev => assert_eq!(sample.port, 6543),
            Environment::Prod => assert_eq!(sample.port, 7654),
        }

        fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn malformed_base_file_names_its_layer() {
        let directory = configuration_dir("malformed");
        fs::write(directory.join("base.toml"), "name = \n").unwrap();

        let err = load_config_from::<Sample>(&directory).unwrap_err();
        assert!(matches!(
            err,
            LoadConfigError::ConfigurationFileLoad { ref layer, .. } if layer == "base configuration"
        ));

        fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn missing_environment_file_is_reported() {
        let directory = configuration_dir("missing-env");
        fs::write(directory.join("base.toml"), "name = \"base\"\nport = 5432\n").unwrap();

        let err = load_config_from::<Sample>(&directory).unwrap_err();
        assert!(matches!(err, LoadConfigError::ConfigurationFileMissing { .. }));

        fs::remove_dir_all(directory).unwrap();
    }
}
