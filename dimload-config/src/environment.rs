use std::fmt;
use std::io;
use std::str::FromStr;

/// Variable selecting the environment configuration file.
const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

const DEV_ENV_NAME: &str = "dev";

const PROD_ENV_NAME: &str = "prod";

/// Runtime environment of the loader.
///
/// Selects the environment configuration file and the log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

impl Environment {
    /// Reads `APP_ENVIRONMENT`, falling back to [`Environment::Dev`] when it is unset.
    pub fn load() -> Result<Environment, io::Error> {
        match std::env::var(APP_ENVIRONMENT_ENV_NAME) {
            Ok(name) => name.parse(),
            Err(_) => Ok(Environment::default()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => DEV_ENV_NAME,
            Environment::Prod => PROD_ENV_NAME,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = io::Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if name.eq_ignore_ascii_case(DEV_ENV_NAME) {
            Ok(Environment::Dev)
        } else if name.eq_ignore_ascii_case(PROD_ENV_NAME) {
            Ok(Environment::Prod)
        } else {
            Err(io::Error::other(format!(
                "unsupported loader environment '{name}', expected '{DEV_ENV_NAME}' or '{PROD_ENV_NAME}'"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_environments() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn names_round_trip_through_display() {
        for environment in [Environment::Dev, Environment::Prod] {
            assert_eq!(
                environment.to_string().parse::<Environment>().unwrap(),
                environment
            );
        }
    }
}
