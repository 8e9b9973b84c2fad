use anyhow::{anyhow, Context, Result};
use std::env;
use std::sync::Arc;

use crate::payments::providers::{DummyBackend, DummyConfig, PayuBackend, PayuConfig};
use crate::payments::{BackendRegistry, LifecyclePolicy};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Slugs of the enabled payment backends
    pub backends: Vec<String>,
    pub payu: Option<PayuConfig>,
    pub dummy: Option<DummyConfig>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    /// Externally reachable base URL, used to build callback URLs
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `None` keeps records in memory
    pub url: Option<String>,
    pub max_connections: u32,
}

fn parse_backends(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .context("PORT must be a valid number")?;

        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let backends =
            parse_backends(&env::var("PAYMENT_BACKENDS").unwrap_or_else(|_| "dummy".to_string()));

        let payu = if backends.iter().any(|b| b == "payu") {
            Some(PayuConfig::from_env().context("Invalid PayU configuration")?)
        } else {
            None
        };

        let dummy = if backends.iter().any(|b| b == "dummy") {
            Some(DummyConfig::from_env().context("Invalid dummy backend configuration")?)
        } else {
            None
        };

        let config = Config {
            server,
            database,
            backends,
            payu,
            dummy,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if !self.server.public_url.starts_with("http://")
            && !self.server.public_url.starts_with("https://")
        {
            return Err(anyhow!(
                "PUBLIC_URL must be an http(s) URL, got {}",
                self.server.public_url
            ));
        }

        if self.server.environment == "production" && self.database.url.is_none() {
            return Err(anyhow!("DATABASE_URL is required in production"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.backends.is_empty() {
            return Err(anyhow!("PAYMENT_BACKENDS must name at least one backend"));
        }

        for backend in &self.backends {
            if backend != "payu" && backend != "dummy" {
                return Err(anyhow!("Unknown payment backend in PAYMENT_BACKENDS: {}", backend));
            }
        }

        if let Some(payu) = &self.payu {
            if payu.second_key.trim().is_empty() {
                return Err(anyhow!("PAYU_SECOND_KEY cannot be empty"));
            }
            if payu.api_url.trim().is_empty() {
                return Err(anyhow!("PAYU_API_URL cannot be empty"));
            }
        }

        Ok(())
    }

    /// Instantiate every enabled backend
    pub fn build_registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();

        if let Some(payu) = &self.payu {
            let policy = LifecyclePolicy::with_tolerance(payu.paid_tolerance);
            let backend = PayuBackend::new(payu.clone()).context("Failed to create PayU backend")?;
            registry.register(Arc::new(backend), policy);
        }

        if let Some(dummy) = &self.dummy {
            let policy = LifecyclePolicy::with_tolerance(dummy.paid_tolerance);
            registry.register(Arc::new(DummyBackend::new(dummy.clone())), policy);
        }

        if registry.is_empty() {
            return Err(anyhow!("No payment backend configured"));
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                environment: "development".to_string(),
                public_url: "https://shop.example.com".to_string(),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
            },
            backends: vec!["dummy".to_string()],
            payu: None,
            dummy: Some(DummyConfig::default()),
        }
    }

    #[test]
    fn test_parse_backends() {
        assert_eq!(parse_backends(" PayU, dummy ,,"), vec!["payu", "dummy"]);
        assert!(parse_backends("").is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut low_port = config();
        low_port.server.port = 80;
        assert!(low_port.validate().is_err());

        let mut production = config();
        production.server.environment = "production".to_string();
        assert!(production.validate().is_err());
        production.database.url = Some("postgres://localhost/payflow".to_string());
        assert!(production.validate().is_ok());

        let mut unknown = config();
        unknown.backends.push("stripe".to_string());
        assert!(unknown.validate().is_err());
    }

    #[test]
    fn test_build_registry() {
        let registry = config().build_registry().unwrap();
        assert_eq!(registry.slugs(), vec!["dummy"]);

        let mut both = config();
        both.payu = Some(PayuConfig {
            second_key: "key".to_string(),
            ..PayuConfig::default()
        });
        let registry = both.build_registry().unwrap();
        assert_eq!(registry.slugs(), vec!["dummy", "payu"]);
    }
}
