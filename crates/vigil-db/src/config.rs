use vigil_core::AppError;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    pub fn from_env() -> Result<Self, AppError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            AppError::ConfigError("DATABASE_URL not set. Required for database operations.".into())
        })?;

        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Err(_) => 5,
            Ok(raw) => {
                let parsed: u32 = raw.parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(AppError::ConfigError(
                        "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        Ok(Self {
            url,
            max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_requires_url() {
        // Serialize env mutation against other tests in this module.
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::remove_var("DATABASE_URL");
        }
        assert!(matches!(
            DatabaseConfig::from_env(),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn from_env_rejects_zero_connections() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("DATABASE_URL", "postgres://localhost/vigil");
            std::env::set_var("DATABASE_MAX_CONNECTIONS", "0");
        }
        assert!(DatabaseConfig::from_env().is_err());
        unsafe {
            std::env::remove_var("DATABASE_MAX_CONNECTIONS");
            std::env::remove_var("DATABASE_URL");
        }
    }

    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
}
