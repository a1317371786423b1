use std::collections::HashMap;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "kuma-api")]
#[command(about = "Sync server for Kuma time entries")]
#[command(version)]
pub struct Cli {
    /// Address to listen on (overrides KUMA_API_BIND_ADDR)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Database file path, `:memory:`, or libSQL URL (overrides DATABASE_URL)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,
}

impl Cli {
    /// Flags that were given, keyed by the environment variable they replace.
    pub fn env_overrides(&self) -> HashMap<&'static str, String> {
        let mut overrides = HashMap::new();
        if let Some(bind) = &self.bind {
            overrides.insert("KUMA_API_BIND_ADDR", bind.clone());
        }
        if let Some(url) = &self.database_url {
            overrides.insert("DATABASE_URL", url.clone());
        }
        overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_env_overrides() {
        let cli = Cli::try_parse_from([
            "kuma-api",
            "--bind",
            "0.0.0.0:9000",
            "--database-url",
            ":memory:",
        ])
        .unwrap();

        let overrides = cli.env_overrides();
        assert_eq!(overrides["KUMA_API_BIND_ADDR"], "0.0.0.0:9000");
        assert_eq!(overrides["DATABASE_URL"], ":memory:");
    }

    #[test]
    fn no_flags_means_no_overrides() {
        let cli = Cli::try_parse_from(["kuma-api"]).unwrap();
        assert!(cli.env_overrides().is_empty());
    }
}
