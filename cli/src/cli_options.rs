use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl From<LogLevel> for tracing::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Critical => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Serve the feature store over HTTP
    Serve {
        /// Specify a host for the server
        #[arg(short = 'n', long = "host", default_value = "127.0.0.1")]
        host: String,
        /// Specify a port for the server
        #[arg(short = 'p', long = "port", default_value_t = 6566)]
        port: u16,
        /// path to TLS certificate private key. You need to pass --cert as well to start server in TLS mode
        #[arg(short='k', long="key", default_value = None)]
        key: Option<String>,
        /// path to TLS certificate public key. You need to pass --key as well to start server in TLS mode
        #[arg(short='c', long="cert", default_value = None)]
        cert: Option<String>,
        /// Enable the Metrics Server
        #[arg(short = 'm', long = "metrics", default_value_t = false)]
        metrics_enabled: bool,
    },
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliOptions {
    #[arg(short = 'c', long = "chdir", default_value = None)]
    /// Directory holding the feature store configuration.
    /// Can also be set via the FEATURE_REPO_DIR environment variable.
    pub chdir: Option<String>,
    /// The logging level. Case-insensitive.
    #[arg(
        value_enum,
        long = "log-level",
        ignore_case = true,
        default_value = "info"
    )]
    pub log_level: LogLevel,
    /// Configuration file name, relative to the repository directory.
    /// Can also be set via the FEATURE_STORE_YAML environment variable
    #[arg(short='f', long="feature-store-yaml", default_value = None)]
    pub feature_store_yaml: Option<String>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve_defaults() {
        let options = CliOptions::parse_from(["feature-server", "serve"]);
        assert_eq!(options.log_level, LogLevel::Info);
        let CliCommand::Serve {
            host,
            port,
            key,
            cert,
            metrics_enabled,
        } = options.command;
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 6566);
        assert!(key.is_none() && cert.is_none());
        assert!(!metrics_enabled);
    }

    #[test]
    fn parse_global_options() {
        let options = CliOptions::parse_from([
            "feature-server",
            "--log-level",
            "WARNING",
            "-f",
            "prod.yaml",
            "serve",
            "-p",
            "8080",
            "-m",
        ]);
        assert_eq!(options.log_level, LogLevel::Warning);
        assert_eq!(options.feature_store_yaml.as_deref(), Some("prod.yaml"));
        let CliCommand::Serve {
            port,
            metrics_enabled,
            ..
        } = options.command;
        assert_eq!(port, 8080);
        assert!(metrics_enabled);
        assert_eq!(tracing::Level::from(LogLevel::Critical), tracing::Level::ERROR);
    }
}
