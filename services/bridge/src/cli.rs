//! CLI definitions for bridge.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "bridge",
    version,
    about = "Sign in to the identity provider and keep a backend token in sync",
    after_help = "Examples:\n  bridge status\n  BRIDGE_PASSWORD=... bridge sign-in --email me@example.com\n  bridge api get /users/profile\n  bridge refresh"
)]
pub struct Cli {
    /// Config file (defaults to CONFIG_PATH, then ./bridge.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub json_logs: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the settled authentication state.
    Status,
    /// Sign in with email and password.
    SignIn {
        #[arg(long)]
        email: String,
        /// Password (falls back to BRIDGE_PASSWORD).
        #[arg(long)]
        password: Option<String>,
    },
    /// Register a new account.
    SignUp {
        #[arg(long)]
        email: String,
        /// Password (falls back to BRIDGE_PASSWORD).
        #[arg(long)]
        password: Option<String>,
        /// Profile metadata as key=value, repeatable.
        #[arg(long = "meta", value_parser = parse_key_value)]
        meta: Vec<(String, String)>,
    },
    /// Sign out and forget the backend token.
    SignOut,
    /// Exchange the primary session for a fresh backend token.
    Refresh,
    /// Check the backend token against the auth test endpoint.
    AuthTest,
    /// Call a backend endpoint and print the JSON response.
    Api {
        #[arg(value_enum)]
        method: HttpMethod,
        /// Endpoint path relative to the API base, e.g. /users/profile.
        endpoint: String,
        /// JSON request body.
        #[arg(long)]
        data: Option<String>,
        /// Query parameter as key=value, repeatable.
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
        /// Send without the backend token.
        #[arg(long)]
        public: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sign_up_metadata() {
        let cli = Cli::try_parse_from([
            "bridge",
            "sign-up",
            "--email",
            "a@example.com",
            "--meta",
            "display_name=Ann",
            "--meta",
            "company=Acme=Co",
        ])
        .unwrap();
        match cli.command {
            Command::SignUp { email, meta, password } => {
                assert_eq!(email, "a@example.com");
                assert!(password.is_none());
                assert_eq!(
                    meta,
                    vec![
                        ("display_name".to_string(), "Ann".to_string()),
                        ("company".to_string(), "Acme=Co".to_string()),
                    ]
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_key_value() {
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
        assert_eq!(parse_key_value("k=").unwrap(), ("k".into(), String::new()));
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from(["bridge", "status", "--json-logs", "--config", "/etc/b.toml"])
            .unwrap();
        assert!(cli.json_logs);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/b.toml")));
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn api_command_takes_method_and_params() {
        let cli = Cli::try_parse_from([
            "bridge", "api", "post", "/translate", "--data", "{}", "--param", "lang=en",
        ])
        .unwrap();
        match cli.command {
            Command::Api {
                method,
                endpoint,
                data,
                params,
                public,
            } => {
                assert_eq!(method, HttpMethod::Post);
                assert_eq!(endpoint, "/translate");
                assert_eq!(data.as_deref(), Some("{}"));
                assert_eq!(params, vec![("lang".to_string(), "en".to_string())]);
                assert!(!public);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
