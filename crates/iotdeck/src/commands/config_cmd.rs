//! Config subcommand handlers.

use std::io::BufRead;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let Some(p) = cfg.profiles.get(name) else {
            continue;
        };
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        if p.signing_secret.is_some() {
            let _ = writeln!(out, "signing_secret = \"****\"");
        }
        if let Some(ref env) = p.signing_secret_env {
            let _ = writeln!(out, "signing_secret_env = \"{env}\"");
        }
        if p.insecure {
            let _ = writeln!(out, "insecure = true");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(timeout) = p.request_timeout {
            let _ = writeln!(out, "request_timeout = {timeout}");
        }
        if let Ok(hub) = toml::to_string(&p.hub) {
            if !hub.trim().is_empty() {
                let _ = writeln!(out, "\n[profiles.{name}.hub]");
                let _ = write!(out, "{hub}");
            }
        }
    }

    out
}

fn read_secret_from_stdin() -> Result<String, CliError> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let secret = line.trim_end_matches(['\r', '\n']).to_owned();
    if secret.is_empty() {
        return Err(CliError::Validation {
            field: "secret".into(),
            reason: "empty secret on stdin".into(),
        });
    }
    Ok(secret)
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::config_path(global);

    match args.command {
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            config::save_config_to(&path, &Config::starter())?;
            if !global.quiet {
                eprintln!("Wrote {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            output::print_output(&format_config_redacted(&cfg), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load(global)?;
            let default = config::active_profile_name(global, &cfg);
            let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
            names.sort();
            let lines: Vec<String> = names
                .into_iter()
                .map(|name| {
                    if name == default {
                        format!("* {name}")
                    } else {
                        format!("  {name}")
                    }
                })
                .collect();
            output::print_output(&lines.join("\n"), global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load(global)?;
            if !cfg.profiles.contains_key(&name) {
                let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
                available.sort();
                return Err(CliError::ProfileNotFound {
                    name,
                    available: available.join(", "),
                });
            }
            cfg.default_profile = Some(name);
            config::save_config_to(&path, &cfg)?;
            Ok(())
        }

        ConfigCommand::SetSecret { value } => {
            let cfg = config::load(global)?;
            let name = config::active_profile_name(global, &cfg);
            let secret = match value {
                Some(v) => v,
                None => read_secret_from_stdin()?,
            };
            config::store_signing_secret(&name, &secret)?;
            if !global.quiet {
                eprintln!("Stored signing secret for profile '{name}' in the system keyring");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_view_hides_plaintext_secret() {
        let mut cfg = Config::starter();
        if let Some(profile) = cfg.profiles.get_mut("default") {
            profile.signing_secret = Some("hunter2".into());
            profile.hub.max_retries = Some(5);
        }
        let shown = format_config_redacted(&cfg);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("signing_secret = \"****\""));
        assert!(shown.contains("signing_secret_env = \"IOTDECK_SIGNING_SECRET\""));
        assert!(shown.contains("max_retries = 5"));
    }
}
