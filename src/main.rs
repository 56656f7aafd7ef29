//!
//! tessera admin shell
//! -------------------
//! Drives the ticket broker from stdin, one command per line, printing one JSON
//! document per command. Meant for operators and smoke tests; the protocol
//! endpoints that services talk to live elsewhere.

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use tessera::config::CasConfig;
use tessera::identity::Credential;
use tessera::ticket::{log_id, Service};
use tessera::validation::Assertion;
use tessera::{CasError, CasResult, CentralAuthenticationService};

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]*)"|(\S+)"#).expect("static token pattern"));

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--config <file.json>]\n\nCommands (one per line on stdin):\n  login <user> <password> [remember]    open a session, prints the TGT id\n  grant <tgt> <service>                 issue a service ticket\n  renew <tgt> <service> <user> <pass>   issue a service ticket with fresh credentials\n  proxy <st> <callback-url>             exchange a service ticket for a proxy-granting ticket\n  validate <st> <service> [callback]    validate a ticket, optionally requesting a PGT\n  logout <tgt>                          destroy a session and everything under it\n  sessions [principal]                  list live sessions\n  clean                                 sweep expired tickets now\n  help | quit\n\nEnvironment:\n  RUST_LOG                 log filter (default info)\n  TESSERA_*                configuration overrides, see CasConfig"
    );
}

fn tokenize(line: &str) -> Vec<String> {
    TOKEN
        .captures_iter(line)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| m.as_str().to_string()))
        .collect()
}

fn error_json(e: &CasError) -> Value {
    json!({
        "ok": false,
        "error": e.code_str(),
        "protocol_code": e.protocol_code(),
        "status": e.http_status(),
        "message": e.to_string(),
    })
}

fn respond(result: CasResult<Value>) -> Value {
    match result {
        Ok(v) => v,
        Err(e) => error_json(&e),
    }
}

fn assertion_json(assertion: Assertion) -> CasResult<Value> {
    let rendered = serde_json::to_value(&assertion).map_err(|e| CasError::registry(e.to_string()))?;
    Ok(json!({ "ok": true, "assertion": rendered }))
}

fn usage_error(msg: &str) -> Value { json!({ "ok": false, "error": "usage", "message": msg }) }

/// Run one shell command. `None` means quit.
fn run_command(cas: &CentralAuthenticationService, line: &str) -> Option<Value> {
    let args = tokenize(line);
    let Some(cmd) = args.first() else { return Some(Value::Null) };
    let a: Vec<&str> = args.iter().skip(1).map(|s| s.as_str()).collect();
    let out = match (cmd.to_ascii_lowercase().as_str(), a.as_slice()) {
        ("quit" | "exit", _) => return None,
        ("help", _) => json!({ "ok": true, "commands": ["login", "grant", "renew", "proxy", "validate", "logout", "sessions", "clean"] }),
        ("login", [user, pass, rest @ ..]) => {
            let cred = if rest.first().map(|r| r.eq_ignore_ascii_case("remember")).unwrap_or(false) {
                Credential::remember_me(*user, *pass)
            } else {
                Credential::username_password(*user, *pass)
            };
            respond(cas.create_ticket_granting_ticket(&cred).map(|t| {
                json!({ "ok": true, "tgt": t.id, "principal": t.authentication().principal.id, "long_term": t.authentication().long_term })
            }))
        }
        ("grant", [tgt, service]) => respond(
            cas.grant_service_ticket(tgt, &Service::new(*service), None)
                .map(|st| json!({ "ok": true, "st": st.id, "service": st.service.id, "from_new_login": st.from_new_login })),
        ),
        ("renew", [tgt, service, user, pass]) => {
            let cred = Credential::username_password(*user, *pass);
            respond(
                cas.grant_service_ticket(tgt, &Service::new(*service), Some(&cred))
                    .map(|st| json!({ "ok": true, "st": st.id, "service": st.service.id, "from_new_login": st.from_new_login })),
            )
        }
        ("proxy", [st, callback]) => respond(
            cas.delegate_ticket_granting_ticket(st, &Credential::http_service(*callback))
                .map(|pgt| json!({ "ok": true, "pgt": pgt.id, "parent": pgt.parent_id })),
        ),
        ("validate", [st, service]) => respond(cas.validate_service_ticket(st, &Service::new(*service)).and_then(assertion_json)),
        ("validate", [st, service, callback]) => respond(
            cas.validate_service_ticket_with_proxy(st, &Service::new(*service), &Credential::http_service(*callback))
                .and_then(assertion_json),
        ),
        ("logout", [tgt]) => respond(cas.destroy_ticket_granting_ticket(tgt).map(|reqs| {
            let sent: Vec<Value> = reqs.iter().map(|r| json!({ "service": r.service.id, "status": r.status, "request_id": r.request_id })).collect();
            json!({ "ok": true, "logout_requests": sent })
        })),
        ("sessions", rest) => {
            let sessions = match rest.first() {
                Some(principal) => cas.sessions_for(principal),
                None => cas.registry().sessions_at(cas.clock().now()),
            };
            respond(sessions.map(|list| {
                let rows: Vec<Value> = list
                    .iter()
                    .map(|t| json!({
                        "tgt": log_id(&t.id),
                        "principal": t.authentication().principal.id,
                        "created_at": t.stats.created_at,
                        "last_used_at": t.stats.last_used_at,
                        "services": t.services.len(),
                    }))
                    .collect();
                json!({ "ok": true, "count": rows.len(), "sessions": rows })
            }))
        }
        ("clean", _) => respond(cas.cleaner().clean().map(|n| json!({ "ok": true, "removed": n }))),
        (other, _) => usage_error(&format!("unknown command or wrong arguments: '{}'", other)),
    };
    Some(out)
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);
    let mut config_path: Option<PathBuf> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let p = args.get(i).context("--config needs a path")?;
                config_path = Some(PathBuf::from(p));
            }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            other => {
                print_usage(&program);
                anyhow::bail!("unknown argument '{}'", other);
            }
        }
        i += 1;
    }

    let cfg = CasConfig::load(config_path.as_deref())?;
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "tessera",
        "tessera starting: RUST_LOG='{}', registry={:?}, services={}, cleaner_interval_secs={}",
        rust_log, cfg.registry.kind, cfg.services.len(), cfg.registry.cleaner_interval_secs
    );

    let registry = cfg.build_registry()?;
    let cas = cfg.build_service(registry.registry())?;
    let cleaner = (cfg.registry.cleaner_interval_secs > 0)
        .then(|| cas.cleaner().spawn(Duration::from_secs(cfg.registry.cleaner_interval_secs)));

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        match run_command(&cas, &line) {
            None => break,
            Some(Value::Null) => continue,
            Some(v) => {
                writeln!(stdout, "{}", v)?;
                stdout.flush()?;
            }
        }
    }

    if let Some(handle) = cleaner {
        handle.stop();
    }
    if let Err(e) = registry.save_snapshot() {
        warn!(target: "tessera::registry", "snapshot on shutdown failed: {}", e);
    }
    info!(target: "tessera", "tessera stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> CentralAuthenticationService {
        let cfg: CasConfig = serde_json::from_str(r#"{
            "auth": { "accept_test_credentials": true },
            "services": [ { "name": "all https", "service_pattern": "https://.*", "proxy_policy": { "Regex": "https://.*" } } ]
        }"#).unwrap();
        let reg = cfg.build_registry().unwrap();
        cfg.build_service(reg.registry()).unwrap()
    }

    #[test]
    fn tokenizer_keeps_quoted_arguments() {
        assert_eq!(tokenize(r#"login alice "pass word""#), vec!["login", "alice", "pass word"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn shell_round_trip() {
        let cas = shell();
        let login = run_command(&cas, "login alice alice").unwrap();
        let tgt = login["tgt"].as_str().unwrap().to_string();
        let grant = run_command(&cas, &format!("grant {} https://app.example", tgt)).unwrap();
        let st = grant["st"].as_str().unwrap().to_string();
        let v = run_command(&cas, &format!("validate {} https://app.example", st)).unwrap();
        assert_eq!(v["ok"], json!(true));
        assert_eq!(v["assertion"]["primary_authentication"]["principal"]["id"], json!("alice"));

        let again = run_command(&cas, &format!("validate {} https://app.example", st)).unwrap();
        assert_eq!(again["protocol_code"], json!("INVALID_TICKET"));

        let sessions = run_command(&cas, "sessions alice").unwrap();
        assert_eq!(sessions["count"], json!(1));
        assert_eq!(run_command(&cas, &format!("logout {}", tgt)).unwrap()["ok"], json!(true));
        assert_eq!(run_command(&cas, "sessions").unwrap()["count"], json!(0));
    }

    #[test]
    fn bad_input_is_reported_not_fatal() {
        let cas = shell();
        assert_eq!(run_command(&cas, "grant").unwrap()["error"], json!("usage"));
        assert_eq!(run_command(&cas, "login bob nope").unwrap()["error"], json!("authentication_failed"));
        assert!(run_command(&cas, "quit").is_none());
        assert_eq!(run_command(&cas, "").unwrap(), Value::Null);
    }
}
