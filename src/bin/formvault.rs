use formvault::config::FormVaultConfig;
use formvault::identity::{IdentityResolver, TokenCodec, TokenKind};
use formvault::ids::UserId;
use formvault::storage::{PolicySet, TableName};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "token" => match args.get(2).map(String::as_str) {
            Some("issue") => cmd_token_issue(&args[3..]),
            Some("verify") => cmd_token_verify(&args[3..]),
            Some(other) => Err(format!("unknown token command: {other}")),
            None => Err("missing token subcommand".into()),
        },
        "policies" => cmd_policies(),
        other => {
            print_usage();
            Err(format!("unknown top-level command: {other}"))
        }
    }
}

fn cmd_token_issue(args: &[String]) -> Result<(), String> {
    let secret = parse_secret_hex(args)?;
    let user: UserId = parse_flag_value(args, "--user")
        .ok_or("--user is required")?
        .parse()
        .map_err(|e| format!("invalid --user: {e}"))?;
    let email = parse_flag_value(args, "--email").ok_or("--email is required")?;
    let kind = match parse_flag_value(args, "--kind").as_deref() {
        None | Some("access") => TokenKind::Access,
        Some("refresh") => TokenKind::Refresh,
        Some(other) => return Err(format!("invalid --kind: {other}")),
    };

    let mut config = FormVaultConfig::default().with_token_secret(secret);
    if let Some(ttl) = parse_flag_value(args, "--ttl-secs") {
        let ttl: u64 = ttl.parse().map_err(|e| format!("invalid --ttl-secs: {e}"))?;
        match kind {
            TokenKind::Access => config.access_token_ttl_secs = ttl,
            TokenKind::Refresh => config.refresh_token_ttl_secs = ttl,
        }
    }
    let resolver = IdentityResolver::from_config(&config).map_err(|e| e.to_string())?;
    let token = resolver
        .issue_token(kind, user, &email, unix_now())
        .map_err(|e| e.to_string())?;
    println!("{token}");
    Ok(())
}

fn cmd_token_verify(args: &[String]) -> Result<(), String> {
    let secret = parse_secret_hex(args)?;
    let token = parse_flag_value(args, "--token").ok_or("--token is required")?;
    let codec = TokenCodec::new(Arc::new(Zeroizing::new(secret)), 0);
    let claims = codec
        .decode(&token)
        .map_err(|e| format!("{} ({})", e, e.log_cause()))?;
    println!(
        "valid\tkind={}\tsub={}\temail={}\texp={}",
        claims.kind.as_str(),
        claims.user_id,
        claims.email,
        claims.expires_at
    );
    Ok(())
}

fn cmd_policies() -> Result<(), String> {
    let policies = PolicySet::standard();
    for table in TableName::ALL {
        match policies.get(table) {
            Some(policy) => {
                println!("{table}\t{}", policy.name);
                println!("  requires: {}", policy.requires.join(", "));
                println!("  using:    {}", policy.using);
                println!("  check:    {}", policy.check_expr());
            }
            None => println!("{table}\tdeny-all"),
        }
    }
    Ok(())
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    for idx in 0..args.len() {
        if args[idx] == flag {
            return args.get(idx + 1).cloned();
        }
    }
    None
}

fn parse_secret_hex(args: &[String]) -> Result<Vec<u8>, String> {
    let hex_secret = parse_flag_value(args, "--secret-hex").ok_or("--secret-hex is required")?;
    let secret = hex::decode(hex_secret).map_err(|e| format!("invalid --secret-hex: {e}"))?;
    if secret.is_empty() {
        return Err("--secret-hex must not be empty".into());
    }
    Ok(secret)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!(
        "  formvault token issue --secret-hex <hex> --user <uuid> --email <email> [--kind access|refresh] [--ttl-secs <n>]"
    );
    eprintln!("  formvault token verify --secret-hex <hex> --token <token>");
    eprintln!("  formvault policies");
}
