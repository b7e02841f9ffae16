use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    const DISPLAY_ENVS: [&str; 14] = [
        "RUST_LOG",
        "BVG_HOST",
        "BVG_PORT",
        "BVG_DATABASE_PATH",
        "BVG_WALLET_URL",
        "BVG_INVOICE_TTL_SECS",
        "BVG_REQUIRED_CONFIRMATIONS",
        "BVG_SETTLEMENT_WINDOW_SECS",
        "BVG_TOLERANCE_BPS",
        "BVG_REORG_POLICY",
        "BVG_WEBHOOK_MAX_ATTEMPTS",
        "BVG_WEBHOOK_BACKOFF_SECS",
        "BVG_WEBHOOK_TIMEOUT_SECS",
        "BVG_SWEEP_INTERVAL_SECS",
    ];

    println!("Current environment values:");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
