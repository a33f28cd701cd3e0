//! Shared utilities.

/// Flags whose values must never reach a log line.
const SENSITIVE_FLAGS: [&str; 5] = ["--rpcpass", "--password", "--seed", "--rpcuser", "--username"];

fn is_sensitive(flag: &str) -> bool {
    SENSITIVE_FLAGS.contains(&flag)
}

/// Replace credential values in an argument list with `***`.
///
/// Handles both `--flag=value` and `--flag value`; the flag stays visible.
pub fn mask_args(args: &[String]) -> Vec<String> {
    let mut masked = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            masked.push("***".to_string());
            mask_next = false;
            continue;
        }
        match arg.split_once('=') {
            Some((flag, _)) if is_sensitive(flag) => masked.push(format!("{flag}=***")),
            Some(_) => masked.push(arg.clone()),
            None => {
                mask_next = is_sensitive(arg);
                masked.push(arg.clone());
            }
        }
    }
    masked
}

/// Join arguments into one masked, log-friendly line.
pub fn display_command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in mask_args(args) {
        line.push(' ');
        line.push_str(&arg);
    }
    line
}
