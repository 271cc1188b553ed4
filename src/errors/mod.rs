//! # Process Exit Codes
//!
//! The CLI funnels every fallible stage into one of a small set of exit
//! codes (§6): a careful reader of `main.rs` alone should be able to
//! tell which stage failed just from the process's exit status, without
//! parsing stderr.

/// Exit code constants, one per failure stage named in §6/§7.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    /// Playbook file could not be read or parsed as YAML/JSON.
    pub const PLAYBOOK_LOAD: i32 = 1;
    /// Parsed tree could not be decoded into the `Playbook` struct.
    pub const PLAYBOOK_DECODE: i32 = 2;
    /// Framework construction failed (template/predicate compile,
    /// driver/source build, recorder open, monitor build).
    pub const FRAMEWORK_BUILD: i32 = 3;
    /// A run that started failed partway through.
    pub const RUN: i32 = 4;
    /// The standalone `analyst` action failed to replay a recording.
    pub const ANALYST: i32 = 5;
}

/// Logs `err` (its `Display`, and under `verbose` its full `anyhow` chain
/// via `Debug`) then exits the process with `code`. Never returns.
pub fn fail(context: &str, err: anyhow::Error, code: i32, verbose: bool) -> ! {
    tracing::error!(%context, error = %err, "fatal error");
    if verbose {
        eprintln!("{context}: {err:?}");
    } else {
        eprintln!("{context}: {err}");
    }
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::exit;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            exit::SUCCESS,
            exit::PLAYBOOK_LOAD,
            exit::PLAYBOOK_DECODE,
            exit::FRAMEWORK_BUILD,
            exit::RUN,
            exit::ANALYST,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
