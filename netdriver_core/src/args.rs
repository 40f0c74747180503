use log::info;

pub const SERVER_ARGS_SEPARATOR: &str = "--";

/// A command line divided between the fuzzing engine and the server-under-test.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitArgs {
    pub engine: Vec<String>,
    pub server: Vec<String>,
}

/// The engine's share of `args`, without splitting or logging.
pub fn engine_args(args: &[String]) -> &[String] {
    let end = args
        .iter()
        .position(|a| a == SERVER_ARGS_SEPARATOR)
        .unwrap_or(args.len());
    &args[..end]
}

/// Splits `./server -max_len=10 -- --config /etc/server.conf` so the engine only
/// sees `./server -max_len=10` and the server only sees `--config /etc/server.conf`.
///
/// Without a separator, everything stays with the engine.
pub fn split_at_separator(mut args: Vec<String>) -> SplitArgs {
    match args.iter().position(|a| a == SERVER_ARGS_SEPARATOR) {
        Some(idx) => {
            let server = args.split_off(idx + 1);
            args.truncate(idx);
            SplitArgs {
                engine: args,
                server,
            }
        }
        None => {
            info!(
                "Net driver (pid={}): no '{}' found in the command line, no arguments will be passed to the TCP server",
                std::process::id(),
                SERVER_ARGS_SEPARATOR
            );
            SplitArgs {
                engine: args,
                server: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn splits_at_first_separator() {
        let split = split_at_separator(strings(&["prog", "-x", "--", "--conf", "/etc/app.conf"]));
        assert_eq!(split.engine, strings(&["prog", "-x"]));
        assert_eq!(split.server, strings(&["--conf", "/etc/app.conf"]));
    }

    #[test]
    fn later_separators_are_forwarded_verbatim() {
        let split = split_at_separator(strings(&["prog", "--", "a", "--", "b"]));
        assert_eq!(split.engine, strings(&["prog"]));
        assert_eq!(split.server, strings(&["a", "--", "b"]));
    }

    #[test]
    fn trailing_separator_forwards_nothing() {
        let split = split_at_separator(strings(&["prog", "-runs=5", "--"]));
        assert_eq!(split.engine, strings(&["prog", "-runs=5"]));
        assert!(split.server.is_empty());
    }

    #[test]
    fn engine_share_matches_the_split() {
        for args in [
            strings(&["prog", "-x", "--", "--conf", "/etc/app.conf"]),
            strings(&["prog", "--"]),
            strings(&["prog", "-x", "corpus/"]),
        ] {
            assert_eq!(engine_args(&args), split_at_separator(args.clone()).engine);
        }
    }

    #[test]
    fn no_separator_keeps_everything_for_the_engine() {
        let args = strings(&["prog", "-x", "corpus/"]);
        let split = split_at_separator(args.clone());
        assert_eq!(split.engine, args);
        assert!(split.server.is_empty());
    }
}
