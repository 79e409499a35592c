//! Line-oriented serial console: the operator's calibration interface.
//!
//! Commands are case-insensitive; readings print in kilograms.

/// Parsed console command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Help,
    Tare,
    /// Single-point calibration against a known mass in grams.
    Cal(f64),
    /// `cal` with no argument: print usage.
    CalUsage,
    /// Two-point: record point 1 at the given grams.
    Cal1(f64),
    /// Two-point: record point 2 at the given grams.
    Cal2(f64),
    Solve,
    ResetCal,
}

pub const HELP: &str = "\
Commands:
  help              - show this help
  tare              - tare the empty platform
  cal <g>           - single-point calibration (quick)
  cal1 <g>          - two-point: record point 1 at <g>
  cal2 <g>          - two-point: record point 2 at <g>
  solve             - solve two-point factor from cal1/cal2
  resetcal          - drop saved factor, revert to default
Units: readings print in kilograms (kg).";

/// Parse one console line. `Err` carries a printable message.
pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Err(String::new());
    }
    let mut parts = line.split_whitespace();
    let head = parts.next().unwrap_or_default().to_ascii_lowercase();
    let arg = parts.next();

    match (head.as_str(), arg) {
        ("help", _) => Ok(Command::Help),
        ("tare", _) => Ok(Command::Tare),
        ("cal", None) => Ok(Command::CalUsage),
        ("cal", Some(g)) => parse_grams(g).map(Command::Cal),
        ("cal1", Some(g)) => parse_grams(g).map(Command::Cal1),
        ("cal1", None) => Err("usage: cal1 <grams>".to_string()),
        ("cal2", Some(g)) => parse_grams(g).map(Command::Cal2),
        ("cal2", None) => Err("usage: cal2 <grams>".to_string()),
        ("solve", _) => Ok(Command::Solve),
        ("resetcal", _) => Ok(Command::ResetCal),
        _ => Err(format!("unknown command: {line}\n{HELP}")),
    }
}

fn parse_grams(s: &str) -> Result<f64, String> {
    s.parse::<f64>()
        .map_err(|_| format!("not a number: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("help", Command::Help)]
    #[case("TARE", Command::Tare)]
    #[case("cal 500", Command::Cal(500.0))]
    #[case("Cal 500.5", Command::Cal(500.5))]
    #[case("cal", Command::CalUsage)]
    #[case("cal1 100", Command::Cal1(100.0))]
    #[case("cal2 1000", Command::Cal2(1000.0))]
    #[case("SOLVE", Command::Solve)]
    #[case("resetcal", Command::ResetCal)]
    #[case("  tare  ", Command::Tare)]
    fn parses(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(parse(line).unwrap(), expected);
    }

    #[rstest]
    #[case("cal abc")]
    #[case("cal1")]
    #[case("frobnicate")]
    fn rejects(#[case] line: &str) {
        assert!(parse(line).is_err());
    }

    #[test]
    fn unknown_command_echoes_help() {
        let err = parse("wat").unwrap_err();
        assert!(err.contains("unknown command"));
        assert!(err.contains("tare"));
    }
}
